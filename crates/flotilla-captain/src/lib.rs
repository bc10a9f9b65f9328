//! The captain — orchestration core.
//!
//! Parses recon reports, turns them into action plans, dispatches agents to
//! execute them, and escalates to humans when autonomy runs out.

pub mod captain;
pub mod dispatch;
pub mod engine;
pub mod memory;
pub mod parser;
pub mod recon;
pub mod tasks;

pub use captain::{
    CaptainHandle, CaptainLoop, CaptainLoopConfig, CaptainStatus, Escalation, EscalationAction,
    Notifier, TracingNotifier,
};
pub use dispatch::{Dispatcher, DispatcherConfig};
pub use engine::analyze;
pub use memory::{JsonFileMemory, MemoryStore};
pub use parser::parse_report;
pub use recon::{ReconInvoker, ReconRunner, SubprocessRecon};
pub use tasks::{classify_task_type, needs_recon, FileTaskSource, TaskSource, TaskSpec};
