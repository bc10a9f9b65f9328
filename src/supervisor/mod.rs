//! Captain supervisor — keeps the captain agent alive.

pub mod monitor;
pub mod types;

pub use monitor::CaptainSupervisor;
pub use types::{SupervisorConfig, SupervisorState, SupervisorStatus};
