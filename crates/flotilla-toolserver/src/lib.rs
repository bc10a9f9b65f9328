//! Tool-call server — the bidirectional control channel to agents.
//!
//! One SSE stream per session carries server→agent events; a companion
//! JSON-RPC POST endpoint keyed by session id carries agent→server calls.
//! Operation semantics live in injected handlers, never in the transport.

pub mod builtin;
pub mod registry;
pub mod server;
pub mod session;

pub use builtin::{register_builtin_tools, CaptainSignal};
pub use registry::{ToolContext, ToolHandler, ToolRegistry};
pub use server::{router, ToolServerState};
pub use session::{Session, SessionRegistry, EVENT_QUEUE_CAP};
