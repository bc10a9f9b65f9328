//! Tool registry — named operations with typed parameters and access gating.
//!
//! The server resolves a method name, checks the session's access level, and
//! invokes the handler. Handlers own all side effects; the registry owns
//! none. Handlers must be safe under concurrent invocation.

use std::collections::HashMap;
use std::sync::Arc;

use flotilla_core::protocol::codes;
use flotilla_core::{AccessLevel, Error, Result, RpcResponse};
use serde_json::Value;

use crate::session::Session;

/// What a handler sees about the calling session.
pub struct ToolContext {
    pub session: Arc<Session>,
}

impl ToolContext {
    pub fn agent_id(&self) -> &str {
        &self.session.agent_id
    }
}

/// One named operation. Implementations deserialize their own typed params
/// and return `InvalidInput` on schema violations.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema describing the parameters, served to clients for discovery.
    fn params_schema(&self) -> Value;

    /// Read-only operations are the only ones `readonly-all` sessions may call.
    fn read_only(&self) -> bool {
        false
    }

    /// Operations that reach into other agents' panes require `admin`.
    fn requires_admin(&self) -> bool {
        false
    }

    async fn call(&self, ctx: &ToolContext, params: Value) -> Result<Value>;
}

/// Deserialize typed params, mapping failures to `InvalidInput`.
pub fn parse_params<P: serde::de::DeserializeOwned>(params: Value) -> Result<P> {
    serde_json::from_value(params).map_err(|e| Error::invalid_input(format!("params: {e}")))
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Replaces any existing handler with the same name.
    pub fn register(&mut self, handler: impl ToolHandler + 'static) {
        self.tools.insert(handler.name().to_string(), Arc::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Dispatch one inbound call and produce the JSON-RPC response.
    pub async fn dispatch(&self, id: &str, method: &str, params: Value, ctx: &ToolContext) -> RpcResponse {
        let handler = match self.get(method) {
            Some(h) => h,
            None => return RpcResponse::method_not_found(id, method),
        };

        let allowed = match ctx.session.access {
            AccessLevel::Admin => true,
            AccessLevel::User => !handler.requires_admin(),
            AccessLevel::ReadonlyAll => handler.read_only(),
        };
        if !allowed {
            return RpcResponse::access_denied(id, method);
        }

        match handler.call(ctx, params).await {
            Ok(result) => RpcResponse::ok(id, result),
            Err(e) => RpcResponse::err(id, error_code(&e), e.to_string()),
        }
    }
}

fn error_code(err: &Error) -> i32 {
    match err {
        Error::InvalidInput(_) => codes::INVALID_PARAMS,
        Error::NotFound(_) | Error::PaneNotFound(_) => codes::NOT_FOUND,
        Error::Conflict(_) => codes::CONFLICT,
        Error::SessionGone(_) => codes::SESSION_GONE,
        _ => codes::INTERNAL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRegistry;

    struct Echo;

    #[async_trait::async_trait]
    impl ToolHandler for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echo params back"
        }
        fn params_schema(&self) -> Value {
            serde_json::json!({ "type": "object" })
        }
        fn read_only(&self) -> bool {
            true
        }
        async fn call(&self, _ctx: &ToolContext, params: Value) -> Result<Value> {
            Ok(params)
        }
    }

    struct AdminOnly;

    #[async_trait::async_trait]
    impl ToolHandler for AdminOnly {
        fn name(&self) -> &str {
            "close_pane"
        }
        fn description(&self) -> &str {
            "close a pane"
        }
        fn params_schema(&self) -> Value {
            serde_json::json!({ "type": "object" })
        }
        fn requires_admin(&self) -> bool {
            true
        }
        async fn call(&self, _ctx: &ToolContext, _params: Value) -> Result<Value> {
            Ok(serde_json::json!({ "ok": true }))
        }
    }

    fn ctx(access: AccessLevel) -> ToolContext {
        let reg = SessionRegistry::new();
        ToolContext {
            session: reg.create("a1", access, None),
        }
    }

    #[tokio::test]
    async fn dispatch_routes_to_handler() {
        let mut reg = ToolRegistry::new();
        reg.register(Echo);
        let resp = reg
            .dispatch("1", "echo", serde_json::json!({ "x": 1 }), &ctx(AccessLevel::User))
            .await;
        assert_eq!(resp.result.unwrap()["x"], 1);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let reg = ToolRegistry::new();
        let resp = reg
            .dispatch("1", "nope", Value::Null, &ctx(AccessLevel::Admin))
            .await;
        assert_eq!(resp.error.unwrap().code, codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn readonly_sessions_only_call_read_only_ops() {
        let mut reg = ToolRegistry::new();
        reg.register(Echo);
        reg.register(AdminOnly);

        let ro = ctx(AccessLevel::ReadonlyAll);
        let ok = reg.dispatch("1", "echo", Value::Null, &ro).await;
        assert!(ok.error.is_none());
        let denied = reg.dispatch("2", "close_pane", Value::Null, &ro).await;
        assert_eq!(denied.error.unwrap().code, codes::ACCESS_DENIED);
    }

    #[tokio::test]
    async fn user_sessions_cannot_call_admin_ops() {
        let mut reg = ToolRegistry::new();
        reg.register(AdminOnly);
        let denied = reg
            .dispatch("1", "close_pane", Value::Null, &ctx(AccessLevel::User))
            .await;
        assert_eq!(denied.error.unwrap().code, codes::ACCESS_DENIED);

        let allowed = reg
            .dispatch("2", "close_pane", Value::Null, &ctx(AccessLevel::Admin))
            .await;
        assert!(allowed.error.is_none());
    }
}
