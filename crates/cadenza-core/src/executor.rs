//! Tool execution scoped to the active handler frame

use std::sync::Arc;
use std::time::Duration;

use cadenza_store::ProfileField;
use tracing::{debug, error, warn};

use crate::error::ToolError;
use crate::stack::HandlerFrame;
use crate::tools::{ToolContext, ToolDefinition, ToolHandler, ToolRegistry};
use crate::types::{HandlerId, ToolCall, ToolResult};

/// Runs tool calls on behalf of a handler frame.
///
/// Authorization is checked against the frame itself, so a misrouted call
/// is rejected even if a router forgets its own allow-list.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// Resolve the handler for `call` if the frame may use it
    pub fn authorize(
        &self,
        call: &ToolCall,
        frame: &HandlerFrame,
    ) -> Result<Arc<dyn ToolHandler>, ToolError> {
        if !frame.allows(&call.name) {
            error!(
                "Routing defect: {} handler attempted tool '{}' (call {})",
                frame.handler, call.name, call.id
            );
            return Err(ToolError::Unauthorized {
                tool: call.name.clone(),
                handler: frame.handler,
            });
        }
        self.registry
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(format!("Unknown tool: {}", call.name)))
    }

    /// Profile fields the call would change; empty for safe tools
    pub fn sensitive_fields(
        &self,
        call: &ToolCall,
        frame: &HandlerFrame,
    ) -> Result<Vec<ProfileField>, ToolError> {
        let handler = self.authorize(call, frame)?;
        handler.mutated_fields(&call.args)
    }

    /// Authorize and run one call. Every failure becomes a failure result.
    pub async fn execute(&self, call: &ToolCall, frame: &HandlerFrame, ctx: &ToolContext) -> ToolResult {
        let handler = match self.authorize(call, frame) {
            Ok(handler) => handler,
            Err(e) => return ToolResult::failure(call, &e),
        };

        debug!("Executing tool '{}' for {} handler", call.name, frame.handler);
        let outcome = tokio::time::timeout(self.timeout, handler.execute(ctx, call.args.clone())).await;
        match outcome {
            Ok(Ok(output)) => ToolResult::success(call, output),
            Ok(Err(e)) => {
                warn!("Tool '{}' failed: {}", call.name, e);
                ToolResult::failure(call, &e)
            }
            Err(_) => {
                warn!("Tool '{}' timed out after {:?}", call.name, self.timeout);
                ToolResult::failure(call, &ToolError::Timeout(self.timeout.as_secs()))
            }
        }
    }

    /// Definitions of the tools a handler may use
    pub fn definitions_for(&self, handler: HandlerId) -> Vec<ToolDefinition> {
        self.registry.filter_tools(handler.allowed_tools())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolErrorKind;
    use crate::tools::names;
    use crate::types::ToolOutcome;
    use async_trait::async_trait;
    use cadenza_store::{MusicStoreDb, Profile};
    use serde_json::{Value, json};

    fn ctx() -> ToolContext {
        ToolContext {
            user_id: 1,
            conversation_id: "test".to_string(),
        }
    }

    async fn executor() -> (ToolExecutor, Arc<MusicStoreDb>) {
        let db = Arc::new(MusicStoreDb::open_in_memory().unwrap());
        db.insert_customer(&Profile::new(1, "Ada", "Lovelace", "ada@example.com"))
            .await
            .unwrap();
        let registry = ToolRegistry::with_defaults(db.clone(), db.clone());
        (ToolExecutor::new(Arc::new(registry), Duration::from_secs(5)), db)
    }

    #[tokio::test]
    async fn test_music_handler_cannot_update_email() {
        let (executor, db) = executor().await;
        let frame = HandlerFrame::new(HandlerId::MusicCatalog, Some("call_entry".to_string()));
        let call = ToolCall::new(names::UPDATE_EMAIL, json!({"new_value": "evil@example.com"}));

        let result = executor.execute(&call, &frame, &ctx()).await;
        assert_eq!(result.error_kind(), Some(ToolErrorKind::Unauthorized));
        assert_eq!(result.call_id, call.id);

        let profile = db.get_customer(1).await.unwrap().unwrap();
        assert_eq!(profile.email, "ada@example.com");
    }

    #[tokio::test]
    async fn test_sensitive_fields_checks_authorization_first() {
        let (executor, _db) = executor().await;
        let call = ToolCall::new(names::UPDATE_EMAIL, json!({"new_value": "ada@new.example"}));

        let music = HandlerFrame::new(HandlerId::MusicCatalog, None);
        assert!(matches!(
            executor.sensitive_fields(&call, &music),
            Err(ToolError::Unauthorized { .. })
        ));

        let customer = HandlerFrame::new(HandlerId::CustomerProfile, None);
        assert_eq!(
            executor.sensitive_fields(&call, &customer).unwrap(),
            vec![ProfileField::Email]
        );

        let read = ToolCall::new(names::GET_CUSTOMER_INFO, json!({}));
        assert!(executor.sensitive_fields(&read, &customer).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_collaborator_failure_becomes_result() {
        let (executor, _db) = executor().await;
        let frame = HandlerFrame::new(HandlerId::MusicCatalog, None);
        let call = ToolCall::new(names::SIMILARITY_SEARCH, json!({"reference": "Nothing Like It"}));

        let result = executor.execute(&call, &frame, &ctx()).await;
        assert_eq!(result.error_kind(), Some(ToolErrorKind::NotFound));
    }

    struct SlowTool;

    #[async_trait]
    impl ToolHandler for SlowTool {
        fn name(&self) -> &str {
            names::DESCRIBE_SERVICES
        }

        fn description(&self) -> &str {
            "never answers in time"
        }

        fn input_schema(&self) -> Value {
            json!({})
        }

        async fn execute(&self, _ctx: &ToolContext, _input: Value) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_timeout_is_a_tool_error() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool));
        let executor = ToolExecutor::new(Arc::new(registry), Duration::from_millis(20));
        let frame = HandlerFrame::new(HandlerId::Primary, None);
        let call = ToolCall::new(names::DESCRIBE_SERVICES, json!({}));

        let result = executor.execute(&call, &frame, &ctx()).await;
        assert!(matches!(
            result.outcome,
            ToolOutcome::Failure {
                kind: ToolErrorKind::Timeout,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_definitions_follow_allowed_tools() {
        let (executor, _db) = executor().await;
        let defs = executor.definitions_for(HandlerId::CustomerProfile);
        assert_eq!(defs.len(), 4);
        assert!(defs.iter().all(|d| HandlerId::CustomerProfile.allowed_tools().contains(&d.name.as_str())));
    }
}
