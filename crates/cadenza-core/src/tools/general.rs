//! General tools available to the primary handler

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{ToolContext, ToolHandler, json_schema, names};
use crate::error::ToolError;
use crate::types::HandlerId;

/// Describe what the store assistants can help with
pub struct DescribeServicesTool;

#[async_trait]
impl ToolHandler for DescribeServicesTool {
    fn name(&self) -> &str {
        names::DESCRIBE_SERVICES
    }

    fn description(&self) -> &str {
        "List the assistants available in the music store and what each one does."
    }

    fn input_schema(&self) -> Value {
        json_schema(json!({}), vec![])
    }

    async fn execute(&self, _ctx: &ToolContext, _input: Value) -> Result<Value, ToolError> {
        let services: Vec<Value> = HandlerId::ALL
            .iter()
            .map(|h| json!({ "assistant": h.display_name(), "description": h.description() }))
            .collect();
        Ok(json!({ "services": services }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_describe_services_lists_every_handler() {
        let ctx = ToolContext {
            user_id: 1,
            conversation_id: "test".to_string(),
        };
        let out = DescribeServicesTool.execute(&ctx, json!({})).await.unwrap();
        assert_eq!(out["services"].as_array().unwrap().len(), HandlerId::ALL.len());
    }
}
