//! Tool registry and handler system

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use cadenza_store::ProfileField;

use crate::error::ToolError;
use crate::stores::{CatalogStore, ProfileStore};

pub mod catalog;
pub mod general;
pub mod profile;

/// Tool names known to the handlers
pub mod names {
    pub const DESCRIBE_SERVICES: &str = "describe_services";

    pub const GET_CUSTOMER_INFO: &str = "get_customer_info";
    pub const UPDATE_CUSTOMER_PROFILE: &str = "update_customer_profile";
    pub const UPDATE_EMAIL: &str = "update_email";
    pub const UPDATE_PHONE: &str = "update_phone";

    pub const CHECK_FOR_SONGS: &str = "check_for_songs";
    pub const GET_TRACKS_BY_ARTIST: &str = "get_tracks_by_artist";
    pub const GET_ALBUMS_BY_ARTIST: &str = "get_albums_by_artist";
    pub const SIMILARITY_SEARCH: &str = "similarity_search";

    // Synthetic handoff calls; never executed by the registry.
    pub const TRANSFER_TO_CUSTOMER: &str = "transfer_to_customer_assistant";
    pub const TRANSFER_TO_MUSIC: &str = "transfer_to_music_assistant";
    pub const COMPLETE_OR_ESCALATE: &str = "complete_or_escalate";
}

/// Who a tool is running for. Profile tools only ever touch this user.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub user_id: i64,
    pub conversation_id: String,
}

/// Tool description as exposed to a model-backed classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Individual tool handler
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;

    /// Profile fields this call would change. A non-empty list makes the
    /// call sensitive: it only runs after the confirmation gate passes.
    fn mutated_fields(&self, _input: &Value) -> Result<Vec<ProfileField>, ToolError> {
        Ok(Vec::new())
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<Value, ToolError>;
}

/// Registry of available tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry holding every built-in tool
    pub fn with_defaults(profiles: Arc<dyn ProfileStore>, catalog: Arc<dyn CatalogStore>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(general::DescribeServicesTool));
        registry.register(Arc::new(profile::GetCustomerInfoTool::new(profiles.clone())));
        registry.register(Arc::new(profile::ProfileUpdateTool::any_field(profiles.clone())));
        registry.register(Arc::new(profile::ProfileUpdateTool::single_field(
            profiles.clone(),
            ProfileField::Email,
        )));
        registry.register(Arc::new(profile::ProfileUpdateTool::single_field(
            profiles,
            ProfileField::Phone,
        )));
        registry.register(Arc::new(catalog::CheckForSongsTool::new(catalog.clone())));
        registry.register(Arc::new(catalog::TracksByArtistTool::new(catalog.clone())));
        registry.register(Arc::new(catalog::AlbumsByArtistTool::new(catalog.clone())));
        registry.register(Arc::new(catalog::SimilaritySearchTool::new(catalog)));
        registry
    }

    /// Register a tool handler
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.name().to_string();
        debug!("Registering tool: {}", name);
        self.tools.insert(name, handler);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get tool definitions for only the named tools
    pub fn filter_tools(&self, names: &[&str]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|name| self.tools.get(*name))
            .map(|handler| ToolDefinition {
                name: handler.name().to_string(),
                description: handler.description().to_string(),
                input_schema: handler.input_schema(),
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper function to create a JSON schema for tool input
pub fn json_schema(properties: Value, required: Vec<&str>) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Read a required, non-blank string argument
pub(crate) fn required_str<'a>(input: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ToolError::Validation(format!("Missing '{}' parameter", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyTool;

    #[async_trait]
    impl ToolHandler for DummyTool {
        fn name(&self) -> &str {
            "dummy"
        }

        fn description(&self) -> &str {
            "A dummy tool for testing"
        }

        fn input_schema(&self) -> Value {
            json_schema(
                serde_json::json!({
                    "message": {
                        "type": "string",
                        "description": "Test message"
                    }
                }),
                vec!["message"],
            )
        }

        async fn execute(&self, _ctx: &ToolContext, _input: Value) -> Result<Value, ToolError> {
            Ok(Value::String("dummy result".to_string()))
        }
    }

    #[test]
    fn test_tool_registry() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool));

        assert_eq!(registry.len(), 1);
        assert!(registry.get("dummy").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_filter_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool));

        let filtered = registry.filter_tools(&["dummy"]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "dummy");

        let filtered_empty = registry.filter_tools(&["nonexistent"]);
        assert!(filtered_empty.is_empty());
    }

    #[test]
    fn test_required_str() {
        let input = serde_json::json!({"artist": "  Queen ", "blank": "  "});
        assert_eq!(required_str(&input, "artist").unwrap(), "Queen");
        assert!(required_str(&input, "blank").is_err());
        assert!(required_str(&input, "missing").is_err());
    }
}
