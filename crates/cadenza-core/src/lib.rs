//! cadenza-core - Conversation routing for the music store assistants
//!
//! This crate provides:
//! - A turn-by-turn dispatcher over primary, customer profile and music catalog handlers
//! - A delegate stack for handing control to a nested handler and back
//! - Tool execution scoped to the active handler, with timeouts
//! - A confirm-before-mutate gate for profile changes
//! - Keyword intent classification and template responses

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod gate;
pub mod handlers;
pub mod intent;
pub mod respond;
pub mod stack;
pub mod stores;
pub mod tools;
pub mod types;

// Re-export main types for convenience
pub use context::UserContextLoader;
pub use dispatcher::{Dispatcher, DispatcherConfig, TurnOutcome};
pub use error::{DispatchError, ToolError, ToolErrorKind};
pub use executor::ToolExecutor;
pub use gate::{ConfirmationResponse, GateDecision, SensitiveOperationGate};
pub use handlers::Transition;
pub use intent::{Intent, IntentClassifier, KeywordIntentClassifier};
pub use respond::{Reply, ResponseGenerator, TemplateResponder};
pub use stack::{DelegateStack, HandlerFrame};
pub use stores::{CatalogStore, ProfileStore};
pub use tools::{ToolContext, ToolDefinition, ToolHandler, ToolRegistry};
pub use types::{
    ConfirmationRequest, ConversationState, GatePhase, HandlerId, Message, Role, ToolCall,
    ToolOutcome, ToolResult, TurnPhase,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        let _ = std::mem::size_of::<Dispatcher>();
        let _ = std::mem::size_of::<ConversationState>();
        let _ = std::mem::size_of::<DelegateStack>();
        let _ = std::mem::size_of::<ToolRegistry>();
        let _ = std::mem::size_of::<SensitiveOperationGate>();
    }
}
