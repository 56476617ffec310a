//! Conversation state model

use std::collections::{BTreeMap, HashSet};

use cadenza_store::{Profile, ProfileField};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DispatchError, ToolError, ToolErrorKind};
use crate::stack::DelegateStack;
use crate::tools::names;

/// The closed set of assistants that can own a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerId {
    Primary,
    CustomerProfile,
    MusicCatalog,
}

impl HandlerId {
    pub const ALL: [HandlerId; 3] = [Self::Primary, Self::CustomerProfile, Self::MusicCatalog];

    /// Tools this handler may invoke
    pub fn allowed_tools(&self) -> &'static [&'static str] {
        match self {
            Self::Primary => &[names::DESCRIBE_SERVICES],
            Self::CustomerProfile => &[
                names::GET_CUSTOMER_INFO,
                names::UPDATE_CUSTOMER_PROFILE,
                names::UPDATE_EMAIL,
                names::UPDATE_PHONE,
            ],
            Self::MusicCatalog => &[
                names::CHECK_FOR_SONGS,
                names::GET_TRACKS_BY_ARTIST,
                names::GET_ALBUMS_BY_ARTIST,
                names::SIMILARITY_SEARCH,
            ],
        }
    }

    /// Name of the synthetic tool call that hands control to this handler
    pub fn transfer_tool(&self) -> &'static str {
        match self {
            Self::Primary => names::COMPLETE_OR_ESCALATE,
            Self::CustomerProfile => names::TRANSFER_TO_CUSTOMER,
            Self::MusicCatalog => names::TRANSFER_TO_MUSIC,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Primary => "store assistant",
            Self::CustomerProfile => "customer profile assistant",
            Self::MusicCatalog => "music catalog assistant",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Primary => "answers general questions and routes you to the right specialist",
            Self::CustomerProfile => "looks up and updates the details on your customer profile",
            Self::MusicCatalog => {
                "finds songs, tracks and albums by artist, and recommends similar music"
            }
        }
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::CustomerProfile => write!(f, "customer_profile"),
            Self::MusicCatalog => write!(f, "music_catalog"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A request from a handler to run a named tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            args,
        }
    }
}

/// What a tool call produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { output: Value },
    Failure { kind: ToolErrorKind, message: String },
    /// Control was handed to a nested handler
    Transferred { to: HandlerId },
    /// A nested handler returned control
    Resumed {
        from: HandlerId,
        #[serde(default)]
        entry_call_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(call: &ToolCall, output: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            outcome: ToolOutcome::Success { output },
        }
    }

    pub fn failure(call: &ToolCall, error: &ToolError) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            outcome: ToolOutcome::Failure {
                kind: error.kind(),
                message: error.to_string(),
            },
        }
    }

    /// True for the synthetic results produced by handler entry and exit
    pub fn is_handoff(&self) -> bool {
        matches!(
            self.outcome,
            ToolOutcome::Transferred { .. } | ToolOutcome::Resumed { .. }
        )
    }

    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        match &self.outcome {
            ToolOutcome::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    /// Handler that was active when the message was produced
    pub handler: HandlerId,
}

impl Message {
    pub fn user(content: impl Into<String>, handler: HandlerId) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_result: None,
            handler,
        }
    }

    pub fn assistant(content: impl Into<String>, handler: HandlerId) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_result: None,
            handler,
        }
    }

    pub fn tool_request(call: ToolCall, handler: HandlerId) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_calls: vec![call],
            tool_result: None,
            handler,
        }
    }

    pub fn tool(result: ToolResult, handler: HandlerId) -> Self {
        let content = match &result.outcome {
            ToolOutcome::Success { output } => output.to_string(),
            ToolOutcome::Failure { message, .. } => format!("Error: {}", message),
            ToolOutcome::Transferred { to } => format!(
                "The assistant is now the {}. Use the provided tools to assist the user.",
                to.display_name()
            ),
            ToolOutcome::Resumed { .. } => {
                "Resuming dialog with the host assistant.".to_string()
            }
        };
        Self {
            role: Role::Tool,
            content,
            tool_calls: Vec::new(),
            tool_result: Some(result),
            handler,
        }
    }
}

/// Where the turn loop currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    AwaitingUserInput,
    Routing,
    AwaitingConfirmation,
    Terminated,
}

/// Progress of a sensitive tool call through the confirmation gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePhase {
    Idle,
    Requested,
    AwaitingConfirmation,
    Executed,
    Aborted,
}

/// A sensitive tool call parked until the user restates known profile values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub tool_call: ToolCall,
    /// Handler that issued the call
    pub handler: HandlerId,
    /// Field → value on file that the user must restate
    pub fields_to_verify: BTreeMap<ProfileField, String>,
    /// Fields the call would change once confirmed
    pub changes: Vec<ProfileField>,
    pub attempts_remaining: u32,
    pub phase: GatePhase,
}

impl ConfirmationRequest {
    /// Move the call to `next` in the gate's lifecycle
    pub fn advance(&mut self, next: GatePhase) {
        debug!(
            "Sensitive call {} ('{}'): {:?} → {:?}",
            self.tool_call.id, self.tool_call.name, self.phase, next
        );
        self.phase = next;
    }
}

/// Everything the dispatcher knows about one conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: String,
    pub user_id: i64,
    pub messages: Vec<Message>,
    pub profile: Profile,
    pub stack: DelegateStack,
    #[serde(default)]
    pub pending_confirmation: Option<ConfirmationRequest>,
    pub phase: TurnPhase,
    /// Sensitive tool calls the gate has resolved, executed or aborted
    #[serde(default)]
    pub executed_calls: HashSet<String>,
    pub started_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(user_id: i64, profile: Profile) -> Self {
        Self {
            conversation_id: Uuid::new_v4().to_string(),
            user_id,
            messages: Vec::new(),
            profile,
            stack: DelegateStack::new(),
            pending_confirmation: None,
            phase: TurnPhase::AwaitingUserInput,
            executed_calls: HashSet::new(),
            started_at: Utc::now(),
        }
    }

    /// The handler owning the conversation, `None` once terminated
    pub fn active_handler(&self) -> Option<HandlerId> {
        self.stack.top().map(|frame| frame.handler)
    }

    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The most recent real tool result, if it is the last message.
    /// Handoff markers are not results a handler needs to report on.
    pub fn last_tool_result(&self) -> Option<&ToolResult> {
        self.messages
            .last()
            .filter(|m| m.role == Role::Tool)
            .and_then(|m| m.tool_result.as_ref())
            .filter(|r| !r.is_handoff())
    }

    /// Tool calls from the latest assistant request that have no result yet
    pub fn outstanding_tool_calls(&self) -> Vec<&ToolCall> {
        let Some(idx) = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::Assistant && !m.tool_calls.is_empty())
        else {
            return Vec::new();
        };
        let answered: HashSet<&str> = self.messages[idx + 1..]
            .iter()
            .filter_map(|m| m.tool_result.as_ref())
            .map(|r| r.call_id.as_str())
            .collect();
        self.messages[idx]
            .tool_calls
            .iter()
            .filter(|call| !answered.contains(call.id.as_str()))
            .collect()
    }

    pub fn latest_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Verify the structural invariants that must hold at every stable point
    pub fn check_invariants(&self) -> Result<(), DispatchError> {
        let terminated = self.phase == TurnPhase::Terminated;
        if terminated != (self.stack.depth() == 0) {
            return Err(DispatchError::invalid(format!(
                "stack depth {} inconsistent with phase {:?}",
                self.stack.depth(),
                self.phase
            )));
        }
        if let Some(bottom) = self.stack.bottom()
            && bottom.handler != HandlerId::Primary
        {
            return Err(DispatchError::invalid(format!(
                "bottom frame is {} instead of primary",
                bottom.handler
            )));
        }
        let awaiting = self.phase == TurnPhase::AwaitingConfirmation;
        if awaiting != self.pending_confirmation.is_some() {
            return Err(DispatchError::invalid(format!(
                "pending confirmation present={} during {:?}",
                self.pending_confirmation.is_some(),
                self.phase
            )));
        }
        Ok(())
    }
}
