//! Delegate stack: which handler owns the conversation, and who to return to

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::DispatchError;
use crate::types::{HandlerId, ToolCall, ToolOutcome, ToolResult};

/// One active handler on the stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerFrame {
    pub handler: HandlerId,
    /// Tool call that caused entry, absent for the root frame
    #[serde(default)]
    pub entry_tool_call_id: Option<String>,
    pub allowed_tools: BTreeSet<String>,
}

impl HandlerFrame {
    pub fn new(handler: HandlerId, entry_tool_call_id: Option<String>) -> Self {
        Self {
            handler,
            entry_tool_call_id,
            allowed_tools: handler
                .allowed_tools()
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }

    pub fn allows(&self, tool_name: &str) -> bool {
        self.allowed_tools.contains(tool_name)
    }
}

/// Ordered stack of handler frames. Primary is always the bottom frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegateStack {
    frames: Vec<HandlerFrame>,
}

impl DelegateStack {
    /// A stack holding only the Primary frame
    pub fn new() -> Self {
        Self {
            frames: vec![HandlerFrame::new(HandlerId::Primary, None)],
        }
    }

    pub fn top(&self) -> Option<&HandlerFrame> {
        self.frames.last()
    }

    pub fn bottom(&self) -> Option<&HandlerFrame> {
        self.frames.first()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn handlers(&self) -> Vec<HandlerId> {
        self.frames.iter().map(|f| f.handler).collect()
    }

    /// Push a nested handler. The returned result satisfies the triggering
    /// tool call so the caller's call/result pairing stays consistent.
    pub fn enter(
        &mut self,
        handler: HandlerId,
        triggering_call: &ToolCall,
    ) -> Result<ToolResult, DispatchError> {
        if handler == HandlerId::Primary {
            return Err(DispatchError::invalid("primary can only be the root frame"));
        }
        if self.frames.is_empty() {
            return Err(DispatchError::invalid("cannot enter a handler after termination"));
        }
        self.frames
            .push(HandlerFrame::new(handler, Some(triggering_call.id.clone())));
        info!("Entered {} handler (depth {})", handler, self.depth());

        Ok(ToolResult {
            call_id: triggering_call.id.clone(),
            tool: triggering_call.name.clone(),
            outcome: ToolOutcome::Transferred { to: handler },
        })
    }

    /// Pop the top frame. The root Primary frame is never popped.
    pub fn leave(&mut self) -> Result<HandlerFrame, DispatchError> {
        if self.frames.len() <= 1 {
            return Err(DispatchError::StackUnderflow);
        }
        let frame = self.frames.pop().ok_or(DispatchError::StackUnderflow)?;
        info!("Left {} handler (depth {})", frame.handler, self.depth());
        Ok(frame)
    }

    /// Drop every frame; only used when the conversation ends
    pub fn clear(&mut self) {
        debug!("Clearing delegate stack ({} frames)", self.frames.len());
        self.frames.clear();
    }
}

impl Default for DelegateStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::names;
    use serde_json::json;

    #[test]
    fn test_new_stack_has_primary() {
        let stack = DelegateStack::new();
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.top().unwrap().handler, HandlerId::Primary);
        assert!(stack.top().unwrap().allows(names::DESCRIBE_SERVICES));
    }

    #[test]
    fn test_enter_synthesizes_transfer_result() {
        let mut stack = DelegateStack::new();
        let call = ToolCall::new(names::TRANSFER_TO_MUSIC, json!({}));
        let result = stack.enter(HandlerId::MusicCatalog, &call).unwrap();

        assert_eq!(stack.depth(), 2);
        assert_eq!(result.call_id, call.id);
        assert!(result.is_handoff());
        let top = stack.top().unwrap();
        assert_eq!(top.entry_tool_call_id.as_deref(), Some(call.id.as_str()));
        assert!(top.allows(names::SIMILARITY_SEARCH));
        assert!(!top.allows(names::UPDATE_EMAIL));
    }

    #[test]
    fn test_leave_pops_exactly_one() {
        let mut stack = DelegateStack::new();
        let call = ToolCall::new(names::TRANSFER_TO_CUSTOMER, json!({}));
        stack.enter(HandlerId::CustomerProfile, &call).unwrap();

        let frame = stack.leave().unwrap();
        assert_eq!(frame.handler, HandlerId::CustomerProfile);
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn test_leave_never_pops_primary() {
        let mut stack = DelegateStack::new();
        assert!(matches!(stack.leave(), Err(DispatchError::StackUnderflow)));
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn test_cannot_enter_primary() {
        let mut stack = DelegateStack::new();
        let call = ToolCall::new(names::COMPLETE_OR_ESCALATE, json!({}));
        assert!(stack.enter(HandlerId::Primary, &call).is_err());
        assert_eq!(stack.depth(), 1);
    }
}
