use serde_json::json;

use super::{Transition, report};
use crate::intent::Intent;
use crate::respond::Reply;
use crate::tools::names;
use crate::types::{ConversationState, HandlerId, ToolCall};

pub(super) fn route(state: &ConversationState, intent: &Intent) -> Transition {
    if let Some(result) = state.last_tool_result() {
        return Transition::RespondToUser(report(result));
    }

    if let Some(domain) = intent.domain()
        && domain != HandlerId::Primary
    {
        return Transition::EnterHandler(domain);
    }

    match intent {
        Intent::Capabilities => {
            Transition::InvokeTool(ToolCall::new(names::DESCRIBE_SERVICES, json!({})))
        }
        Intent::Greeting => Transition::RespondToUser(Reply::Welcome),
        Intent::Goodbye => Transition::EndConversation,
        Intent::Done | Intent::Cancel => Transition::RespondToUser(Reply::AnythingElse),
        Intent::ConfirmValues { .. } => Transition::RespondToUser(Reply::NothingToConfirm),
        _ => Transition::RespondToUser(Reply::Clarify {
            handler: HandlerId::Primary,
        }),
    }
}
