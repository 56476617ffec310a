use cadenza_store::ProfileField;
use serde_json::json;

use super::{Transition, route_nested};
use crate::intent::Intent;
use crate::respond::Reply;
use crate::tools::names;
use crate::types::{ConversationState, HandlerId, ToolCall};

pub(super) fn route(state: &ConversationState, intent: &Intent) -> Transition {
    route_nested(HandlerId::CustomerProfile, state, intent, |intent| match intent {
        Intent::ProfileInquiry => Some(Transition::InvokeTool(ToolCall::new(
            names::GET_CUSTOMER_INFO,
            json!({}),
        ))),
        Intent::ProfileUpdate {
            field,
            new_value: None,
        } => Some(Transition::RespondToUser(Reply::AskForNewValue { field: *field })),
        Intent::ProfileUpdate {
            field,
            new_value: Some(value),
        } => Some(Transition::InvokeTool(update_call(*field, value))),
        _ => None,
    })
}

fn update_call(field: ProfileField, value: &str) -> ToolCall {
    match field {
        ProfileField::Email => ToolCall::new(names::UPDATE_EMAIL, json!({ "new_value": value })),
        ProfileField::Phone => ToolCall::new(names::UPDATE_PHONE, json!({ "new_value": value })),
        other => ToolCall::new(
            names::UPDATE_CUSTOMER_PROFILE,
            json!({ "field": other.column(), "new_value": value }),
        ),
    }
}
