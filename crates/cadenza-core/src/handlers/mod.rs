//! Handler routers: one routing function per [`HandlerId`]

mod customer;
mod music;
mod primary;

use tracing::debug;

use crate::intent::Intent;
use crate::respond::Reply;
use crate::types::{ConversationState, HandlerId, ToolCall, ToolOutcome, ToolResult};

/// What the active handler wants to happen next
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    RespondToUser(Reply),
    InvokeTool(ToolCall),
    EnterHandler(HandlerId),
    LeaveHandler,
    EndConversation,
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RespondToUser(_) => "RespondToUser",
            Self::InvokeTool(_) => "InvokeTool",
            Self::EnterHandler(_) => "EnterHandler",
            Self::LeaveHandler => "LeaveHandler",
            Self::EndConversation => "EndConversation",
        }
    }
}

/// Ask `handler` for its next transition
pub fn route(handler: HandlerId, state: &ConversationState, intent: &Intent) -> Transition {
    let transition = match handler {
        HandlerId::Primary => primary::route(state, intent),
        HandlerId::CustomerProfile => customer::route(state, intent),
        HandlerId::MusicCatalog => music::route(state, intent),
    };
    debug!("{} handler → {}", handler, transition.name());
    transition
}

/// Whether `handler` may emit `transition` at all.
///
/// Tool calls are always permitted here: which tools a handler may use is
/// enforced by the executor against the active frame.
pub fn permits(handler: HandlerId, transition: &Transition) -> bool {
    match (handler, transition) {
        (_, Transition::RespondToUser(_) | Transition::InvokeTool(_)) => true,
        (HandlerId::Primary, Transition::EnterHandler(target)) => *target != HandlerId::Primary,
        (HandlerId::Primary, Transition::EndConversation) => true,
        (HandlerId::Primary, Transition::LeaveHandler) => false,
        (_, Transition::LeaveHandler) => true,
        (_, Transition::EnterHandler(_) | Transition::EndConversation) => false,
    }
}

/// Routing shared by the nested handlers. `act` maps in-domain intents.
fn route_nested(
    handler: HandlerId,
    state: &ConversationState,
    intent: &Intent,
    act: impl Fn(&Intent) -> Option<Transition>,
) -> Transition {
    if intent.domain().is_some_and(|domain| domain != handler) {
        return Transition::LeaveHandler;
    }
    // Completion while nested returns to primary, which decides whether to end
    if matches!(intent, Intent::Done | Intent::Goodbye) {
        return Transition::LeaveHandler;
    }
    if let Some(result) = state.last_tool_result() {
        return Transition::RespondToUser(report(result));
    }
    if let Some(transition) = act(intent) {
        return transition;
    }
    match intent {
        Intent::Cancel => Transition::LeaveHandler,
        Intent::ConfirmValues { .. } => Transition::RespondToUser(Reply::NothingToConfirm),
        _ => Transition::RespondToUser(Reply::Clarify { handler }),
    }
}

/// Reply describing a finished tool call
fn report(result: &ToolResult) -> Reply {
    match &result.outcome {
        ToolOutcome::Success { output } => Reply::ToolSucceeded {
            tool: result.tool.clone(),
            output: output.clone(),
        },
        ToolOutcome::Failure { kind, message } => Reply::ToolFailed {
            tool: result.tool.clone(),
            kind: *kind,
            message: message.clone(),
        },
        ToolOutcome::Transferred { .. } | ToolOutcome::Resumed { .. } => Reply::AnythingElse,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ToolError, ToolErrorKind};
    use crate::tools::names;
    use crate::types::Message;
    use cadenza_store::{Profile, ProfileField};
    use serde_json::json;

    fn state() -> ConversationState {
        ConversationState::new(1, Profile::new(1, "Ada", "Lovelace", "ada@example.com"))
    }

    #[test]
    fn test_permits() {
        assert!(permits(HandlerId::Primary, &Transition::EnterHandler(HandlerId::MusicCatalog)));
        assert!(!permits(HandlerId::Primary, &Transition::EnterHandler(HandlerId::Primary)));
        assert!(!permits(HandlerId::Primary, &Transition::LeaveHandler));
        assert!(permits(HandlerId::MusicCatalog, &Transition::LeaveHandler));
        assert!(!permits(HandlerId::MusicCatalog, &Transition::EndConversation));
        assert!(!permits(
            HandlerId::CustomerProfile,
            &Transition::EnterHandler(HandlerId::MusicCatalog)
        ));
    }

    #[test]
    fn test_nested_completion_leaves() {
        let state = state();
        for handler in [HandlerId::CustomerProfile, HandlerId::MusicCatalog] {
            assert_eq!(route(handler, &state, &Intent::Done), Transition::LeaveHandler);
            assert_eq!(route(handler, &state, &Intent::Goodbye), Transition::LeaveHandler);
        }
    }

    #[test]
    fn test_domain_switch_leaves() {
        let state = state();
        let music = Intent::TracksByArtist {
            artist: "Queen".to_string(),
        };
        assert_eq!(
            route(HandlerId::CustomerProfile, &state, &music),
            Transition::LeaveHandler
        );
        assert_eq!(
            route(HandlerId::MusicCatalog, &state, &Intent::ProfileInquiry),
            Transition::LeaveHandler
        );
    }

    #[test]
    fn test_tool_result_is_reported() {
        let mut state = state();
        let call = ToolCall::new(names::GET_TRACKS_BY_ARTIST, json!({"artist": "Queen"}));
        state.push(Message::tool_request(call.clone(), HandlerId::MusicCatalog));
        state.push(Message::tool(
            ToolResult::failure(&call, &ToolError::Timeout(10)),
            HandlerId::MusicCatalog,
        ));

        let intent = Intent::TracksByArtist {
            artist: "Queen".to_string(),
        };
        let Transition::RespondToUser(Reply::ToolFailed { kind, .. }) =
            route(HandlerId::MusicCatalog, &state, &intent)
        else {
            panic!("expected a failure report");
        };
        assert_eq!(kind, ToolErrorKind::Timeout);
    }

    #[test]
    fn test_profile_update_picks_tool() {
        let state = state();
        let email = Intent::ProfileUpdate {
            field: ProfileField::Email,
            new_value: Some("ada@new.example".to_string()),
        };
        let Transition::InvokeTool(call) = route(HandlerId::CustomerProfile, &state, &email) else {
            panic!("expected a tool call");
        };
        assert_eq!(call.name, names::UPDATE_EMAIL);
        assert_eq!(call.args["new_value"], "ada@new.example");

        let city = Intent::ProfileUpdate {
            field: ProfileField::City,
            new_value: Some("London".to_string()),
        };
        let Transition::InvokeTool(call) = route(HandlerId::CustomerProfile, &state, &city) else {
            panic!("expected a tool call");
        };
        assert_eq!(call.name, names::UPDATE_CUSTOMER_PROFILE);
        assert_eq!(call.args["field"], "City");
    }

    #[test]
    fn test_profile_update_without_value_asks() {
        let intent = Intent::ProfileUpdate {
            field: ProfileField::Phone,
            new_value: None,
        };
        assert_eq!(
            route(HandlerId::CustomerProfile, &state(), &intent),
            Transition::RespondToUser(Reply::AskForNewValue {
                field: ProfileField::Phone
            })
        );
    }

    #[test]
    fn test_primary_routing() {
        let state = state();
        assert_eq!(
            route(HandlerId::Primary, &state, &Intent::ProfileInquiry),
            Transition::EnterHandler(HandlerId::CustomerProfile)
        );
        assert_eq!(
            route(
                HandlerId::Primary,
                &state,
                &Intent::SimilarSongs {
                    reference: "Bohemian Rhapsody".to_string()
                }
            ),
            Transition::EnterHandler(HandlerId::MusicCatalog)
        );
        assert_eq!(
            route(HandlerId::Primary, &state, &Intent::Goodbye),
            Transition::EndConversation
        );
        assert_eq!(
            route(HandlerId::Primary, &state, &Intent::Done),
            Transition::RespondToUser(Reply::AnythingElse)
        );
        let Transition::InvokeTool(call) = route(HandlerId::Primary, &state, &Intent::Capabilities)
        else {
            panic!("expected describe_services");
        };
        assert_eq!(call.name, names::DESCRIBE_SERVICES);
    }

    #[test]
    fn test_every_transition_is_permitted_for_its_handler() {
        let state = state();
        let intents = [
            Intent::Greeting,
            Intent::Capabilities,
            Intent::ProfileInquiry,
            Intent::FindSongs {
                title: "Rehab".to_string(),
            },
            Intent::Cancel,
            Intent::Done,
            Intent::Goodbye,
            Intent::Unknown,
        ];
        for handler in HandlerId::ALL {
            for intent in &intents {
                let transition = route(handler, &state, intent);
                assert!(
                    permits(handler, &transition),
                    "{} emitted {:?} for {:?}",
                    handler,
                    transition,
                    intent
                );
            }
        }
    }
}
