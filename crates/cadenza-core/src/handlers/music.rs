use serde_json::json;

use super::{Transition, route_nested};
use crate::intent::Intent;
use crate::tools::names;
use crate::types::{ConversationState, HandlerId, ToolCall};

pub(super) fn route(state: &ConversationState, intent: &Intent) -> Transition {
    route_nested(HandlerId::MusicCatalog, state, intent, |intent| {
        let call = match intent {
            Intent::FindSongs { title } => {
                ToolCall::new(names::CHECK_FOR_SONGS, json!({ "title": title }))
            }
            Intent::TracksByArtist { artist } => {
                ToolCall::new(names::GET_TRACKS_BY_ARTIST, json!({ "artist": artist }))
            }
            Intent::AlbumsByArtist { artist } => {
                ToolCall::new(names::GET_ALBUMS_BY_ARTIST, json!({ "artist": artist }))
            }
            Intent::SimilarSongs { reference } => {
                ToolCall::new(names::SIMILARITY_SEARCH, json!({ "reference": reference }))
            }
            _ => return None,
        };
        Some(Transition::InvokeTool(call))
    })
}
