//! Intent classification
//!
//! Routers never look at raw text. They act on an [`Intent`] produced by an
//! [`IntentClassifier`], which can be a model-backed component or the
//! keyword heuristic below.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use cadenza_store::ProfileField;
use serde::{Deserialize, Serialize};

use crate::types::{ConversationState, HandlerId, TurnPhase};

/// What the user wants from the latest message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    Capabilities,
    ProfileInquiry,
    ProfileUpdate {
        field: ProfileField,
        #[serde(default)]
        new_value: Option<String>,
    },
    /// Restated profile values, in answer to a confirmation prompt
    ConfirmValues {
        values: BTreeMap<ProfileField, String>,
    },
    FindSongs {
        title: String,
    },
    TracksByArtist {
        artist: String,
    },
    AlbumsByArtist {
        artist: String,
    },
    SimilarSongs {
        reference: String,
    },
    Cancel,
    Done,
    Goodbye,
    Unknown,
}

impl Intent {
    /// Handler whose domain the intent belongs to, if any
    pub fn domain(&self) -> Option<HandlerId> {
        match self {
            Self::Capabilities => Some(HandlerId::Primary),
            Self::ProfileInquiry | Self::ProfileUpdate { .. } => Some(HandlerId::CustomerProfile),
            Self::FindSongs { .. }
            | Self::TracksByArtist { .. }
            | Self::AlbumsByArtist { .. }
            | Self::SimilarSongs { .. } => Some(HandlerId::MusicCatalog),
            Self::Greeting
            | Self::ConfirmValues { .. }
            | Self::Cancel
            | Self::Done
            | Self::Goodbye
            | Self::Unknown => None,
        }
    }
}

/// Turns the conversation so far into an intent for the latest user message
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, state: &ConversationState) -> Result<Intent>;
}

/// LLM-free classifier driven by keywords and value extraction
#[derive(Debug, Clone, Default)]
pub struct KeywordIntentClassifier;

impl KeywordIntentClassifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IntentClassifier for KeywordIntentClassifier {
    async fn classify(&self, state: &ConversationState) -> Result<Intent> {
        let Some(text) = state.latest_user_text() else {
            return Ok(Intent::Unknown);
        };
        Ok(heuristic_intent(text, state.phase, state.active_handler()))
    }
}

const CANCEL_PHRASES: &[&str] = &[
    "cancel",
    "never mind",
    "nevermind",
    "forget it",
    "don't change",
    "do not change",
    "abort",
];
const GOODBYE_PHRASES: &[&str] = &["goodbye", "good bye", "bye", "see you", "quit", "exit"];
const DONE_PHRASES: &[&str] = &[
    "that's all",
    "thats all",
    "that is all",
    "i'm done",
    "im done",
    "done",
    "nothing else",
    "no thanks",
    "all set",
    "go back",
];
const GREETING_WORDS: &[&str] = &["hi", "hello", "hey", "howdy"];

fn heuristic_intent(message: &str, phase: TurnPhase, active: Option<HandlerId>) -> Intent {
    let text = message.trim();
    if text.is_empty() {
        return Intent::Unknown;
    }
    let lower = text.to_ascii_lowercase();

    // Control words inside titles, emails or phone numbers are not commands
    let scope = command_scope(&lower);
    if has_phrase(&scope, CANCEL_PHRASES) {
        return Intent::Cancel;
    }
    if has_phrase(&scope, GOODBYE_PHRASES) {
        return Intent::Goodbye;
    }
    if has_phrase(&scope, DONE_PHRASES) {
        return Intent::Done;
    }

    let values = extract_values(text);
    if phase == TurnPhase::AwaitingConfirmation && !values.is_empty() {
        return Intent::ConfirmValues { values };
    }

    if let Some(intent) = profile_intent(text, &lower) {
        return intent;
    }
    if let Some(intent) = music_intent(text, &lower) {
        return intent;
    }

    if lower.contains("what can you")
        || lower.contains("what do you do")
        || lower.contains("help")
        || lower.contains("services")
    {
        return Intent::Capabilities;
    }
    if GREETING_WORDS.contains(&first_word(&lower)) {
        return Intent::Greeting;
    }

    // A bare value given to the profile assistant is the new value it asked for
    if active == Some(HandlerId::CustomerProfile)
        && let Some((field, value)) = values.into_iter().next()
    {
        return Intent::ProfileUpdate {
            field,
            new_value: Some(value),
        };
    }

    Intent::Unknown
}

const SIMILARITY_MARKERS: &[&str] = &[
    "similar to ",
    "songs like ",
    "music like ",
    "sounds like ",
    "something like ",
];
const ARTIST_MARKERS: &[&str] = &[" by ", " from "];
const TITLE_MARKERS: &[&str] = &[
    "called ",
    "named ",
    "titled ",
    "do you have ",
    "looking for ",
    "search for ",
    "find ",
];

/// The part of the message that can carry a command: text before any title
/// or artist marker, without quoted titles and without email or phone tokens
fn command_scope(lower: &str) -> String {
    let cut = SIMILARITY_MARKERS
        .iter()
        .chain(ARTIST_MARKERS)
        .chain(TITLE_MARKERS)
        .filter_map(|marker| lower.find(marker))
        .min()
        .unwrap_or(lower.len());

    let mut unquoted = String::with_capacity(cut);
    let mut quoted = false;
    for c in lower[..cut].chars() {
        if matches!(c, '"' | '\u{201c}' | '\u{201d}') {
            quoted = !quoted;
            unquoted.push(' ');
        } else if !quoted {
            unquoted.push(c);
        }
    }

    unquoted
        .split_whitespace()
        .filter(|word| !word.contains('@') && !word.chars().any(|c| c.is_ascii_digit()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn profile_intent(text: &str, lower: &str) -> Option<Intent> {
    let wants_change = ["change", "update", "modify", "correct", "set my", "new "]
        .iter()
        .any(|w| lower.contains(w));

    if wants_change && let Some((field, at)) = mentioned_field(lower) {
        let new_value = value_after(text, lower, at, " to ")
            .filter(|v| field.validate(v).is_ok())
            .or_else(|| extract_values(text).remove(&field));
        return Some(Intent::ProfileUpdate { field, new_value });
    }

    let about_me = lower.contains("my ") || lower.contains(" me");
    let asks = ["profile", "account", "details", "info", "on file"]
        .iter()
        .any(|w| lower.contains(w));
    if about_me && (asks || (lower.starts_with("what") && mentioned_field(lower).is_some())) {
        return Some(Intent::ProfileInquiry);
    }
    None
}

fn music_intent(text: &str, lower: &str) -> Option<Intent> {
    for marker in SIMILARITY_MARKERS {
        if let Some(at) = lower.find(marker)
            && let Some(reference) = value_after(text, lower, at, marker)
        {
            return Some(Intent::SimilarSongs { reference });
        }
    }

    if lower.contains("album")
        && let Some(artist) = marker_value(text, lower, ARTIST_MARKERS)
    {
        return Some(Intent::AlbumsByArtist { artist });
    }

    let about_music = ["song", "track", "music", "tune"].iter().any(|w| lower.contains(w));
    if about_music && let Some(artist) = marker_value(text, lower, ARTIST_MARKERS) {
        return Some(Intent::TracksByArtist { artist });
    }

    if let Some(title) = marker_value(text, lower, TITLE_MARKERS) {
        let title = strip_prefix_words(&title, &["the song ", "a song ", "song ", "the track "]);
        if !title.is_empty() {
            return Some(Intent::FindSongs { title });
        }
    }
    None
}

/// Profile field mentioned in the message, with its byte offset
fn mentioned_field(lower: &str) -> Option<(ProfileField, usize)> {
    const KEYWORDS: &[(&str, ProfileField)] = &[
        ("e-mail", ProfileField::Email),
        ("email", ProfileField::Email),
        ("phone", ProfileField::Phone),
        ("mobile", ProfileField::Phone),
        ("fax", ProfileField::Fax),
        ("first name", ProfileField::FirstName),
        ("last name", ProfileField::LastName),
        ("surname", ProfileField::LastName),
        ("company", ProfileField::Company),
        ("postal code", ProfileField::PostalCode),
        ("postcode", ProfileField::PostalCode),
        ("zip", ProfileField::PostalCode),
        ("address", ProfileField::Address),
        ("city", ProfileField::City),
        ("state", ProfileField::State),
        ("country", ProfileField::Country),
    ];
    KEYWORDS
        .iter()
        .find_map(|(kw, field)| lower.find(kw).map(|at| (*field, at)))
}

/// Restated values: labelled ("city is London") first, then bare emails and phones
fn extract_values(text: &str) -> BTreeMap<ProfileField, String> {
    let lower = text.to_ascii_lowercase();
    let mut values = BTreeMap::new();

    for field in ProfileField::ALL {
        let keyword = match field {
            ProfileField::Email => "email",
            ProfileField::Phone => "phone",
            ProfileField::Fax => "fax",
            ProfileField::Address => "address",
            ProfileField::PostalCode => "postal code",
            other => other.label(),
        };
        for sep in [" is ", ": ", " = "] {
            let pattern = format!("{}{}", keyword, sep);
            if let Some(at) = lower.find(&pattern)
                && let Some(value) = value_after(text, &lower, at, &pattern)
                && field.validate(&value).is_ok()
            {
                values.entry(field).or_insert(value);
            }
        }
    }

    if !values.contains_key(&ProfileField::Email)
        && let Some(email) = text
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_ascii_alphanumeric()))
            .find(|w| ProfileField::Email.validate(w).is_ok())
    {
        values.insert(ProfileField::Email, email.to_string());
    }

    if !values.contains_key(&ProfileField::Phone)
        && let Some(phone) = phone_runs(text)
            .into_iter()
            .find(|p| ProfileField::Phone.validate(p).is_ok())
    {
        values.insert(ProfileField::Phone, phone);
    }

    values
}

/// Maximal runs of phone-number characters
fn phone_runs(text: &str) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() || "+-(). ".contains(c) {
            current.push(c);
        } else {
            runs.push(std::mem::take(&mut current));
        }
    }
    runs.push(current);
    runs.into_iter()
        .map(|r| r.trim().trim_end_matches('.').trim().to_string())
        .filter(|r| r.chars().filter(|c| c.is_ascii_digit()).count() >= 7)
        .collect()
}

/// Text following `marker` (searched from `from`), cut at a clause break
fn value_after(text: &str, lower: &str, from: usize, marker: &str) -> Option<String> {
    let start = lower[from..].find(marker)? + from + marker.len();
    let rest = &text[start..];
    let rest_lower = &lower[start..];
    let end = [",", ";", "?", " and ", " please", " do you", " in your", " in the store"]
        .iter()
        .filter_map(|stop| rest_lower.find(stop))
        .min()
        .unwrap_or(rest.len());
    let value = clean(&rest[..end]);
    (!value.is_empty()).then_some(value)
}

fn marker_value(text: &str, lower: &str, markers: &[&str]) -> Option<String> {
    markers
        .iter()
        .find_map(|m| lower.find(m).and_then(|at| value_after(text, lower, at, m)))
}

fn clean(value: &str) -> String {
    value
        .trim()
        .trim_end_matches(['.', '?', '!'])
        .trim_matches(['"', '\'', '\u{201c}', '\u{201d}'])
        .trim()
        .to_string()
}

fn strip_prefix_words(value: &str, prefixes: &[&str]) -> String {
    let lower = value.to_ascii_lowercase();
    prefixes
        .iter()
        .find(|p| lower.starts_with(*p))
        .map(|p| clean(&value[p.len()..]))
        .unwrap_or_else(|| value.to_string())
}

fn first_word(lower: &str) -> &str {
    lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .find(|w| !w.is_empty())
        .unwrap_or("")
}

/// Whole-phrase match: the phrase must not sit inside a longer word
fn has_phrase(lower: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| {
        lower.match_indices(phrase).any(|(at, _)| {
            let before = lower[..at].chars().next_back();
            let after = lower[at + phrase.len()..].chars().next();
            !before.is_some_and(|c| c.is_ascii_alphanumeric())
                && !after.is_some_and(|c| c.is_ascii_alphanumeric())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(message: &str) -> Intent {
        heuristic_intent(message, TurnPhase::Routing, Some(HandlerId::Primary))
    }

    #[test]
    fn test_profile_update_with_value() {
        assert_eq!(
            classify("Please change my email to ada@new.example"),
            Intent::ProfileUpdate {
                field: ProfileField::Email,
                new_value: Some("ada@new.example".to_string()),
            }
        );
    }

    #[test]
    fn test_profile_update_without_value() {
        assert_eq!(
            classify("I want to update my phone number"),
            Intent::ProfileUpdate {
                field: ProfileField::Phone,
                new_value: None,
            }
        );
    }

    #[test]
    fn test_confirmation_values_only_while_awaiting() {
        let intent = heuristic_intent(
            "it's ada@example.com",
            TurnPhase::AwaitingConfirmation,
            Some(HandlerId::CustomerProfile),
        );
        let Intent::ConfirmValues { values } = intent else {
            panic!("expected ConfirmValues, got {:?}", intent);
        };
        assert_eq!(values.get(&ProfileField::Email).map(String::as_str), Some("ada@example.com"));
    }

    #[test]
    fn test_bare_value_at_profile_handler_is_new_value() {
        let intent = heuristic_intent(
            "+1 (555) 010-2030",
            TurnPhase::Routing,
            Some(HandlerId::CustomerProfile),
        );
        assert_eq!(
            intent,
            Intent::ProfileUpdate {
                field: ProfileField::Phone,
                new_value: Some("+1 (555) 010-2030".to_string()),
            }
        );
    }

    #[test]
    fn test_labelled_values() {
        let values = extract_values("My city is London, and email: ada@example.com");
        assert_eq!(values.get(&ProfileField::City).map(String::as_str), Some("London"));
        assert_eq!(values.get(&ProfileField::Email).map(String::as_str), Some("ada@example.com"));
    }

    #[test]
    fn test_music_intents() {
        assert_eq!(
            classify("Find songs similar to \"Bohemian Rhapsody\"?"),
            Intent::SimilarSongs {
                reference: "Bohemian Rhapsody".to_string()
            }
        );
        assert_eq!(
            classify("What albums by AC/DC do you have?"),
            Intent::AlbumsByArtist {
                artist: "AC/DC".to_string()
            }
        );
        assert_eq!(
            classify("show me songs by Amy Winehouse"),
            Intent::TracksByArtist {
                artist: "Amy Winehouse".to_string()
            }
        );
        assert_eq!(
            classify("Do you have the song Rehab?"),
            Intent::FindSongs {
                title: "Rehab".to_string()
            }
        );
    }

    #[test]
    fn test_control_phrases() {
        assert_eq!(classify("that's all, thanks"), Intent::Done);
        assert_eq!(classify("bye!"), Intent::Goodbye);
        assert_eq!(classify("never mind"), Intent::Cancel);
        assert_eq!(classify("What can you help me with?"), Intent::Capabilities);
        assert_eq!(classify("hello there"), Intent::Greeting);
        assert_eq!(classify("purple monkey dishwasher"), Intent::Unknown);
    }

    #[test]
    fn test_control_words_inside_titles_are_not_commands() {
        assert_eq!(
            classify("find songs similar to Exit Music"),
            Intent::SimilarSongs {
                reference: "Exit Music".to_string()
            }
        );
        assert_eq!(
            classify("do you have Bye Bye Love"),
            Intent::FindSongs {
                title: "Bye Bye Love".to_string()
            }
        );
        assert_eq!(command_scope("is \"exit music\" on sale? bye"), "is on sale? bye");
        assert_eq!(classify("great, bye"), Intent::Goodbye);
    }

    #[test]
    fn test_control_words_inside_values_are_not_commands() {
        let intent = heuristic_intent(
            "my email is jo@quit.example",
            TurnPhase::AwaitingConfirmation,
            Some(HandlerId::CustomerProfile),
        );
        let Intent::ConfirmValues { values } = intent else {
            panic!("expected ConfirmValues, got {:?}", intent);
        };
        assert_eq!(values.get(&ProfileField::Email).map(String::as_str), Some("jo@quit.example"));

        assert_eq!(
            classify("change my email to done@example.com"),
            Intent::ProfileUpdate {
                field: ProfileField::Email,
                new_value: Some("done@example.com".to_string()),
            }
        );
        assert_eq!(classify("cancel, it was 555-0100-22"), Intent::Cancel);
    }

    #[test]
    fn test_phrases_match_whole_words() {
        assert!(!has_phrase("the project was abandoned", DONE_PHRASES));
        assert!(has_phrase("ok, done.", DONE_PHRASES));
    }

    #[test]
    fn test_profile_inquiry() {
        assert_eq!(classify("What's on my profile?"), Intent::ProfileInquiry);
        assert_eq!(classify("what is my email"), Intent::ProfileInquiry);
    }

    #[test]
    fn test_domains() {
        assert_eq!(Intent::ProfileInquiry.domain(), Some(HandlerId::CustomerProfile));
        assert_eq!(
            Intent::SimilarSongs {
                reference: "x".to_string()
            }
            .domain(),
            Some(HandlerId::MusicCatalog)
        );
        assert_eq!(Intent::Done.domain(), None);
    }
}
