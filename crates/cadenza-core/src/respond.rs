//! User-facing text for handler replies

use anyhow::Result;
use async_trait::async_trait;
use cadenza_store::ProfileField;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolErrorKind;
use crate::tools::names;
use crate::types::{ConversationState, HandlerId};

/// What a handler wants to tell the user. Rendering to text is left to a
/// [`ResponseGenerator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Welcome,
    AnythingElse,
    Clarify {
        handler: HandlerId,
    },
    AskForNewValue {
        field: ProfileField,
    },
    ToolSucceeded {
        tool: String,
        output: Value,
    },
    ToolFailed {
        tool: String,
        kind: ToolErrorKind,
        message: String,
    },
    /// Ask the user to restate the values on file. Never carries the values.
    ConfirmationPrompt {
        fields: Vec<ProfileField>,
    },
    ConfirmationMismatch {
        fields: Vec<ProfileField>,
        attempts_remaining: u32,
    },
    NothingToConfirm,
    Farewell,
}

#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn render(&self, state: &ConversationState, reply: &Reply) -> Result<String>;
}

/// Deterministic, template-based responses
#[derive(Debug, Clone, Default)]
pub struct TemplateResponder;

impl TemplateResponder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResponseGenerator for TemplateResponder {
    async fn render(&self, state: &ConversationState, reply: &Reply) -> Result<String> {
        let text = match reply {
            Reply::Welcome => format!(
                "Hi {}! I can help with your customer profile or with finding music. What would you like to do?",
                state.profile.first_name
            ),
            Reply::AnythingElse => "Is there anything else I can help you with?".to_string(),
            Reply::Clarify { handler } => clarify(*handler).to_string(),
            Reply::AskForNewValue { field } => format!("What should your new {} be?", field.label()),
            Reply::ToolSucceeded { tool, output } => tool_succeeded(tool, output),
            Reply::ToolFailed { kind, message, .. } => tool_failed(*kind, message),
            Reply::ConfirmationPrompt { fields } => format!(
                "Before I make this change, please confirm the {} we currently have on file for you.",
                field_list(fields)
            ),
            Reply::ConfirmationMismatch {
                fields,
                attempts_remaining,
            } => format!(
                "That doesn't match the {} on file. Please try again ({} {} left), or say \"cancel\".",
                field_list(fields),
                attempts_remaining,
                if *attempts_remaining == 1 { "attempt" } else { "attempts" }
            ),
            Reply::NothingToConfirm => "There's nothing waiting for confirmation right now.".to_string(),
            Reply::Farewell => "Thanks for visiting the music store. Goodbye!".to_string(),
        };
        Ok(text)
    }
}

fn clarify(handler: HandlerId) -> &'static str {
    match handler {
        HandlerId::Primary => {
            "Sorry, I didn't catch that. I can help with your customer profile or with finding music."
        }
        HandlerId::CustomerProfile => {
            "I can show your profile or update a detail such as your email address or phone number. What would you like to do?"
        }
        HandlerId::MusicCatalog => {
            "I can look up songs by title, list tracks or albums by an artist, or recommend similar songs. What are you looking for?"
        }
    }
}

fn tool_succeeded(tool: &str, output: &Value) -> String {
    match tool {
        names::DESCRIBE_SERVICES => {
            let lines: Vec<String> = output["services"]
                .as_array()
                .map(|services| {
                    services
                        .iter()
                        .map(|s| {
                            format!(
                                "- the {} {}",
                                s["assistant"].as_str().unwrap_or_default(),
                                s["description"].as_str().unwrap_or_default()
                            )
                        })
                        .collect()
                })
                .unwrap_or_default();
            format!("Here's what I can help with:\n{}", lines.join("\n"))
        }
        names::GET_CUSTOMER_INFO => profile_summary(output),
        names::UPDATE_CUSTOMER_PROFILE | names::UPDATE_EMAIL | names::UPDATE_PHONE => {
            let label = serde_json::from_value::<ProfileField>(output["field"].clone())
                .map(|f| f.label())
                .unwrap_or("profile");
            format!(
                "All done! Your {} is now {}.",
                label,
                output["new_value"].as_str().unwrap_or_default()
            )
        }
        names::CHECK_FOR_SONGS => track_list(
            &output["tracks"],
            &format!("Here's what I found for \"{}\":", output["query"].as_str().unwrap_or_default()),
            &format!(
                "I couldn't find any songs matching \"{}\".",
                output["query"].as_str().unwrap_or_default()
            ),
        ),
        names::GET_TRACKS_BY_ARTIST => {
            let artist = output["artist"].as_str().unwrap_or_default();
            track_list(
                &output["tracks"],
                &format!("Tracks by {}:", artist),
                &format!("I couldn't find any tracks by {}.", artist),
            )
        }
        names::GET_ALBUMS_BY_ARTIST => {
            let artist = output["artist"].as_str().unwrap_or_default();
            let albums: Vec<String> = output["albums"]
                .as_array()
                .map(|a| {
                    a.iter()
                        .map(|album| {
                            format!(
                                "- {} ({})",
                                album["title"].as_str().unwrap_or_default(),
                                album["artist"].as_str().unwrap_or_default()
                            )
                        })
                        .collect()
                })
                .unwrap_or_default();
            if albums.is_empty() {
                format!("I couldn't find any albums by {}.", artist)
            } else {
                format!("Albums by {}:\n{}", artist, albums.join("\n"))
            }
        }
        names::SIMILARITY_SEARCH => {
            let heading = match output["reference"].as_str() {
                Some(reference) => format!("If you like \"{}\", you might enjoy:", reference),
                None => "You might enjoy:".to_string(),
            };
            track_list(&output["tracks"], &heading, "I couldn't find any similar songs.")
        }
        _ => "Done.".to_string(),
    }
}

fn track_list(tracks: &Value, heading: &str, empty: &str) -> String {
    let lines: Vec<String> = tracks
        .as_array()
        .map(|tracks| {
            tracks
                .iter()
                .map(|t| {
                    let name = t["name"].as_str().unwrap_or_default();
                    let artist = t["artist"].as_str().unwrap_or_default();
                    match t["album"].as_str() {
                        Some(album) => format!("- {} by {} ({})", name, artist, album),
                        None => format!("- {} by {}", name, artist),
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    if lines.is_empty() {
        empty.to_string()
    } else {
        format!("{}\n{}", heading, lines.join("\n"))
    }
}

/// Contact details are masked so the summary cannot be used to pass a
/// confirmation challenge.
fn profile_summary(profile: &Value) -> String {
    let mut lines = vec![format!(
        "Name: {} {}",
        profile["first_name"].as_str().unwrap_or_default(),
        profile["last_name"].as_str().unwrap_or_default()
    )];
    if let Some(email) = profile["email"].as_str() {
        lines.push(format!("Email: {}", mask_email(email)));
    }
    if let Some(phone) = profile["phone"].as_str() {
        lines.push(format!("Phone: {}", mask_phone(phone)));
    }
    for (key, label) in [("company", "Company"), ("city", "City"), ("country", "Country")] {
        if let Some(value) = profile[key].as_str() {
            lines.push(format!("{}: {}", label, value));
        }
    }
    format!("Here's what we have on file:\n{}", lines.join("\n"))
}

fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first: String = local.chars().take(1).collect();
            format!("{}***@{}", first, domain)
        }
        None => "***".to_string(),
    }
}

fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    let tail: String = digits[digits.len().saturating_sub(2)..].iter().collect();
    format!("***{}", tail)
}

fn tool_failed(kind: ToolErrorKind, message: &str) -> String {
    match kind {
        ToolErrorKind::NotFound => format!("Sorry, I couldn't find that ({}).", message),
        ToolErrorKind::Validation => format!("That doesn't look right: {}. Could you try again?", message),
        ToolErrorKind::Connectivity | ToolErrorKind::Timeout => {
            "Sorry, I'm having trouble reaching the store's systems right now. Please try again in a moment."
                .to_string()
        }
        ToolErrorKind::Unauthorized => "Sorry, I can't do that from here.".to_string(),
        ToolErrorKind::ConfirmationFailed => {
            "I couldn't verify your details, so I haven't changed anything.".to_string()
        }
        ToolErrorKind::ConfirmationCancelled => "No problem, I haven't changed anything.".to_string(),
        ToolErrorKind::AlreadyResolved => "That change has already been made.".to_string(),
    }
}

fn field_list(fields: &[ProfileField]) -> String {
    let labels: Vec<&str> = fields.iter().map(|f| f.label()).collect();
    match labels.as_slice() {
        [] => "details".to_string(),
        [one] => one.to_string(),
        [rest @ .., last] => format!("{} and {}", rest.join(", "), last),
    }
}
