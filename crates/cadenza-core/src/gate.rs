//! Confirm-before-mutate gate for sensitive profile tools
//!
//! A sensitive call moves `Idle → Requested → AwaitingConfirmation` and then
//! ends in `Executed` or `Aborted`. While it waits, the conversation is parked
//! and the user must restate the values on file for every field the call
//! would change. Writes are serialized per user, and the stored profile is
//! re-read under the lock so a confirmation against stale values never lands.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use cadenza_store::{Profile, ProfileField};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::error::ToolError;
use crate::executor::ToolExecutor;
use crate::intent::Intent;
use crate::stack::HandlerFrame;
use crate::stores::ProfileStore;
use crate::tools::ToolContext;
use crate::types::{ConfirmationRequest, GatePhase, HandlerId, ToolCall, ToolResult};

/// How the user answered a confirmation prompt
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationResponse {
    Values(BTreeMap<ProfileField, String>),
    Cancel,
    /// The user moved on to something else
    Withdrawn,
}

impl ConfirmationResponse {
    pub fn from_intent(intent: &Intent, request: &ConfirmationRequest) -> Self {
        match intent {
            Intent::ConfirmValues { values } => Self::Values(values.clone()),
            Intent::Cancel => Self::Cancel,
            Intent::Done | Intent::Goodbye => Self::Withdrawn,
            other if other.domain().is_some_and(|d| d != request.handler) => Self::Withdrawn,
            // Anything else counts as a failed restatement
            _ => Self::Values(BTreeMap::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Every value matched; run the call
    Execute(ConfirmationRequest),
    /// Mismatch with attempts left; ask again
    Retry(ConfirmationRequest),
    Abort {
        request: ConfirmationRequest,
        error: ToolError,
    },
}

/// Result of running a confirmed call
#[derive(Debug, Clone)]
pub struct GateExecution {
    pub result: ToolResult,
    /// Fresh profile read after a successful write
    pub profile: Option<Profile>,
}

pub struct SensitiveOperationGate {
    max_attempts: u32,
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl SensitiveOperationGate {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Park a sensitive call and build the challenge from the profile snapshot
    pub fn request(
        &self,
        call: ToolCall,
        handler: HandlerId,
        changes: Vec<ProfileField>,
        snapshot: &Profile,
        resolved: &HashSet<String>,
    ) -> Result<ConfirmationRequest, ToolError> {
        if resolved.contains(&call.id) {
            return Err(ToolError::AlreadyResolved(call.id));
        }

        let mut fields_to_verify = BTreeMap::new();
        for field in &changes {
            // Fields with nothing on file are vouched for by the email instead
            let (verify, value) = match snapshot.get(*field) {
                Some(value) => (*field, value),
                None => match snapshot.get(ProfileField::Email) {
                    Some(email) => (ProfileField::Email, email),
                    None => continue,
                },
            };
            fields_to_verify.insert(verify, value.to_string());
        }
        if fields_to_verify.is_empty() {
            warn!("No known values to verify for call {}", call.id);
            return Err(ToolError::ConfirmationFailed(
                "there are no details on file to verify your identity".to_string(),
            ));
        }

        let mut request = ConfirmationRequest {
            tool_call: call,
            handler,
            fields_to_verify,
            changes,
            attempts_remaining: self.max_attempts,
            phase: GatePhase::Requested,
        };
        request.advance(GatePhase::AwaitingConfirmation);
        info!(
            "Awaiting confirmation of {:?} for '{}'",
            request.fields_to_verify.keys().collect::<Vec<_>>(),
            request.tool_call.name
        );
        Ok(request)
    }

    /// Judge the user's answer to a pending confirmation
    pub fn evaluate(
        &self,
        mut request: ConfirmationRequest,
        response: ConfirmationResponse,
        resolved: &HashSet<String>,
    ) -> GateDecision {
        if resolved.contains(&request.tool_call.id) {
            let error = ToolError::AlreadyResolved(request.tool_call.id.clone());
            request.advance(GatePhase::Aborted);
            return GateDecision::Abort { request, error };
        }

        let values = match response {
            ConfirmationResponse::Cancel | ConfirmationResponse::Withdrawn => {
                info!("Confirmation for {} cancelled", request.tool_call.id);
                request.advance(GatePhase::Aborted);
                return GateDecision::Abort {
                    request,
                    error: ToolError::ConfirmationCancelled,
                };
            }
            ConfirmationResponse::Values(values) => values,
        };

        let matched = request.fields_to_verify.iter().all(|(field, expected)| {
            values
                .get(field)
                .is_some_and(|given| given.trim() == expected.trim())
        });
        if matched {
            debug!("Confirmation for {} matched", request.tool_call.id);
            return GateDecision::Execute(request);
        }

        request.attempts_remaining = request.attempts_remaining.saturating_sub(1);
        if request.attempts_remaining == 0 {
            warn!(
                "Confirmation for {} failed: attempts exhausted",
                request.tool_call.id
            );
            request.advance(GatePhase::Aborted);
            return GateDecision::Abort {
                request,
                error: ToolError::ConfirmationFailed(
                    "the details given did not match our records".to_string(),
                ),
            };
        }
        debug!(
            "Confirmation mismatch for {} ({} attempts left)",
            request.tool_call.id, request.attempts_remaining
        );
        GateDecision::Retry(request)
    }

    /// Run a confirmed call while holding the user's write lock
    pub async fn execute(
        &self,
        request: &ConfirmationRequest,
        executor: &ToolExecutor,
        frame: &HandlerFrame,
        ctx: &ToolContext,
        profiles: &dyn ProfileStore,
    ) -> GateExecution {
        let guard = self.lock_user(ctx.user_id).await;
        let execution = self
            .execute_locked(request, executor, frame, ctx, profiles)
            .await;
        drop(guard);
        self.release_user(ctx.user_id);
        execution
    }

    async fn execute_locked(
        &self,
        request: &ConfirmationRequest,
        executor: &ToolExecutor,
        frame: &HandlerFrame,
        ctx: &ToolContext,
        profiles: &dyn ProfileStore,
    ) -> GateExecution {
        let call = &request.tool_call;
        let stored = match profiles.get(ctx.user_id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                let error = ToolError::NotFound(format!("customer {} no longer exists", ctx.user_id));
                return GateExecution {
                    result: ToolResult::failure(call, &error),
                    profile: None,
                };
            }
            Err(e) => {
                warn!("Failed to re-read profile before write: {:#}", e);
                return GateExecution {
                    result: ToolResult::failure(call, &ToolError::from(e)),
                    profile: None,
                };
            }
        };

        if !Self::is_current(request, &stored) {
            warn!(
                "Profile for customer {} changed since confirmation of {}",
                ctx.user_id, call.id
            );
            let error = ToolError::ConfirmationFailed(
                "your details changed while we were confirming them".to_string(),
            );
            return GateExecution {
                result: ToolResult::failure(call, &error),
                profile: Some(stored),
            };
        }

        let result = executor.execute(call, frame, ctx).await;
        if result.error_kind().is_some() {
            return GateExecution {
                result,
                profile: None,
            };
        }
        info!("Executed confirmed call {} ('{}')", call.id, call.name);

        let profile = match profiles.get(ctx.user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Failed to refresh profile after write: {:#}", e);
                None
            }
        };
        GateExecution { result, profile }
    }

    /// True when the stored profile still holds every value the user confirmed
    pub fn is_current(request: &ConfirmationRequest, stored: &Profile) -> bool {
        request
            .fields_to_verify
            .iter()
            .all(|(field, expected)| stored.get(*field) == Some(expected.as_str()))
    }

    /// Per-user write lock, shared by every conversation of that user
    pub async fn lock_user(&self, user_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.lock_table();
            Arc::clone(locks.entry(user_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Forget the user's lock once no guard or waiter holds it
    fn release_user(&self, user_id: i64) {
        let mut locks = self.lock_table();
        if locks
            .get(&user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&user_id);
        }
    }

    fn lock_table(&self) -> MutexGuard<'_, HashMap<i64, Arc<tokio::sync::Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(|poisoned| {
            warn!("Gate lock table was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
