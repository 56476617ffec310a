//! Turn loop
//!
//! `process_turn` is a reducer over one user turn: it appends the user
//! message, asks the active handler for transitions until the conversation
//! reaches a stable point, and hands the state back with the messages the
//! turn produced. Stable points are awaiting user input, awaiting
//! confirmation, and termination.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::context::UserContextLoader;
use crate::error::DispatchError;
use crate::executor::ToolExecutor;
use crate::gate::{ConfirmationResponse, GateDecision, SensitiveOperationGate};
use crate::handlers::{self, Transition};
use crate::intent::{Intent, IntentClassifier};
use crate::respond::{Reply, ResponseGenerator, TemplateResponder};
use crate::stores::ProfileStore;
use crate::tools::{ToolContext, ToolDefinition, ToolRegistry, names};
use crate::types::{
    ConversationState, GatePhase, HandlerId, Message, Role, ToolCall, ToolOutcome, ToolResult,
    TurnPhase,
};

fn default_max_route_steps() -> usize {
    16
}

fn default_tool_timeout_secs() -> u64 {
    10
}

fn default_confirmation_attempts() -> u32 {
    3
}

/// Dispatcher limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Transitions allowed per turn before the turn is treated as a defect
    #[serde(default = "default_max_route_steps")]
    pub max_route_steps: usize,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// Restatement attempts before a sensitive call is aborted
    #[serde(default = "default_confirmation_attempts")]
    pub confirmation_attempts: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_route_steps: default_max_route_steps(),
            tool_timeout_secs: default_tool_timeout_secs(),
            confirmation_attempts: default_confirmation_attempts(),
        }
    }
}

/// State after a turn, plus the messages that turn added
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub state: ConversationState,
    pub messages: Vec<Message>,
}

impl TurnOutcome {
    /// Text meant for the user
    pub fn replies(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant && !m.content.is_empty())
            .map(|m| m.content.as_str())
            .collect()
    }

    pub fn is_terminated(&self) -> bool {
        self.state.phase == TurnPhase::Terminated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Stable,
}

pub struct Dispatcher {
    profiles: Arc<dyn ProfileStore>,
    loader: UserContextLoader,
    executor: ToolExecutor,
    gate: SensitiveOperationGate,
    classifier: Arc<dyn IntentClassifier>,
    responder: Arc<dyn ResponseGenerator>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        registry: Arc<ToolRegistry>,
        classifier: Arc<dyn IntentClassifier>,
        responder: Arc<dyn ResponseGenerator>,
        config: DispatcherConfig,
    ) -> Self {
        info!(
            "Dispatcher ready ({} tools, {} route steps, {} confirmation attempts)",
            registry.len(),
            config.max_route_steps,
            config.confirmation_attempts
        );
        Self {
            loader: UserContextLoader::new(profiles.clone()),
            executor: ToolExecutor::new(registry, Duration::from_secs(config.tool_timeout_secs)),
            gate: SensitiveOperationGate::new(config.confirmation_attempts),
            profiles,
            classifier,
            responder,
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Tools the given handler may use
    pub fn tool_definitions(&self, handler: HandlerId) -> Vec<ToolDefinition> {
        self.executor.definitions_for(handler)
    }

    /// Load the user's profile and open a conversation at the primary handler
    pub async fn start(&self, user_id: i64) -> Result<ConversationState, DispatchError> {
        let profile = self.loader.load(user_id).await?;
        let state = ConversationState::new(user_id, profile);
        info!(
            "Started conversation {} for customer {}",
            state.conversation_id, user_id
        );
        Ok(state)
    }

    /// Process one user message and run the conversation to its next stable point
    pub async fn process_turn(
        &self,
        mut state: ConversationState,
        input: &str,
    ) -> Result<TurnOutcome, DispatchError> {
        match state.phase {
            TurnPhase::AwaitingUserInput | TurnPhase::AwaitingConfirmation => {}
            TurnPhase::Terminated => {
                return Err(DispatchError::invalid("conversation has already ended"));
            }
            TurnPhase::Routing => {
                return Err(DispatchError::invalid("turn started while still routing"));
            }
        }
        state.check_invariants()?;

        let start = state.messages.len();
        let handler = self.active(&state)?;
        state.push(Message::user(input, handler));
        let intent = self.classify(&state).await;
        debug!(
            "Conversation {}: {:?} at {} (depth {})",
            state.conversation_id,
            intent,
            handler,
            state.depth()
        );

        let step = if state.phase == TurnPhase::AwaitingConfirmation {
            self.resolve_confirmation(&mut state, &intent).await?
        } else {
            state.phase = TurnPhase::Routing;
            Step::Continue
        };
        if step == Step::Continue {
            self.route_until_stable(&mut state, &intent).await?;
        }

        if let Err(e) = state.check_invariants() {
            error!(
                "Conversation {} left inconsistent: {}",
                state.conversation_id, e
            );
            return Err(e);
        }
        let messages = state.messages[start..].to_vec();
        Ok(TurnOutcome { state, messages })
    }

    async fn classify(&self, state: &ConversationState) -> Intent {
        match self.classifier.classify(state).await {
            Ok(intent) => intent,
            Err(e) => {
                warn!("Intent classification failed, treating as unknown: {:#}", e);
                Intent::Unknown
            }
        }
    }

    async fn route_until_stable(
        &self,
        state: &mut ConversationState,
        intent: &Intent,
    ) -> Result<(), DispatchError> {
        for _ in 0..self.config.max_route_steps {
            let handler = self.active(state)?;
            let transition = handlers::route(handler, state, intent);
            Self::check_transition(handler, &transition, state.phase)?;
            if transition == Transition::LeaveHandler {
                Self::check_answered(state, handler)?;
            }
            if self.apply(state, handler, transition).await? == Step::Stable {
                return Ok(());
            }
        }
        error!(
            "Conversation {} did not settle within {} route steps",
            state.conversation_id, self.config.max_route_steps
        );
        Err(DispatchError::RouteLimitExceeded(self.config.max_route_steps))
    }

    fn check_transition(
        handler: HandlerId,
        transition: &Transition,
        phase: TurnPhase,
    ) -> Result<(), DispatchError> {
        if phase != TurnPhase::Routing || !handlers::permits(handler, transition) {
            error!(
                "Routing defect: {} handler emitted {} during {:?}",
                handler,
                transition.name(),
                phase
            );
            return Err(DispatchError::illegal_transition(handler, transition.name(), phase));
        }
        Ok(())
    }

    /// Every call issued so far has its result: tools run to completion before a handler may leave
    fn check_answered(state: &ConversationState, handler: HandlerId) -> Result<(), DispatchError> {
        let outstanding = state.outstanding_tool_calls();
        if let Some(call) = outstanding.first() {
            error!(
                "Routing defect: {} handler left with {} unanswered tool call(s), first {} ('{}')",
                handler,
                outstanding.len(),
                call.id,
                call.name
            );
            return Err(DispatchError::invalid(format!(
                "{} handler left with unanswered tool call {}",
                handler, call.id
            )));
        }
        Ok(())
    }

    async fn apply(
        &self,
        state: &mut ConversationState,
        handler: HandlerId,
        transition: Transition,
    ) -> Result<Step, DispatchError> {
        match transition {
            Transition::RespondToUser(reply) => {
                self.respond(state, handler, &reply).await?;
                state.phase = TurnPhase::AwaitingUserInput;
                Ok(Step::Stable)
            }
            Transition::InvokeTool(call) => self.invoke(state, handler, call).await,
            Transition::EnterHandler(target) => {
                let call = ToolCall::new(target.transfer_tool(), json!({}));
                state.push(Message::tool_request(call.clone(), handler));
                let result = state.stack.enter(target, &call)?;
                state.push(Message::tool(result, target));
                Ok(Step::Continue)
            }
            Transition::LeaveHandler => {
                let call = ToolCall::new(names::COMPLETE_OR_ESCALATE, json!({}));
                state.push(Message::tool_request(call.clone(), handler));
                let frame = state.stack.leave()?;
                let resumed = self.active(state)?;
                let result = ToolResult {
                    call_id: call.id,
                    tool: call.name,
                    outcome: ToolOutcome::Resumed {
                        from: frame.handler,
                        entry_call_id: frame.entry_tool_call_id,
                    },
                };
                state.push(Message::tool(result, resumed));
                Ok(Step::Continue)
            }
            Transition::EndConversation => {
                self.respond(state, handler, &Reply::Farewell).await?;
                state.stack.clear();
                state.phase = TurnPhase::Terminated;
                info!("Conversation {} ended", state.conversation_id);
                Ok(Step::Stable)
            }
        }
    }

    /// Run a safe call directly, or park a sensitive one behind the gate
    async fn invoke(
        &self,
        state: &mut ConversationState,
        handler: HandlerId,
        call: ToolCall,
    ) -> Result<Step, DispatchError> {
        let frame = state
            .stack
            .top()
            .cloned()
            .ok_or_else(|| DispatchError::invalid("tool call with an empty stack"))?;
        state.push(Message::tool_request(call.clone(), handler));

        let sensitive = match self.executor.sensitive_fields(&call, &frame) {
            Ok(fields) => fields,
            Err(e) => {
                state.push(Message::tool(ToolResult::failure(&call, &e), handler));
                return Ok(Step::Continue);
            }
        };

        if sensitive.is_empty() {
            let ctx = Self::tool_context(state);
            let result = self.executor.execute(&call, &frame, &ctx).await;
            state.push(Message::tool(result, handler));
            return Ok(Step::Continue);
        }

        match self.gate.request(
            call.clone(),
            handler,
            sensitive,
            &state.profile,
            &state.executed_calls,
        ) {
            Ok(request) => {
                let fields = request.fields_to_verify.keys().copied().collect();
                state.pending_confirmation = Some(request);
                state.phase = TurnPhase::AwaitingConfirmation;
                self.respond(state, handler, &Reply::ConfirmationPrompt { fields })
                    .await?;
                Ok(Step::Stable)
            }
            Err(e) => {
                state.push(Message::tool(ToolResult::failure(&call, &e), handler));
                Ok(Step::Continue)
            }
        }
    }

    /// Apply the user's answer to a pending confirmation
    async fn resolve_confirmation(
        &self,
        state: &mut ConversationState,
        intent: &Intent,
    ) -> Result<Step, DispatchError> {
        let request = state
            .pending_confirmation
            .take()
            .ok_or_else(|| DispatchError::invalid("awaiting confirmation with nothing pending"))?;
        let response = ConfirmationResponse::from_intent(intent, &request);
        let withdrawn = response == ConfirmationResponse::Withdrawn;

        match self.gate.evaluate(request, response, &state.executed_calls) {
            GateDecision::Retry(request) => {
                let reply = Reply::ConfirmationMismatch {
                    fields: request.fields_to_verify.keys().copied().collect(),
                    attempts_remaining: request.attempts_remaining,
                };
                let handler = request.handler;
                state.pending_confirmation = Some(request);
                self.respond(state, handler, &reply).await?;
                Ok(Step::Stable)
            }
            GateDecision::Abort { request, error } => {
                state.executed_calls.insert(request.tool_call.id.clone());
                let result = ToolResult::failure(&request.tool_call, &error);
                state.push(Message::tool(result.clone(), request.handler));
                state.phase = TurnPhase::Routing;
                // The user moved on: tell them now, routing goes straight to the new request
                if withdrawn {
                    let reply = Reply::ToolFailed {
                        tool: result.tool,
                        kind: error.kind(),
                        message: error.to_string(),
                    };
                    self.respond(state, request.handler, &reply).await?;
                }
                Ok(Step::Continue)
            }
            GateDecision::Execute(mut request) => {
                let frame = state
                    .stack
                    .top()
                    .cloned()
                    .filter(|f| f.handler == request.handler)
                    .ok_or_else(|| {
                        DispatchError::invalid(format!(
                            "confirmed call {} no longer owned by the active handler",
                            request.tool_call.id
                        ))
                    })?;
                let ctx = Self::tool_context(state);
                let execution = self
                    .gate
                    .execute(&request, &self.executor, &frame, &ctx, self.profiles.as_ref())
                    .await;

                request.advance(if execution.result.error_kind().is_none() {
                    GatePhase::Executed
                } else {
                    GatePhase::Aborted
                });
                info!(
                    "Confirmed call {} finished as {:?}",
                    request.tool_call.id, request.phase
                );
                if let Some(profile) = execution.profile {
                    state.profile = profile;
                }
                state.executed_calls.insert(request.tool_call.id.clone());
                state.push(Message::tool(execution.result, request.handler));
                state.phase = TurnPhase::Routing;
                Ok(Step::Continue)
            }
        }
    }

    async fn respond(
        &self,
        state: &mut ConversationState,
        handler: HandlerId,
        reply: &Reply,
    ) -> Result<(), DispatchError> {
        let text = match self.responder.render(state, reply).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Response generation failed, using templates: {:#}", e);
                TemplateResponder.render(state, reply).await?
            }
        };
        state.push(Message::assistant(text, handler));
        Ok(())
    }

    fn active(&self, state: &ConversationState) -> Result<HandlerId, DispatchError> {
        state
            .active_handler()
            .ok_or_else(|| DispatchError::invalid("no active handler"))
    }

    fn tool_context(state: &ConversationState) -> ToolContext {
        ToolContext {
            user_id: state.user_id,
            conversation_id: state.conversation_id.clone(),
        }
    }
}
