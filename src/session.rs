use log::{ debug, info, warn };
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::ChatError;
use crate::llm::chat::{ drain_stream, ChatClient };
use crate::llm::{ validate_model_name, ModelConfig };
use crate::models::chat::{ ChatMessage, Conversation, Role, Turn };
use crate::models::websocket::SessionSnapshot;

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant. Maintain conversational context and provide consistent responses.";

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    AwaitingResponse,
    Error(String),
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingResponse => "awaiting_response",
            SessionState::Error(_) => "error",
        }
    }
}

/// A user request that only takes effect once confirmed.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingAction {
    SwitchModel(String),
    ClearHistory,
}

impl PendingAction {
    pub fn name(&self) -> &'static str {
        match self {
            PendingAction::SwitchModel(_) => "switch_model",
            PendingAction::ClearHistory => "clear_history",
        }
    }

    pub fn prompt(&self) -> String {
        match self {
            PendingAction::SwitchModel(model) =>
                format!(
                    "Switch to model '{}'? Earlier messages keep the model that produced them.",
                    model
                ),
            PendingAction::ClearHistory =>
                "Are you sure you want to clear the chat history?".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Ignored,
    Replied(Turn),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SwitchOutcome {
    Unchanged,
    ConfirmationRequired(PendingAction),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    NothingPending,
    ModelSwitched {
        from: String,
        to: String,
    },
    HistoryCleared,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub system_prompt: Option<String>,
    /// Number of past turns sent with each request; `None` sends all of them.
    pub history_turns: Option<usize>,
    pub request_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            history_turns: None,
            request_timeout: None,
        }
    }
}

/// Per-browser-session state: the conversation log, the model settings and
/// the Idle / AwaitingResponse / Error state machine around gateway calls.
pub struct SessionController {
    id: String,
    client: Arc<dyn ChatClient>,
    conversation: Conversation,
    config: ModelConfig,
    options: SessionOptions,
    state: SessionState,
    pending: Option<PendingAction>,
}

impl SessionController {
    pub fn new(client: Arc<dyn ChatClient>, config: ModelConfig, options: SessionOptions) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            conversation: Conversation::new(id.clone()),
            id,
            client,
            config,
            options,
            state: SessionState::Idle,
            pending: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn pending(&self) -> Option<&PendingAction> {
        self.pending.as_ref()
    }

    pub fn client(&self) -> &Arc<dyn ChatClient> {
        &self.client
    }

    /// Sends `user_text` with the conversation history and streams the reply
    /// through `on_fragment`. Both turns are appended only when the whole
    /// reply arrived; on failure the conversation is left untouched.
    pub async fn submit<F>(
        &mut self,
        user_text: &str,
        mut on_fragment: F
    ) -> Result<SubmitOutcome, ChatError>
        where F: FnMut(&str) + Send
    {
        if user_text.trim().is_empty() {
            debug!("[{}] Ignoring empty submission", self.id);
            return Ok(SubmitOutcome::Ignored);
        }
        if let Some(pending) = &self.pending {
            return Err(
                ChatError::validation(
                    format!("Confirm or cancel the pending {} first", pending.name().replace('_', " "))
                )
            );
        }

        let user_turn = Turn::user(user_text);
        let messages = self.build_messages(&user_turn);
        let config = self.config.clone();
        let client = Arc::clone(&self.client);

        self.state = SessionState::AwaitingResponse;
        info!(
            "[{}] Sending {} message(s) to model {}",
            self.id,
            messages.len(),
            config.model_name()
        );

        let generation = generate(client.as_ref(), &messages, &config, &mut on_fragment);
        let result = match self.options.request_timeout {
            Some(limit) =>
                match tokio::time::timeout(limit, generation).await {
                    Ok(result) => result,
                    Err(_) => Err(ChatError::Timeout(limit.as_secs())),
                }
            None => generation.await,
        };

        match result {
            Ok(reply) => {
                let assistant_turn = Turn::assistant(reply, config.model_name());
                self.conversation.append(user_turn);
                self.conversation.append(assistant_turn.clone());
                self.state = SessionState::Idle;
                info!(
                    "[{}] Reply received ({} chars), {} turns in history",
                    self.id,
                    assistant_turn.content().len(),
                    self.conversation.len()
                );
                Ok(SubmitOutcome::Replied(assistant_turn))
            }
            Err(e) => {
                warn!("[{}] Request failed: {}", self.id, e);
                self.state = SessionState::Error(e.to_string());
                Err(e)
            }
        }
    }

    fn build_messages(&self, user_turn: &Turn) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        if let Some(prompt) = self.options.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            messages.push(ChatMessage::new(Role::System, prompt));
        }
        messages.extend(
            self.conversation.recent(self.options.history_turns).iter().map(Turn::to_message)
        );
        messages.push(user_turn.to_message());
        messages
    }

    /// Requests a model change for subsequent calls. Nothing changes until
    /// [`confirm_pending`](Self::confirm_pending) is called.
    pub fn switch_model(&mut self, name: &str) -> Result<SwitchOutcome, ChatError> {
        if self.state == SessionState::AwaitingResponse {
            return Err(
                ChatError::validation("A reply is still being generated; switch models once it completes")
            );
        }
        let name = validate_model_name(name)?;
        if name == self.config.model_name() {
            if matches!(self.pending, Some(PendingAction::SwitchModel(_))) {
                self.pending = None;
            }
            return Ok(SwitchOutcome::Unchanged);
        }
        let action = PendingAction::SwitchModel(name);
        info!("[{}] Model switch requested: {}", self.id, action.prompt());
        self.pending = Some(action.clone());
        Ok(SwitchOutcome::ConfirmationRequired(action))
    }

    pub fn request_clear(&mut self) -> PendingAction {
        let action = PendingAction::ClearHistory;
        self.pending = Some(action.clone());
        action
    }

    pub fn confirm_pending(&mut self) -> Result<ConfirmOutcome, ChatError> {
        match self.pending.take() {
            None => Ok(ConfirmOutcome::NothingPending),
            Some(PendingAction::SwitchModel(to)) => {
                let from = self.config.model_name().to_string();
                self.config.set_model_name(&to)?;
                info!("[{}] Switched model {} -> {}", self.id, from, to);
                Ok(ConfirmOutcome::ModelSwitched { from, to })
            }
            Some(PendingAction::ClearHistory) => {
                self.clear_history();
                Ok(ConfirmOutcome::HistoryCleared)
            }
        }
    }

    pub fn cancel_pending(&mut self) -> Option<PendingAction> {
        let cancelled = self.pending.take();
        if let Some(action) = &cancelled {
            debug!("[{}] Cancelled pending {}", self.id, action.name());
        }
        cancelled
    }

    pub fn clear_history(&mut self) {
        info!("[{}] Clearing {} turn(s)", self.id, self.conversation.len());
        self.conversation.clear();
        self.pending = None;
        self.state = SessionState::Idle;
    }

    pub fn set_temperature(&mut self, temperature: f64) -> Result<(), ChatError> {
        self.config.set_temperature(temperature)?;
        debug!("[{}] Temperature set to {}", self.id, temperature);
        Ok(())
    }

    pub fn set_context_length(&mut self, context_length: i64) -> Result<(), ChatError> {
        self.config.set_context_length(context_length)?;
        debug!("[{}] Context length set to {}", self.id, context_length);
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            model: self.config.model_name().to_string(),
            temperature: self.config.temperature(),
            context_length: self.config.context_length(),
            status: self.state.label().to_string(),
            status_message: match &self.state {
                SessionState::Error(message) => Some(message.clone()),
                _ => None,
            },
            message_count: self.conversation.len(),
            pending: self.pending.as_ref().map(|p| p.name().to_string()),
        }
    }
}

async fn generate<F>(
    client: &dyn ChatClient,
    messages: &[ChatMessage],
    config: &ModelConfig,
    on_fragment: &mut F
) -> Result<String, ChatError>
    where F: FnMut(&str) + Send
{
    let stream = client.complete_stream(messages, config).await?;
    drain_stream(stream, on_fragment).await
}
