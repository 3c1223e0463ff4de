//! Streaming session and conversation management

use async_stream::try_stream;
use futures::future::try_join_all;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::streaming::{reply_snapshots, Snapshot};
use crate::context::{ConversationHistory, Message, Role, TokenAccountant, TokenBudget};
use crate::error::Result;
use crate::metrics::METRICS;
use crate::transport::{CompletionRequest, CompletionTransport, SamplingOptions};

/// Lazy sequence of growing text snapshots for one reply
pub type ReplyStream<'a> = BoxStream<'a, Result<String>>;

/// Default minimum growth, in characters, between two snapshots
pub const DEFAULT_MIN_CHUNK: usize = 10;

/// Resolved settings for a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub model: String,
    /// System role text sent first in every request
    pub role: String,
    pub budget: TokenBudget,
    pub min_chunk: usize,
    pub options: SamplingOptions,
}

impl SessionSettings {
    pub fn new(model: impl Into<String>, role: impl Into<String>, budget: TokenBudget) -> Self {
        Self {
            model: model.into(),
            role: role.into(),
            budget,
            min_chunk: DEFAULT_MIN_CHUNK,
            options: SamplingOptions::default(),
        }
    }

    pub fn with_min_chunk(mut self, min_chunk: usize) -> Self {
        self.min_chunk = min_chunk;
        self
    }

    pub fn with_options(mut self, options: SamplingOptions) -> Self {
        self.options = options;
        self
    }
}

/// Outcome of [`StreamingSession::regenerate_last`]
pub enum Regeneration<'a> {
    /// History holds no complete turn; nothing changed
    NothingToRegenerate,
    /// The last turn was removed and a fresh reply is streaming
    Started(ReplyStream<'a>),
}

impl<'a> Regeneration<'a> {
    pub fn into_stream(self) -> Option<ReplyStream<'a>> {
        match self {
            Regeneration::NothingToRegenerate => None,
            Regeneration::Started(stream) => Some(stream),
        }
    }
}

/// A conversation with one model, streamed turn by turn
pub struct StreamingSession {
    id: Uuid,
    model: String,
    system: Message,
    history: ConversationHistory,
    accountant: TokenAccountant,
    budget: TokenBudget,
    options: SamplingOptions,
    min_chunk: usize,
    transport: Arc<dyn CompletionTransport>,
}

impl StreamingSession {
    /// Create a session counting tokens with the model's tiktoken encoding
    pub fn new(settings: SessionSettings, transport: Arc<dyn CompletionTransport>) -> Result<Self> {
        let accountant = TokenAccountant::for_model(&settings.model)?;
        Ok(Self::with_accountant(settings, transport, accountant))
    }

    /// Create a session with a custom token accountant
    pub fn with_accountant(
        settings: SessionSettings,
        transport: Arc<dyn CompletionTransport>,
        accountant: TokenAccountant,
    ) -> Self {
        let id = Uuid::new_v4();
        info!(
            session = %id,
            model = %settings.model,
            max_context = ?settings.budget.max_context_tokens,
            max_output = settings.budget.max_output_tokens,
            "Session created"
        );

        Self {
            id,
            model: settings.model,
            system: Message::system(settings.role),
            history: ConversationHistory::new(),
            accountant,
            budget: settings.budget,
            options: settings.options,
            min_chunk: settings.min_chunk,
            transport,
        }
    }

    /// Start with previously recorded turns
    pub fn with_history(mut self, history: ConversationHistory) -> Self {
        self.history = history;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system_message(&self) -> &Message {
        &self.system
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn budget(&self) -> &TokenBudget {
        &self.budget
    }

    pub fn min_chunk(&self) -> usize {
        self.min_chunk
    }

    /// Tokens taken by the system message and stored history
    pub fn count_history_tokens(&self) -> usize {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(self.system.clone());
        messages.extend_from_slice(self.history.messages());
        self.accountant.count_messages(&messages)
    }

    pub fn count_text_tokens(&self, text: &str) -> usize {
        self.accountant.count_text(text)
    }

    /// Append a user message without asking for a reply
    pub fn add_user_message(&mut self, prompt: impl Into<String>) {
        self.history.push_user(prompt);
        debug!(session = %self.id, messages = self.history.len(), "User message added");
    }

    /// Submit a prompt and stream the reply
    ///
    /// Without `history_override` the prompt and final reply are appended to
    /// history once the stream completes. With an override, history is left
    /// untouched. Dropping the stream early commits nothing.
    pub fn submit(
        &mut self,
        prompt: impl Into<String>,
        history_override: Option<&[Message]>,
    ) -> Result<ReplyStream<'_>> {
        let prompt = prompt.into();

        match history_override {
            Some(history) => {
                let snapshots = self.reply(&prompt, history)?;
                Ok(Box::pin(snapshots.map(|snapshot| snapshot.map(|s| s.text))))
            }
            None => {
                let snapshots = self.reply(&prompt, self.history.messages())?;
                Ok(self.committing(prompt, snapshots))
            }
        }
    }

    /// Drop the last turn and stream a fresh reply to its prompt
    ///
    /// The removed reply is discarded. If the new request does not fit the
    /// budget, the removed turn is put back and the error returned.
    pub fn regenerate_last(&mut self) -> Result<Regeneration<'_>> {
        let Some((prompt, reply)) = self.history.pop_turn() else {
            return Ok(self.nothing_to_regenerate());
        };

        if prompt.role != Role::User || reply.role != Role::Assistant {
            self.history.restore_turn(prompt, reply);
            return Ok(self.nothing_to_regenerate());
        }

        info!(session = %self.id, "Regenerating last reply");
        let snapshots = match self.reply(&prompt.content, self.history.messages()) {
            Ok(snapshots) => snapshots,
            Err(e) => {
                self.history.restore_turn(prompt, reply);
                return Err(e);
            }
        };

        METRICS.regenerations.with_label_values(&["started"]).inc();
        Ok(Regeneration::Started(self.committing(prompt.content, snapshots)))
    }

    /// Generate a complete reply against `history` without committing it
    pub async fn generate_full_reply(&self, prompt: &str, history: &[Message]) -> Result<String> {
        let mut snapshots = self.reply(prompt, history)?;
        let mut text = String::new();
        while let Some(snapshot) = snapshots.next().await {
            text = snapshot?.text;
        }
        Ok(text)
    }

    /// Sample `n` independent replies to the same prompt
    ///
    /// All replies see the same snapshot of history and run interleaved on
    /// the calling task. Results keep issue order; any failure fails all.
    pub async fn generate_n_replies(&self, prompt: &str, n: usize) -> Result<Vec<String>> {
        let snapshot = self.history.snapshot();
        info!(session = %self.id, n, "Sampling replies");

        let replies = (0..n).map(|_| self.generate_full_reply(prompt, &snapshot));
        try_join_all(replies).await
    }

    fn nothing_to_regenerate(&self) -> Regeneration<'static> {
        info!(session = %self.id, "No previous answer to regenerate");
        METRICS.regenerations.with_label_values(&["nothing"]).inc();
        Regeneration::NothingToRegenerate
    }

    /// Assemble the request and check it against the budget
    fn prepare(&self, prompt: &str, history: &[Message]) -> Result<CompletionRequest> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(self.system.clone());
        messages.extend_from_slice(history);
        messages.push(Message::user(prompt));

        let used_tokens = self.accountant.count_messages(&messages);
        METRICS.prompt_tokens.observe(used_tokens as f64);

        let max_output_tokens = self
            .accountant
            .remaining_output_tokens(&messages, &self.budget)
            .map_err(|e| {
                METRICS.budget_rejections.inc();
                warn!(session = %self.id, used_tokens, "Request rejected: {}", e);
                e
            })?;

        debug!(
            session = %self.id,
            messages = messages.len(),
            used_tokens,
            max_output_tokens,
            "Request assembled"
        );

        Ok(CompletionRequest {
            model: self.model.clone(),
            messages,
            max_output_tokens,
            options: self.options.clone(),
        })
    }

    /// Stream snapshots for one reply; owns everything it needs
    fn reply(&self, prompt: &str, history: &[Message]) -> Result<BoxStream<'static, Result<Snapshot>>> {
        let request = self.prepare(prompt, history)?;
        let snapshots = reply_snapshots(self.transport.clone(), request, self.min_chunk);
        let session = self.id;

        Ok(Box::pin(try_stream! {
            let timer = METRICS.completion_duration.start_timer();
            let mut snapshots = Box::pin(snapshots);
            let mut degraded = false;

            while let Some(snapshot) = snapshots.next().await {
                let snapshot = snapshot.map_err(|e| {
                    METRICS.completions.with_label_values(&["error"]).inc();
                    warn!(session = %session, "Completion failed: {}", e);
                    e
                })?;

                METRICS.snapshots_emitted.inc();
                if snapshot.degraded {
                    degraded = true;
                    METRICS.rate_limited.inc();
                    warn!(session = %session, "Provider overloaded, reply degraded");
                }
                yield snapshot;
            }

            timer.observe_duration();
            let outcome = if degraded { "degraded" } else { "success" };
            METRICS.completions.with_label_values(&[outcome]).inc();
        }))
    }

    /// Wrap `snapshots` so the turn is committed once they complete
    fn committing(
        &mut self,
        prompt: String,
        mut snapshots: BoxStream<'static, Result<Snapshot>>,
    ) -> ReplyStream<'_> {
        let history = &mut self.history;
        let session = self.id;

        Box::pin(try_stream! {
            let mut final_text = String::new();

            while let Some(snapshot) = snapshots.next().await {
                let snapshot = snapshot?;
                final_text.clone_from(&snapshot.text);
                yield snapshot.text;
            }

            // a degraded reply ends normally and is kept with its apology
            history.push_turn(prompt, final_text);
            METRICS.turns_committed.inc();
            debug!(session = %session, messages = history.len(), "Turn committed");
        })
    }
}

impl std::fmt::Debug for StreamingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingSession")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("history_len", &self.history.len())
            .field("budget", &self.budget)
            .field("min_chunk", &self.min_chunk)
            .finish_non_exhaustive()
    }
}
