//! Executes chat turns against the model API and commits their results.
//!
//! A turn's effect on the store is applied in one step after the upstream call
//! has succeeded: continuation token first, then the transcript (lazy system
//! prompt, user prompt, assistant reply). A buffered turn only records a
//! non-empty reply; a completed stream always records exactly one. A failed or
//! abandoned turn leaves the store untouched.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::chat::{ChatReply, Message, StreamFragment};
use crate::config::ChatConfig;
use crate::error::RelayResult;
use crate::fault::{FaultClassifier, MissingToolOutput};
use crate::payload::{ResponsesRequest, Turn, build_for_user};
use crate::store::ConversationStore;
use crate::upstream::{EventStream, ModelApi, StreamEvent};

/// How a streamed turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The upstream finished and the turn was committed
    Completed,
    /// The client went away; nothing was committed
    ClientClosed,
}

pub struct ModelGateway {
    api: Arc<dyn ModelApi>,
    store: Arc<dyn ConversationStore>,
    classifier: Arc<dyn FaultClassifier>,
}

impl ModelGateway {
    pub fn new(api: Arc<dyn ModelApi>, store: Arc<dyn ConversationStore>) -> Self {
        Self {
            api,
            store,
            classifier: Arc::new(MissingToolOutput),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn FaultClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Runs a buffered turn.
    #[instrument(name = "gateway.buffered", skip_all, fields(user = %user_id, model = %config.model))]
    pub async fn process_non_streaming(
        &self,
        user_id: &str,
        turn: &Turn,
        config: &ChatConfig,
    ) -> RelayResult<ChatReply> {
        let request = build_for_user(self.store.as_ref(), user_id, turn, config);
        log_request(&request);

        let reply = match self.api.create(&request).await {
            Ok(reply) => reply,
            Err(e) if self.classifier.is_recoverable(&e) => {
                warn!(error = %e, "recovering conversation with unanswered function call");
                self.api
                    .create(&request.recovery(&config.system_prompt))
                    .await?
            }
            Err(e) => return Err(e),
        };
        debug!(reply = ?reply, "upstream reply");

        let text = reply.text();
        let assistant = Some(text.as_str()).filter(|t| !t.is_empty());
        self.commit(user_id, turn, config, assistant, reply.id.clone());
        Ok(ChatReply::success(text, reply.output, reply.id))
    }

    /// Opens the upstream event stream for a streamed turn.
    ///
    /// Nothing has reached the client yet, so the recovery retry still applies.
    #[instrument(name = "gateway.open_stream", skip_all, fields(user = %user_id, model = %config.model))]
    pub async fn open_stream(
        &self,
        user_id: &str,
        turn: &Turn,
        config: &ChatConfig,
    ) -> RelayResult<EventStream> {
        let request = build_for_user(self.store.as_ref(), user_id, turn, config);
        log_request(&request);

        match self.api.create_stream(&request).await {
            Ok(events) => Ok(events),
            Err(e) if self.classifier.is_recoverable(&e) => {
                warn!(error = %e, "recovering conversation with unanswered function call");
                self.api
                    .create_stream(&request.recovery(&config.system_prompt))
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Relays `events` to `tx` as `{"response": ...}` fragments and commits the
    /// turn once the upstream stream ends.
    #[instrument(name = "gateway.forward_stream", skip_all, fields(user = %user_id))]
    pub async fn forward_stream(
        &self,
        user_id: &str,
        turn: &Turn,
        config: &ChatConfig,
        mut events: EventStream,
        tx: &mpsc::Sender<Bytes>,
    ) -> RelayResult<StreamOutcome> {
        let mut full_text = String::new();
        let mut response_id: Option<String> = None;

        while let Some(event) = events.next().await {
            match event? {
                StreamEvent::ResponseId(id) => {
                    if response_id.is_none() {
                        response_id = Some(id);
                    }
                }
                StreamEvent::TextDelta(delta) => {
                    let fragment = serde_json::to_vec(&StreamFragment {
                        response: delta.clone(),
                    })?;
                    if tx.send(Bytes::from(fragment)).await.is_err() {
                        info!("client closed stream, discarding partial reply");
                        return Ok(StreamOutcome::ClientClosed);
                    }
                    full_text.push_str(&delta);
                }
                StreamEvent::Completed => debug!("upstream stream completed"),
            }
        }

        if tx.is_closed() {
            info!("client closed stream before completion, discarding reply");
            return Ok(StreamOutcome::ClientClosed);
        }

        self.commit(user_id, turn, config, Some(full_text.as_str()), response_id);
        Ok(StreamOutcome::Completed)
    }

    /// Runs a streamed turn end to end.
    pub async fn process_streaming(
        &self,
        user_id: &str,
        turn: &Turn,
        config: &ChatConfig,
        tx: &mpsc::Sender<Bytes>,
    ) -> RelayResult<StreamOutcome> {
        let events = self.open_stream(user_id, turn, config).await?;
        self.forward_stream(user_id, turn, config, events, tx).await
    }

    fn commit(
        &self,
        user_id: &str,
        turn: &Turn,
        config: &ChatConfig,
        assistant: Option<&str>,
        response_id: Option<String>,
    ) {
        if let Some(id) = response_id {
            self.store.set_continuation_token(user_id, id);
        }
        if turn.is_tool_reply() {
            return;
        }

        let mut history = self.store.get_history(user_id);
        if history.is_empty() {
            history.push(Message::system(config.system_prompt.as_str()));
        }
        history.push(Message::user(turn.prompt.as_str()));
        if let Some(text) = assistant {
            history.push(Message::assistant(text));
        }
        self.store.update_history(user_id, history);
    }
}

fn log_request(request: &ResponsesRequest) {
    match serde_json::to_string(request) {
        Ok(body) => debug!(payload = %body, "upstream request"),
        Err(e) => debug!(error = %e, "upstream request not serialisable for logging"),
    }
}
