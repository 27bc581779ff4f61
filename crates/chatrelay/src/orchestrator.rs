//! Per-request control flow for `/chat` and `/history`.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use parking_lot::Mutex;
use tokio::sync::{Mutex as TurnMutex, OwnedMutexGuard, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, Span, error, field, info, instrument, warn};
use uuid::Uuid;

use crate::chat::{ChatReply, ChatRequest, TranscriptEntry};
use crate::config::ChatConfig;
use crate::error::{RelayError, RelayResult};
use crate::gateway::{ModelGateway, StreamOutcome};
use crate::identity::{IdentityOracle, resolve_user_id};
use crate::payload::Turn;
use crate::store::ConversationStore;
use crate::upstream::ModelApi;

/// Buffered channel depth between the upstream reader and the client.
const STREAM_BUFFER: usize = 32;

/// What the HTTP layer should send back for a chat request.
pub enum ChatOutcome {
    /// One JSON body with the given status
    Reply(StatusCode, ChatReply),
    /// Concatenated `{"response": ...}` fragments, ending when the turn does
    Stream(ReceiverStream<Bytes>),
}

impl std::fmt::Debug for ChatOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatOutcome::Reply(status, reply) => {
                f.debug_tuple("Reply").field(status).field(reply).finish()
            }
            ChatOutcome::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl ChatOutcome {
    fn failure(err: &RelayError) -> Self {
        ChatOutcome::Reply(err.status_code(), ChatReply::failure(err.message()))
    }
}

/// One async mutex per user with a turn in flight or waiting.
#[derive(Clone, Default)]
struct TurnLocks(Arc<Mutex<HashMap<String, Arc<TurnMutex<()>>>>>);

impl TurnLocks {
    async fn acquire(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = self.0.lock().entry(user_id.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    /// Ends the turn and forgets the user's lock once nobody else holds or waits on it.
    fn release(&self, user_id: &str, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut locks = self.0.lock();
        if locks
            .get(user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(user_id);
        }
    }

    fn len(&self) -> usize {
        self.0.lock().len()
    }
}

pub struct RequestOrchestrator {
    config: Arc<ChatConfig>,
    gateway: Arc<ModelGateway>,
    oracle: Arc<dyn IdentityOracle>,
    turn_locks: TurnLocks,
}

impl RequestOrchestrator {
    pub fn new(
        config: ChatConfig,
        api: Arc<dyn ModelApi>,
        oracle: Arc<dyn IdentityOracle>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        Self::with_gateway(config, Arc::new(ModelGateway::new(api, store)), oracle)
    }

    pub fn with_gateway(
        config: ChatConfig,
        gateway: Arc<ModelGateway>,
        oracle: Arc<dyn IdentityOracle>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            gateway,
            oracle,
            turn_locks: TurnLocks::default(),
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        self.gateway.store()
    }

    /// Handles one `POST /chat`. `query_token` is the `t` query parameter, used
    /// when the body carries no token.
    #[instrument(name = "chat", skip_all, fields(request_id = %Uuid::new_v4(), user = field::Empty))]
    pub async fn handle_chat(&self, request: ChatRequest, query_token: Option<String>) -> ChatOutcome {
        let ChatRequest {
            text,
            temperature,
            stream,
            supabase_jwt,
            tools,
            tool_outputs,
        } = request;

        let Some(text) = text.filter(|t| !t.is_empty()) else {
            warn!("rejecting chat request without text");
            return ChatOutcome::failure(&RelayError::InvalidRequest("text is required".into()));
        };
        let Some(token) = pick_token(supabase_jwt, query_token) else {
            warn!("rejecting chat request without identity token");
            return ChatOutcome::failure(&RelayError::InvalidRequest(
                "identity token is required".into(),
            ));
        };

        let user_id = resolve_user_id(self.oracle.as_ref(), &token).await;
        Span::current().record("user", user_id.as_str());

        let config = self.config.with_temperature(temperature);
        let stream = stream.unwrap_or(false);
        let turn = Turn::new(text, tools, tool_outputs, stream);

        let guard = self.turn_locks.acquire(&user_id).await;

        if !stream {
            let outcome = match self
                .gateway
                .process_non_streaming(&user_id, &turn, &config)
                .await
            {
                Ok(reply) => {
                    info!(chars = reply.output_text.len(), "chat turn completed");
                    ChatOutcome::Reply(StatusCode::OK, reply)
                }
                Err(e) => {
                    error!(error = %e, "chat turn failed");
                    ChatOutcome::failure(&e)
                }
            };
            self.turn_locks.release(&user_id, guard);
            return outcome;
        }

        let events = match self.gateway.open_stream(&user_id, &turn, &config).await {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "could not open upstream stream");
                self.turn_locks.release(&user_id, guard);
                return ChatOutcome::failure(&e);
            }
        };

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let gateway = self.gateway.clone();
        let locks = self.turn_locks.clone();
        tokio::spawn(
            async move {
                match gateway
                    .forward_stream(&user_id, &turn, &config, events, &tx)
                    .await
                {
                    Ok(StreamOutcome::Completed) => info!("streamed chat turn completed"),
                    Ok(StreamOutcome::ClientClosed) => {
                        info!("streamed chat turn abandoned by client")
                    }
                    Err(e) => error!(error = %e, "upstream stream failed mid-flight"),
                }
                locks.release(&user_id, guard);
            }
            .instrument(Span::current()),
        );

        ChatOutcome::Stream(ReceiverStream::new(rx))
    }

    /// Handles one `GET /history`.
    #[instrument(name = "history", skip_all, fields(request_id = %Uuid::new_v4(), user = field::Empty))]
    pub async fn history(&self, token: Option<String>) -> RelayResult<Vec<TranscriptEntry>> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RelayError::InvalidRequest("identity token is required".into()))?;

        let user_id = resolve_user_id(self.oracle.as_ref(), &token).await;
        Span::current().record("user", user_id.as_str());

        Ok(self
            .store()
            .get_history(&user_id)
            .iter()
            .map(TranscriptEntry::from)
            .collect())
    }
}

fn pick_token(body: Option<String>, query: Option<String>) -> Option<String> {
    body.filter(|t| !t.is_empty())
        .or_else(|| query.filter(|t| !t.is_empty()))
}
