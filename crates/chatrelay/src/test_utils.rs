//! Shared mocks and fixtures for unit tests.

use async_trait::async_trait;
use futures::stream;
use mockall::mock;

use crate::error::RelayResult;
use crate::identity::IdentityOracle;
use crate::payload::ResponsesRequest;
use crate::upstream::{EventStream, ModelApi, ModelReply, StreamEvent};

mock! {
    pub ModelApi {}

    #[async_trait]
    impl ModelApi for ModelApi {
        async fn create(&self, request: &ResponsesRequest) -> RelayResult<ModelReply>;
        async fn create_stream(&self, request: &ResponsesRequest) -> RelayResult<EventStream>;
    }
}

mock! {
    pub IdentityOracle {}

    #[async_trait]
    impl IdentityOracle for IdentityOracle {
        async fn validate(&self, token: &str) -> bool;
    }
}

/// A buffered reply carrying `text` both flattened and as one message block.
pub fn text_reply(id: &str, text: &str) -> ModelReply {
    ModelReply {
        id: Some(id.to_string()),
        output: vec![serde_json::json!({
            "type": "message",
            "role": "assistant",
            "content": [{"type": "output_text", "text": text}]
        })],
        output_text: Some(text.to_string()),
    }
}

/// An event stream that yields `events` and then ends.
pub fn event_stream(events: Vec<RelayResult<StreamEvent>>) -> EventStream {
    Box::pin(stream::iter(events))
}
