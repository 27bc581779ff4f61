//! Shared HTTP client for calls to external services.
//!
//! Request builders produce plain `http::Request<Vec<u8>>` values so they can
//! be unit tested without a network; this module is the only place that turns
//! them into real traffic.

use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::{Request, Response};
use once_cell::sync::Lazy;
use reqwest::Client;

use crate::error::RelayError;

/// A single, global client, built once
pub static CLIENT: Lazy<Client> = Lazy::new(Client::new);

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, RelayError>> + Send>>;

fn to_reqwest(client: &Client, req: Request<Vec<u8>>) -> reqwest::RequestBuilder {
    let (parts, body) = req.into_parts();
    client
        .request(parts.method, parts.uri.to_string())
        .headers(parts.headers)
        .body(body)
}

/// Sends `req` and buffers the whole response body. Non-2xx statuses are
/// returned as responses, not errors, so callers can decode error bodies.
pub async fn call_outbound(req: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, RelayError> {
    let resp = to_reqwest(&CLIENT, req).send().await?;

    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = resp.bytes().await?.to_vec();

    let mut builder = Response::builder().status(status);
    for (name, value) in headers.iter() {
        builder = builder.header(name, value);
    }
    Ok(builder.body(bytes)?)
}

/// Sends `req` and hands back the body as it arrives.
pub async fn call_outbound_stream(req: Request<Vec<u8>>) -> Result<Response<ByteStream>, RelayError> {
    let resp = to_reqwest(&CLIENT, req).send().await?;

    let status = resp.status();
    let headers = resp.headers().clone();
    let body: ByteStream = Box::pin(
        resp.bytes_stream()
            .map(|chunk| chunk.map_err(RelayError::from)),
    );

    let mut builder = Response::builder().status(status);
    for (name, value) in headers.iter() {
        builder = builder.header(name, value);
    }
    Ok(builder.body(body)?)
}

/// Drains a streamed body, for reading error payloads.
pub async fn collect_body(mut body: ByteStream) -> Result<Vec<u8>, RelayError> {
    let mut out = Vec::new();
    while let Some(chunk) = body.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}
