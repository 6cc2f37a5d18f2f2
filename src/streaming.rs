//! Newline-delimited JSON transport for in-progress generations.
//!
//! Each line is a self-contained JSON document: every partial snapshot is
//! written as-is, and the stream always ends with a terminal line of either
//! `{"done": true, "payload": ...}` or `{"done": true, "error": "..."}`.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::generation::GenerationEvent;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

fn event_line(event: GenerationEvent) -> String {
    let value = match event {
        GenerationEvent::Partial(value) => value,
        GenerationEvent::Completed(payload) => serde_json::json!({
            "done": true,
            "payload": payload,
        }),
        GenerationEvent::Failed(reason) => serde_json::json!({
            "done": true,
            "error": reason,
        }),
    };
    format!("{}\n", value)
}

/// Wrap a generation event channel as a streaming HTTP response.
pub fn ndjson_response(rx: mpsc::Receiver<GenerationEvent>) -> Response {
    let lines = ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(event_line(event)));

    (
        [(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
        Body::from_stream(lines),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    async fn body_lines(response: Response) -> Vec<Value> {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        text.lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_stream_ends_with_done_payload() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(GenerationEvent::Partial(json!({"name": "x"})))
            .await
            .unwrap();
        tx.send(GenerationEvent::Completed(json!({"name": "x", "items": [1]})))
            .await
            .unwrap();
        drop(tx);

        let response = ndjson_response(rx);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            NDJSON_CONTENT_TYPE
        );

        let lines = body_lines(response).await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], json!({"name": "x"}));
        assert_eq!(lines[1]["done"], true);
        assert_eq!(lines[1]["payload"]["items"], json!([1]));
    }

    #[tokio::test]
    async fn test_failure_is_reported_inline() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(GenerationEvent::Failed("provider exploded".to_string()))
            .await
            .unwrap();
        drop(tx);

        let lines = body_lines(ndjson_response(rx)).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["done"], true);
        assert_eq!(lines[0]["error"], "provider exploded");
    }
}
