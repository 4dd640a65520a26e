// SSE passthrough: copies an upstream event stream to the client line by
// line, one chunk per line so each event flushes immediately.

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderValue},
    response::Response,
};
use futures::StreamExt;

pub fn sse_passthrough(upstream: reqwest::Response) -> Response {
    let stream = async_stream::stream! {
        let mut buffer: Vec<u8> = Vec::new();
        let mut byte_stream = upstream.bytes_stream();

        while let Some(chunk) = byte_stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!("upstream stream read failed: {}", e);
                    break;
                }
            };
            buffer.extend_from_slice(&bytes);

            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                yield Ok::<_, std::convert::Infallible>(Bytes::from(line));
            }
        }

        // Trailing bytes without a final newline still belong to the client.
        if !buffer.is_empty() {
            yield Ok(Bytes::from(buffer));
        }
        tracing::info!("streaming response finished");
    };

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::TRANSFER_ENCODING,
        HeaderValue::from_static("chunked"),
    );
    response
}
