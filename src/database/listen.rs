use super::models::{EventPayload, StreamEvent};
use super::DatabaseError;
use crate::core::parse_error_response;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream};
use reqwest::header;
use reqwest_middleware::ClientWithMiddleware;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

/// A stream of server-sent events from a Realtime Database location.
pub struct EventStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    buffer: BytesMut,
    finished: bool,
}

impl EventStream {
    pub fn new(inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            finished: false,
        }
    }
}

impl Stream for EventStream {
    type Item = Result<StreamEvent, DatabaseError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        loop {
            // 1. Emit the next complete frame already buffered.
            if let Some(len) = find_frame_boundary(&self.buffer) {
                let frame = self.buffer.split_to(len);
                match parse_frame(&frame) {
                    Ok(Some(event)) => return Poll::Ready(Some(Ok(event))),
                    Ok(None) => continue,
                    Err(e) => return Poll::Ready(Some(Err(e))),
                }
            }

            // 2. Otherwise wait for more bytes.
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    // JSON never carries a raw CR, so dropping them normalizes CRLF framing.
                    let normalized: Vec<u8> = chunk.iter().copied().filter(|&b| b != b'\r').collect();
                    self.buffer.extend_from_slice(&normalized);
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(DatabaseError::RequestError(e))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    // A final frame may arrive without its trailing blank line.
                    if self.buffer.iter().all(|b| b.is_ascii_whitespace()) {
                        return Poll::Ready(None);
                    }
                    let frame = self.buffer.split();
                    return match parse_frame(&frame) {
                        Ok(Some(event)) => Poll::Ready(Some(Ok(event))),
                        Ok(None) => Poll::Ready(None),
                        Err(e) => Poll::Ready(Some(Err(e))),
                    };
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Length of the first frame in the buffer, including its terminating blank line.
fn find_frame_boundary(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n").map(|i| i + 2)
}

fn parse_frame(frame: &[u8]) -> Result<Option<StreamEvent>, DatabaseError> {
    let text = std::str::from_utf8(frame)
        .map_err(|e| DatabaseError::ApiError(format!("event stream is not UTF-8: {}", e)))?;

    let mut event: Option<&str> = None;
    let mut data = String::new();

    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value),
            "data" => {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(value);
            }
            _ => {}
        }
    }

    let Some(event) = event else {
        return Ok(None);
    };

    Ok(Some(match event {
        "put" => StreamEvent::Put(serde_json::from_str::<EventPayload>(&data)?),
        "patch" => StreamEvent::Patch(serde_json::from_str::<EventPayload>(&data)?),
        "keep-alive" => StreamEvent::KeepAlive,
        "cancel" => StreamEvent::Cancel(data),
        "auth_revoked" => StreamEvent::AuthRevoked(data),
        other => {
            debug!(event = other, "ignoring unknown stream event");
            return Ok(None);
        }
    }))
}

pub async fn listen_request(
    client: &ClientWithMiddleware,
    url: &str,
) -> Result<EventStream, DatabaseError> {
    let response = client
        .get(url)
        .header(header::ACCEPT, "text/event-stream")
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(DatabaseError::ApiError(parse_error_response(response, "Listen failed").await));
    }

    let stream = stream::unfold(response, |mut resp| async move {
        match resp.chunk().await {
            Ok(Some(bytes)) => Some((Ok(bytes), resp)),
            Ok(None) => None,
            Err(e) => Some((Err(e), resp)),
        }
    });

    Ok(EventStream::new(Box::pin(stream)))
}
