//! Server-sent event decoding for streaming completions.

use core::fmt::Display;

use devassist_core::{ProviderError, TextStream};
use futures::{Stream, StreamExt as _};
use reqwest::Response;
use serde_json::Value;

/// What one `data:` payload contributed to the stream.
#[derive(Debug, PartialEq, Eq)]
pub enum SseEvent {
    /// A piece of generated text.
    Text(String),
    /// Bookkeeping event with no text.
    Skip,
    /// The vendor signalled the end of the stream.
    Done,
    /// Last piece of text, carrying the end-of-stream signal itself.
    Final(String),
}

/// Error text for a connection that closed before the vendor's end signal.
pub const TRUNCATED: &str = "stream ended before completion";

/// Splits a byte stream into complete `data:` payloads.
fn data_payloads<S, B, E>(bytes: S) -> impl Stream<Item = Result<String, ProviderError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    async_stream::stream! {
        futures::pin_mut!(bytes);
        let mut buffer = String::new();

        while let Some(item) = bytes.next().await {
            match item {
                Ok(chunk) => {
                    buffer.push_str(&String::from_utf8_lossy(chunk.as_ref()).replace("\r\n", "\n"));

                    while let Some(index) = buffer.find("\n\n") {
                        let event: String = buffer.drain(..index + 2).collect();
                        for line in event.lines() {
                            if let Some(payload) = line.strip_prefix("data:") {
                                yield Ok(payload.trim().to_owned());
                            }
                        }
                    }
                }
                Err(error) => {
                    yield Err(ProviderError::Failed(format!("Stream interrupted: {error}")));
                    return;
                }
            }
        }

        for line in buffer.lines() {
            if let Some(payload) = line.strip_prefix("data:") {
                yield Ok(payload.trim().to_owned());
            }
        }
    }
}

/// Turns raw payloads into text pieces using a vendor-specific parser.
///
/// `[DONE]`, [`SseEvent::Done`] and [`SseEvent::Final`] end the stream; a
/// parser error is yielded once and ends it. Running out of payloads before
/// any of those ends it with a [`TRUNCATED`] failure.
pub fn decode<S, F>(payloads: S, parse: F) -> impl Stream<Item = Result<String, ProviderError>>
where
    S: Stream<Item = Result<String, ProviderError>>,
    F: Fn(&Value) -> Result<SseEvent, ProviderError>,
{
    async_stream::stream! {
        futures::pin_mut!(payloads);
        while let Some(item) = payloads.next().await {
            let payload = match item {
                Ok(payload) => payload,
                Err(error) => {
                    yield Err(error);
                    return;
                }
            };
            if payload.is_empty() {
                continue;
            }
            if payload == "[DONE]" {
                return;
            }
            let value: Value = match serde_json::from_str(&payload) {
                Ok(value) => value,
                Err(error) => {
                    yield Err(ProviderError::Failed(format!("Invalid stream chunk: {error}")));
                    return;
                }
            };
            match parse(&value) {
                Ok(SseEvent::Text(text)) if !text.is_empty() => {
                    yield Ok(text);
                }
                Ok(SseEvent::Text(_) | SseEvent::Skip) => {}
                Ok(SseEvent::Done) => return,
                Ok(SseEvent::Final(text)) => {
                    if !text.is_empty() {
                        yield Ok(text);
                    }
                    return;
                }
                Err(error) => {
                    yield Err(error);
                    return;
                }
            }
        }
        yield Err(ProviderError::Failed(TRUNCATED.to_owned()));
    }
}

/// Streams the text of an SSE response.
pub fn text_stream<F>(response: Response, parse: F) -> TextStream
where
    F: Fn(&Value) -> Result<SseEvent, ProviderError> + Send + 'static,
{
    decode(data_payloads(response.bytes_stream()), parse).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn openai_like(value: &Value) -> Result<SseEvent, ProviderError> {
        Ok(value
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
            .map_or(SseEvent::Skip, |text| SseEvent::Text(text.to_owned())))
    }

    async fn collect(chunks: Vec<&'static str>) -> Vec<Result<String, ProviderError>> {
        let bytes = stream::iter(chunks.into_iter().map(|chunk| Ok::<_, String>(chunk.as_bytes())));
        decode(data_payloads(bytes), openai_like).collect().await
    }

    #[tokio::test]
    async fn test_events_split_across_chunks() {
        let items = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi",
            "ces\":[{\"delta\":{\"content\":\"lo\"}}]}\r\n\r\n",
            "data: [DONE]\n\n",
        ])
        .await;
        let texts: Vec<String> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_done_stops_the_stream() {
        let items = collect(vec![
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        ])
        .await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_json_ends_with_error() {
        let items = collect(vec!["data: {not json}\n\n", "data: [DONE]\n\n"]).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(ProviderError::Failed(_))));
    }

    #[tokio::test]
    async fn test_trailing_event_without_blank_line() {
        let items = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}\n\n",
            "data: [DONE]",
        ])
        .await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_deref().unwrap(), "tail");
    }

    #[tokio::test]
    async fn test_missing_end_signal_is_a_failure() {
        let items = collect(vec!["data: {\"choices\":[{\"delta\":{\"content\":\"half\"}}]}\n\n"]).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "half");
        assert!(matches!(&items[1], Err(ProviderError::Failed(message)) if message == TRUNCATED));
    }

    #[tokio::test]
    async fn test_final_event_ends_with_its_text() {
        let finishing = |value: &Value| -> Result<SseEvent, ProviderError> {
            let text = value["text"].as_str().unwrap_or_default().to_owned();
            Ok(if value.get("last").is_some() {
                SseEvent::Final(text)
            } else {
                SseEvent::Text(text)
            })
        };
        let bytes = stream::iter(vec![Ok::<_, String>(
            "data: {\"text\":\"a\"}\n\ndata: {\"text\":\"b\",\"last\":true}\n\n".as_bytes(),
        )]);
        let items: Vec<_> = decode(data_payloads(bytes), finishing).collect().await;
        let texts: Vec<String> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_transport_error_is_surfaced() {
        let bytes = stream::iter(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n".as_bytes()),
            Err("connection reset".to_owned()),
        ]);
        let items: Vec<_> = decode(data_payloads(bytes), openai_like).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[1].as_ref().unwrap_err().to_string().contains("connection reset"));
    }
}
