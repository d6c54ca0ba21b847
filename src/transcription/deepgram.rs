//! Deepgram-compatible streaming transcription over WebSocket.
//!
//! One socket per activation. A writer task turns `ClientFrame`s into
//! socket messages; a reader task parses server frames into `LinkEvent`s.
//! Dropping the frame sender closes the socket.

use futures_util::future::BoxFuture;
use http::header::AUTHORIZATION;
use http::{HeaderValue, Request};
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::protocol::{parse_server_message, ClientFrame, LinkEvent, StreamOptions};
use super::{BackendLink, TranscriptionBackend};
use crate::config::TranscriptionSettings;
use crate::error::{SessionError, SessionResult};

const FRAME_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 64;

pub struct DeepgramBackend {
    api_key: String,
    endpoint: String,
}

impl DeepgramBackend {
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Build from settings; `None` without an API key.
    pub fn from_settings(settings: &TranscriptionSettings) -> Option<Self> {
        let key = settings.api_key.as_deref().filter(|k| !k.is_empty())?;
        Some(Self::new(key, settings.endpoint.clone()))
    }

    fn request_url(&self, options: &StreamOptions) -> String {
        let sep = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.endpoint, sep, options.query_string())
    }

    /// WebSocket handshake request with token auth.
    fn client_request(&self, options: &StreamOptions) -> SessionResult<Request<()>> {
        let mut request = self.request_url(options).as_str().into_client_request()?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.api_key))
            .map_err(|e| SessionError::BackendUnavailable(format!("Invalid API key: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, auth);
        Ok(request)
    }

    async fn open(&self, options: StreamOptions) -> SessionResult<BackendLink> {
        let request = self.client_request(&options)?;

        let (ws, _response) = connect_async(request).await.map_err(|e| {
            SessionError::BackendUnavailable(format!("Transcription connect failed: {}", e))
        })?;
        info!(model = %options.model, "Transcription stream connected");

        let (mut sink, mut stream) = ws.split();
        let (frame_tx, mut frame_rx) = mpsc::channel::<ClientFrame>(FRAME_QUEUE);
        let (event_tx, event_rx) = mpsc::channel::<LinkEvent>(EVENT_QUEUE);

        tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                let closing = matches!(frame, ClientFrame::CloseStream);
                let msg = match frame {
                    ClientFrame::Audio(bytes) => Message::Binary(bytes.into()),
                    other => match other.control_json() {
                        Some(json) => Message::Text(json.into()),
                        None => continue,
                    },
                };
                if let Err(e) = sink.send(msg).await {
                    debug!("Transcription socket write failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
            debug!("Transcription writer stopped");
        });

        tokio::spawn(async move {
            while let Some(next) = stream.next().await {
                let event = match next {
                    Ok(Message::Text(text)) => match parse_server_message(&text) {
                        Ok(Some(msg)) => LinkEvent::Message(msg),
                        Ok(None) => continue,
                        Err(e) => {
                            warn!("Skipping transcription message: {}", e);
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "Transcription server closed the stream");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => LinkEvent::Failed(SessionError::from(e)),
                };
                let failed = matches!(event, LinkEvent::Failed(_));
                if event_tx.send(event).await.is_err() || failed {
                    return;
                }
            }
            let _ = event_tx.send(LinkEvent::Closed).await;
        });

        Ok(BackendLink {
            frames: frame_tx,
            events: event_rx,
        })
    }
}

impl TranscriptionBackend for DeepgramBackend {
    fn name(&self) -> &str {
        "deepgram"
    }

    fn connect(&self, options: &StreamOptions) -> BoxFuture<'_, SessionResult<BackendLink>> {
        self.open(options.clone()).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url_carries_options() {
        let backend = DeepgramBackend::new("key", "wss://api.deepgram.com/v1/listen");
        let options = StreamOptions::from_settings(&TranscriptionSettings::default());
        let url = backend.request_url(&options);
        assert!(url.starts_with("wss://api.deepgram.com/v1/listen?model=nova-2"));
        assert!(url.contains("encoding=linear16"));
        assert!(url.contains("sample_rate=16000"));
        assert!(url.contains("interim_results=true"));
    }

    #[test]
    fn test_from_settings_requires_key() {
        let mut settings = TranscriptionSettings::default();
        assert!(DeepgramBackend::from_settings(&settings).is_none());
        settings.api_key = Some(String::new());
        assert!(DeepgramBackend::from_settings(&settings).is_none());
        settings.api_key = Some("dg-key".into());
        assert!(DeepgramBackend::from_settings(&settings).is_some());
    }

    #[test]
    fn test_client_request_carries_token_auth() {
        let backend = DeepgramBackend::new("dg-key", "wss://api.deepgram.com/v1/listen");
        let options = StreamOptions::from_settings(&TranscriptionSettings::default());
        let request = backend.client_request(&options).unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Token dg-key");
        assert_eq!(request.uri().host(), Some("api.deepgram.com"));

        let bad = DeepgramBackend::new("dg\nkey", "wss://api.deepgram.com/v1/listen");
        let err = bad.client_request(&options).unwrap_err();
        assert!(matches!(err, SessionError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_connect_refused_is_backend_unavailable() {
        let backend = DeepgramBackend::new("key", "ws://127.0.0.1:9/v1/listen");
        let options = StreamOptions::from_settings(&TranscriptionSettings::default());
        let err = backend.connect(&options).await.err().unwrap();
        assert!(matches!(err, SessionError::BackendUnavailable(_)));
    }
}
