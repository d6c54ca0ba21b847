//! Optional real-time media room.
//!
//! The session joins a room on start and leaves it on teardown. Joining
//! mints an access token and opens the signalling socket; no media tracks
//! are negotiated.

pub mod token;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MediaRoomSettings;
use crate::error::{SessionError, SessionResult};

pub use token::{mint_access_token, RoomClaims, VideoGrant};

/// `interview-<unix millis>`.
pub fn room_name(now: chrono::DateTime<chrono::Utc>) -> String {
    format!("interview-{}", now.timestamp_millis())
}

/// A joined room. Dropping it without `disconnect` still closes the socket.
pub struct RoomConnection {
    room: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RoomConnection {
    pub fn new(room: String, cancel: CancellationToken, task: Option<JoinHandle<()>>) -> Self {
        Self { room, cancel, task }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub async fn disconnect(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(room = %self.room, "Room task failed: {}", e);
            }
        }
        info!(room = %self.room, "Left media room");
    }
}

impl Drop for RoomConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub trait MediaRoom: Send + Sync {
    fn join<'a>(&'a self, room: &'a str, identity: &'a str)
        -> BoxFuture<'a, SessionResult<RoomConnection>>;
}

/// LiveKit-compatible signalling.
pub struct LiveKitRoom {
    url: String,
    api_key: String,
    api_secret: String,
    settings: MediaRoomSettings,
}

impl LiveKitRoom {
    /// Build from settings; `None` unless url, key and secret are all set.
    pub fn from_settings(settings: &MediaRoomSettings) -> Option<Self> {
        if !settings.is_configured() {
            return None;
        }
        Some(Self {
            url: settings.url.clone()?,
            api_key: settings.api_key.clone()?,
            api_secret: settings.api_secret.clone()?,
            settings: settings.clone(),
        })
    }

    fn signal_url(&self, token: &str) -> String {
        let base = self.url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/rtc?access_token={}", base, token)
    }

    async fn connect(&self, room: &str, identity: &str) -> SessionResult<RoomConnection> {
        let token = mint_access_token(
            &self.api_key,
            &self.api_secret,
            identity,
            room,
            std::time::Duration::from_secs(self.settings.token_ttl_secs),
        )?;

        let (ws, _) = connect_async(self.signal_url(&token))
            .await
            .map_err(|e| SessionError::BackendUnavailable(format!("Room join failed: {}", e)))?;
        info!(room = %room, identity = %identity, "Joined media room");

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let room_label = room.to_string();
        let task = tokio::spawn(async move {
            let (mut sink, mut stream) = ws.split();
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = stream.next() => match msg {
                        Some(Ok(Message::Close(_))) | None => {
                            debug!(room = %room_label, "Room signalling closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(room = %room_label, "Room signalling error: {}", e);
                            break;
                        }
                    },
                }
            }
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        });

        Ok(RoomConnection::new(room.to_string(), cancel, Some(task)))
    }
}

impl MediaRoom for LiveKitRoom {
    fn join<'a>(
        &'a self,
        room: &'a str,
        identity: &'a str,
    ) -> BoxFuture<'a, SessionResult<RoomConnection>> {
        self.connect(room, identity).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn settings(url: &str) -> MediaRoomSettings {
        MediaRoomSettings {
            url: Some(url.into()),
            api_key: Some("key".into()),
            api_secret: Some("secret".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_room_name() {
        let now = chrono::Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(room_name(now), "interview-1700000000123");
    }

    #[test]
    fn test_requires_all_credentials() {
        assert!(LiveKitRoom::from_settings(&MediaRoomSettings::default()).is_none());
        let mut partial = settings("wss://rooms.example");
        partial.api_secret = None;
        assert!(LiveKitRoom::from_settings(&partial).is_none());
        assert!(LiveKitRoom::from_settings(&settings("wss://rooms.example")).is_some());
    }

    #[test]
    fn test_signal_url_scheme() {
        let room = LiveKitRoom::from_settings(&settings("https://rooms.example/")).unwrap();
        assert_eq!(room.signal_url("tok"), "wss://rooms.example/rtc?access_token=tok");
        let room = LiveKitRoom::from_settings(&settings("ws://localhost:7880")).unwrap();
        assert_eq!(room.signal_url("tok"), "ws://localhost:7880/rtc?access_token=tok");
    }

    #[tokio::test]
    async fn test_join_failure_is_backend_unavailable() {
        let room = LiveKitRoom::from_settings(&settings("ws://127.0.0.1:9")).unwrap();
        let err = room.join("interview-1", "Ada").await.err().unwrap();
        assert!(matches!(err, SessionError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_disconnect_cancels() {
        let cancel = CancellationToken::new();
        let conn = RoomConnection::new("interview-1".into(), cancel.clone(), None);
        assert_eq!(conn.room(), "interview-1");
        conn.disconnect().await;
        assert!(cancel.is_cancelled());
    }
}
