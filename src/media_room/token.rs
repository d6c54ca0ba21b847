//! Room access tokens: HS256 JWTs carrying a video grant.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{SessionError, SessionResult};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    pub room_join: bool,
    pub room: String,
    pub can_publish: bool,
    pub can_subscribe: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomClaims {
    pub iss: String,
    pub sub: String,
    pub name: String,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
    pub video: VideoGrant,
}

impl RoomClaims {
    pub fn new(api_key: &str, identity: &str, room: &str, ttl: Duration, now: DateTime<Utc>) -> Self {
        let issued = now.timestamp();
        Self {
            iss: api_key.to_string(),
            sub: identity.to_string(),
            name: identity.to_string(),
            nbf: issued,
            exp: issued + ttl.as_secs() as i64,
            jti: uuid::Uuid::new_v4().to_string(),
            video: VideoGrant {
                room_join: true,
                room: room.to_string(),
                can_publish: true,
                can_subscribe: true,
            },
        }
    }
}

/// Sign `claims` as a compact HS256 JWT.
pub fn sign_token(claims: &RoomClaims, api_secret: &str) -> SessionResult<String> {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{}.{}", header, payload);
    let signature = hmac_sha256(api_secret.as_bytes(), signing_input.as_bytes())?;
    Ok(format!(
        "{}.{}",
        signing_input,
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

/// Access token for `identity` to join `room`.
pub fn mint_access_token(
    api_key: &str,
    api_secret: &str,
    identity: &str,
    room: &str,
    ttl: Duration,
) -> SessionResult<String> {
    let claims = RoomClaims::new(api_key, identity, room, ttl, Utc::now());
    sign_token(&claims, api_secret)
}

pub(crate) fn hmac_sha256(key: &[u8], message: &[u8]) -> SessionResult<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| SessionError::BackendUnavailable(format!("Invalid room secret: {}", e)))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}
