//! Provider authentication tokens.
//!
//! APNs wants a token no older than an hour and rejects a new token on the
//! same connection more often than every 20 minutes. Every request here runs
//! on its own connection, so a fresh token per request satisfies both rules
//! without a refresh task. Pooling connections would need one: refresh no
//! more than once per 20 minutes and drop the token after ~55 minutes.

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{error::ApnsError, identity::ProviderIdentity};

#[derive(Debug, Serialize, Deserialize)]
struct ApnsClaims {
    iss: String,
    iat: i64,
}

/// Signed ES256 token, sent as `authorization: bearer <token>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub issuer: String,
    pub issued_at: i64,
    pub key_id: String,
    encoded: String,
}

impl AuthToken {
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn bearer(&self) -> String {
        format!("bearer {}", self.encoded)
    }
}

/// Sign a token for `identity` stamped with `issued_at` (unix seconds).
///
/// The header only carries `alg` and `kid`: APNs answers a `typ` field with
/// "Unrecognizable claims found".
pub fn issue_token(identity: &ProviderIdentity, issued_at: i64) -> Result<AuthToken, ApnsError> {
    let key = EncodingKey::from_ec_pem(identity.signing_key.as_pem())
        .map_err(|err| ApnsError::signing(format!("invalid signing key: {err}")))?;

    let mut header = Header::new(Algorithm::ES256);
    header.typ = None;
    header.kid = Some(identity.key_id.clone());

    let claims = ApnsClaims {
        iss: identity.team_id.clone(),
        iat: issued_at,
    };

    let encoded = jsonwebtoken::encode(&header, &claims, &key)
        .map_err(|err| ApnsError::signing(err.to_string()))?;

    debug!(key_id = %identity.key_id, iat = issued_at, "issued provider token");

    Ok(AuthToken {
        issuer: claims.iss,
        issued_at,
        key_id: identity.key_id.clone(),
        encoded,
    })
}

pub fn issue_token_now(identity: &ProviderIdentity) -> Result<AuthToken, ApnsError> {
    issue_token(identity, unix_timestamp())
}

/// Current time in whole seconds.
pub fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
