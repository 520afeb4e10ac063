/// Errors surfaced by the APNs client.
///
/// HTTP-level rejections from APNs (4xx/5xx) are not errors here; they come
/// back as a [`crate::response::ServerResponse`] with a non-2xx status.
#[derive(Debug, thiserror::Error)]
pub enum ApnsError {
    /// The provider signing key could not be read, parsed or used.
    #[error("failed to sign provider token: {0}")]
    Signing(String),
    /// A payload failed its schema check.
    #[error("invalid payload: {0}")]
    Validation(String),
    /// Connection or stream failure reported by the transport.
    #[error("transport failure: {0}")]
    Transport(String),
    /// A response body was not the JSON shape we expected.
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
    /// Process configuration is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ApnsError {
    pub fn signing(reason: impl Into<String>) -> Self {
        Self::Signing(reason.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

impl From<reqwest::Error> for ApnsError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
