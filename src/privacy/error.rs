use super::PrivacyLevel;

/// Errors raised by the privacy gate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrivacyError {
    /// The privacy level name is not one of none/signed/encrypted.
    #[error("unknown privacy level: {0}")]
    UnknownLevel(String),

    /// The level needs a key that was not supplied.
    #[error("privacy level {level} requires a {key} key")]
    MissingKey {
        level: PrivacyLevel,
        key: &'static str,
    },

    /// A key is not valid base64 or has the wrong length.
    #[error("malformed {key} key: {reason}")]
    MalformedKey { key: &'static str, reason: String },

    /// The public key does not belong to the private key.
    #[error("public key does not match private key")]
    KeyMismatch,

    /// An inbound payload was protected at a different level than required.
    #[error("expected {expected} payload, found {found}")]
    LevelMismatch {
        expected: PrivacyLevel,
        found: PrivacyLevel,
    },

    /// An inbound signature did not verify.
    #[error("signature verification failed")]
    BadSignature,

    /// An inbound sealed payload could not be opened.
    #[error("decryption failed: {0}")]
    Decryption(&'static str),

    /// Ring crypto error.
    #[error("crypto error")]
    Crypto,
}

impl From<ring::error::Unspecified> for PrivacyError {
    fn from(_: ring::error::Unspecified) -> Self {
        PrivacyError::Crypto
    }
}
