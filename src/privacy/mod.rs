//! Privacy gate for replicated statements.
//!
//! The gate protects the statement text that leaves a node and checks what
//! arrives. Local execution always works on plaintext.
//!
//! # Keys
//!
//! Both keys are base64: the private key is a 32-byte Ed25519 seed and the
//! public key the matching Ed25519 public key. Every node of a private
//! cluster holds the same pair.
//!
//! # Encrypted payload format
//!
//! ```text
//! ┌────────────┬─────────────────────────────┬───────────────┐
//! │ Nonce (12) │ Ciphertext (variable)       │ Tag (16)      │
//! └────────────┴─────────────────────────────┴───────────────┘
//! ```
//!
//! The AES-256-GCM key is derived from the key pair with HKDF-SHA256, so any
//! holder of the pair can open the payload. Sealed payloads are signed as
//! well.

mod error;

use std::{fmt, str::FromStr};

use base64::{engine::general_purpose::STANDARD, Engine as _};
pub use error::PrivacyError;
use ring::{
    aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, NONCE_LEN},
    hkdf,
    rand::{SecureRandom, SystemRandom},
    signature::{self, Ed25519KeyPair, UnparsedPublicKey},
};

const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;
const HKDF_INFO: &[u8] = b"tdb-replication";

/// How replicated statements are protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrivacyLevel {
    /// Statements travel as plaintext.
    #[default]
    None,
    /// Statements are signed with the private key.
    Signed,
    /// Statements are encrypted and signed.
    Encrypted,
}

impl PrivacyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyLevel::None => "none",
            PrivacyLevel::Signed => "signed",
            PrivacyLevel::Encrypted => "encrypted",
        }
    }
}

impl fmt::Display for PrivacyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrivacyLevel {
    type Err = PrivacyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(PrivacyLevel::None),
            "signed" => Ok(PrivacyLevel::Signed),
            "encrypted" => Ok(PrivacyLevel::Encrypted),
            _ => Err(PrivacyError::UnknownLevel(s.to_string())),
        }
    }
}

/// Privacy level and keys of a session.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PrivacyConfig {
    pub level: PrivacyLevel,
    /// Base64 Ed25519 public key.
    pub public_key: String,
    /// Base64 Ed25519 seed.
    pub private_key: String,
}

impl fmt::Debug for PrivacyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivacyConfig")
            .field("level", &self.level)
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// A statement body after the gate's outbound transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Protected {
    pub(crate) level: PrivacyLevel,
    pub(crate) body: Vec<u8>,
    /// Empty at level none.
    pub(crate) signature: Vec<u8>,
}

struct Keys {
    signer: Ed25519KeyPair,
    public_key: Vec<u8>,
    cipher: LessSafeKey,
}

/// Validated privacy configuration with its key material loaded.
pub struct PrivacyGate {
    level: PrivacyLevel,
    keys: Option<Keys>,
    rng: SystemRandom,
}

impl fmt::Debug for PrivacyGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivacyGate")
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

fn decode_key(key: &'static str, text: &str) -> Result<Vec<u8>, PrivacyError> {
    let bytes = STANDARD
        .decode(text.trim())
        .map_err(|err| PrivacyError::MalformedKey {
            key,
            reason: err.to_string(),
        })?;
    if bytes.len() != KEY_LEN {
        return Err(PrivacyError::MalformedKey {
            key,
            reason: format!("expected {KEY_LEN} bytes, got {}", bytes.len()),
        });
    }
    Ok(bytes)
}

impl PrivacyGate {
    /// Validate `config` and load its keys. Keys are ignored at level none.
    pub fn new(config: &PrivacyConfig) -> Result<Self, PrivacyError> {
        let rng = SystemRandom::new();
        if config.level == PrivacyLevel::None {
            return Ok(Self {
                level: PrivacyLevel::None,
                keys: None,
                rng,
            });
        }
        for (key, text) in [
            ("public", &config.public_key),
            ("private", &config.private_key),
        ] {
            if text.trim().is_empty() {
                return Err(PrivacyError::MissingKey {
                    level: config.level,
                    key,
                });
            }
        }
        let public_key = decode_key("public", &config.public_key)?;
        let seed = decode_key("private", &config.private_key)?;
        let signer = Ed25519KeyPair::from_seed_and_public_key(&seed, &public_key)
            .map_err(|_| PrivacyError::KeyMismatch)?;

        let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, &public_key).extract(&seed);
        let info = [HKDF_INFO];
        let okm = prk.expand(&info, &aead::AES_256_GCM)?;
        let cipher = LessSafeKey::new(UnboundKey::from(okm));

        Ok(Self {
            level: config.level,
            keys: Some(Keys {
                signer,
                public_key,
                cipher,
            }),
            rng,
        })
    }

    pub fn level(&self) -> PrivacyLevel {
        self.level
    }

    /// Apply the outbound transformation to a statement.
    pub(crate) fn protect(&self, statement: &[u8]) -> Result<Protected, PrivacyError> {
        let Some(keys) = &self.keys else {
            return Ok(Protected {
                level: PrivacyLevel::None,
                body: statement.to_vec(),
                signature: Vec::new(),
            });
        };
        let body = match self.level {
            PrivacyLevel::Encrypted => {
                let mut nonce = [0u8; NONCE_LEN];
                self.rng.fill(&mut nonce)?;
                let mut in_out = statement.to_vec();
                keys.cipher.seal_in_place_append_tag(
                    Nonce::assume_unique_for_key(nonce),
                    Aad::empty(),
                    &mut in_out,
                )?;
                let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
                sealed.extend_from_slice(&nonce);
                sealed.extend_from_slice(&in_out);
                sealed
            }
            _ => statement.to_vec(),
        };
        let signature = keys.signer.sign(&body).as_ref().to_vec();
        Ok(Protected {
            level: self.level,
            body,
            signature,
        })
    }

    /// Check an inbound payload and recover the statement text.
    ///
    /// The payload level must equal this gate's level.
    pub(crate) fn unprotect(&self, protected: &Protected) -> Result<Vec<u8>, PrivacyError> {
        if protected.level != self.level {
            return Err(PrivacyError::LevelMismatch {
                expected: self.level,
                found: protected.level,
            });
        }
        let Some(keys) = &self.keys else {
            return Ok(protected.body.clone());
        };
        UnparsedPublicKey::new(&signature::ED25519, &keys.public_key)
            .verify(&protected.body, &protected.signature)
            .map_err(|_| PrivacyError::BadSignature)?;
        if self.level != PrivacyLevel::Encrypted {
            return Ok(protected.body.clone());
        }

        if protected.body.len() < NONCE_LEN + TAG_LEN {
            return Err(PrivacyError::Decryption("ciphertext too short"));
        }
        let (nonce, sealed) = protected.body.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce)
            .map_err(|_| PrivacyError::Decryption("bad nonce"))?;
        let mut in_out = sealed.to_vec();
        let plaintext = keys
            .cipher
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| PrivacyError::Decryption("AES-GCM open failed"))?;
        Ok(plaintext.to_vec())
    }
}
