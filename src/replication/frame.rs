//! Envelope encoding and decoding for replicated statements.
//!
//! ```text
//! header (24 bytes, little endian)
//! ┌───────┬─────────┬───────┬─────┬─────┬───────┐
//! │ magic │ version │ flags │ seq │ len │ crc32 │
//! │  u32  │   u16   │  u16  │ u64 │ u32 │  u32  │
//! └───────┴─────────┴───────┴─────┴─────┴───────┘
//! payload (`len` bytes)
//! origin (16 bytes) | cluster | database | body | signature
//! ```
//!
//! Every payload field after the origin is prefixed with its `u32` length.

use ulid::Ulid;

use crate::privacy::{PrivacyLevel, Protected};

/// Supported envelope version.
pub const ENVELOPE_VERSION: u16 = 1;

/// Magic constant identifying replication envelopes (`"TDBR"`).
pub const ENVELOPE_MAGIC: u32 = 0x5444_4252;

/// Total number of header bytes.
pub const HEADER_SIZE: usize = 4 + 2 + 2 + 8 + 4 + 4;

const FLAG_SIGNED: u16 = 0b01;
const FLAG_ENCRYPTED: u16 = 0b10;

/// Envelope decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("corrupt envelope: {0}")]
    Corrupt(&'static str),
    #[error("envelope payload of {0} bytes exceeds the frame limit")]
    TooLarge(usize),
}

/// One replicated statement as it travels between nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Envelope {
    pub(crate) seq: u64,
    pub(crate) origin: Ulid,
    pub(crate) cluster: String,
    pub(crate) database: String,
    pub(crate) payload: Protected,
}

fn flags_for(level: PrivacyLevel) -> u16 {
    match level {
        PrivacyLevel::None => 0,
        PrivacyLevel::Signed => FLAG_SIGNED,
        PrivacyLevel::Encrypted => FLAG_SIGNED | FLAG_ENCRYPTED,
    }
}

fn level_for(flags: u16) -> Result<PrivacyLevel, FrameError> {
    match flags {
        0 => Ok(PrivacyLevel::None),
        FLAG_SIGNED => Ok(PrivacyLevel::Signed),
        f if f == FLAG_SIGNED | FLAG_ENCRYPTED => Ok(PrivacyLevel::Encrypted),
        _ => Err(FrameError::Corrupt("unknown envelope flags")),
    }
}

fn put_field(buf: &mut Vec<u8>, field: &[u8]) -> Result<(), FrameError> {
    let len = u32::try_from(field.len()).map_err(|_| FrameError::TooLarge(field.len()))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(field);
    Ok(())
}

/// Cursor over payload fields.
struct Fields<'a> {
    rest: &'a [u8],
}

impl<'a> Fields<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], FrameError> {
        if self.rest.len() < len {
            return Err(FrameError::Corrupt("envelope field truncated"));
        }
        let (field, rest) = self.rest.split_at(len);
        self.rest = rest;
        Ok(field)
    }

    fn u32(&mut self) -> Result<u32, FrameError> {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(bytes))
    }

    fn field(&mut self) -> Result<&'a [u8], FrameError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn text(&mut self) -> Result<String, FrameError> {
        String::from_utf8(self.field()?.to_vec())
            .map_err(|_| FrameError::Corrupt("envelope text is not utf-8"))
    }
}

impl Envelope {
    /// Serialize header and payload into a new buffer.
    pub(crate) fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut payload = Vec::with_capacity(
            16 + 16
                + self.cluster.len()
                + self.database.len()
                + self.payload.body.len()
                + self.payload.signature.len(),
        );
        payload.extend_from_slice(&self.origin.to_bytes());
        put_field(&mut payload, self.cluster.as_bytes())?;
        put_field(&mut payload, self.database.as_bytes())?;
        put_field(&mut payload, &self.payload.body)?;
        put_field(&mut payload, &self.payload.signature)?;
        let len = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge(payload.len()))?;

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&ENVELOPE_MAGIC.to_le_bytes());
        buf.extend_from_slice(&ENVELOPE_VERSION.to_le_bytes());
        buf.extend_from_slice(&flags_for(self.payload.level).to_le_bytes());
        buf.extend_from_slice(&self.seq.to_le_bytes());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Parse one envelope; trailing bytes are rejected.
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Corrupt("envelope header truncated"));
        }
        let (header, rest) = bytes.split_at(HEADER_SIZE);
        let mut fields = Fields { rest: header };

        let mut magic = [0u8; 4];
        magic.copy_from_slice(fields.take(4)?);
        if u32::from_le_bytes(magic) != ENVELOPE_MAGIC {
            return Err(FrameError::Corrupt("envelope magic mismatch"));
        }
        let mut version = [0u8; 2];
        version.copy_from_slice(fields.take(2)?);
        if u16::from_le_bytes(version) != ENVELOPE_VERSION {
            return Err(FrameError::Corrupt("unsupported envelope version"));
        }
        let mut flags = [0u8; 2];
        flags.copy_from_slice(fields.take(2)?);
        let level = level_for(u16::from_le_bytes(flags))?;
        let mut seq = [0u8; 8];
        seq.copy_from_slice(fields.take(8)?);
        let seq = u64::from_le_bytes(seq);
        let len = fields.u32()? as usize;
        let crc = fields.u32()?;

        if rest.len() != len {
            return Err(FrameError::Corrupt("envelope length mismatch"));
        }
        if crc32fast::hash(rest) != crc {
            return Err(FrameError::Corrupt("envelope payload crc32 mismatch"));
        }

        let mut fields = Fields { rest };
        let mut origin = [0u8; 16];
        origin.copy_from_slice(fields.take(16)?);
        let cluster = fields.text()?;
        let database = fields.text()?;
        let body = fields.field()?.to_vec();
        let signature = fields.field()?.to_vec();
        if !fields.rest.is_empty() {
            return Err(FrameError::Corrupt("trailing bytes after envelope fields"));
        }

        Ok(Envelope {
            seq,
            origin: Ulid::from_bytes(origin),
            cluster,
            database,
            payload: Protected {
                level,
                body,
                signature,
            },
        })
    }
}
