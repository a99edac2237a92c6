//! Scannable payload codec.
//!
//! A card carries either a structured [`CardToken`] (compact JSON sealed
//! with a checksum) or, for legacy and manually typed cards, just a bare
//! identifier. [`decode`] tells the two apart explicitly:
//!
//! - trimmed input starting with `{` must be a complete, well-formed token
//!   whose checksum matches;
//! - anything else must look like an identifier (ASCII alphanumerics and
//!   `-_:.`, at most [`MAX_BARE_ID_LEN`] characters).
//!
//! Decoding never panics; every rejection is a typed [`DecodeError`].

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::model::{CardToken, EntityId};

/// Longest accepted bare identifier.
pub const MAX_BARE_ID_LEN: usize = 128;
/// Longest accepted raw payload of any kind.
pub const MAX_PAYLOAD_LEN: usize = 4096;
const CHECKSUM_HEX_LEN: usize = 16;

/// What a scanned payload turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanPayload {
    /// Card id or card data with no embedded entitlement; the stored
    /// card record is authoritative.
    ///
    /// `raw` is the trimmed text as scanned. `id` may normalize it (UUIDs
    /// lose their case and hyphenation), so card data is matched on `raw`.
    LegacyBareId { id: EntityId, raw: String },
    Structured(CardToken),
}

impl ScanPayload {
    pub fn bare(raw: &str) -> Self {
        Self::LegacyBareId {
            id: EntityId::from(raw),
            raw: raw.to_owned(),
        }
    }

    /// Key the card record is looked up by.
    pub fn card_key(&self) -> &EntityId {
        match self {
            Self::LegacyBareId { id, .. } => id,
            Self::Structured(token) => &token.card_id,
        }
    }

    pub fn token(&self) -> Option<&CardToken> {
        match self {
            Self::Structured(token) => Some(token),
            Self::LegacyBareId { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload is empty")]
    Empty,

    #[error("payload is {len} bytes, limit is {limit}")]
    TooLong { len: usize, limit: usize },

    #[error("invalid character {ch:?} at position {position}")]
    InvalidCharacter { ch: char, position: usize },

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token checksum mismatch")]
    ChecksumMismatch,
}

/// Decode a raw QR/RFID payload.
pub fn decode(raw: &str) -> Result<ScanPayload, DecodeError> {
    if raw.len() > MAX_PAYLOAD_LEN {
        return Err(DecodeError::TooLong {
            len: raw.len(),
            limit: MAX_PAYLOAD_LEN,
        });
    }
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DecodeError::Empty);
    }

    if trimmed.starts_with('{') {
        let token: CardToken =
            serde_json::from_str(trimmed).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        if token.checksum != checksum(&token) {
            return Err(DecodeError::ChecksumMismatch);
        }
        return Ok(ScanPayload::Structured(token));
    }

    if trimmed.chars().count() > MAX_BARE_ID_LEN {
        return Err(DecodeError::TooLong {
            len: trimmed.len(),
            limit: MAX_BARE_ID_LEN,
        });
    }
    if let Some((position, ch)) = trimmed
        .chars()
        .enumerate()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.')))
    {
        return Err(DecodeError::InvalidCharacter { ch, position });
    }
    Ok(ScanPayload::bare(trimmed))
}

/// Serialize a token for printing onto a card.
pub fn encode(token: &CardToken) -> Result<String, serde_json::Error> {
    serde_json::to_string(token)
}

/// Checksum over the canonical field string of a token.
///
/// `card|guest|restaurant|w1,w2|valid_from|valid_to|max_usage`, window ids
/// in sorted order, timestamps in RFC 3339.
pub fn checksum(token: &CardToken) -> String {
    let windows = token
        .meal_window_ids
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let canonical = format!(
        "{}|{}|{}|{}|{}|{}|{}",
        token.card_id,
        token.guest_id,
        token.restaurant_id,
        windows,
        token.valid_from.to_rfc3339(),
        token.valid_to.to_rfc3339(),
        token.max_usage,
    );
    let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
    digest.chars().take(CHECKSUM_HEX_LEN).collect()
}
