// ── Core identity types ──
//
// Cards, guests, restaurants, meal windows and gates all share `EntityId`.
// Records migrated from older systems carry free-form string ids, newer
// ones carry UUIDs; consumers never care which.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ── EntityId ────────────────────────────────────────────────────────

/// Canonical identifier for any venue entity.
///
/// Transparently wraps either a UUID or a legacy string identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Uuid(Uuid),
    Legacy(String),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Legacy(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for EntityId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_owned()))
    }
}

impl From<Uuid> for EntityId {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        match Uuid::parse_str(&s) {
            Ok(u) => Self::Uuid(u),
            Err(_) => Self::Legacy(s),
        }
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

// ── StationId ───────────────────────────────────────────────────────

/// Identifier of a scanner station (a terminal at a restaurant entrance).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(String);

impl StationId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StationId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_from_uuid_string() {
        let id = EntityId::from("550E8400-E29B-41D4-A716-446655440000".to_owned());
        assert!(matches!(id, EntityId::Uuid(_)));
        assert_eq!(id.to_string(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn entity_id_from_legacy_string() {
        let id = EntityId::from("CARD-0042".to_owned());
        assert_eq!(id, EntityId::Legacy("CARD-0042".into()));
    }

    #[test]
    fn entity_id_json_is_a_plain_string() {
        let id: EntityId = serde_json::from_str("\"guest-7\"").unwrap();
        assert_eq!(id, EntityId::from("guest-7"));
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"guest-7\"");
    }

    #[test]
    fn station_id_is_transparent() {
        let s: StationId = serde_json::from_str("\"north-1\"").unwrap();
        assert_eq!(s.as_str(), "north-1");
    }
}
