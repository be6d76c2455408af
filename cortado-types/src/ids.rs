//! Identifier types used throughout the cortado core.
//!
//! Records created offline carry a client-generated `Local` id until the
//! first successful sync replaces it with the server-issued `Remote` UUID.
//! The two forms are a tagged union so id remapping is exhaustive instead
//! of prefix sniffing on strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Prefix that marks a client-generated identifier.
const LOCAL_PREFIX: char = 'L';

/// Error produced when parsing an identifier string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The string is neither a `L…` local id nor a UUID. Typically stale
    /// state from an older client (e.g. a short numeric id).
    #[error("malformed record id: {0:?}")]
    Malformed(String),
}

/// Identifier of a business record.
///
/// `Local` ids are minted on the device while offline; `Remote` ids are
/// issued by the server. A record never holds both at once — the sync
/// engine rewrites `Local` to `Remote` when the create action lands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RecordId {
    /// Client-generated, `L<unix-millis>-<suffix>`.
    Local(String),
    /// Server-issued UUID.
    Remote(Uuid),
}

impl RecordId {
    /// Mints a fresh local identifier.
    #[must_use]
    pub fn new_local() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let suffix: u16 = rand::random();
        Self::Local(format!("{LOCAL_PREFIX}{millis}-{suffix:04x}"))
    }

    /// Mints a fresh remote-shaped identifier (used for records whose ids
    /// are client-generated UUIDs, e.g. generic CRUD rows).
    #[must_use]
    pub fn new_remote() -> Self {
        Self::Remote(Uuid::new_v4())
    }

    /// Wraps an existing server-issued UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self::Remote(uuid)
    }

    /// Parses an identifier from its string form.
    ///
    /// Accepts `L…` local ids and UUID strings. Anything else (short
    /// numeric ids and the like) is rejected as malformed.
    pub fn parse(s: &str) -> std::result::Result<Self, IdError> {
        if s.starts_with(LOCAL_PREFIX) && s.len() > 1 {
            return Ok(Self::Local(s.to_string()));
        }
        Uuid::parse_str(s)
            .map(Self::Remote)
            .map_err(|_| IdError::Malformed(s.to_string()))
    }

    /// Whether this is a client-generated id.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// Whether this is a server-issued id.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// Returns the server-issued UUID, if this id is remote.
    #[must_use]
    pub fn as_remote(&self) -> Option<Uuid> {
        match self {
            Self::Remote(uuid) => Some(*uuid),
            Self::Local(_) => None,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(s) => write!(f, "{s}"),
            Self::Remote(uuid) => write!(f, "{uuid}"),
        }
    }
}

impl FromStr for RecordId {
    type Err = IdError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for RecordId {
    type Error = IdError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Uuid> for RecordId {
    fn from(uuid: Uuid) -> Self {
        Self::Remote(uuid)
    }
}

/// Unique identifier for a queue action.
/// Uses UUID v7, which embeds a timestamp for natural FIFO ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(Uuid);

impl ActionId {
    /// Creates a new action ID with the current timestamp.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates an action ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parses an action ID from a string.
    pub fn parse(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ActionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}
