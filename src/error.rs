//! Error types for the registry index.
//!
//! Operations that can fail return [`Result<T>`], an alias for `Result<T, Error>`.
//!
//! # Error Categories
//!
//! - **Format errors**: [`FormatError`], malformed digests or snapshot documents.
//!   Always fatal to the operation, never retried.
//! - **Intersection conflicts**: [`IntersectionConflict`], a selection reaching
//!   repositories or tags outside the request. Raised by default, suppressible
//!   per call.
//! - **Transport errors**: [`TransportError`], reported by the registry client.
//! - **Index misuse**: [`Error::UnknownDigest`].

use std::{collections::BTreeSet, fmt};

use crate::{client::TransportError, digest::ContentDigest};

/// Result type alias for operations that may return an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Malformed digest text or snapshot structure.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The digest does not start with `sha256:`.
    #[error("unsupported digest type: {0:?}")]
    UnsupportedDigest(String),

    /// The hex part of a `sha256:` digest is not 32 bytes of valid hex.
    #[error("invalid sha256 digest {value:?}: {source}")]
    InvalidDigest {
        value: String,
        #[source]
        source: hex::FromHexError,
    },

    /// The snapshot document is not an object of objects of strings.
    #[error("unexpected snapshot structure at {location}: expected {expected}, found {found}")]
    Snapshot {
        location: String,
        expected: &'static str,
        found: &'static str,
    },

    /// The snapshot document is not valid JSON.
    #[error("malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

/// What kind of names an [`IntersectionConflict`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// The digest is referenced by repositories outside the selection.
    Repository,
    /// The digest is referenced by tags outside the selection.
    Tag,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::Repository => f.write_str("repositories"),
            ConflictKind::Tag => f.write_str("tags"),
        }
    }
}

/// A selected digest is also reachable from outside the requested scope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "selection intersects with {kind} not included in the query ({}) on digest {digest}",
    .names.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
)]
pub struct IntersectionConflict {
    pub kind: ConflictKind,
    pub names: BTreeSet<String>,
    pub digest: ContentDigest,
}

impl IntersectionConflict {
    pub(crate) fn repositories<'a>(
        names: impl IntoIterator<Item = &'a str>,
        digest: &ContentDigest,
    ) -> Self {
        Self {
            kind: ConflictKind::Repository,
            names: names.into_iter().map(str::to_string).collect(),
            digest: *digest,
        }
    }

    pub(crate) fn tags<'a>(names: impl IntoIterator<Item = &'a str>, digest: &ContentDigest) -> Self {
        Self {
            kind: ConflictKind::Tag,
            names: names.into_iter().map(str::to_string).collect(),
            digest: *digest,
        }
    }
}

/// Error types for index, selection and persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Intersection(#[from] IntersectionConflict),

    #[error("registry transport error: {0}")]
    Transport(#[from] TransportError),

    /// A digest passed for removal has no entry in the index.
    #[error("digest {0} is not in the index")]
    UnknownDigest(ContentDigest),

    /// A tag pattern failed to compile.
    #[error("invalid tag pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: Box<regex_automata::meta::BuildError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The conflict carried by this error, if it is one.
    pub fn as_conflict(&self) -> Option<&IntersectionConflict> {
        match self {
            Error::Intersection(conflict) => Some(conflict),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_conflict_display() {
        let digest = ContentDigest::EMPTY;
        let conflict = IntersectionConflict::repositories(["c", "b"], &digest);
        assert_eq!(
            conflict.to_string(),
            format!(
                "selection intersects with repositories not included in the query (b, c) on digest {}",
                digest
            )
        );

        let err = Error::from(IntersectionConflict::tags(["latest"], &digest));
        assert_eq!(err.as_conflict().unwrap().kind, ConflictKind::Tag);
        assert!(Error::UnknownDigest(digest).as_conflict().is_none());
    }
}
