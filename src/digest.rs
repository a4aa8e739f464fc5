use core::{fmt, str::FromStr};

use serde::{Serialize, Serializer};
use sha2::{digest::Output, Digest, Sha256};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::FormatError;

/// A sha256 content digest, as reported by the registry in `Docker-Content-Digest`.
///
/// Held as raw bytes; the textual form is always `sha256:<64 hex chars>`.
#[derive(
    Clone,
    Copy,
    Eq,
    FromBytes,
    Hash,
    Immutable,
    IntoBytes,
    KnownLayout,
    Ord,
    PartialEq,
    PartialOrd,
    Unaligned,
)]
#[repr(C)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    pub const ID: &'static str = "sha256";
    pub const EMPTY: Self = Self([0; 32]);

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parses the canonical `sha256:<hex>` form.
    pub fn from_sha256(value: &str) -> Result<Self, FormatError> {
        let Some(hex) = value.strip_prefix("sha256:") else {
            return Err(FormatError::UnsupportedDigest(value.to_string()));
        };
        Self::from_hex(hex).map_err(|source| FormatError::InvalidDigest {
            value: value.to_string(),
            source,
        })
    }

    pub fn from_hex(hex: impl AsRef<[u8]>) -> Result<Self, hex::FromHexError> {
        let mut value = Self::EMPTY;
        hex::decode_to_slice(hex.as_ref(), value.as_mut_bytes())?;
        Ok(value)
    }

    /// Digest of a manifest body, for registries that omit the digest header.
    pub fn compute(bytes: &[u8]) -> Self {
        let mut context = Sha256::new();
        context.update(bytes);
        context.finalize().into()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    pub fn as_sha256(&self) -> String {
        format!("{}:{}", Self::ID, self.to_hex())
    }
}

impl From<Output<Sha256>> for ContentDigest {
    fn from(value: Output<Sha256>) -> Self {
        Self(value.into())
    }
}

impl FromStr for ContentDigest {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_sha256(s)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.to_hex())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<ContentDigest sha256:{}>", self.to_hex())
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_sha256())
    }
}
