//! Digest index and conflict-checked selection for container registries.
//!
//! A registry only deletes manifests, by digest, and a digest is shared by every tag
//! (in every repository) pointing at it. This crate keeps a two-way index between
//! `(repository, tag)` pairs and digests, and resolves repository and tag selections
//! into digests that can be removed without affecting anything outside the selection.

pub mod client;
pub mod config;
pub mod digest;
pub mod error;
pub mod index;
pub mod matcher;
pub mod query;
pub mod remover;
pub mod select;
pub mod snapshot;

#[cfg(any(test, feature = "test"))]
pub mod test;

pub use digest::ContentDigest;
pub use error::{Error, Result};
pub use index::DigestIndex;
pub use matcher::{Selector, TagMatcher, Version};
pub use query::RegistryQuery;
pub use remover::RegistryRemover;
pub use select::{RepoDigest, TagSelectOptions, TaggedDigest};
