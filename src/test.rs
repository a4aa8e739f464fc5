//! Shared fixtures for tests.

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, BTreeSet},
};

use reqwest::{Method, StatusCode};

use crate::{
    client::{RegistryTransport, TransportError},
    digest::ContentDigest,
    index::DigestIndex,
};

pub const D_A1: ContentDigest = ContentDigest::new([0xa1; 32]);
pub const D_A2: ContentDigest = ContentDigest::new([0xa2; 32]);
pub const D_BC: ContentDigest = ContentDigest::new([0xbc; 32]);
pub const D_C: ContentDigest = ContentDigest::new([0x0c; 32]);

/// Three repositories, where `b` and `c` share the digest of `1.0.0` and `latest`.
pub const PRESET_IMAGES: &[(&str, &str, ContentDigest)] = &[
    ("a", "1.1.0", D_A1),
    ("a", "1.2.0", D_A2),
    ("a", "latest", D_A1),
    ("a", "testing", D_A2),
    ("a", "extra", D_A2),
    ("b", "1.0.0", D_BC),
    ("b", "latest", D_BC),
    ("c", "1.0.0", D_BC),
    ("c", "1.1.0", D_C),
    ("c", "latest", D_BC),
    ("c", "testing", D_C),
];

pub fn preset_index() -> DigestIndex {
    let mut index = DigestIndex::new();
    for (repo, tag, digest) in PRESET_IMAGES {
        index.add_image(repo, tag, *digest);
    }
    index
}

/// An in-memory registry, serving digests the way a registry's HTTP API does.
#[derive(Debug, Default)]
pub struct FakeRegistry {
    repos: RefCell<BTreeMap<String, BTreeMap<String, String>>>,
    unavailable: RefCell<BTreeSet<(String, String)>>,
    refused: RefCell<BTreeSet<ContentDigest>>,
    manifest_requests: Cell<usize>,
    deleted: RefCell<Vec<(String, ContentDigest)>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry serving [`PRESET_IMAGES`].
    pub fn preset() -> Self {
        let registry = Self::new();
        for (repo, tag, digest) in PRESET_IMAGES {
            registry.push(repo, tag, &digest.as_sha256());
        }
        registry
    }

    /// Tags `repo:tag` with a raw digest string.
    pub fn push(&self, repo: &str, tag: &str, digest: &str) {
        self.repos
            .borrow_mut()
            .entry(repo.to_string())
            .or_default()
            .insert(tag.to_string(), digest.to_string());
    }

    /// Adds a repository that is listed in the catalog, but has no tags.
    pub fn push_empty(&self, repo: &str) {
        self.repos.borrow_mut().entry(repo.to_string()).or_default();
    }

    /// Makes manifest lookups of `repo:tag` fail with a 404 status.
    pub fn make_unavailable(&self, repo: &str, tag: &str) {
        self.unavailable
            .borrow_mut()
            .insert((repo.to_string(), tag.to_string()));
    }

    /// Makes deletions of `digest` fail, as on a registry with deletes disabled.
    pub fn refuse_delete(&self, digest: ContentDigest) {
        self.refused.borrow_mut().insert(digest);
    }

    pub fn manifest_requests(&self) -> usize {
        self.manifest_requests.get()
    }

    pub fn deleted(&self) -> Vec<(String, ContentDigest)> {
        self.deleted.borrow().clone()
    }

    fn not_found(method: Method, url: String) -> TransportError {
        TransportError::Status {
            method,
            url,
            status: StatusCode::NOT_FOUND,
        }
    }
}

impl RegistryTransport for FakeRegistry {
    fn catalog(&self) -> Result<Vec<String>, TransportError> {
        Ok(self.repos.borrow().keys().cloned().collect())
    }

    fn tags(&self, repository: &str) -> Result<Vec<String>, TransportError> {
        let repos = self.repos.borrow();
        let tags = repos
            .get(repository)
            .ok_or_else(|| Self::not_found(Method::GET, format!("/v2/{repository}/tags/list")))?;
        Ok(tags.keys().cloned().collect())
    }

    fn manifest_digest(&self, repository: &str, reference: &str) -> Result<String, TransportError> {
        self.manifest_requests.set(self.manifest_requests.get() + 1);
        let url = format!("/v2/{repository}/manifests/{reference}");
        if self
            .unavailable
            .borrow()
            .contains(&(repository.to_string(), reference.to_string()))
        {
            return Err(Self::not_found(Method::HEAD, url));
        }
        self.repos
            .borrow()
            .get(repository)
            .and_then(|tags| tags.get(reference))
            .cloned()
            .ok_or_else(|| Self::not_found(Method::HEAD, url))
    }

    fn delete_manifest(&self, repository: &str, digest: &ContentDigest) -> Result<(), TransportError> {
        if self.refused.borrow().contains(digest) {
            return Err(TransportError::Status {
                method: Method::DELETE,
                url: format!("/v2/{repository}/manifests/{digest}"),
                status: StatusCode::METHOD_NOT_ALLOWED,
            });
        }
        let mut repos = self.repos.borrow_mut();
        let tags = repos.get_mut(repository).ok_or_else(|| {
            Self::not_found(Method::DELETE, format!("/v2/{repository}/manifests/{digest}"))
        })?;
        let digest_text = digest.as_sha256();
        tags.retain(|_, tag_digest| *tag_digest != digest_text);
        self.deleted
            .borrow_mut()
            .push((repository.to_string(), *digest));
        Ok(())
    }
}
