//! Bidirectional index between repository tags and content digests.
//!
//! The index holds two coupled maps:
//!
//! ```text
//! tag_digests:  repository -> tag -> digest
//! digest_tags:  digest -> {(repository, tag), ...}
//! ```
//!
//! After every mutation `(r, t)` is in `digest_tags[d]` if and only if
//! `tag_digests[r][t] == d`, and neither map keeps empty entries: a repository
//! without tags and a digest without references are removed.
//!
//! The index is a complete snapshot of a registry, filled by a full refresh,
//! a selective update or a persisted snapshot (see [`crate::snapshot`]).

use std::collections::{BTreeMap, BTreeSet};

use log::trace;

use crate::{
    digest::ContentDigest,
    error::{Error, Result},
    matcher::Version,
};

/// A `(repository, tag)` pair referencing a digest.
pub type RepoTag = (String, String);

/// Two-way relation between repository tags and image digests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DigestIndex {
    tag_digests: BTreeMap<String, BTreeMap<String, ContentDigest>>,
    digest_tags: BTreeMap<ContentDigest, BTreeSet<RepoTag>>,
}

impl DigestIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn discard_digest_tag(&mut self, digest: &ContentDigest, repo: &str, tag: &str) {
        if let Some(tags) = self.digest_tags.get_mut(digest) {
            tags.remove(&(repo.to_string(), tag.to_string()));
            if tags.is_empty() {
                self.digest_tags.remove(digest);
            }
        }
    }

    /// Adds an image for a fresh index, e.g. while refreshing from the registry.
    ///
    /// Use [`DigestIndex::update_image`] to learn whether an existing entry changed.
    pub fn add_image(&mut self, repo: &str, tag: &str, digest: ContentDigest) {
        let previous = self
            .tag_digests
            .entry(repo.to_string())
            .or_default()
            .insert(tag.to_string(), digest);
        if let Some(previous) = previous.filter(|previous| *previous != digest) {
            self.discard_digest_tag(&previous, repo, tag);
        }
        self.digest_tags
            .entry(digest)
            .or_default()
            .insert((repo.to_string(), tag.to_string()));
    }

    /// Points `repo:tag` at `digest`, detaching it from the digest it referenced before.
    ///
    /// Returns `false` if the tag already referenced `digest`.
    pub fn update_image(&mut self, repo: &str, tag: &str, digest: ContentDigest) -> bool {
        let existing = self
            .tag_digests
            .get(repo)
            .and_then(|tags| tags.get(tag))
            .copied();
        match existing {
            Some(existing) if existing == digest => false,
            Some(existing) => {
                trace!("Moving {repo}:{tag} from {existing} to {digest}");
                self.discard_digest_tag(&existing, repo, tag);
                self.add_image(repo, tag, digest);
                true
            }
            None => {
                self.add_image(repo, tag, digest);
                true
            }
        }
    }

    /// Removes a repository with all of its tags.
    ///
    /// Digests are kept as long as tags of other repositories still reference them.
    /// Returns `false` if the repository was not in the index.
    pub fn remove_repository(&mut self, name: &str) -> bool {
        let Some(tags) = self.tag_digests.remove(name) else {
            return false;
        };
        for (tag, digest) in tags {
            self.discard_digest_tag(&digest, name, &tag);
        }
        true
    }

    /// Removes a single tag of a repository, pruning the repository if it was the last one.
    ///
    /// Returns `false` if the tag was not in the index.
    pub fn remove_tag(&mut self, repo: &str, tag: &str) -> bool {
        let Some(tags) = self.tag_digests.get_mut(repo) else {
            return false;
        };
        let Some(digest) = tags.remove(tag) else {
            return false;
        };
        if tags.is_empty() {
            self.tag_digests.remove(repo);
        }
        self.discard_digest_tag(&digest, repo, tag);
        true
    }

    /// Removes digests along with every repository tag that referenced them.
    ///
    /// All digests must have been obtained from this index; if any of them is unknown,
    /// [`Error::UnknownDigest`] is returned and the index is left untouched.
    pub fn remove_digests<'a>(
        &mut self,
        digests: impl IntoIterator<Item = &'a ContentDigest>,
    ) -> Result<()> {
        let digests: BTreeSet<&ContentDigest> = digests.into_iter().collect();
        if let Some(unknown) = digests.iter().find(|d| !self.digest_tags.contains_key(**d)) {
            return Err(Error::UnknownDigest(**unknown));
        }

        for digest in digests {
            let Some(repo_tags) = self.digest_tags.remove(digest) else {
                continue;
            };
            for (repo, tag) in repo_tags {
                if let Some(tags) = self.tag_digests.get_mut(&repo) {
                    tags.remove(&tag);
                    if tags.is_empty() {
                        self.tag_digests.remove(&repo);
                    }
                }
            }
        }
        Ok(())
    }

    /// Clears all contents.
    pub fn reset(&mut self) {
        self.tag_digests.clear();
        self.digest_tags.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.tag_digests.is_empty()
    }

    pub fn contains_repository(&self, name: &str) -> bool {
        self.tag_digests.contains_key(name)
    }

    /// The digests used by a repository, optionally limited to the given tags.
    pub fn digests<S: AsRef<str>>(&self, repo: &str, tags: Option<&[S]>) -> BTreeSet<ContentDigest> {
        let Some(tag_digests) = self.tag_digests.get(repo) else {
            return BTreeSet::new();
        };
        match tags {
            Some(tags) => tags
                .iter()
                .filter_map(|tag| tag_digests.get(tag.as_ref()))
                .copied()
                .collect(),
            None => tag_digests.values().copied().collect(),
        }
    }

    /// Tags of a repository and the digests they reference.
    pub fn tag_digests(&self, repo: &str) -> Option<&BTreeMap<String, ContentDigest>> {
        self.tag_digests.get(repo)
    }

    /// Names of all repositories with any tag referencing `digest`.
    pub fn digest_repositories(&self, digest: &ContentDigest) -> BTreeSet<&str> {
        self.digest_tags
            .get(digest)
            .into_iter()
            .flatten()
            .map(|(repo, _)| repo.as_str())
            .collect()
    }

    /// All `(repository, tag)` pairs referencing `digest`.
    pub fn digest_tags(&self, digest: &ContentDigest) -> Option<&BTreeSet<RepoTag>> {
        self.digest_tags.get(digest)
    }

    /// Same as [`DigestIndex::digest_tags`], grouped by repository name.
    pub fn grouped_tags(&self, digest: &ContentDigest) -> BTreeMap<&str, BTreeSet<&str>> {
        let mut grouped: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (repo, tag) in self.digest_tags.get(digest).into_iter().flatten() {
            grouped.entry(repo.as_str()).or_default().insert(tag.as_str());
        }
        grouped
    }

    /// Sorted repository names.
    pub fn repository_names(&self) -> Vec<&str> {
        self.tag_digests.keys().map(String::as_str).collect()
    }

    /// `(repository, tag)` pairs, repositories in the given order (or sorted by name),
    /// tags sorted by name. Unknown repositories are skipped.
    pub fn tag_names<S: AsRef<str>>(&self, repos: Option<&[S]>) -> Vec<(&str, &str)> {
        self.repositories_in(repos)
            .into_iter()
            .flat_map(|(repo, tags)| tags.keys().map(move |tag| (repo, tag.as_str())))
            .collect()
    }

    /// Like [`DigestIndex::tag_names`], with tags of each repository ordered as versions.
    pub fn version_sorted_tag_names<S: AsRef<str>>(
        &self,
        repos: Option<&[S]>,
        reverse: bool,
    ) -> Vec<(&str, &str)> {
        let mut result = vec![];
        for (repo, tags) in self.repositories_in(repos) {
            let mut versions: Vec<(Version, &str)> = tags
                .keys()
                .map(|tag| (Version::parse(tag), tag.as_str()))
                .collect();
            versions.sort();
            if reverse {
                versions.reverse();
            }
            result.extend(versions.into_iter().map(|(_, tag)| (repo, tag)));
        }
        result
    }

    fn repositories_in<S: AsRef<str>>(
        &self,
        repos: Option<&[S]>,
    ) -> Vec<(&str, &BTreeMap<String, ContentDigest>)> {
        match repos {
            Some(repos) if !repos.is_empty() => repos
                .iter()
                .filter_map(|repo| self.tag_digests.get_key_value(repo.as_ref()))
                .map(|(name, tags)| (name.as_str(), tags))
                .collect(),
            _ => self
                .tag_digests
                .iter()
                .map(|(name, tags)| (name.as_str(), tags))
                .collect(),
        }
    }

    /// Every `(repository, tag, digest)` triple, ordered by repository and tag.
    pub fn images(&self) -> impl Iterator<Item = (&str, &str, &ContentDigest)> {
        self.tag_digests.iter().flat_map(|(repo, tags)| {
            tags.iter()
                .map(move |(tag, digest)| (repo.as_str(), tag.as_str(), digest))
        })
    }

    /// Every digest with the pairs that reference it.
    pub fn digest_entries(&self) -> impl Iterator<Item = (&ContentDigest, &BTreeSet<RepoTag>)> {
        self.digest_tags.iter()
    }

    pub(crate) fn raw_tag_digests(&self) -> &BTreeMap<String, BTreeMap<String, ContentDigest>> {
        &self.tag_digests
    }
}
