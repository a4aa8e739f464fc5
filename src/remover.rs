//! Deleting selected manifests from a registry.

use log::{debug, info};

use crate::{
    client::RegistryTransport,
    digest::ContentDigest,
    error::Result,
    matcher::TagMatcher,
    query::RegistryQuery,
    select::{RepoDigest, TagSelectOptions, TaggedDigest},
};

/// Removes manifests by the selections of a [`RegistryQuery`], keeping its index in step.
pub struct RegistryRemover<'a, T> {
    query: &'a mut RegistryQuery<T>,
}

impl<'a, T: RegistryTransport> RegistryRemover<'a, T> {
    pub fn new(query: &'a mut RegistryQuery<T>) -> Self {
        Self { query }
    }

    /// Deletes every digest used by the given repositories.
    ///
    /// Returns the removed selection, see [`RegistryQuery::select_repositories`].
    pub fn remove_repositories<S: AsRef<str>>(
        &mut self,
        names: &[S],
        raise_intersecting_repo: bool,
    ) -> Result<Vec<RepoDigest>> {
        let selected = self
            .query
            .select_repositories(names, raise_intersecting_repo)?;
        self.delete(
            selected
                .iter()
                .map(|item| (item.repository.as_str(), &item.digest)),
        )?;
        Ok(selected)
    }

    /// Deletes the digests of repository tags matching `tags`.
    ///
    /// Returns the removed selection, see [`RegistryQuery::select_tags`].
    pub fn remove_tags<S: AsRef<str>>(
        &mut self,
        repos: &[S],
        tags: &TagMatcher,
        options: &TagSelectOptions,
    ) -> Result<Vec<TaggedDigest>> {
        let selected = self.query.select_tags(repos, tags, options)?;
        for TaggedDigest { digest, tags, .. } in &selected {
            debug!("Tags of {digest}: {tags:?}");
        }
        self.delete(
            selected
                .iter()
                .map(|item| (item.repository.as_str(), &item.digest)),
        )?;
        Ok(selected)
    }

    /// Deletes manifests in order, stopping at the first failure.
    ///
    /// Digests deleted before a failure are dropped from the index all the same, so that
    /// it keeps matching the registry.
    fn delete<'b>(
        &mut self,
        selected: impl IntoIterator<Item = (&'b str, &'b ContentDigest)>,
    ) -> Result<()> {
        let (transport, index) = self.query.parts_mut();
        let mut deleted = vec![];
        let mut outcome: Result<()> = Ok(());
        for (repository, digest) in selected {
            info!("Removing digest {digest}.");
            if let Err(err) = transport.delete_manifest(repository, digest) {
                outcome = Err(err.into());
                break;
            }
            deleted.push(digest);
        }
        index.remove_digests(deleted.iter().copied())?;
        info!("Deleted {} digests.", deleted.len());
        outcome
    }
}
