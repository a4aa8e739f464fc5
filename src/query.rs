//! Queries against a registry, answered from a [`DigestIndex`].
//!
//! [`RegistryQuery`] fills its index from a [`RegistryTransport`] on first use, unless
//! it was loaded from a snapshot before. All selections and listings then run on the
//! index without further requests.

use std::path::Path;

use log::{debug, info, warn};

use crate::{
    client::{RegistryTransport, TransportError},
    digest::ContentDigest,
    error::Result,
    index::DigestIndex,
    matcher::TagMatcher,
    select::{self, RepoDigest, TagSelectOptions, TaggedDigest},
    snapshot,
};

#[derive(Debug)]
pub struct RegistryQuery<T> {
    transport: T,
    index: DigestIndex,
    initialized: bool,
}

impl<T: RegistryTransport> RegistryQuery<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            index: DigestIndex::new(),
            initialized: false,
        }
    }

    /// Uses an existing index instead of refreshing on first use.
    pub fn with_index(transport: T, index: DigestIndex) -> Self {
        Self {
            transport,
            index,
            initialized: true,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn index(&self) -> &DigestIndex {
        &self.index
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub(crate) fn parts_mut(&mut self) -> (&T, &mut DigestIndex) {
        (&self.transport, &mut self.index)
    }

    /// The digest `repo:tag` points at, or `None` if the registry refused the lookup.
    fn lookup_digest(&self, repo: &str, tag: &str) -> Result<Option<ContentDigest>> {
        match self.transport.manifest_digest(repo, tag) {
            Ok(digest) => {
                debug!("Registering digest for {repo}:{tag} - {digest}");
                Ok(Some(ContentDigest::from_sha256(&digest)?))
            }
            Err(err @ TransportError::Status { .. }) => {
                warn!("Error requesting manifest of {repo}:{tag}, skipping: {err}");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Rebuilds the index from every tag of every repository in the registry.
    pub fn refresh(&mut self) -> Result<()> {
        info!("Initializing cache.");
        if self.initialized {
            info!("Clearing.");
            self.index.reset();
        }
        let repos = self.transport.catalog()?;
        info!("Found {} repositories.", repos.len());
        for repo in &repos {
            info!("Checking repository '{repo}'.");
            let tags = self.transport.tags(repo)?;
            if tags.is_empty() {
                info!("No tags found for '{repo}', skipping.");
                continue;
            }
            for tag in &tags {
                if let Some(digest) = self.lookup_digest(repo, tag)? {
                    self.index.add_image(repo, tag, digest);
                }
            }
        }
        info!("Cache init completed.");
        self.initialized = true;
        Ok(())
    }

    /// Refreshes only the tags of `repos` that match `tags`, keeping all other entries.
    pub fn update<S: AsRef<str>>(&mut self, repos: &[S], tags: &TagMatcher) -> Result<()> {
        info!("Updating cache.");
        for repo in repos {
            let repo = repo.as_ref();
            info!("Checking repository '{repo}'.");
            let available = self.transport.tags(repo)?;
            if available.is_empty() {
                info!("No tags found for '{repo}', skipping.");
                continue;
            }
            for tag in &available {
                info!("Checking filter match for {repo}:{tag}.");
                if !tags.any_matches(tag) {
                    continue;
                }
                if let Some(digest) = self.lookup_digest(repo, tag)? {
                    self.index.update_image(repo, tag, digest);
                }
            }
        }
        Ok(())
    }

    fn ensure_initialized(&mut self) -> Result<()> {
        if !self.initialized {
            self.refresh()?;
        }
        Ok(())
    }

    /// See [`select::select_repositories`].
    pub fn select_repositories<S: AsRef<str>>(
        &mut self,
        names: &[S],
        raise_intersecting_repo: bool,
    ) -> Result<Vec<RepoDigest>> {
        self.ensure_initialized()?;
        Ok(select::select_repositories(
            &self.index,
            names,
            raise_intersecting_repo,
        )?)
    }

    /// See [`select::select_tags`].
    pub fn select_tags<S: AsRef<str>>(
        &mut self,
        repos: &[S],
        tags: &TagMatcher,
        options: &TagSelectOptions,
    ) -> Result<Vec<TaggedDigest>> {
        self.ensure_initialized()?;
        Ok(select::select_tags(&self.index, repos, tags, options)?)
    }

    /// Sorted names of all repositories with tags.
    pub fn repository_names(&mut self) -> Result<Vec<String>> {
        self.ensure_initialized()?;
        Ok(self
            .index
            .repository_names()
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// `(repository, tag)` pairs of `repos` (all repositories by name if empty), with the
    /// tags of each repository in version order.
    pub fn tag_names<S: AsRef<str>>(
        &mut self,
        repos: &[S],
        reverse_sort: bool,
    ) -> Result<Vec<(String, String)>> {
        self.ensure_initialized()?;
        Ok(self
            .index
            .version_sorted_tag_names(Some(repos), reverse_sort)
            .into_iter()
            .map(|(repo, tag)| (repo.to_string(), tag.to_string()))
            .collect())
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.index = snapshot::load(path)?;
        self.initialized = true;
        Ok(())
    }

    pub fn loads(&mut self, data: &str) -> Result<()> {
        self.index = snapshot::loads(data)?;
        self.initialized = true;
        Ok(())
    }

    pub fn dump(&self, path: impl AsRef<Path>) -> Result<()> {
        snapshot::save(&self.index, path)
    }

    pub fn dumps(&self) -> String {
        snapshot::dumps(&self.index)
    }
}

#[cfg(test)]
mod test {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::{
        error::Error,
        test::{preset_index, FakeRegistry, D_A1, D_A2, D_BC, D_C},
    };

    #[test]
    fn test_refresh() {
        let registry = FakeRegistry::preset();
        registry.push_empty("empty");
        let mut query = RegistryQuery::new(&registry);
        assert!(!query.is_initialized());
        query.refresh().unwrap();
        assert!(query.is_initialized());
        assert_eq!(query.index(), &preset_index());
        assert_eq!(registry.manifest_requests(), 11);
    }

    #[test]
    fn test_refresh_skips_unavailable_manifests() {
        let registry = FakeRegistry::preset();
        registry.make_unavailable("a", "latest");
        let mut query = RegistryQuery::new(&registry);
        query.refresh().unwrap();
        assert_eq!(query.index().digest_tags(&D_A1).unwrap().len(), 1);
        assert!(!query.index().tag_digests("a").unwrap().contains_key("latest"));
    }

    #[test]
    fn test_refresh_rejects_bad_digest() {
        let registry = FakeRegistry::new();
        registry.push("a", "latest", "md5:00");
        let mut query = RegistryQuery::new(&registry);
        assert!(matches!(query.refresh(), Err(Error::Format(_))));
    }

    #[test]
    fn test_refresh_clears_previous_contents() {
        let registry = FakeRegistry::new();
        registry.push("b", "latest", &D_BC.as_sha256());
        let mut query = RegistryQuery::with_index(&registry, preset_index());
        query.refresh().unwrap();
        assert_eq!(query.index().repository_names(), ["b"]);
    }

    #[test]
    fn test_update() {
        let registry = FakeRegistry::preset();
        let mut query = RegistryQuery::with_index(&registry, preset_index());
        registry.push("a", "latest", &D_A2.as_sha256());
        registry.push("a", "1.3.0", &D_C.as_sha256());
        registry.push("c", "latest", &D_C.as_sha256());

        let tags = ["latest", ">=1.3"].into_iter().collect();
        query.update(&["a"], &tags).unwrap();
        assert_eq!(registry.manifest_requests(), 2);

        let index = query.index();
        assert_eq!(index.tag_digests("a").unwrap()["latest"], D_A2);
        assert_eq!(index.tag_digests("a").unwrap()["1.3.0"], D_C);
        // not part of the update
        assert_eq!(index.tag_digests("c").unwrap()["latest"], D_BC);
        assert_eq!(index.digest_tags(&D_A1).unwrap().len(), 1);
    }

    #[test]
    fn test_lazy_refresh() {
        let registry = FakeRegistry::preset();
        let mut query = RegistryQuery::new(&registry);
        assert_eq!(query.repository_names().unwrap(), ["a", "b", "c"]);
        assert_eq!(registry.manifest_requests(), 11);

        // initialised only once
        query.select_repositories(&["a"], true).unwrap();
        assert_eq!(registry.manifest_requests(), 11);
    }

    #[test]
    fn test_selections() {
        let registry = FakeRegistry::new();
        let mut query = RegistryQuery::with_index(&registry, preset_index());
        let selected = query.select_repositories(&["c"], false).unwrap();
        assert_eq!(
            selected,
            [RepoDigest {
                repository: "c".to_string(),
                digest: D_C
            }]
        );

        let err = query.select_repositories(&["b"], true).unwrap_err();
        assert_eq!(err.as_conflict().unwrap().digest, D_BC);

        let tags = TagMatcher::from_args(&["testing"], &[]).unwrap();
        let selected = query
            .select_tags(&["a"], &tags, &TagSelectOptions::default())
            .unwrap();
        assert!(selected.is_empty());
        assert_eq!(registry.manifest_requests(), 0);
    }

    #[test]
    fn test_tag_names() {
        let registry = FakeRegistry::new();
        let mut query = RegistryQuery::with_index(&registry, preset_index());
        let names = query.tag_names(&["c"], false).unwrap();
        assert_eq!(
            names
                .iter()
                .map(|(_, tag)| tag.as_str())
                .collect::<Vec<_>>(),
            ["1.0.0", "1.1.0", "latest", "testing"]
        );
        let names = query.tag_names(&["c"], true).unwrap();
        assert_eq!(names[0], ("c".to_string(), "testing".to_string()));

        let all = query.tag_names::<&str>(&[], false).unwrap();
        assert_eq!(all.len(), 11);
        assert_eq!(all[0], ("a".to_string(), "1.1.0".to_string()));
    }

    #[test]
    fn test_loads_dumps() {
        let registry = FakeRegistry::new();
        let source = RegistryQuery::with_index(&registry, preset_index());
        let mut query = RegistryQuery::new(&registry);
        query.loads(&source.dumps()).unwrap();
        assert!(query.is_initialized());
        assert_eq!(query.index(), source.index());
        assert!(query.loads("[]").is_err());
    }
}
