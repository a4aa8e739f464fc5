//! Resolving repository and tag filters into digest sets.
//!
//! A digest can only be deleted as a whole, together with every tag referencing it.
//! Both selections therefore check every reference of a candidate digest against the
//! request and refuse (or skip) digests that are also reachable from outside of it.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::{
    digest::ContentDigest, error::IntersectionConflict, index::DigestIndex, matcher::TagMatcher,
};

/// A digest selected through a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoDigest {
    pub repository: String,
    pub digest: ContentDigest,
}

/// A digest selected through tags of a repository, with the tags that matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedDigest {
    pub repository: String,
    pub digest: ContentDigest,
    pub tags: Vec<String>,
}

/// Options for [`select_tags`].
#[derive(Debug, Clone)]
pub struct TagSelectOptions {
    /// Digests with any tag matching one of these are skipped.
    pub exclude: TagMatcher,
    /// Skip digests that are also referenced by unmatched tags of a selected repository.
    pub match_all_tags: bool,
    /// Fail instead of skipping digests referenced by repositories outside the selection.
    pub raise_intersecting_repo: bool,
    /// Fail instead of skipping digests referenced by unmatched tags (only with `match_all_tags`).
    pub raise_intersecting_tag: bool,
}

impl Default for TagSelectOptions {
    fn default() -> Self {
        Self {
            exclude: TagMatcher::default(),
            match_all_tags: true,
            raise_intersecting_repo: true,
            raise_intersecting_tag: false,
        }
    }
}

/// Selects all digests used by any tag of the given repositories.
///
/// Every digest is listed once, with the first repository of `names` using it. A digest
/// also used by a repository not in `names` fails the selection with a conflict naming
/// those repositories, or is left out if `raise_intersecting_repo` is false.
pub fn select_repositories<S: AsRef<str>>(
    index: &DigestIndex,
    names: &[S],
    raise_intersecting_repo: bool,
) -> Result<Vec<RepoDigest>, IntersectionConflict> {
    let requested: BTreeSet<&str> = names.iter().map(AsRef::as_ref).collect();
    let mut tested = BTreeSet::new();
    let mut selected = vec![];

    for name in names {
        let name = name.as_ref();
        for digest in index.digests::<&str>(name, None) {
            if !tested.insert(digest) {
                continue;
            }
            let repos = index.digest_repositories(&digest);
            debug!("Found repositories {repos:?} for digest {digest}");
            let external: BTreeSet<&str> = repos.difference(&requested).copied().collect();
            if external.is_empty() {
                selected.push(RepoDigest {
                    repository: name.to_string(),
                    digest,
                });
                continue;
            }
            debug!("Outside of query: {external:?}");
            if raise_intersecting_repo {
                return Err(IntersectionConflict::repositories(external, &digest));
            }
        }
    }
    Ok(selected)
}

/// Selects the digests of repository tags matching `tags`.
///
/// Candidates are grouped by repository and digest (both in order), and each digest is
/// considered once, for the first repository it was matched in. A candidate is then
/// accepted only if every repository referencing it passes:
///
/// - the repository has matched tags at all, otherwise it is outside the selection
///   (conflict or skip, per `raise_intersecting_repo`);
/// - with `match_all_tags`, none of its tags on the digest is outside the matched ones
///   (conflict or skip, per `raise_intersecting_tag`);
/// - none of its tags on the digest matches `exclude`.
pub fn select_tags<S: AsRef<str>>(
    index: &DigestIndex,
    repos: &[S],
    tags: &TagMatcher,
    options: &TagSelectOptions,
) -> Result<Vec<TaggedDigest>, IntersectionConflict> {
    let mut matched: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut candidates: BTreeMap<(&str, ContentDigest), BTreeSet<&str>> = BTreeMap::new();

    for repo in repos {
        let repo = repo.as_ref();
        let Some(tag_digests) = index.tag_digests(repo) else {
            continue;
        };
        for (tag, digest) in tag_digests {
            if tags.any_matches(tag) {
                matched.entry(repo).or_default().insert(tag.as_str());
                candidates
                    .entry((repo, *digest))
                    .or_default()
                    .insert(tag.as_str());
            }
        }
    }

    let mut tested = BTreeSet::new();
    let mut selected = vec![];
    for ((repo, digest), repo_tags) in candidates {
        if !tested.insert(digest) {
            continue;
        }
        if complete_match(index, &matched, &digest, options)? {
            selected.push(TaggedDigest {
                repository: repo.to_string(),
                digest,
                tags: repo_tags.into_iter().map(str::to_string).collect(),
            });
        }
    }
    Ok(selected)
}

fn complete_match(
    index: &DigestIndex,
    matched: &BTreeMap<&str, BTreeSet<&str>>,
    digest: &ContentDigest,
    options: &TagSelectOptions,
) -> Result<bool, IntersectionConflict> {
    let grouped = index.grouped_tags(digest);
    debug!(
        "Found repositories {:?} for digest {digest}",
        grouped.keys().collect::<Vec<_>>()
    );

    for (repo, current) in &grouped {
        let Some(selected_tags) = matched.get(repo) else {
            debug!("Outside of query: {repo}");
            if options.raise_intersecting_repo {
                let foreign = grouped
                    .keys()
                    .copied()
                    .filter(|name| !matched.contains_key(name));
                return Err(IntersectionConflict::repositories(foreign, digest));
            }
            return Ok(false);
        };

        if options.match_all_tags {
            let excess: BTreeSet<&str> = current.difference(selected_tags).copied().collect();
            if !excess.is_empty() {
                debug!("Tags outside of query in {repo}: {excess:?}");
                if options.raise_intersecting_tag {
                    return Err(IntersectionConflict::tags(excess, digest));
                }
                return Ok(false);
            }
        }

        if current.iter().any(|tag| options.exclude.any_matches(tag)) {
            debug!("Excluded by tags of {repo}: {digest}");
            return Ok(false);
        }
    }
    Ok(true)
}
