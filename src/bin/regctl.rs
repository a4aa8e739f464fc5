//! Command-line utility for listing and removing registry images by selection.
//!
//! `regctl` keeps a snapshot of the registry's tag/digest relation in a cache file
//! between calls, and refuses to remove digests that are shared with repositories or
//! tags outside the selection unless told otherwise.

use std::{path::PathBuf, process::ExitCode};

use anyhow::{bail, Context, Result};
use clap::{builder::FalseyValueParser, Args, Parser, Subcommand};
use log::LevelFilter;

use registry_index::{
    client::HttpRegistryClient,
    config::{self, ClientConfig, Credentials, TlsVerify},
    Error, RegistryQuery, RegistryRemover, TagMatcher, TagSelectOptions,
};

/// Lists or removes tags by selection from a Docker registry.
#[derive(Debug, Parser)]
#[clap(name = "regctl", version)]
pub struct App {
    /// Registry host name or URL
    #[clap(long, short, env = "REGISTRY")]
    registry: String,
    /// Registry user; without one, credentials are looked up in ~/.docker/config.json
    #[clap(long, short, env = "REGISTRY_USER")]
    user: Option<String>,
    /// Registry password
    #[clap(long, short, env = "REGISTRY_PASSWORD")]
    password: Option<String>,
    /// File with a client certificate, including the key unless --client-key is given
    #[clap(long, env = "REGISTRY_CLIENT_CERT")]
    client_cert: Option<PathBuf>,
    /// File with the key of the client certificate
    #[clap(long, env = "REGISTRY_CLIENT_KEY")]
    client_key: Option<PathBuf>,
    /// Bundle of trusted certificate authorities; 'none' disables verification
    #[clap(long)]
    verify: Option<String>,
    /// Cache file to keep between calls; 'none' disables it
    #[clap(long, short, env = "DOCKER_UTIL_CACHEFILE")]
    cache: Option<String>,
    /// Reload everything from the registry and rewrite the cache file
    #[clap(long)]
    refresh: bool,
    /// Print the number of listed, selected or removed items
    #[clap(long)]
    count: bool,
    /// Skip digests shared with repositories outside the query instead of failing
    #[clap(long)]
    no_raise_intersecting_repo: bool,
    /// Look up digests with GET instead of HEAD, as some registries require
    #[clap(long, env = "DOCKER_UTIL_GET_MANIFEST", value_parser = FalseyValueParser::new())]
    use_get_manifest: bool,
    /// Log level, overridden by RUST_LOG
    #[clap(long, short, default_value = "info")]
    log_level: LevelFilter,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Args)]
struct RepoOptions {
    /// Repository names
    #[clap(long = "repo", short = 'r', required = true, num_args = 1..)]
    repos: Vec<String>,
}

#[derive(Debug, Args)]
struct TagOptions {
    /// Tag names or version selectors such as '>=1.0.0' (operators: == <= >= < >)
    #[clap(long, short, num_args = 0..)]
    tags: Vec<String>,
    /// Patterns selecting tags, matched at the start of a tag
    #[clap(long, num_args = 0..)]
    regex: Vec<String>,
    /// Tag names or version selectors to exclude
    #[clap(long, short = 'x', num_args = 0..)]
    exclude: Vec<String>,
    /// Patterns excluding tags
    #[clap(long, num_args = 0..)]
    exclude_regex: Vec<String>,
    /// Also select digests used by tags outside the query (may affect unexpected tags)
    #[clap(long)]
    no_match_all_tags: bool,
    /// Fail on digests shared with tags outside the query instead of skipping them
    #[clap(long)]
    raise_intersecting_tag: bool,
}

impl TagOptions {
    fn selection(&self, raise_intersecting_repo: bool) -> Result<(TagMatcher, TagSelectOptions)> {
        if self.tags.is_empty() && self.regex.is_empty() {
            bail!("No tags specified, use --tags or --regex");
        }
        let tags = TagMatcher::from_args(&self.tags, &self.regex)?;
        let options = TagSelectOptions {
            exclude: TagMatcher::from_args(&self.exclude, &self.exclude_regex)?,
            match_all_tags: !self.no_match_all_tags,
            raise_intersecting_repo,
            raise_intersecting_tag: self.raise_intersecting_tag,
        };
        Ok((tags, options))
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Lists all repositories with tags
    ListRepoNames,
    /// Lists the tags of all or some repositories
    ListTagNames {
        /// Repositories to list; all if none are given
        repos: Vec<String>,
        /// Reverse the order of tags within a repository
        #[clap(long)]
        reverse_sort: bool,
        /// Print `registry/repository:tag` image references
        #[clap(long)]
        image_names: bool,
    },
    /// Shows the digests used by repositories
    QueryRepos {
        #[clap(flatten)]
        repos: RepoOptions,
    },
    /// Shows the digests used by tags of repositories
    QueryTags {
        #[clap(flatten)]
        repos: RepoOptions,
        #[clap(flatten)]
        tags: TagOptions,
    },
    /// Deletes all digests of repositories
    RemoveRepos {
        #[clap(flatten)]
        repos: RepoOptions,
    },
    /// Deletes the digests used by tags of repositories
    RemoveTags {
        #[clap(flatten)]
        repos: RepoOptions,
        #[clap(flatten)]
        tags: TagOptions,
    },
}

fn cache_path(args: &App) -> Option<PathBuf> {
    match &args.cache {
        Some(cache) => config::value_or_false(cache).map(PathBuf::from),
        None => Some(PathBuf::from(config::cache_file_name(&args.registry))),
    }
}

fn open_query(args: &App) -> Result<RegistryQuery<HttpRegistryClient>> {
    let mut client_config = ClientConfig::new(&args.registry);
    client_config.credentials = match &args.user {
        Some(user) => Some(Credentials::Basic {
            user: user.clone(),
            password: args.password.clone(),
        }),
        None => config::docker_config_auth(&args.registry),
    };
    if let Some(verify) = &args.verify {
        client_config.verify = TlsVerify::parse(verify);
    }
    client_config.client_cert = args.client_cert.clone();
    client_config.client_key = args.client_key.clone();
    client_config.use_get_manifest = args.use_get_manifest;

    let client = HttpRegistryClient::new(&client_config)?;
    let mut query = RegistryQuery::new(client);
    if let Some(path) = cache_path(args) {
        if path.is_file() && !args.refresh {
            query
                .load(&path)
                .with_context(|| format!("Loading cache file {}", path.display()))?;
        }
    }
    Ok(query)
}

fn show_count(args: &App, item_type: &str, count: usize) {
    if args.count {
        let status = format!("Number of {item_type}: {count}");
        println!("{}", "-".repeat(status.len()));
        println!("{status}");
    }
}

fn column_width<'a>(names: impl IntoIterator<Item = &'a String>) -> usize {
    names.into_iter().map(String::len).max().unwrap_or(0)
}

fn run(args: &App) -> Result<()> {
    let mut query = open_query(args)?;
    let outcome = run_command(args, &mut query);

    // also after a failed removal, which may have deleted some digests already
    if let Some(path) = cache_path(args).filter(|_| query.is_initialized()) {
        query
            .dump(&path)
            .with_context(|| format!("Writing cache file {}", path.display()))?;
    }
    outcome
}

fn run_command(args: &App, query: &mut RegistryQuery<HttpRegistryClient>) -> Result<()> {
    let raise_intersecting_repo = !args.no_raise_intersecting_repo;

    match &args.cmd {
        Command::ListRepoNames => {
            let names = query.repository_names()?;
            for name in &names {
                println!("{name}");
            }
            show_count(args, "repositories", names.len());
        }
        Command::ListTagNames {
            repos,
            reverse_sort,
            image_names,
        } => {
            let names = query.tag_names(repos, *reverse_sort)?;
            let width = column_width(names.iter().map(|(repo, _)| repo));
            for (repo, tag) in &names {
                if *image_names {
                    println!("{}/{repo}:{tag}", args.registry);
                } else {
                    println!("{repo:width$}  {tag}");
                }
            }
            show_count(args, "tags", names.len());
        }
        Command::QueryRepos { repos } => {
            let width = column_width(&repos.repos);
            let selected = query.select_repositories(&repos.repos, raise_intersecting_repo)?;
            for item in &selected {
                println!("{:width$}  {}", item.repository, item.digest);
            }
            show_count(args, "selected digests", selected.len());
        }
        Command::QueryTags { repos, tags } => {
            let width = column_width(&repos.repos);
            let (matcher, options) = tags.selection(raise_intersecting_repo)?;
            let mut selected = query.select_tags(&repos.repos, &matcher, &options)?;
            selected.sort_by(|a, b| a.tags.cmp(&b.tags));
            for item in &selected {
                println!(
                    "{:width$} {} [{}]",
                    item.repository,
                    item.digest,
                    item.tags.join(", ")
                );
            }
            show_count(args, "selected digests", selected.len());
        }
        Command::RemoveRepos { repos } => {
            let removed = RegistryRemover::new(query)
                .remove_repositories(&repos.repos, raise_intersecting_repo)?;
            show_count(args, "removed digests", removed.len());
        }
        Command::RemoveTags { repos, tags } => {
            let (matcher, options) = tags.selection(raise_intersecting_repo)?;
            let removed =
                RegistryRemover::new(query).remove_tags(&repos.repos, &matcher, &options)?;
            show_count(args, "removed digests", removed.len());
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = App::parse();
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .parse_default_env()
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(conflict) = err.downcast_ref::<Error>().and_then(Error::as_conflict) {
                eprintln!("Refusing to continue: {conflict}");
                eprintln!("Conflicting {}:", conflict.kind);
                for name in &conflict.names {
                    eprintln!("  {name}");
                }
                return ExitCode::from(2);
            }
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_get_manifest_from_env() {
        let parse = |value: &str| {
            std::env::set_var("DOCKER_UTIL_GET_MANIFEST", value);
            let app = App::try_parse_from(["regctl", "-r", "localhost:5000", "list-repo-names"]);
            std::env::remove_var("DOCKER_UTIL_GET_MANIFEST");
            app.unwrap().use_get_manifest
        };
        assert!(parse("1"));
        assert!(parse("yes"));
        assert!(parse("True"));
        assert!(!parse("0"));
        assert!(!parse("no"));
        assert!(!parse(""));
    }

    #[test]
    fn test_get_manifest_flag() {
        let app = App::try_parse_from([
            "regctl",
            "-r",
            "localhost:5000",
            "--use-get-manifest",
            "list-repo-names",
        ])
        .unwrap();
        assert!(app.use_get_manifest);
    }
}
