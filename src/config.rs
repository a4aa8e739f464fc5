//! Registry client configuration.

use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use log::debug;
use serde::Deserialize;

/// How the client authenticates against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic {
        user: String,
        password: Option<String>,
    },
    /// A base64 `user:password` value, as stored by `docker login`.
    Encoded(String),
}

/// Server certificate verification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerify {
    #[default]
    System,
    /// Trust the certificate authorities in this PEM bundle.
    CaBundle(PathBuf),
    Disabled,
}

impl TlsVerify {
    /// Reads a `--verify` value: a CA bundle path, or a false-like word to disable.
    pub fn parse(value: &str) -> Self {
        match value_or_false(value) {
            Some(path) => TlsVerify::CaBundle(PathBuf::from(path)),
            None => TlsVerify::Disabled,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Base URL, without the `/v2` path.
    pub base_url: String,
    pub credentials: Option<Credentials>,
    pub verify: TlsVerify,
    /// PEM file with the client certificate, optionally including its key.
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    /// Look up manifest digests with GET instead of HEAD.
    pub use_get_manifest: bool,
    /// Page size requested from the catalog endpoint.
    pub catalog_page_size: Option<u32>,
}

impl ClientConfig {
    pub fn new(registry: &str) -> Self {
        Self {
            base_url: registry_url(registry),
            ..Self::default()
        }
    }
}

/// `None` for empty or false-like values (`false`, `0`, `no`, `none`, any case).
pub fn value_or_false(value: &str) -> Option<&str> {
    match value.to_lowercase().as_str() {
        "" | "false" | "0" | "no" | "none" => None,
        _ => Some(value),
    }
}

/// Registry names without a scheme are served over https.
pub fn registry_url(registry: &str) -> String {
    if registry.starts_with("http") {
        registry.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", registry.trim_end_matches('/'))
    }
}

/// Default snapshot file name for a registry, e.g. `registry_example_com_cache.json`.
pub fn cache_file_name(registry: &str) -> String {
    let name = match registry.rfind("//") {
        Some(pos) if pos > 0 => &registry[pos + 2..],
        _ => registry,
    };
    format!("{}_cache.json", name.replace(['/', '.'], "_"))
}

#[derive(Debug, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, DockerAuth>,
}

#[derive(Debug, Deserialize)]
struct DockerAuth {
    auth: Option<String>,
}

/// Location of the Docker CLI configuration.
pub fn docker_config_path() -> Option<PathBuf> {
    env::var_os("HOME").map(|home| Path::new(&home).join(".docker/config.json"))
}

/// The stored `docker login` credential for `registry` in a Docker CLI configuration document.
pub fn parse_docker_auth(document: &str, registry: &str) -> Option<Credentials> {
    let config: DockerConfig = match serde_json::from_str(document) {
        Ok(config) => config,
        Err(err) => {
            debug!("Ignoring unreadable Docker configuration: {err}");
            return None;
        }
    };
    config
        .auths
        .get(registry)?
        .auth
        .as_ref()
        .filter(|auth| !auth.is_empty())
        .map(|auth| Credentials::Encoded(auth.clone()))
}

/// The stored `docker login` credential for `registry`, if the Docker CLI configuration has one.
pub fn docker_config_auth(registry: &str) -> Option<Credentials> {
    let path = docker_config_path()?;
    let document = fs::read_to_string(&path).ok()?;
    debug!("Reading credentials from {}", path.display());
    parse_docker_auth(&document, registry)
}

#[cfg(test)]
mod test {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_value_or_false() {
        for value in ["", "None", "false", "FALSE", "0", "no"] {
            assert_eq!(value_or_false(value), None);
        }
        assert_eq!(value_or_false("/etc/ca.pem"), Some("/etc/ca.pem"));
        assert_eq!(TlsVerify::parse("none"), TlsVerify::Disabled);
        assert_eq!(
            TlsVerify::parse("ca.pem"),
            TlsVerify::CaBundle(PathBuf::from("ca.pem"))
        );
    }

    #[test]
    fn test_registry_url() {
        assert_eq!(registry_url("registry.example.com"), "https://registry.example.com");
        assert_eq!(registry_url("http://localhost:5000/"), "http://localhost:5000");
        assert_eq!(
            ClientConfig::new("localhost:5000").base_url,
            "https://localhost:5000"
        );
    }

    #[test]
    fn test_cache_file_name() {
        assert_eq!(
            cache_file_name("registry.example.com"),
            "registry_example_com_cache.json"
        );
        assert_eq!(
            cache_file_name("https://registry.example.com/mirror"),
            "registry_example_com_mirror_cache.json"
        );
        assert_eq!(cache_file_name("localhost:5000"), "localhost:5000_cache.json");
        assert_eq!(
            cache_file_name("https://proxy.example.com//registry.example.com"),
            "registry_example_com_cache.json"
        );
        assert_eq!(cache_file_name("//registry"), "__registry_cache.json");
    }

    #[test]
    fn test_parse_docker_auth() {
        let document = r#"{
            "auths": {
                "registry.example.com": {"auth": "dXNlcjpwYXNz"},
                "empty.example.com": {},
                "blank.example.com": {"auth": ""}
            },
            "credsStore": "desktop"
        }"#;
        assert_eq!(
            parse_docker_auth(document, "registry.example.com"),
            Some(Credentials::Encoded("dXNlcjpwYXNz".to_string()))
        );
        assert_eq!(parse_docker_auth(document, "empty.example.com"), None);
        assert_eq!(parse_docker_auth(document, "blank.example.com"), None);
        assert_eq!(parse_docker_auth(document, "other.example.com"), None);
        assert_eq!(parse_docker_auth("{}", "registry.example.com"), None);
        assert_eq!(parse_docker_auth("not json", "registry.example.com"), None);
    }
}
