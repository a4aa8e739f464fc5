//! Docker Registry HTTP API v2 transport.
//!
//! The index only needs four calls from a registry: the catalog, the tag list of a
//! repository, the digest of a manifest and manifest deletion. [`RegistryTransport`]
//! captures those, and [`HttpRegistryClient`] implements them over blocking HTTP.

use std::{fs, path::Path};

use log::{debug, trace};
use oci_spec::image::MediaType;
use reqwest::{
    blocking::{Client, RequestBuilder, Response},
    header::{HeaderMap, ACCEPT, AUTHORIZATION, LINK},
    Certificate, Identity, Method, StatusCode, Url,
};
use serde::Deserialize;

use crate::{
    config::{ClientConfig, Credentials, TlsVerify},
    digest::ContentDigest,
};

const DIGEST_HEADER: &str = "Docker-Content-Digest";
const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

/// Failures reported by a registry transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The registry answered with a non-success status.
    #[error("{method} {url} returned {status}")]
    Status {
        method: Method,
        url: String,
        status: StatusCode,
    },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid registry URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A manifest response without a digest header.
    #[error("no Docker-Content-Digest header for {repository}:{reference}")]
    MissingDigest {
        repository: String,
        reference: String,
    },

    #[error("unable to read {path}: {source}")]
    Certificate {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// The registry calls used for building and pruning a [`crate::DigestIndex`].
pub trait RegistryTransport {
    /// Names of all repositories.
    fn catalog(&self) -> Result<Vec<String>, TransportError>;

    /// Tag names of a repository; empty if the repository has none.
    fn tags(&self, repository: &str) -> Result<Vec<String>, TransportError>;

    /// The `sha256:<hex>` digest of the manifest `reference` (a tag or digest) points at.
    fn manifest_digest(&self, repository: &str, reference: &str) -> Result<String, TransportError>;

    fn delete_manifest(&self, repository: &str, digest: &ContentDigest) -> Result<(), TransportError>;
}

impl<T: RegistryTransport + ?Sized> RegistryTransport for &T {
    fn catalog(&self) -> Result<Vec<String>, TransportError> {
        (**self).catalog()
    }

    fn tags(&self, repository: &str) -> Result<Vec<String>, TransportError> {
        (**self).tags(repository)
    }

    fn manifest_digest(&self, repository: &str, reference: &str) -> Result<String, TransportError> {
        (**self).manifest_digest(repository, reference)
    }

    fn delete_manifest(&self, repository: &str, digest: &ContentDigest) -> Result<(), TransportError> {
        (**self).delete_manifest(repository, digest)
    }
}

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default)]
    repositories: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// The target of a `Link: <...>; rel="next"` header.
fn next_link(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(LINK)?.to_str().ok()?;
    value.split(',').find_map(|link| {
        let (target, params) = link.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|param| matches!(param.trim(), "rel=\"next\"" | "rel=next"));
        if !is_next {
            return None;
        }
        target
            .trim()
            .strip_prefix('<')
            .and_then(|target| target.strip_suffix('>'))
    })
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TransportError> {
    fs::read(path).map_err(|source| TransportError::Certificate {
        path: path.display().to_string(),
        source,
    })
}

/// Blocking client for the Docker Registry HTTP API v2.
#[derive(Debug)]
pub struct HttpRegistryClient {
    client: Client,
    base: Url,
    credentials: Option<Credentials>,
    manifest_method: Method,
    catalog_page_size: Option<u32>,
}

impl HttpRegistryClient {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let invalid = |reason: String| TransportError::InvalidUrl {
            url: config.base_url.clone(),
            reason,
        };
        // keep a trailing slash, so that joining `v2/...` extends the path
        let mut base = Url::parse(&config.base_url).map_err(|err| invalid(err.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(invalid("not a base URL".to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let accept = [
            DOCKER_MANIFEST.to_string(),
            DOCKER_MANIFEST_LIST.to_string(),
            MediaType::ImageManifest.to_string(),
            MediaType::ImageIndex.to_string(),
        ]
        .join(", ");
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            accept
                .parse()
                .map_err(|_| invalid("unusable Accept header".to_string()))?,
        );

        let mut builder = Client::builder().default_headers(headers);
        match &config.verify {
            TlsVerify::System => {}
            TlsVerify::Disabled => builder = builder.danger_accept_invalid_certs(true),
            TlsVerify::CaBundle(path) => {
                for certificate in Certificate::from_pem_bundle(&read_pem(path)?)? {
                    builder = builder.add_root_certificate(certificate);
                }
            }
        }
        if let Some(cert) = &config.client_cert {
            let mut pem = read_pem(cert)?;
            if let Some(key) = &config.client_key {
                pem.push(b'\n');
                pem.extend(read_pem(key)?);
            }
            builder = builder.identity(Identity::from_pem(&pem)?);
        }

        Ok(Self {
            client: builder.build()?,
            base,
            credentials: config.credentials.clone(),
            manifest_method: if config.use_get_manifest {
                Method::GET
            } else {
                Method::HEAD
            },
            catalog_page_size: config.catalog_page_size,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Url, TransportError> {
        self.base
            .join(path)
            .map_err(|err| TransportError::InvalidUrl {
                url: format!("{}{path}", self.base),
                reason: err.to_string(),
            })
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.credentials {
            Some(Credentials::Basic { user, password }) => builder.basic_auth(user, password.as_ref()),
            Some(Credentials::Encoded(auth)) => builder.header(AUTHORIZATION, format!("Basic {auth}")),
            None => builder,
        }
    }

    fn send(&self, method: Method, url: Url) -> Result<Response, TransportError> {
        trace!("{method} {url}");
        let response = self.request(method.clone(), url.clone()).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                method,
                url: url.to_string(),
                status,
            });
        }
        Ok(response)
    }

    /// Collects a paginated listing, following `Link` headers.
    fn paginated<T: serde::de::DeserializeOwned>(
        &self,
        mut url: Url,
        mut items: impl FnMut(T) -> Option<Vec<String>>,
    ) -> Result<Vec<String>, TransportError> {
        let mut result = vec![];
        loop {
            let response = self.send(Method::GET, url.clone())?;
            let next = next_link(response.headers()).map(|link| url.join(link));
            result.extend(items(response.json()?).unwrap_or_default());
            match next {
                Some(Ok(next)) => {
                    debug!("Following listing to {next}");
                    url = next;
                }
                Some(Err(err)) => {
                    return Err(TransportError::InvalidUrl {
                        url: url.to_string(),
                        reason: err.to_string(),
                    })
                }
                None => return Ok(result),
            }
        }
    }

    /// Checks that the registry serves the v2 API.
    pub fn ping(&self) -> Result<(), TransportError> {
        self.send(Method::GET, self.url("v2/")?)?;
        Ok(())
    }
}

impl RegistryTransport for HttpRegistryClient {
    fn catalog(&self) -> Result<Vec<String>, TransportError> {
        let mut url = self.url("v2/_catalog")?;
        if let Some(n) = self.catalog_page_size {
            url.query_pairs_mut().append_pair("n", &n.to_string());
        }
        self.paginated(url, |catalog: Catalog| catalog.repositories)
    }

    fn tags(&self, repository: &str) -> Result<Vec<String>, TransportError> {
        let url = self.url(&format!("v2/{repository}/tags/list"))?;
        self.paginated(url, |list: TagList| list.tags)
    }

    fn manifest_digest(&self, repository: &str, reference: &str) -> Result<String, TransportError> {
        let url = self.url(&format!("v2/{repository}/manifests/{reference}"))?;
        let method = self.manifest_method.clone();
        let response = self.send(method.clone(), url)?;
        if let Some(digest) = response.headers().get(DIGEST_HEADER) {
            if let Ok(digest) = digest.to_str() {
                return Ok(digest.to_string());
            }
        }
        if method == Method::GET {
            let body = response.bytes()?;
            return Ok(ContentDigest::compute(&body).as_sha256());
        }
        Err(TransportError::MissingDigest {
            repository: repository.to_string(),
            reference: reference.to_string(),
        })
    }

    fn delete_manifest(&self, repository: &str, digest: &ContentDigest) -> Result<(), TransportError> {
        let url = self.url(&format!("v2/{repository}/manifests/{digest}"))?;
        self.send(Method::DELETE, url)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use reqwest::header::HeaderValue;
    use similar_asserts::assert_eq;

    use super::*;

    fn link(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(LINK, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_next_link() {
        assert_eq!(
            next_link(&link(r#"</v2/_catalog?last=b&n=2>; rel="next""#)),
            Some("/v2/_catalog?last=b&n=2")
        );
        assert_eq!(
            next_link(&link(r#"<https://r/v2/a/tags/list?n=1>; rel="prev", </v2/a/tags/list?last=x>; rel="next""#)),
            Some("/v2/a/tags/list?last=x")
        );
        assert_eq!(next_link(&link(r#"</v2/_catalog>; rel="prev""#)), None);
        assert_eq!(next_link(&HeaderMap::new()), None);
    }

    #[test]
    fn test_listing_documents() {
        let catalog: Catalog = serde_json::from_str(r#"{"repositories": ["a", "b"]}"#).unwrap();
        assert_eq!(catalog.repositories.unwrap(), ["a", "b"]);

        let tags: TagList = serde_json::from_str(r#"{"name": "a", "tags": null}"#).unwrap();
        assert_eq!(tags.tags, None);
        let tags: TagList = serde_json::from_str(r#"{"name": "a"}"#).unwrap();
        assert_eq!(tags.tags, None);
    }

    #[test]
    fn test_urls() {
        let client = HttpRegistryClient::new(&ClientConfig::new("http://localhost:5000/mirror")).unwrap();
        assert_eq!(client.base_url().as_str(), "http://localhost:5000/mirror/");
        assert_eq!(
            client.url("v2/team/app/tags/list").unwrap().as_str(),
            "http://localhost:5000/mirror/v2/team/app/tags/list"
        );
        assert_eq!(client.manifest_method, Method::HEAD);

        let config = ClientConfig {
            use_get_manifest: true,
            ..ClientConfig::new("registry.example.com")
        };
        let client = HttpRegistryClient::new(&config).unwrap();
        assert_eq!(client.base_url().as_str(), "https://registry.example.com/");
        assert_eq!(client.manifest_method, Method::GET);
    }

    #[test]
    fn test_invalid_url() {
        let config = ClientConfig {
            base_url: "not a url".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            HttpRegistryClient::new(&config),
            Err(TransportError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_missing_certificate() {
        let config = ClientConfig {
            client_cert: Some("/nonexistent/client.pem".into()),
            ..ClientConfig::new("registry.example.com")
        };
        assert!(matches!(
            HttpRegistryClient::new(&config),
            Err(TransportError::Certificate { .. })
        ));
    }
}
