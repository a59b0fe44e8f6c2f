//! HTTP client for the Docker Registry API v2.
//!
//! Every request goes through [`RegistryClient::send`], which picks the
//! scheme for the address, attaches stored credentials or a cached token,
//! and answers a single `401` challenge before giving up.

use crate::config::SystemContext;
use crate::credentials::Credentials;
use crate::digest::DigestUtils;
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{Result, SyncError};
use crate::image::{detect_media_type, ACCEPTED_MANIFEST_TYPES};
use crate::registry::auth::{fetch_token, AuthChallenge, AuthStore};
use crate::registry::RegistryAddress;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LINK, LOCATION, WWW_AUTHENTICATE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const CATALOG_SCOPE: &str = "registry:catalog:*";

pub fn pull_scope(repository: &str) -> String {
    format!("repository:{}:pull", repository)
}

pub fn push_scope(repository: &str) -> String {
    format!("repository:{}:pull,push", repository)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Http,
    Https,
}

impl Scheme {
    fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// A fetched manifest.
#[derive(Debug, Clone)]
pub struct FetchedManifest {
    pub data: Vec<u8>,
    pub media_type: String,
    pub digest: String,
}

#[derive(Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    repositories: Vec<String>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

pub struct RegistryClientBuilder {
    skip_tls: bool,
    timeout: Duration,
    auth: Option<Arc<AuthStore>>,
}

impl RegistryClientBuilder {
    pub fn new() -> Self {
        Self {
            skip_tls: true,
            timeout: SystemContext::default().request_timeout(),
            auth: None,
        }
    }

    pub fn from_system_context(sys: &SystemContext) -> Self {
        Self::new()
            .with_skip_tls(sys.insecure_skip_tls_verify)
            .with_timeout(sys.request_timeout())
    }

    pub fn with_skip_tls(mut self, skip_tls: bool) -> Self {
        self.skip_tls = skip_tls;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Share an auth store with other clients.
    pub fn with_auth_store(mut self, auth: Arc<AuthStore>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn build(self) -> Result<RegistryClient> {
        let mut builder = Client::builder().timeout(self.timeout);
        if self.skip_tls {
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }
        let http = builder
            .build()
            .map_err(|e| SyncError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(RegistryClient {
            http,
            skip_tls: self.skip_tls,
            auth: self.auth.unwrap_or_default(),
            schemes: RwLock::new(HashMap::new()),
        })
    }
}

impl Default for RegistryClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RegistryClient {
    http: Client,
    skip_tls: bool,
    auth: Arc<AuthStore>,
    schemes: RwLock<HashMap<RegistryAddress, Scheme>>,
}

impl RegistryClient {
    pub fn builder() -> RegistryClientBuilder {
        RegistryClientBuilder::new()
    }

    pub fn auth_store(&self) -> &Arc<AuthStore> {
        &self.auth
    }

    async fn scheme(&self, registry: &RegistryAddress) -> Scheme {
        if registry.is_loopback() {
            return Scheme::Http;
        }
        self.schemes
            .read()
            .await
            .get(registry)
            .copied()
            .unwrap_or(Scheme::Https)
    }

    pub async fn base_url(&self, registry: &RegistryAddress) -> String {
        format!("{}://{}", self.scheme(registry).await.as_str(), registry)
    }

    /// Send with the stored authorization for `scope`, falling back to plain
    /// HTTP when TLS verification is off and HTTPS cannot connect.
    async fn send<F>(&self, registry: &RegistryAddress, scope: &str, operation: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client, &str) -> RequestBuilder,
    {
        let base = self.base_url(registry).await;
        let first = self.authorize(registry, scope, build(&self.http, &base)).await.send().await;

        let response = match first {
            Ok(response) => response,
            Err(e) if self.can_fall_back(registry, &e).await => {
                tracing::debug!(registry = %registry, error = %e, "HTTPS failed, trying plain HTTP");
                let base = format!("http://{}", registry);
                let response = self
                    .authorize(registry, scope, build(&self.http, &base))
                    .await
                    .send()
                    .await
                    .map_err(|e| NetworkErrorHandler::handle_network_error(&e, operation))?;
                self.schemes.write().await.insert(registry.clone(), Scheme::Http);
                response
            }
            Err(e) => return Err(NetworkErrorHandler::handle_network_error(&e, operation)),
        };

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(challenge) = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(AuthChallenge::parse)
        else {
            return Ok(response);
        };

        let credentials = self.auth.credentials(registry).await;
        let base = self.base_url(registry).await;
        let request = build(&self.http, &base);
        let request = match challenge {
            AuthChallenge::Bearer { realm, service, scope: challenged } => {
                let token_scope = challenged.as_deref().or(Some(scope)).filter(|s| !s.is_empty());
                let token = fetch_token(
                    &self.http,
                    &realm,
                    service.as_deref(),
                    token_scope,
                    credentials.as_ref(),
                )
                .await?;
                self.auth.store_token(registry, scope, token.clone()).await;
                request.bearer_auth(token)
            }
            AuthChallenge::Basic => match credentials {
                Some(creds) => request.basic_auth(creds.username, Some(creds.password)),
                None => return Ok(response),
            },
        };

        request
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, operation))
    }

    async fn can_fall_back(&self, registry: &RegistryAddress, error: &reqwest::Error) -> bool {
        self.skip_tls
            && error.is_connect()
            && self.scheme(registry).await == Scheme::Https
    }

    async fn authorize(&self, registry: &RegistryAddress, scope: &str, request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = self.auth.token(registry, scope).await {
            return request.bearer_auth(token);
        }
        match self.auth.credentials(registry).await {
            Some(creds) => request.basic_auth(creds.username, Some(creds.password)),
            None => request,
        }
    }

    async fn error_from(response: Response, operation: &str) -> SyncError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        HttpErrorHandler::handle_registry_error(status, &text, operation)
    }

    /// Verify `credentials` against `/v2/` and remember them for `registry`.
    pub async fn login(&self, registry: &RegistryAddress, credentials: &Credentials) -> Result<()> {
        tracing::debug!(registry = %registry, username = %credentials.username, "logging in");
        self.auth.store_credentials(registry, credentials.clone()).await;

        let response = self
            .send(registry, "", "login", |c, base| c.get(format!("{}/v2/", base)))
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        Err(HttpErrorHandler::handle_auth_error(status, &text))
    }

    /// Up to `limit` repository names from `/v2/_catalog`, following `Link` pages.
    pub async fn catalog(&self, registry: &RegistryAddress, limit: usize) -> Result<Vec<String>> {
        let mut repositories = Vec::new();
        let mut next = format!("/v2/_catalog?n={}", limit);

        loop {
            let path = next.clone();
            let response = self
                .send(registry, CATALOG_SCOPE, "catalog", |c, base| c.get(format!("{}{}", base, path)))
                .await?;
            if !response.status().is_success() {
                return Err(Self::error_from(response, "catalog").await);
            }

            let link = response
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_link);
            let page: CatalogResponse = response
                .json()
                .await
                .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "catalog response"))?;
            let empty_page = page.repositories.is_empty();
            repositories.extend(page.repositories);

            match link {
                Some(link) if repositories.len() < limit && !empty_page => next = link,
                _ => break,
            }
        }

        repositories.truncate(limit);
        Ok(repositories)
    }

    pub async fn list_tags(&self, registry: &RegistryAddress, repository: &str) -> Result<Vec<String>> {
        let scope = pull_scope(repository);
        let response = self
            .send(registry, &scope, "tag listing", |c, base| {
                c.get(format!("{}/v2/{}/tags/list", base, repository))
            })
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response, "tag listing").await);
        }
        let body: TagsResponse = response
            .json()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "tag listing response"))?;
        Ok(body.tags.unwrap_or_default())
    }

    pub async fn get_manifest(
        &self,
        registry: &RegistryAddress,
        repository: &str,
        reference: &str,
    ) -> Result<FetchedManifest> {
        let scope = pull_scope(repository);
        let accept = ACCEPTED_MANIFEST_TYPES.join(", ");
        let response = self
            .send(registry, &scope, "manifest fetch", |c, base| {
                c.get(format!("{}/v2/{}/manifests/{}", base, repository, reference))
                    .header(ACCEPT, accept.as_str())
            })
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response, "manifest fetch").await);
        }

        let header_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let data = response
            .bytes()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "manifest body"))?
            .to_vec();

        let media_type = match header_type {
            Some(t) if !t.is_empty() && t != "application/json" && t != "text/plain" => t,
            _ => detect_media_type(&data),
        };
        let digest = DigestUtils::compute_docker_digest(&data);
        if DigestUtils::is_valid_docker_digest(reference) {
            DigestUtils::verify_data_integrity(&data, reference)?;
        }

        Ok(FetchedManifest {
            data,
            media_type,
            digest,
        })
    }

    pub async fn blob_exists(&self, registry: &RegistryAddress, repository: &str, digest: &str) -> Result<bool> {
        let scope = push_scope(repository);
        let response = self
            .send(registry, &scope, "blob check", |c, base| {
                c.head(format!("{}/v2/{}/blobs/{}", base, repository, digest))
            })
            .await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::error_from(response, "blob check").await),
        }
    }

    /// Download a blob and verify it against `digest`.
    pub async fn get_blob(&self, registry: &RegistryAddress, repository: &str, digest: &str) -> Result<Vec<u8>> {
        let scope = pull_scope(repository);
        let response = self
            .send(registry, &scope, "blob download", |c, base| {
                c.get(format!("{}/v2/{}/blobs/{}", base, repository, digest))
            })
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response, "blob download").await);
        }
        let data = response
            .bytes()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "blob body"))?
            .to_vec();
        DigestUtils::verify_data_integrity(&data, digest)?;
        Ok(data)
    }

    /// Monolithic upload: `POST` a session, then `PUT` the content with its digest.
    pub async fn upload_blob(
        &self,
        registry: &RegistryAddress,
        repository: &str,
        digest: &str,
        data: &[u8],
    ) -> Result<()> {
        let scope = push_scope(repository);
        let response = self
            .send(registry, &scope, "upload start", |c, base| {
                c.post(format!("{}/v2/{}/blobs/uploads/", base, repository))
                    .header(reqwest::header::CONTENT_LENGTH, 0)
            })
            .await?;
        if response.status() != StatusCode::ACCEPTED {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_upload_error(status, &text, "upload start"));
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| SyncError::Registry {
                status: response.status().as_u16(),
                message: "upload session response missing Location header".to_string(),
            })?
            .to_string();

        let base = url::Url::parse(&format!("{}/", self.base_url(registry).await))?;
        let mut upload_url = base.join(&location)?;
        upload_url.query_pairs_mut().append_pair("digest", digest);

        let response = self
            .send(registry, &scope, "blob upload", |c, _| {
                c.put(upload_url.clone())
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(data.to_vec())
            })
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_upload_error(status, &text, digest));
        }
        Ok(())
    }

    pub async fn put_manifest(
        &self,
        registry: &RegistryAddress,
        repository: &str,
        reference: &str,
        media_type: &str,
        data: &[u8],
    ) -> Result<()> {
        let scope = push_scope(repository);
        let response = self
            .send(registry, &scope, "manifest upload", |c, base| {
                c.put(format!("{}/v2/{}/manifests/{}", base, repository, reference))
                    .header(CONTENT_TYPE, media_type)
                    .body(data.to_vec())
            })
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response, "manifest upload").await);
        }
        Ok(())
    }
}

/// Target of `Link: <...>; rel="next"`.
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        if !params.contains("rel=\"next\"") && !params.contains("rel=next") {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Some(match url::Url::parse(target) {
            Ok(absolute) => match absolute.query() {
                Some(query) => format!("{}?{}", absolute.path(), query),
                None => absolute.path().to_string(),
            },
            Err(_) => target.to_string(),
        })
    })
}
