//! Registry authentication: challenge parsing, token exchange and the
//! in-memory store of logged-in registries.

use crate::credentials::Credentials;
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::Result;
use crate::registry::RegistryAddress;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A parsed `WWW-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChallenge {
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
    Basic,
}

impl AuthChallenge {
    /// Parse `Bearer realm="...",service="...",scope="..."` or `Basic realm="..."`.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));

        if scheme.eq_ignore_ascii_case("basic") {
            return Some(AuthChallenge::Basic);
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            tracing::debug!(scheme, "unsupported auth scheme");
            return None;
        }

        let params = parse_params(params);
        let Some(realm) = params.get("realm") else {
            tracing::warn!("bearer challenge missing realm parameter");
            return None;
        };
        Some(AuthChallenge::Bearer {
            realm: realm.clone(),
            service: params.get("service").cloned(),
            scope: params.get("scope").cloned(),
        })
    }
}

/// Split `key="value",key2="value2"`; commas inside quotes belong to the value.
fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].trim().trim_start_matches(',').trim().to_ascii_lowercase();
        rest = rest[eq + 1..].trim_start();

        let value;
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted.find('"').unwrap_or(quoted.len());
            value = quoted[..end].to_string();
            rest = quoted.get(end + 1..).unwrap_or("");
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            value = rest[..end].trim().to_string();
            rest = &rest[end..];
        }
        rest = rest.trim_start().trim_start_matches(',').trim_start();
        params.insert(key, value);
    }
    params
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
    expires_in: Option<u64>,
}

/// Exchange credentials for a bearer token at the challenge's realm.
pub async fn fetch_token(
    client: &Client,
    realm: &str,
    service: Option<&str>,
    scope: Option<&str>,
    credentials: Option<&Credentials>,
) -> Result<String> {
    let mut url = url::Url::parse(realm)?;
    {
        let mut query = url.query_pairs_mut();
        if let Some(service) = service {
            query.append_pair("service", service);
        }
        if let Some(scope) = scope {
            query.append_pair("scope", scope);
        }
    }

    tracing::debug!(realm, ?scope, "requesting registry token");

    let mut request = client.get(url);
    if let Some(creds) = credentials {
        request = request.basic_auth(&creds.username, Some(&creds.password));
    }
    let response = request
        .send()
        .await
        .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "token request"))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(HttpErrorHandler::handle_auth_error(status, &text));
    }

    let body: TokenResponse = response
        .json()
        .await
        .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "token response"))?;
    if let Some(expires_in) = body.expires_in {
        tracing::debug!(expires_in, "token obtained");
    }
    body.token
        .or(body.access_token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            HttpErrorHandler::handle_auth_error(status, "token response carried no token")
        })
}

/// Credentials of logged-in registries plus the bearer tokens issued to them.
#[derive(Debug, Default)]
pub struct AuthStore {
    credentials: RwLock<HashMap<RegistryAddress, Credentials>>,
    tokens: RwLock<HashMap<(RegistryAddress, String), String>>,
}

impl AuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn store_credentials(&self, registry: &RegistryAddress, credentials: Credentials) {
        self.credentials
            .write()
            .await
            .insert(registry.clone(), credentials);
    }

    pub async fn credentials(&self, registry: &RegistryAddress) -> Option<Credentials> {
        self.credentials.read().await.get(registry).cloned()
    }

    pub async fn store_token(&self, registry: &RegistryAddress, scope: &str, token: String) {
        self.tokens
            .write()
            .await
            .insert((registry.clone(), scope.to_string()), token);
    }

    pub async fn token(&self, registry: &RegistryAddress, scope: &str) -> Option<String> {
        self.tokens
            .read()
            .await
            .get(&(registry.clone(), scope.to_string()))
            .cloned()
    }
}
