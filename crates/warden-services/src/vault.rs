//! Vault KV v2 client implementation.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use url::Url;
use warden_types::config::BackendConfig;
use warden_types::{Result, VaultStore, WardenError};

/// Vault client configuration.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Vault URL
    pub url: String,
    /// Vault token
    pub token: Option<String>,
    /// Skip TLS verification
    pub insecure: bool,
    /// Vault namespace (Enterprise)
    pub namespace: Option<String>,
    /// KV v2 mount point
    pub mount: String,
    /// Vault alias/name
    pub name: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            url: "https://127.0.0.1:8200".to_string(),
            token: None,
            insecure: false,
            namespace: None,
            mount: "secret".to_string(),
            name: "default".to_string(),
        }
    }
}

impl VaultConfig {
    /// Client configuration for a `vault` backend section.
    ///
    /// Returns `None` for other backend types.
    pub fn from_backend(config: &BackendConfig) -> Option<Self> {
        match config {
            BackendConfig::Vault {
                url,
                mount,
                namespace,
                token,
                insecure,
                ..
            } => Some(Self {
                url: url.clone(),
                token: token.clone(),
                insecure: *insecure,
                namespace: namespace.clone(),
                mount: mount.clone(),
                name: url.clone(),
            }),
            BackendConfig::Local { .. } => None,
        }
    }
}

/// Vault client for a KV v2 secrets engine.
#[derive(Clone)]
pub struct VaultClient {
    config: VaultConfig,
    client: Client,
    base_url: Url,
}

impl VaultClient {
    /// Create a new Vault client.
    pub fn new(config: VaultConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url)
            .map_err(|e| WardenError::Backend(format!("Invalid vault URL: {}", e)))?;

        let mut builder = Client::builder();

        if config.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| WardenError::Backend(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            base_url,
        })
    }

    /// Get the Vault token from environment or config.
    fn get_token(&self) -> Result<String> {
        if let Ok(token) = std::env::var("VAULT_TOKEN") {
            return Ok(token);
        }

        self.config
            .token
            .clone()
            .ok_or_else(|| WardenError::Backend("No vault token available".to_string()))
    }

    /// API path for a KV v2 section (`data` or `metadata`).
    fn build_path(&self, section: &str, path: &str) -> String {
        let path = path.trim_matches('/');
        let mount = self.config.mount.trim_matches('/');
        if path.is_empty() {
            format!("/v1/{}/{}", mount, section)
        } else {
            format!("/v1/{}/{}/{}", mount, section, path)
        }
    }

    /// Make a request to Vault. A 404 yields `Ok(None)`.
    async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Option<T>> {
        let token = self.get_token()?;
        let url = self
            .base_url
            .join(path)
            .map_err(|e| WardenError::Backend(format!("Invalid path: {}", e)))?;

        let mut req = self.client.request(method, url).header("X-Vault-Token", token);

        if let Some(ns) = &self.config.namespace {
            req = req.header("X-Vault-Namespace", ns);
        }

        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| WardenError::Backend(format!("Request failed: {}", e)))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let error_text = resp
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(WardenError::Backend(format!(
                "Vault request failed ({}): {}",
                status, error_text
            )));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        resp.json()
            .await
            .map(Some)
            .map_err(|e| WardenError::Backend(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl VaultStore for VaultClient {
    async fn read(&self, path: &str) -> Result<Option<HashMap<String, String>>> {
        #[derive(Deserialize)]
        struct Response {
            data: Inner,
        }

        #[derive(Deserialize)]
        struct Inner {
            data: Option<HashMap<String, serde_json::Value>>,
        }

        let response: Option<Response> = self
            .request(reqwest::Method::GET, &self.build_path("data", path), None)
            .await?;

        // Soft-deleted versions come back with `data: null`.
        let Some(data) = response.and_then(|r| r.data.data) else {
            return Ok(None);
        };

        let result = data
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect();

        Ok(Some(result))
    }

    async fn write(&self, path: &str, data: &HashMap<String, String>) -> Result<()> {
        let body = serde_json::json!({ "data": data });

        let _: Option<serde_json::Value> = self
            .request(reqwest::Method::POST, &self.build_path("data", path), Some(body))
            .await?;

        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct ListResponse {
            data: ListData,
        }

        #[derive(Deserialize)]
        struct ListData {
            keys: Vec<String>,
        }

        let response: Option<ListResponse> = self
            .request(
                reqwest::Method::GET,
                &format!("{}?list=true", self.build_path("metadata", prefix)),
                None,
            )
            .await?;

        Ok(response.map(|r| r.data.keys).unwrap_or_default())
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}
