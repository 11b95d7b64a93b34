//! JSON-over-HTTP clients for the generation and execution services

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::{Candidate, ExecutionReport, Executor, Generator};
use crate::config::ServiceConfig;
use crate::{Error, Result};

#[derive(Serialize)]
struct GenerateRequest<'a> {
    question: &'a str,
    schema_context: &'a str,
}

#[derive(Serialize)]
struct RefineRequest<'a> {
    prior_artifact: &'a str,
    feedback: &'a str,
    schema_context: &'a str,
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    artifact: &'a str,
}

/// Shared plumbing: base URL plus a client with auth headers baked in
struct JsonService {
    endpoint: String,
    client: reqwest::Client,
}

impl JsonService {
    fn new(endpoint: &str, api_key: Option<&str>, timeout: Option<Duration>) -> Result<Self> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(Error::Config("Service endpoint not configured".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", key))
                    .map_err(|e| Error::Config(format!("Invalid API key format: {}", e)))?,
            );
        }

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { endpoint, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }

    /// POST `body` to `path`; on failure the message is handed to `wrap`
    async fn post<B, T>(&self, path: &str, body: &B, wrap: fn(String) -> Error) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| wrap(format!("Request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(wrap(format!("{} returned {}: {}", url, status, body)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| wrap(format!("Invalid response from {}: {}", url, e)))
    }
}

/// Generation service reached over HTTP (`/generate`, `/refine`)
pub struct HttpGenerator {
    service: JsonService,
}

impl HttpGenerator {
    pub fn new(endpoint: &str, api_key: Option<&str>) -> Result<Self> {
        Ok(Self {
            service: JsonService::new(endpoint, api_key, None)?,
        })
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| Error::Config("Generation endpoint not configured".to_string()))?;
        Ok(Self {
            service: JsonService::new(endpoint, config.api_key().as_deref(), config.timeout)?,
        })
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, question: &str, schema_context: &str) -> Result<Candidate> {
        let request = GenerateRequest {
            question,
            schema_context,
        };
        self.service.post("generate", &request, Error::Generation).await
    }

    async fn refine(
        &self,
        prior: &str,
        feedback: &str,
        schema_context: &str,
    ) -> Result<Candidate> {
        let request = RefineRequest {
            prior_artifact: prior,
            feedback,
            schema_context,
        };
        self.service.post("refine", &request, Error::Generation).await
    }
}

/// Execution service reached over HTTP (`/execute`)
pub struct HttpExecutor {
    service: JsonService,
}

impl HttpExecutor {
    pub fn new(endpoint: &str, api_key: Option<&str>) -> Result<Self> {
        Ok(Self {
            service: JsonService::new(endpoint, api_key, None)?,
        })
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| Error::Config("Execution endpoint not configured".to_string()))?;
        Ok(Self {
            service: JsonService::new(endpoint, config.api_key().as_deref(), config.timeout)?,
        })
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(&self, artifact: &str) -> Result<ExecutionReport> {
        self.service
            .post("execute", &ExecuteRequest { artifact }, Error::Execution)
            .await
    }
}
