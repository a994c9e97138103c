use crate::config::Config;
use crate::error::ConsoleError;
use crate::types::ApiMessage;
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;

/// Backend origin plus credentials, handed to every client call.
#[derive(Debug, Clone)]
pub struct Session {
    base_url: String,
    token: String,
    http: Client,
}

impl Session {
    pub fn new(
        base_url: &str,
        token: &str,
        connect_timeout: Duration,
    ) -> Result<Self, ConsoleError> {
        // No overall request timeout: the live tail keeps its response open indefinitely.
        let http = Client::builder().connect_timeout(connect_timeout).build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ConsoleError> {
        let token = config
            .auth_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                ConsoleError::ConfigError(
                    "no auth token configured (set auth_token, --token or MAKETICKET_AUTH_TOKEN)"
                        .to_string(),
                )
            })?;

        Self::new(
            &config.api_url,
            token,
            Duration::from_secs(config.connect_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.http.get(self.endpoint(path)).bearer_auth(&self.token)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.http.post(self.endpoint(path)).bearer_auth(&self.token)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.http.delete(self.endpoint(path)).bearer_auth(&self.token)
    }

    /// The stream endpoint authenticates through the query string, not a header.
    pub fn stream(&self, path: &str) -> RequestBuilder {
        self.http
            .get(self.endpoint(path))
            .query(&[("token", self.token.as_str())])
    }
}

/// Passes 2xx responses through; otherwise turns the body's `message` into a status error.
pub async fn ensure_success(response: Response) -> Result<Response, ConsoleError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .json::<ApiMessage>()
        .await
        .map(|body| body.message)
        .unwrap_or_default();

    Err(ConsoleError::StatusError { status, message })
}
