//! HTTP transport shared by every backend domain.

use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;
use url::Url;

use super::error::ApiError;
use crate::config::ApiConfig;
use crate::session::{AuthToken, SessionStore};

/// Backend domain; selects the base path a request is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Catalog,
    Auth,
    Lease,
    Payment,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Catalog => "catalog",
            Domain::Auth => "auth",
            Domain::Lease => "lease",
            Domain::Payment => "payment",
        }
    }

    fn base_path<'a>(&self, config: &'a ApiConfig) -> &'a str {
        match self {
            Domain::Catalog => &config.catalog_path,
            Domain::Auth => &config.auth_path,
            Domain::Lease => &config.lease_path,
            Domain::Payment => &config.payment_path,
        }
    }
}

/// A single backend call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    domain: Domain,
    method: Method,
    path: String,
    segments: Vec<String>,
    query: Vec<(String, String)>,
    body: Option<Value>,
    bearer: Option<AuthToken>,
}

impl ApiRequest {
    pub fn get(domain: Domain, path: impl Into<String>) -> Self {
        Self::new(domain, Method::GET, path)
    }

    pub fn post(domain: Domain, path: impl Into<String>) -> Self {
        Self::new(domain, Method::POST, path)
    }

    fn new(domain: Domain, method: Method, path: impl Into<String>) -> Self {
        Self {
            domain,
            method,
            path: path.into(),
            segments: Vec::new(),
            query: Vec::new(),
            body: None,
            bearer: None,
        }
    }

    /// Append one path parameter. It is percent-encoded, so `/`, `?` or
    /// `#` inside it never change the endpoint.
    pub fn segment(mut self, value: impl Into<String>) -> Self {
        self.segments.push(value.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to encode body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Authenticate with `token` instead of the session token.
    pub fn bearer(mut self, token: AuthToken) -> Self {
        self.bearer = Some(token);
        self
    }

    /// Short label used in logs and errors, e.g. `lease/leases`.
    pub fn endpoint(&self) -> String {
        let mut endpoint = format!("{}{}", self.domain.as_str(), self.path);
        for segment in &self.segments {
            endpoint.push('/');
            endpoint.push_str(segment);
        }
        endpoint
    }
}

/// Server acknowledgement without payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub message: Option<String>,
}

pub struct HttpClient {
    client: Client,
    config: ApiConfig,
    session: SessionStore,
}

impl HttpClient {
    pub fn new(config: ApiConfig, session: SessionStore) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            session,
        })
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Resolve the absolute URL of a request.
    pub fn url(&self, request: &ApiRequest) -> Result<Url, ApiError> {
        let raw = format!(
            "{}{}{}",
            self.config.base_url.trim_end_matches('/'),
            request.domain.base_path(&self.config),
            request.path
        );
        let mut url = Url::parse(&raw)
            .map_err(|e| ApiError::InvalidRequest(format!("Invalid URL '{}': {}", raw, e)))?;
        if !request.segments.is_empty() {
            if let Some(bad) = request
                .segments
                .iter()
                .find(|s| matches!(s.trim(), "" | "." | ".."))
            {
                return Err(ApiError::InvalidRequest(format!(
                    "Invalid path parameter '{}'",
                    bad
                )));
            }
            url.path_segments_mut()
                .map_err(|_| ApiError::InvalidRequest(format!("URL '{}' cannot take a path", raw)))?
                .pop_if_empty()
                .extend(request.segments.iter());
        }
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }

    /// Send and decode the `data` payload into `T`.
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let endpoint = request.endpoint();
        let payload = self.execute(request).await?;
        serde_json::from_value(payload).map_err(|e| ApiError::Decode {
            endpoint,
            reason: e.to_string(),
        })
    }

    /// Send a mutation whose only useful answer is an optional message.
    pub async fn send_ack(&self, request: ApiRequest) -> Result<Ack, ApiError> {
        let endpoint = request.endpoint();
        let payload = self.execute(request).await?;
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);
        tracing::debug!(endpoint = %endpoint, "Request acknowledged");
        Ok(Ack { message })
    }

    async fn execute(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let endpoint = request.endpoint();
        let deadline = self.config.request_timeout();

        match timeout(deadline, self.do_execute(request)).await {
            Ok(result) => {
                if let Err(e) = &result {
                    tracing::warn!(
                        endpoint = %endpoint,
                        error_type = e.error_type(),
                        error = %e,
                        "Request failed"
                    );
                }
                result
            }
            Err(_) => {
                tracing::warn!(endpoint = %endpoint, "Request timed out");
                Err(ApiError::Timeout {
                    endpoint,
                    duration: deadline.as_secs(),
                })
            }
        }
    }

    async fn do_execute(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let url = self.url(&request)?;
        let endpoint = request.endpoint();

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .header(ACCEPT, "application/json");

        // Token is read at send time; never attach a placeholder.
        let token = request.bearer.clone().or_else(|| self.session.token());
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            builder = builder.header(AUTHORIZATION, token.bearer());
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        tracing::debug!(method = %request.method, endpoint = %endpoint, "Sending request");

        let response = builder.send().await.map_err(|e| ApiError::Network {
            endpoint: endpoint.clone(),
            source: e,
        })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| ApiError::Network {
            endpoint: endpoint.clone(),
            source: e,
        })?;
        let body: Option<Value> = serde_json::from_slice(&bytes).ok();

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: body.as_ref().and_then(server_message),
            });
        }

        let body = body.ok_or_else(|| ApiError::Decode {
            endpoint: endpoint.clone(),
            reason: "response body is not JSON".to_string(),
        })?;

        if body.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(ApiError::Rejected {
                message: server_message(&body),
            });
        }

        Ok(unwrap_envelope(body))
    }
}

/// `message`, or `error` when it is a plain string.
fn server_message(body: &Value) -> Option<String> {
    ["message", "error"]
        .iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .next()
}

/// Payload lives in `data` when present, otherwise the body itself is it.
fn unwrap_envelope(body: Value) -> Value {
    match body {
        Value::Object(mut map) => match map.remove("data") {
            Some(data) if !data.is_null() => {
                // Keep the envelope message reachable for acks.
                if let (Value::Object(data_map), Some(message)) = (&data, map.get("message")) {
                    if !data_map.contains_key("message") {
                        let mut data_map = data_map.clone();
                        data_map.insert("message".to_string(), message.clone());
                        return Value::Object(data_map);
                    }
                }
                data
            }
            _ => Value::Object(map),
        },
        other => other,
    }
}
