//! JSON-over-POST client for the admin and self-service surfaces

use crate::error::{E2eError, E2eResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use wgplane_common::rpc;

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    prefix: &'static str,
    identity: Option<(String, String)>,
}

impl ApiClient {
    /// Administrator surface of a daemon
    pub fn admin(base_url: &str) -> Self {
        Self::new(base_url, rpc::ADMIN_PREFIX, None)
    }

    /// Self-service surface, calling as `email` through `header`
    pub fn user(base_url: &str, header: &str, email: &str) -> Self {
        Self::new(base_url, rpc::API_PREFIX, Some((header.to_string(), email.to_string())))
    }

    /// Self-service surface without an identity header
    pub fn anonymous(base_url: &str) -> Self {
        Self::new(base_url, rpc::API_PREFIX, None)
    }

    fn new(base_url: &str, prefix: &'static str, identity: Option<(String, String)>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            prefix,
            identity,
        }
    }

    pub async fn call<Req, Resp>(&self, operation: &str, request: &Req) -> E2eResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, rpc::path(self.prefix, operation));
        let mut builder = self.http.post(&url).json(request);
        if let Some((header, value)) = &self.identity {
            builder = builder.header(header.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.json().await.unwrap_or(serde_json::Value::Null);
            return Err(E2eError::Status {
                operation: operation.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}
