//! Delegating backend: forwards repository calls to a privileged `wgplaned`
//!
//! Each call is a JSON POST to `<base>/live/v1/<Operation>`. Error classes
//! survive the hop; cancelling the caller's token drops the in-flight request.
//! Firewall management stays with the daemon and is refused here.

use super::{Capabilities, Repository};
use crate::rpc::{self, live};
use crate::types::*;
use crate::{Error, ErrorBody, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone)]
pub struct DelegatingRepository {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl DelegatingRepository {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call<Req, Resp>(&self, cancel: &CancellationToken, operation: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.exchange(operation, request) => result,
        }
    }

    async fn exchange<Req, Resp>(&self, operation: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, rpc::path(rpc::LIVE_PREFIX, operation));
        debug!(%url, "Delegating {}", operation);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(operation, e))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(operation, e))?;

        if status.is_success() {
            return Ok(serde_json::from_slice(&bytes)?);
        }

        match serde_json::from_slice::<ErrorBody>(&bytes) {
            Ok(body) => Err(Error::from_body(operation, body)),
            Err(_) => Err(Error::Rpc {
                operation: operation.to_string(),
                message: format!("{}: {}", status, String::from_utf8_lossy(&bytes).trim()),
            }),
        }
    }

    fn transport_error(&self, operation: &str, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            return Error::Timeout {
                seconds: self.timeout.as_secs(),
            };
        }
        Error::Rpc {
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }
}

fn unsupported(what: &str) -> Error {
    Error::Unsupported(format!("{} is not supported by the delegating backend", what))
}

#[async_trait]
impl Repository for DelegatingRepository {
    fn backend(&self) -> &'static str {
        "delegating"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            firewall: false,
            host: false,
        }
    }

    async fn list_interfaces(&self, cancel: &CancellationToken) -> Result<Vec<LiveInterface>> {
        self.call(cancel, live::LIST_INTERFACES, &rpc::Empty {}).await
    }

    async fn get_interface(&self, cancel: &CancellationToken, interface_id: &str) -> Result<LiveInterface> {
        let request = rpc::InterfaceIdRequest {
            interface_id: interface_id.to_string(),
        };
        self.call(cancel, live::GET_INTERFACE, &request).await
    }

    async fn create_interface(&self, cancel: &CancellationToken, config: &InterfaceConfig) -> Result<LiveInterface> {
        let request = rpc::InterfaceConfigRequest { config: config.clone() };
        self.call(cancel, live::CREATE_INTERFACE, &request).await
    }

    async fn update_interface(&self, cancel: &CancellationToken, config: &InterfaceConfig) -> Result<LiveInterface> {
        let request = rpc::InterfaceConfigRequest { config: config.clone() };
        self.call(cancel, live::UPDATE_INTERFACE, &request).await
    }

    async fn delete_interface(&self, cancel: &CancellationToken, interface_id: &str) -> Result<()> {
        let request = rpc::InterfaceIdRequest {
            interface_id: interface_id.to_string(),
        };
        let _: rpc::Empty = self.call(cancel, live::DELETE_INTERFACE, &request).await?;
        Ok(())
    }

    async fn create_peer(
        &self,
        cancel: &CancellationToken,
        interface_id: &str,
        endpoint: &str,
        allowed_ips: &[String],
    ) -> Result<LivePeer> {
        let request = rpc::CreatePeerRequest {
            interface_id: interface_id.to_string(),
            endpoint: endpoint.to_string(),
            allowed_ips: allowed_ips.to_vec(),
        };
        self.call(cancel, live::CREATE_PEER, &request).await
    }

    async fn update_peer_allowed_ips(
        &self,
        cancel: &CancellationToken,
        interface_id: &str,
        peer_id: &str,
        allowed_ips: &[String],
    ) -> Result<()> {
        let request = rpc::UpdatePeerAllowedIpsRequest {
            interface_id: interface_id.to_string(),
            peer_id: peer_id.to_string(),
            allowed_ips: allowed_ips.to_vec(),
        };
        let _: rpc::Empty = self.call(cancel, live::UPDATE_PEER_ALLOWED_IPS, &request).await?;
        Ok(())
    }

    async fn delete_peer(&self, cancel: &CancellationToken, peer_id: &str) -> Result<()> {
        let request = rpc::PeerIdRequest {
            peer_id: peer_id.to_string(),
        };
        let _: rpc::Empty = self.call(cancel, live::DELETE_PEER, &request).await?;
        Ok(())
    }

    async fn list_peer_stats(&self, cancel: &CancellationToken) -> Result<Vec<PeerStat>> {
        self.call(cancel, live::LIST_PEER_STATS, &rpc::Empty {}).await
    }

    async fn list_firewall_rules(&self, cancel: &CancellationToken) -> Result<String> {
        let response: rpc::FirewallRulesResponse =
            self.call(cancel, live::LIST_FIREWALL_RULES, &rpc::Empty {}).await?;
        Ok(response.rules)
    }

    async fn list_configs(
        &self,
        cancel: &CancellationToken,
        interface_id: Option<&str>,
    ) -> Result<Vec<InterfaceConfigDump>> {
        let request = rpc::OptionalInterfaceRequest {
            interface_id: interface_id.map(str::to_string),
        };
        self.call(cancel, live::LIST_CONFIGS, &request).await
    }

    async fn ensure_firewall_chain(&self, _cancel: &CancellationToken) -> Result<()> {
        Err(unsupported("firewall chain management"))
    }

    async fn sync_peer_firewall_rules(
        &self,
        _cancel: &CancellationToken,
        _interface_id: &str,
        _peer_allowed_ip: &str,
        _allowed_ips: &[String],
    ) -> Result<()> {
        Err(unsupported("firewall rule sync"))
    }

    async fn remove_peer_firewall_rules(&self, _cancel: &CancellationToken, _peer_allowed_ip: &str) -> Result<()> {
        Err(unsupported("firewall rule removal"))
    }
}
