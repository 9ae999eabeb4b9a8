use async_trait::async_trait;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info};

use super::accessor::{NodeAccessor, ProvisionTransport};
use super::errors::{service_message, BaremetalError};
use super::retry::RetryHandler;
use super::types::{
    ApiVersion, InitialProvisionState, Node, NodePage, NodeQuery, NodeSpec, PatchOperation,
    TargetPowerState, TransitionRequest,
};
use crate::config::BaremetalConfig;
use crate::http::RateLimitedHttpClient;
use crate::observability::baremetal_metrics;

/// REST client for the bare metal node API
#[derive(Debug, Clone)]
pub struct BaremetalClient {
    http: RateLimitedHttpClient,
    api_version: ApiVersion,
    retry: RetryHandler,
}

impl BaremetalClient {
    pub fn new(config: &BaremetalConfig) -> Result<Self, BaremetalError> {
        let http = RateLimitedHttpClient::new(&config.endpoint, &config.rate_limit)?;
        Ok(Self::from_parts(
            http,
            config.endpoint.api_version()?,
            RetryHandler::new(config.retry.clone()),
        ))
    }

    pub fn from_parts(http: RateLimitedHttpClient, api_version: ApiVersion, retry: RetryHandler) -> Self {
        Self {
            http,
            api_version,
            retry,
        }
    }

    pub fn api_version(&self) -> ApiVersion {
        self.api_version
    }

    fn negotiate(&self, minimum: ApiVersion) -> ApiVersion {
        self.api_version.max(minimum)
    }

    async fn fetch_node(&self, ident: &str) -> Result<Node, BaremetalError> {
        let url = self.http.url(&["v1", "nodes", ident])?;
        let response = self
            .http
            .send(self.http.request(Method::GET, url, self.api_version))
            .await?;
        json_body(check_node_response(response, ident).await?).await
    }

    async fn fetch_page(&self, query: &NodeQuery, marker: Option<&str>) -> Result<NodePage, BaremetalError> {
        let segments: &[&str] = if query.details {
            &["v1", "nodes", "detail"]
        } else {
            &["v1", "nodes"]
        };
        let url = self.http.url(segments)?;
        let mut request = self
            .http
            .request(Method::GET, url, self.api_version)
            .query(&query.to_query_pairs());
        if let Some(marker) = marker {
            request = request.query(&[("marker", marker)]);
        }
        let response = self.http.send(request).await?;
        json_body(check_response(response).await?).await
    }

    async fn send_delete(&self, ident: &str) -> Result<(), BaremetalError> {
        let url = self.http.url(&["v1", "nodes", ident])?;
        let response = self
            .http
            .send(self.http.request(Method::DELETE, url, self.api_version))
            .await?;
        check_node_response(response, ident).await?;
        Ok(())
    }

    async fn send_patch(&self, ident: &str, patch: &[PatchOperation]) -> Result<Node, BaremetalError> {
        let url = self.http.url(&["v1", "nodes", ident])?;
        let request = self
            .http
            .request(Method::PATCH, url, self.api_version)
            .json(patch);
        let response = self.http.send(request).await?;
        json_body(check_node_response(response, ident).await?).await
    }

    async fn send_maintenance(&self, ident: &str, reason: Option<&str>) -> Result<(), BaremetalError> {
        let url = self.http.url(&["v1", "nodes", ident, "maintenance"])?;
        let request = match reason {
            Some(reason) => self
                .http
                .request(Method::PUT, url, self.api_version)
                .json(&json!({ "reason": reason })),
            None => self.http.request(Method::DELETE, url, self.api_version),
        };
        let response = self.http.send(request).await?;
        check_node_response(response, ident).await?;
        Ok(())
    }

    async fn send_provision(&self, ident: &str, request: &TransitionRequest) -> Result<(), BaremetalError> {
        let url = self.http.url(&["v1", "nodes", ident, "states", "provision"])?;
        let version = self.negotiate(request.target.min_api_version());
        let response = self
            .http
            .send(self.http.request(Method::PUT, url, version).json(request))
            .await?;
        check_state_response(response, ident).await
    }

    async fn send_power(&self, ident: &str, target: TargetPowerState) -> Result<(), BaremetalError> {
        let url = self.http.url(&["v1", "nodes", ident, "states", "power"])?;
        let version = self.negotiate(target.min_api_version());
        let response = self
            .http
            .send(
                self.http
                    .request(Method::PUT, url, version)
                    .json(&json!({ "target": target })),
            )
            .await?;
        check_state_response(response, ident).await
    }
}

async fn json_body<T: DeserializeOwned>(response: Response) -> Result<T, BaremetalError> {
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| BaremetalError::InvalidResponse(e.to_string()))
}

async fn api_error(response: Response) -> BaremetalError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    baremetal_metrics().record_error();
    BaremetalError::Api {
        status,
        message: service_message(&body),
    }
}

async fn check_response(response: Response) -> Result<Response, BaremetalError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(api_error(response).await)
    }
}

async fn check_node_response(response: Response, ident: &str) -> Result<Response, BaremetalError> {
    if response.status() == StatusCode::NOT_FOUND {
        baremetal_metrics().record_not_found();
        return Err(BaremetalError::node_not_found(ident));
    }
    check_response(response).await
}

/// State change requests report invalid transitions as 400; a locked node (409)
/// stays an API error here so that it is retried, see [`still_locked`].
async fn check_state_response(response: Response, ident: &str) -> Result<(), BaremetalError> {
    if response.status() == StatusCode::BAD_REQUEST {
        let body = response.text().await.unwrap_or_default();
        return Err(BaremetalError::Transition {
            node: ident.to_string(),
            state: None,
            message: service_message(&body),
        });
    }
    check_node_response(response, ident).await?;
    Ok(())
}

/// A node still locked once retries are exhausted could not change state.
fn still_locked(ident: &str, err: BaremetalError) -> BaremetalError {
    match err {
        BaremetalError::Api { status: 409, message } => BaremetalError::Transition {
            node: ident.to_string(),
            state: None,
            message,
        },
        other => other,
    }
}

#[async_trait]
impl NodeAccessor for BaremetalClient {
    async fn create(&self, spec: &NodeSpec) -> Result<Node, BaremetalError> {
        // Nodes created with 1.10 or older start in available; 1.11 and newer
        // start in enroll. Resource classes need a newer version, so such
        // nodes always start in enroll.
        let version = match spec.initial_state() {
            InitialProvisionState::Available if spec.resource_class.is_none() => {
                ApiVersion::LEGACY_AVAILABLE
            }
            _ => self.api_version.max(ApiVersion::new(1, 11)),
        };
        let url = self.http.url(&["v1", "nodes"])?;
        let response = self
            .http
            .send(self.http.request(Method::POST, url, version).json(spec))
            .await?;
        let node: Node = json_body(check_response(response).await?).await?;
        info!(node = %node.id, provision_state = %node.provision_state, "Created bare metal node");
        Ok(node)
    }

    async fn get(&self, ident: &str) -> Result<Node, BaremetalError> {
        self.retry
            .execute_with_retry("get_node", move || self.fetch_node(ident))
            .await
    }

    async fn delete(&self, ident: &str, ignore_missing: bool) -> Result<(), BaremetalError> {
        match self
            .retry
            .execute_with_retry("delete_node", move || self.send_delete(ident))
            .await
        {
            Ok(()) => {
                info!(node = %ident, "Deleted bare metal node");
                Ok(())
            }
            Err(err) if ignore_missing && err.is_not_found() => {
                debug!(node = %ident, "Node already gone, ignoring");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn list(&self, query: &NodeQuery) -> Result<Vec<Node>, BaremetalError> {
        let mut nodes = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = self
                .retry
                .execute_with_retry("list_nodes", || self.fetch_page(query, marker.as_deref()))
                .await?;
            let has_next = page.next.is_some() && !page.nodes.is_empty();
            marker = page.nodes.last().map(|node| node.id.clone());
            nodes.extend(page.nodes);
            if !has_next {
                break;
            }
        }
        debug!(count = nodes.len(), "Listed bare metal nodes");
        Ok(nodes)
    }

    async fn update(&self, ident: &str, patch: Vec<PatchOperation>) -> Result<Node, BaremetalError> {
        let patch = patch.as_slice();
        self.retry
            .execute_with_retry("update_node", move || self.send_patch(ident, patch))
            .await
    }

    async fn set_maintenance(&self, ident: &str, reason: Option<String>) -> Result<(), BaremetalError> {
        // The service requires a body for PUT, an empty reason is fine
        let reason = reason.unwrap_or_default();
        let reason = reason.as_str();
        self.retry
            .execute_with_retry("set_maintenance", move || {
                self.send_maintenance(ident, Some(reason))
            })
            .await
    }

    async fn unset_maintenance(&self, ident: &str) -> Result<(), BaremetalError> {
        self.retry
            .execute_with_retry("unset_maintenance", move || self.send_maintenance(ident, None))
            .await
    }
}

#[async_trait]
impl ProvisionTransport for BaremetalClient {
    async fn request_transition(&self, ident: &str, request: &TransitionRequest) -> Result<(), BaremetalError> {
        request.validate()?;
        self.retry
            .execute_with_retry("set_provision_state", move || self.send_provision(ident, request))
            .await
            .map_err(|err| still_locked(ident, err))?;
        baremetal_metrics().record_transition();
        Ok(())
    }

    async fn request_power_state(&self, ident: &str, target: TargetPowerState) -> Result<(), BaremetalError> {
        self.retry
            .execute_with_retry("set_power_state", move || self.send_power(ident, target))
            .await
            .map_err(|err| still_locked(ident, err))
    }

    async fn refresh(&self, ident: &str) -> Result<Node, BaremetalError> {
        self.get(ident).await
    }
}
