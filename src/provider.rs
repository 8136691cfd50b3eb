//! Provider implementations
//!
//! - [`HttpProvider`] speaks the generic JSON REST provisioning protocol
//! - [`DeploymentProvider`] renders `bootstrap_payload` resources locally and
//!   passes every other kind to an inner provider

use crate::config::ProviderConfig;
use crate::provisioners::{self, compute::PAYLOAD_KIND};
use anyhow::{Context, Result};
use declarative::{Address, AttributeMap, Provider, ProviderError, ProviderRecord, ResourceStatus};
use hostboot::{BootstrapInjector, BootstrapParameters};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const USER_AGENT: &str = concat!("tierform/", env!("CARGO_PKG_VERSION"));

/// Body of create and update requests
#[derive(Debug, Serialize)]
struct ResourceRequest<'a> {
    name: &'a str,
    attributes: &'a AttributeMap,
}

/// Error body; providers use either key
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "error")]
    message: String,
}

type Reply = std::result::Result<ureq::http::Response<ureq::Body>, ureq::Error>;

/// Client for the REST provisioning API
///
/// `POST /resources/{kind}`, `GET|PATCH|DELETE /resources/{kind}/{id}`.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    agent: ureq::Agent,
    endpoint: String,
    token: Option<String>,
}

impl HttpProvider {
    pub fn new(endpoint: &str, token: Option<String>, timeout: Duration) -> Self {
        // Status codes are mapped to provider errors below
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Endpoint from config, bearer token from the configured variable
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            anyhow::bail!("provider.endpoint is not set in the deployment config");
        }
        let token = std::env::var(&config.token_env).ok();
        if token.is_none() {
            log::warn!(
                "{} is not set; calling {} without a token",
                config.token_env,
                config.endpoint
            );
        }
        Ok(Self::new(
            &config.endpoint,
            token,
            Duration::from_secs(config.timeout_secs.max(1)),
        ))
    }

    fn url(&self, address: &Address, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/resources/{}/{id}", self.endpoint, address.kind()),
            None => format!("{}/resources/{}", self.endpoint, address.kind()),
        }
    }

    fn authorize<B>(&self, request: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        let request = request
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json");
        match &self.token {
            Some(token) => request.header("Authorization", format!("Bearer {token}")),
            None => request,
        }
    }

    fn record(address: &Address, reply: Reply) -> std::result::Result<ProviderRecord, ProviderError> {
        let mut response = check(address, reply)?;
        response
            .body_mut()
            .read_json::<ProviderRecord>()
            .map_err(|e| ProviderError::Transport(format!("unreadable response for {address}: {e}")))
    }
}

/// Map transport failures and error statuses
fn check(address: &Address, reply: Reply) -> std::result::Result<ureq::http::Response<ureq::Body>, ProviderError> {
    let mut response = reply.map_err(|e| ProviderError::Transport(e.to_string()))?;
    let status = response.status().as_u16();
    if (200..300).contains(&status) {
        return Ok(response);
    }

    let body = response.body_mut().read_to_string().unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.message)
        .unwrap_or_else(|_| body.trim().to_string());
    log::debug!("{address}: HTTP {status}: {message}");

    Err(match status {
        404 => ProviderError::NotFound(address.to_string()),
        400..=499 => ProviderError::Rejected(message),
        _ => ProviderError::Transport(format!("HTTP {status}: {message}")),
    })
}

impl Provider for HttpProvider {
    fn create(
        &self,
        address: &Address,
        attributes: &AttributeMap,
    ) -> std::result::Result<ProviderRecord, ProviderError> {
        let body = ResourceRequest {
            name: address.name(),
            attributes,
        };
        let reply = self
            .authorize(self.agent.post(&self.url(address, None)))
            .send_json(&body);
        Self::record(address, reply)
    }

    fn read(&self, address: &Address, id: &str) -> std::result::Result<ProviderRecord, ProviderError> {
        let reply = self
            .authorize(self.agent.get(&self.url(address, Some(id))))
            .call();
        Self::record(address, reply)
    }

    fn update(
        &self,
        address: &Address,
        id: &str,
        attributes: &AttributeMap,
    ) -> std::result::Result<ProviderRecord, ProviderError> {
        let body = ResourceRequest {
            name: address.name(),
            attributes,
        };
        let reply = self
            .authorize(self.agent.patch(&self.url(address, Some(id))))
            .send_json(&body);
        Self::record(address, reply)
    }

    fn delete(&self, address: &Address, id: &str) -> std::result::Result<(), ProviderError> {
        let reply = self
            .authorize(self.agent.delete(&self.url(address, Some(id))))
            .call();
        check(address, reply).map(|_| ())
    }

    fn supports_in_place(&self, kind: &str, field: &str) -> bool {
        provisioners::supports_in_place(kind, field)
    }
}

/// Renders payload resources in-process, delegates the rest
#[derive(Debug)]
pub struct DeploymentProvider<P> {
    inner: P,
    injector: BootstrapInjector,
}

impl<P: Provider> DeploymentProvider<P> {
    pub fn new(inner: P, injector: BootstrapInjector) -> Self {
        Self { inner, injector }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn render(
        &self,
        address: &Address,
        id: Option<&str>,
        attributes: &AttributeMap,
    ) -> std::result::Result<ProviderRecord, ProviderError> {
        let params: BootstrapParameters = serde_json::from_value(Value::Object(attributes.clone()))
            .map_err(|e| ProviderError::Rejected(format!("invalid bootstrap parameters: {e}")))?;
        let payload = self
            .injector
            .render(&params)
            .map_err(|e| ProviderError::Rejected(e.to_string()))?;

        let id = id.map_or_else(
            || format!("{}-{}", address.name(), payload.digest.chars().take(12).collect::<String>()),
            ToString::to_string,
        );
        let mut outputs = attributes.clone();
        outputs.insert("id".to_string(), Value::String(id.clone()));
        outputs.insert("digest".to_string(), Value::String(payload.digest));
        outputs.insert("rendered".to_string(), Value::String(payload.rendered));

        Ok(ProviderRecord {
            id,
            status: ResourceStatus::Ready,
            attributes: outputs,
            message: None,
        })
    }
}

impl<P: Provider> Provider for DeploymentProvider<P> {
    fn create(
        &self,
        address: &Address,
        attributes: &AttributeMap,
    ) -> std::result::Result<ProviderRecord, ProviderError> {
        if address.kind() == PAYLOAD_KIND {
            return self.render(address, None, attributes);
        }
        self.inner.create(address, attributes)
    }

    fn read(&self, address: &Address, id: &str) -> std::result::Result<ProviderRecord, ProviderError> {
        if address.kind() == PAYLOAD_KIND {
            // Rendered payloads are ready on creation and never polled
            return Err(ProviderError::NotFound(format!("{address} is rendered locally")));
        }
        self.inner.read(address, id)
    }

    fn update(
        &self,
        address: &Address,
        id: &str,
        attributes: &AttributeMap,
    ) -> std::result::Result<ProviderRecord, ProviderError> {
        if address.kind() == PAYLOAD_KIND {
            return self.render(address, Some(id), attributes);
        }
        self.inner.update(address, id, attributes)
    }

    fn delete(&self, address: &Address, id: &str) -> std::result::Result<(), ProviderError> {
        if address.kind() == PAYLOAD_KIND {
            log::debug!("Discarding rendered payload {address}");
            return Ok(());
        }
        self.inner.delete(address, id)
    }

    fn supports_in_place(&self, kind: &str, field: &str) -> bool {
        provisioners::supports_in_place(kind, field)
    }
}

/// Build the provider for a deployment config
pub fn connect(config: &crate::config::DeploymentConfig) -> Result<DeploymentProvider<HttpProvider>> {
    let injector = BootstrapInjector::new().with_agent_path(&config.compute.agent_path);
    Ok(DeploymentProvider::new(http_client(&config.provider)?, injector))
}

/// Build the provider for teardown, which never renders payloads
pub fn connect_teardown(
    config: &crate::config::TeardownConfig,
) -> Result<DeploymentProvider<HttpProvider>> {
    Ok(DeploymentProvider::new(
        http_client(&config.provider)?,
        BootstrapInjector::new(),
    ))
}

fn http_client(config: &ProviderConfig) -> Result<HttpProvider> {
    HttpProvider::from_config(config).context("Could not configure the provisioning API client")
}
