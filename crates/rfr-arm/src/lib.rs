//! ---
//! rfr_section: "04-remote-api"
//! rfr_subsection: "module"
//! rfr_type: "source"
//! rfr_scope: "code"
//! rfr_description: "Azure Resource Manager client for route filter rules."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
//! [`RemoteClient`] over the Azure Resource Manager REST API.
//!
//! Writes return an [`ArmOperation`] that follows the `Azure-AsyncOperation`
//! header, falling back to `Location`. A write answered without either header
//! is already complete.

pub mod wire;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use rfr_common::config::ProviderConfig;
use rfr_core::{
    ClientError, CompletedOperation, FilterKey, OperationHandle, PollStatus, RemoteClient,
    RemoteFilter, RemoteRule, Rule, RuleId, RuleKey,
};
use tracing::{debug, warn};
use url::Url;

use crate::wire::{CloudError, FilterResource, OperationStatus, RuleResource};

pub const ASYNC_OPERATION_HEADER: &str = "azure-asyncoperation";

/// HTTP client for the `Microsoft.Network/routeFilters` resource family.
#[derive(Debug, Clone)]
pub struct ArmClient {
    http: Client,
    base: Url,
    subscription_id: String,
    api_version: String,
    token: Option<String>,
}

impl ArmClient {
    /// Build a client from provider settings, reading the bearer token from `token_env`.
    pub fn from_config(config: &ProviderConfig) -> anyhow::Result<Self> {
        let token = std::env::var(&config.token_env).with_context(|| {
            format!(
                "bearer token environment variable {} is not set",
                config.token_env
            )
        })?;
        Self::new(config, Some(token))
    }

    pub fn new(config: &ProviderConfig, token: Option<String>) -> anyhow::Result<Self> {
        config.validate()?;
        let base = Url::parse(&format!("{}/", config.base_url()))
            .with_context(|| format!("invalid provider endpoint {}", config.endpoint))?;
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            base,
            subscription_id: config.subscription_id.clone(),
            api_version: config.api_version.clone(),
            token,
        })
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    fn filter_url(&self, filter: &FilterKey) -> Result<Url, ClientError> {
        self.resource_url(&RuleId::filter_segments(&self.subscription_id, filter))
    }

    fn rule_url(&self, key: &RuleKey) -> Result<Url, ClientError> {
        self.resource_url(&RuleId::new(self.subscription_id.clone(), key).segments())
    }

    /// Append `segments` to the endpoint, percent-encoding each one.
    fn resource_url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("endpoint {} cannot carry a path", self.base))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        authorize(self.http.request(method, url), self.token.as_deref())
    }

    fn operation(&self, description: String, headers: &HeaderMap) -> Box<dyn OperationHandle> {
        match poll_target(headers) {
            Some((url, kind)) => Box::new(ArmOperation {
                http: self.http.clone(),
                token: self.token.clone(),
                url,
                kind,
            }),
            None => Box::new(CompletedOperation::succeeded(description)),
        }
    }
}

#[async_trait]
impl RemoteClient for ArmClient {
    async fn get_rule(&self, key: &RuleKey) -> Result<Option<RemoteRule>, ClientError> {
        let url = self.rule_url(key)?;
        debug!(%url, "GET route filter rule");
        let response = send(self.request(Method::GET, url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(response).await?;
        let body: RuleResource = response
            .json()
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        Ok(Some(body.into_remote(&key.name)?))
    }

    async fn create_or_update_rule(
        &self,
        key: &RuleKey,
        rule: &Rule,
    ) -> Result<Box<dyn OperationHandle>, ClientError> {
        let url = self.rule_url(key)?;
        debug!(%url, "PUT route filter rule");
        let body = RuleResource::for_put(&key.name, rule);
        let request = self.request(Method::PUT, url.clone()).json(&body);
        let response = check(send(request).await?).await?;
        Ok(self.operation(format!("PUT {url}"), response.headers()))
    }

    async fn delete_rule(&self, key: &RuleKey) -> Result<Box<dyn OperationHandle>, ClientError> {
        let url = self.rule_url(key)?;
        debug!(%url, "DELETE route filter rule");
        let response = send(self.request(Method::DELETE, url.clone())).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(%url, "rule already absent");
            return Ok(Box::new(CompletedOperation::succeeded(format!("DELETE {url}"))));
        }
        let response = check(response).await?;
        Ok(self.operation(format!("DELETE {url}"), response.headers()))
    }

    async fn get_filter(&self, key: &FilterKey) -> Result<Option<RemoteFilter>, ClientError> {
        let mut url = self.filter_url(key)?;
        url.query_pairs_mut().append_pair("$expand", "rules");
        debug!(%url, "GET route filter");
        let response = send(self.request(Method::GET, url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(response).await?;
        let body: FilterResource = response
            .json()
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        Ok(Some(body.into_remote(&key.route_filter)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollKind {
    /// Status document with a `status` field.
    AsyncOperation,
    /// 202 while running, any other success once done.
    Location,
}

/// A long-running ARM operation.
#[derive(Debug)]
pub struct ArmOperation {
    http: Client,
    token: Option<String>,
    url: Url,
    kind: PollKind,
}

#[async_trait]
impl OperationHandle for ArmOperation {
    fn describe(&self) -> String {
        self.url.to_string()
    }

    async fn poll(&self) -> Result<PollStatus, ClientError> {
        let request = authorize(self.http.get(self.url.clone()), self.token.as_deref());
        let response = check(send(request).await?).await?;
        match self.kind {
            PollKind::Location if response.status() == StatusCode::ACCEPTED => {
                Ok(PollStatus::InProgress)
            }
            PollKind::Location => Ok(PollStatus::Succeeded),
            PollKind::AsyncOperation => {
                let status: OperationStatus = response
                    .json()
                    .await
                    .map_err(|err| ClientError::Transport(err.to_string()))?;
                Ok(match status.status.as_str() {
                    "Succeeded" => PollStatus::Succeeded,
                    "Failed" | "Canceled" => PollStatus::Failed(
                        status
                            .error
                            .as_ref()
                            .map(|detail| detail.describe())
                            .unwrap_or_else(|| status.status.clone()),
                    ),
                    _ => PollStatus::InProgress,
                })
            }
        }
    }
}

fn authorize(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
        None => request,
    }
}

fn poll_target(headers: &HeaderMap) -> Option<(Url, PollKind)> {
    let header = |name| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Url::parse(value).ok())
    };
    header(ASYNC_OPERATION_HEADER)
        .map(|url| (url, PollKind::AsyncOperation))
        .or_else(|| header("location").map(|url| (url, PollKind::Location)))
}

async fn send(request: RequestBuilder) -> Result<Response, ClientError> {
    request
        .send()
        .await
        .map_err(|err| ClientError::Transport(err.to_string()))
}

/// Map non-success responses onto the client error taxonomy.
async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<CloudError>(&text)
        .ok()
        .and_then(|body| body.error)
        .map(|detail| detail.describe())
        .unwrap_or_else(|| format!("HTTP {status}: {text}"));
    warn!(%status, %message, "control plane returned an error");
    Err(match status {
        StatusCode::BAD_REQUEST => ClientError::Validation(message),
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => ClientError::Conflict(message),
        status if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
            ClientError::Transport(message)
        }
        _ => ClientError::Unexpected(anyhow!("HTTP {status}: {message}")),
    })
}
