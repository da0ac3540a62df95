//! Boundary with whatever fetches sampling configs from the backend.
//!
//! The transport is the host's concern. This module provides the request
//! body, response parsing, and the rule that a failed fetch never replaces
//! a config that is already installed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::SamplingConfig;
use crate::sampler::ExportSampler;

/// GraphQL document requesting the sampling rules of an organization.
pub const GET_SAMPLING_CONFIG_QUERY: &str = r#"query GetSamplingConfig($organization_verbose_id: String!) {
    sampling(organization_verbose_id: $organization_verbose_id) {
        spans {
            name { regexValue matchValue }
            attributes {
                key { regexValue matchValue }
                attribute { regexValue matchValue }
            }
            events {
                name { regexValue matchValue }
                attributes {
                    key { regexValue matchValue }
                    attribute { regexValue matchValue }
                }
            }
            samplingRatio
        }
        logs {
            message { regexValue matchValue }
            severityText { regexValue matchValue }
            attributes {
                key { regexValue matchValue }
                attribute { regexValue matchValue }
            }
            samplingRatio
        }
    }
}"#;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid sampling config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("graphql errors: {}", join_errors(.0))]
    GraphQl(Vec<GraphQlError>),
    #[error("response carried no sampling config")]
    MissingData,
    #[error("fetching sampling config failed: {0}")]
    Transport(String),
}

fn join_errors(errors: &[GraphQlError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// POST body for the sampling config query.
#[derive(Debug, Clone, Serialize)]
pub struct GraphQlRequest {
    pub query: &'static str,
    pub variables: SamplingVariables,
}

#[derive(Debug, Clone, Serialize)]
pub struct SamplingVariables {
    pub organization_verbose_id: String,
}

impl GraphQlRequest {
    pub fn sampling_config(organization_verbose_id: impl Into<String>) -> Self {
        Self {
            query: GET_SAMPLING_CONFIG_QUERY,
            variables: SamplingVariables {
                organization_verbose_id: organization_verbose_id.into(),
            },
        }
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default)]
    pub path: Vec<serde_json::Value>,
}

impl fmt::Display for GraphQlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if !self.path.is_empty() {
            let path: Vec<String> = self
                .path
                .iter()
                .map(|segment| match segment {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            write!(f, " (at {})", path.join("."))?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<SamplingData>,
    #[serde(default)]
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Deserialize)]
struct SamplingData {
    #[serde(default)]
    sampling: Option<SamplingConfig>,
}

/// Parse a `{ data: { sampling: { spans, logs } } }` response body.
pub fn parse_sampling_response(body: &str) -> Result<SamplingConfig, ConfigError> {
    let response: GraphQlResponse = serde_json::from_str(body)?;
    if let Some(errors) = response.errors.filter(|errors| !errors.is_empty()) {
        return Err(ConfigError::GraphQl(errors));
    }
    response
        .data
        .and_then(|data| data.sampling)
        .ok_or(ConfigError::MissingData)
}

/// Source of sampling configs, typically a backend client.
pub trait ConfigProvider {
    /// Fetch the latest config. `Ok(None)` means nothing new is available.
    fn fetch(&self) -> Result<Option<SamplingConfig>, ConfigError>;
}

/// Install the outcome of a fetch.
///
/// Only a successfully fetched config is installed. Anything else is logged
/// and leaves the current config in place. Returns whether a config was
/// installed.
pub fn apply_fetch<S>(sampler: &S, fetched: Result<Option<SamplingConfig>, ConfigError>) -> bool
where
    S: ExportSampler,
{
    match fetched {
        Ok(Some(config)) => {
            sampler.set_config(Some(config));
            true
        }
        Ok(None) => {
            tracing::debug!("no new sampling config available, keeping current one");
            false
        }
        Err(error) => {
            tracing::debug!(%error, "fetching sampling config failed, keeping current one");
            false
        }
    }
}

/// Fetch from `provider` and install the result into `sampler`.
pub fn refresh<P, S>(provider: &P, sampler: &S) -> bool
where
    P: ConfigProvider + ?Sized,
    S: ExportSampler,
{
    apply_fetch(sampler, provider.fetch())
}
