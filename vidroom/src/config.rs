use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use room_stream::{
    DEFAULT_ENTRY, DEFAULT_PLAY_ENDPOINT, DEFAULT_SCRIPT_ENDPOINT, HttpSettings, PREFERRED,
    ReqwestClient, SandboxLimits, ScriptSandbox, SignatureCache, StreamNegotiator,
    http::DEFAULT_USER_AGENT,
};
use serde::{Deserialize, Serialize};

/// The negotiator as wired up by the binary.
pub type Engine = StreamNegotiator<ReqwestClient>;

/**
    Settings loaded from an optional YAML file.

    Every field has a default, so a file only needs the keys it changes.
*/
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub preferred_quality: String,
    pub preferred_circuit: String,
    pub proxy: Option<String>,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub resolve_timeout_secs: u64,
    pub script_endpoint: String,
    pub play_endpoint: String,
    pub sandbox: SandboxConfig,
}

/// Limits for the signing script sandbox.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub memory_limit: usize,
    pub max_stack_size: usize,
    pub cpu_budget_ms: u64,
    pub entry: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preferred_quality: PREFERRED.quality.to_string(),
            preferred_circuit: PREFERRED.circuit.to_string(),
            proxy: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: 15,
            resolve_timeout_secs: 60,
            script_endpoint: DEFAULT_SCRIPT_ENDPOINT.to_string(),
            play_endpoint: DEFAULT_PLAY_ENDPOINT.to_string(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let limits = SandboxLimits::default();
        Self {
            memory_limit: limits.memory_limit,
            max_stack_size: limits.max_stack_size,
            cpu_budget_ms: limits.cpu_budget.as_millis() as u64,
            entry: DEFAULT_ENTRY.to_string(),
        }
    }
}

impl Config {
    /// Load from `path`, or use defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;

        Self::parse(&content).with_context(|| format!("Failed to parse config {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            user_agent: self.user_agent.clone(),
            proxy: self.proxy.clone(),
            timeout: (self.request_timeout_secs > 0)
                .then(|| Duration::from_secs(self.request_timeout_secs)),
        }
    }

    pub fn sandbox_limits(&self) -> SandboxLimits {
        SandboxLimits {
            memory_limit: self.sandbox.memory_limit,
            max_stack_size: self.sandbox.max_stack_size,
            cpu_budget: Duration::from_millis(self.sandbox.cpu_budget_ms),
            entry: self.sandbox.entry.clone(),
        }
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    /**
        Build the HTTP client, signature cache and negotiator.
    */
    pub fn build_engine(&self) -> Result<Arc<Engine>> {
        let http = Arc::new(
            ReqwestClient::new(&self.http_settings()).context("Failed to create HTTP client")?,
        );

        let cache = Arc::new(SignatureCache::with_endpoint(
            Arc::clone(&http),
            ScriptSandbox::new(self.sandbox_limits()),
            self.script_endpoint.clone(),
        ));

        Ok(Arc::new(StreamNegotiator::with_endpoint(
            http,
            cache,
            self.play_endpoint.clone(),
        )))
    }
}
