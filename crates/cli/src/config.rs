//! Configuration loading from helmsman.toml.

use runtime::{
    AgentOptions, BackendAdapter, ConversationEngine, DEFAULT_MAX_TURNS, GeminiAdapter,
    LaunchSpec, McpConnector, OpenAiAdapter, ProviderKind, Readiness,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "helmsman.toml";

const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are an assistant that controls a web browser \
through the provided tools to complete the user's request. Analyse the request carefully and \
call one or more tools in order to reach the goal. Prefer going straight to a relevant website \
over using a search engine. Your first step is almost always 'browser_navigate'. After \
interacting with a page, call 'browser_snapshot' to see its current state before deciding the \
next action. If you hit a page you cannot handle, such as a CAPTCHA, report it and stop instead \
of interacting with it.";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tool_host: ToolHostConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub agent: AgentConfig,
}

/// How to launch and reach the browser tool host.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ToolHostConfig {
    pub command: String,
    pub args: Vec<String>,
    pub url: String,
    pub env: HashMap<String, String>,
    /// Per-request MCP timeout, tool calls included.
    pub request_timeout_secs: u64,
    pub readiness: ReadinessConfig,
}

impl Default for ToolHostConfig {
    fn default() -> Self {
        Self {
            command: "docker".to_string(),
            args: [
                "run",
                "-i",
                "--rm",
                "-p",
                "8931:8931",
                "mcr.microsoft.com/playwright/mcp",
                "--port",
                "8931",
                "--host",
                "0.0.0.0",
            ]
            .map(String::from)
            .to_vec(),
            url: "http://localhost:8931/mcp".to_string(),
            env: HashMap::new(),
            request_timeout_secs: 60,
            readiness: ReadinessConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessMode {
    /// Poll the endpoint until it answers.
    Probe,
    /// Wait a fixed time.
    Delay,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub mode: ReadinessMode,
    pub delay_secs: u64,
    pub probe_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            mode: ReadinessMode::Probe,
            delay_secs: 8,
            probe_interval_ms: 250,
            timeout_secs: 60,
        }
    }
}

/// Reasoning backend configuration.
///
/// Credentials left out here are read from the environment.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub provider: ProviderKind,
    pub model: Option<String>,
    pub api_key: Option<String>,
    /// OpenAI-compatible API root (OpenAI only).
    pub base_url: Option<String>,
    /// Azure resource endpoint.
    pub endpoint: Option<String>,
    pub api_version: Option<String>,
    /// Azure deployment name.
    pub deployment: Option<String>,
    /// Accept several tool calls per response. Defaults to the provider's
    /// behaviour (on).
    pub parallel_tool_calls: Option<bool>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Gemini,
            model: None,
            api_key: None,
            base_url: None,
            endpoint: None,
            api_version: None,
            deployment: None,
            parallel_tool_calls: None,
        }
    }
}

/// Agent behaviour.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub system_instruction: String,
    /// Tool rounds per request; 0 disables the limit.
    pub max_turns: usize,
    pub carry_history: bool,
    pub tool_timeout_secs: Option<u64>,
    pub reasoning_timeout_secs: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            max_turns: DEFAULT_MAX_TURNS,
            carry_history: true,
            tool_timeout_secs: None,
            reasoning_timeout_secs: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Load `path` if it exists, else use the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn launch_spec(&self) -> Result<LaunchSpec, ConfigError> {
        let host = &self.tool_host;
        let mut spec = LaunchSpec::new(&host.command, &host.url).with_args(&host.args);
        spec.env = host.env.clone();
        spec.validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(spec)
    }

    pub fn readiness(&self) -> Readiness {
        let r = &self.tool_host.readiness;
        match r.mode {
            ReadinessMode::Delay => Readiness::Delay(Duration::from_secs(r.delay_secs)),
            ReadinessMode::Probe => Readiness::Probe {
                interval: Duration::from_millis(r.probe_interval_ms.max(1)),
                timeout: Duration::from_secs(r.timeout_secs),
            },
        }
    }

    pub fn connector(&self) -> Result<McpConnector, ConfigError> {
        Ok(McpConnector::new(self.launch_spec()?)
            .readiness(self.readiness())
            .request_timeout(Duration::from_secs(self.tool_host.request_timeout_secs)))
    }

    /// Build the configured adapter, reading missing credentials from the
    /// process environment.
    pub fn backend_adapter(&self) -> Result<BackendAdapter, ConfigError> {
        self.backend_adapter_with(|name| std::env::var(name).ok())
    }

    /// Build the configured adapter with `env` as the environment.
    pub fn backend_adapter_with(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<BackendAdapter, ConfigError> {
        let backend = &self.backend;
        let system = self.agent.system_instruction.clone();
        let batching = backend.parallel_tool_calls.unwrap_or(true);

        let resolve = |value: &Option<String>, setting: &'static str, var: &'static str| {
            value
                .clone()
                .or_else(|| env(var))
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingSetting {
                    provider: backend.provider,
                    setting,
                    env: var,
                })
        };

        let adapter: BackendAdapter = match backend.provider {
            ProviderKind::Gemini => {
                let key = resolve(&backend.api_key, "api_key", "GOOGLE_API_KEY")?;
                let model = backend.model.as_deref().unwrap_or("gemini-2.5-flash");
                let mut builder = GeminiAdapter::builder(key, model)
                    .system(system)
                    .batching(batching);
                if let Some(url) = &backend.base_url {
                    builder = builder.base_url(url);
                }
                builder.build().into()
            }
            ProviderKind::OpenAi => {
                let key = resolve(&backend.api_key, "api_key", "OPENAI_API_KEY")?;
                let model = backend.model.as_deref().unwrap_or("gpt-4-turbo");
                let mut builder = OpenAiAdapter::builder(key, model)
                    .system(system)
                    .batching(batching);
                if let Some(url) = &backend.base_url {
                    builder = builder.base_url(url);
                }
                builder.build().into()
            }
            ProviderKind::Azure => {
                let key = resolve(&backend.api_key, "api_key", "AZURE_OPENAI_KEY")?;
                let endpoint = resolve(&backend.endpoint, "endpoint", "AZURE_OPENAI_ENDPOINT")?;
                let api_version =
                    resolve(&backend.api_version, "api_version", "AZURE_OPENAI_API_VERSION")?;
                let deployment = resolve(
                    &backend.deployment,
                    "deployment",
                    "AZURE_OPENAI_DEPLOYMENT_NAME",
                )?;
                OpenAiAdapter::azure(key, endpoint, deployment, api_version)
                    .system(system)
                    .batching(batching)
                    .build()
                    .into()
            }
        };
        Ok(adapter)
    }

    pub fn agent_options(&self) -> AgentOptions {
        let agent = &self.agent;
        let mut engine = ConversationEngine::new()
            .max_turns((agent.max_turns > 0).then_some(agent.max_turns));
        if let Some(secs) = agent.tool_timeout_secs {
            engine = engine.tool_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = agent.reasoning_timeout_secs {
            engine = engine.reasoning_timeout(Duration::from_secs(secs));
        }

        AgentOptions {
            carry_history: agent.carry_history,
            engine,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("{provider} backend needs `backend.{setting}` or the {env} environment variable")]
    MissingSetting {
        provider: ProviderKind,
        setting: &'static str,
        env: &'static str,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}
