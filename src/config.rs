use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "toolbridge", about = "OpenAI tool calling in front of a plain chat model")]
pub struct BridgeConfig {
    #[arg(long, env = "TOOLBRIDGE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "TOOLBRIDGE_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Base URL of the upstream OpenAI-compatible server
    #[arg(long, env = "OPENAI_BASE_URL")]
    pub upstream_url: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model name forced on every upstream request
    #[arg(long, env = "TOOLBRIDGE_UPSTREAM_MODEL")]
    pub upstream_model: Option<String>,

    /// Upstream timeout in seconds
    #[arg(long, env = "TOOLBRIDGE_TIMEOUT", default_value_t = 30)]
    pub timeout: u64,

    #[arg(long, env = "TOOLBRIDGE_LOG_LEVEL", default_value = "info")]
    pub log_level: log::LevelFilter,
}

impl BridgeConfig {
    pub fn new(upstream_url: impl Into<String>) -> Self {
        BridgeConfig {
            host: "0.0.0.0".to_string(),
            port: 8000,
            upstream_url: upstream_url.into(),
            api_key: None,
            upstream_model: None,
            timeout: 30,
            log_level: log::LevelFilter::Info,
        }
    }

    /// Checks the values and normalizes the upstream URL.
    pub fn validate(mut self) -> anyhow::Result<Self> {
        let url = self.upstream_url.trim().trim_end_matches('/');
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("Invalid upstream url: {}", self.upstream_url);
        }
        if self.timeout == 0 {
            anyhow::bail!("Timeout must be at least one second");
        }
        self.upstream_url = url.to_string();
        Ok(self)
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.upstream_url)
    }
}
