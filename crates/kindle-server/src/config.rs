//! Command-line and environment configuration.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use kindle_engine::ModelSpec;
use kindle_sampling::{SamplingConfig, SamplingParams, SamplingResult};

use crate::lifecycle::LifecycleSettings;
use crate::state::ServerConfig;

pub const DEFAULT_MODEL_PATH: &str = "/models_dir/language_model/GRPO-Vi-Qwen2-7B-RAG-W4A16";

/// Which engine implementation backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Scripted in-process engine that echoes prompts.
    Mock,
    /// OpenAI-compatible completions server.
    Remote,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "kindle-server", version, about = "Streaming answers from a lazily started LLM engine")]
pub struct Cli {
    #[arg(long, env = "KINDLE_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    #[arg(long, env = "KINDLE_PORT", default_value_t = 8000)]
    pub port: u16,

    #[arg(long, env = "KINDLE_BACKEND", value_enum, default_value_t = Backend::Remote)]
    pub backend: Backend,

    /// Base URL of the engine server (remote backend).
    #[arg(long, env = "KINDLE_ENGINE_URL", default_value = "http://127.0.0.1:8001")]
    pub engine_url: String,

    #[arg(long, env = "KINDLE_MODEL_PATH", default_value = DEFAULT_MODEL_PATH)]
    pub model_path: String,

    /// Name reported by health probes. Defaults to the last segment of the model path.
    #[arg(long, env = "KINDLE_MODEL_NAME")]
    pub model_name: Option<String>,

    #[arg(long, env = "KINDLE_SERVICE_NAME", default_value = "vllm")]
    pub service_name: String,

    #[arg(long, env = "KINDLE_APP_NAME", default_value = "AI Chatbot API")]
    pub app_name: String,

    #[arg(long, env = "KINDLE_WARMUP_PROMPT", default_value = "hello")]
    pub warmup_prompt: String,

    #[arg(long, env = "KINDLE_INIT_TIMEOUT_SECS", default_value_t = 600)]
    pub init_timeout_secs: u64,

    /// Upper bound on one generation against the remote engine.
    #[arg(long, env = "KINDLE_REQUEST_TIMEOUT_SECS", default_value_t = 300)]
    pub request_timeout_secs: u64,

    #[arg(long, env = "KINDLE_MAX_CONCURRENT", default_value_t = 64)]
    pub max_concurrent: usize,

    /// Build the engine at startup instead of on the first request.
    #[arg(long, env = "KINDLE_PRELOAD")]
    pub preload: bool,

    #[arg(long, env = "KINDLE_PERMISSIVE_CORS")]
    pub permissive_cors: bool,

    /// Default log filter; RUST_LOG takes precedence.
    #[arg(long, env = "KINDLE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "KINDLE_MAX_TOKENS", default_value_t = 1024)]
    pub max_tokens: u32,

    #[arg(long, env = "KINDLE_TEMPERATURE", default_value_t = 0.5)]
    pub temperature: f32,

    #[arg(long, env = "KINDLE_TOP_P", default_value_t = 0.85)]
    pub top_p: f32,

    #[arg(long, env = "KINDLE_TOP_K", default_value_t = 25)]
    pub top_k: u32,

    #[arg(long, env = "KINDLE_REPETITION_PENALTY", default_value_t = 1.1)]
    pub repetition_penalty: f32,
}

impl Cli {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn model_spec(&self) -> ModelSpec {
        ModelSpec::new(&self.model_path)
    }

    /// The conversation preset with command-line overrides applied.
    pub fn conversation_sampling(&self) -> SamplingResult<SamplingConfig> {
        SamplingConfig::conversation()
            .params()
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature)
            .with_top_p(self.top_p)
            .with_top_k(self.top_k)
            .with_repetition_penalty(self.repetition_penalty)
            .validate()
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings::new(self.model_spec())
            .with_warmup_prompt(&self.warmup_prompt)
            .with_init_timeout(Duration::from_secs(self.init_timeout_secs))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn server_config(&self) -> ServerConfig {
        let model_name = self
            .model_name
            .clone()
            .unwrap_or_else(|| self.model_spec().display_name().to_string());
        ServerConfig {
            app_name: self.app_name.clone(),
            service_name: self.service_name.clone(),
            model_name,
            permissive_cors: self.permissive_cors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["kindle-server"]);
        assert_eq!(cli.addr().to_string(), "0.0.0.0:8000");
        assert_eq!(cli.backend, Backend::Remote);
        assert!(!cli.preload);
        assert_eq!(cli.conversation_sampling().unwrap(), SamplingConfig::conversation());

        let config = cli.server_config();
        assert_eq!(config.model_name, "GRPO-Vi-Qwen2-7B-RAG-W4A16");
        assert_eq!(config.service_name, "vllm");
        assert_eq!(cli.lifecycle_settings().warmup_prompt, "hello");
    }

    #[test]
    fn overrides() {
        let cli = Cli::parse_from([
            "kindle-server",
            "--backend",
            "mock",
            "--port",
            "9000",
            "--model-name",
            "qwen",
            "--top-k",
            "0",
        ]);
        assert_eq!(cli.backend, Backend::Mock);
        assert_eq!(cli.port, 9000);
        assert_eq!(cli.server_config().model_name, "qwen");
        assert_eq!(cli.conversation_sampling().unwrap().top_k(), 0);
    }

    #[test]
    fn invalid_sampling_override_is_rejected() {
        let cli = Cli::parse_from(["kindle-server", "--top-p", "1.5"]);
        assert!(cli.conversation_sampling().is_err());
    }
}
