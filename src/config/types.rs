use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub logs: LogsConfig,
    /// Bearer token required on /v1 routes; empty disables auth.
    #[serde(default)]
    pub api_key: String,
    /// Origin used when rewriting media URLs for clients. Falls back to the
    /// request's Host header when unset.
    #[serde(default)]
    pub public_origin: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Wire-level parameters of the Gradio queue protocol. `fn_index` and
/// `trigger_id` select the generation pipeline on the upstream space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_origin")]
    pub origin: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_fn_index")]
    pub fn_index: u32,
    #[serde(default = "default_trigger_id")]
    pub trigger_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_width")]
    pub default_width: u32,
    #[serde(default = "default_height")]
    pub default_height: u32,
    #[serde(default = "default_steps")]
    pub default_steps: u32,
    #[serde(default = "default_batch")]
    pub default_batch: usize,
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    #[serde(default = "default_delay_min")]
    pub delay_min_ms: u64,
    #[serde(default = "default_delay_max")]
    pub delay_max_ms: u64,
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    #[serde(default = "default_model")]
    pub default_model: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            logs: LogsConfig::default(),
            api_key: String::new(),
            public_origin: None,
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            origin: default_upstream_origin(),
            user_agent: default_user_agent(),
            fn_index: default_fn_index(),
            trigger_id: default_trigger_id(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_width: default_width(),
            default_height: default_height(),
            default_steps: default_steps(),
            default_batch: default_batch(),
            max_batch: default_max_batch(),
            delay_min_ms: default_delay_min(),
            delay_max_ms: default_delay_max(),
            models: default_models(),
            default_model: default_model(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_upstream_origin() -> String {
    "https://mrfakename-z-image-turbo.hf.space".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36".to_string()
}

fn default_fn_index() -> u32 {
    1
}

fn default_trigger_id() -> u32 {
    16
}

fn default_width() -> u32 {
    2048
}

fn default_height() -> u32 {
    2048
}

fn default_steps() -> u32 {
    20
}

fn default_batch() -> usize {
    2
}

fn default_max_batch() -> usize {
    2
}

fn default_delay_min() -> u64 {
    1500
}

fn default_delay_max() -> u64 {
    3500
}

fn default_models() -> Vec<String> {
    vec![
        "z-image-turbo-2048".to_string(),
        "z-image-turbo-1024".to_string(),
        "z-image-quality".to_string(),
    ]
}

fn default_model() -> String {
    "z-image-turbo-2048".to_string()
}
