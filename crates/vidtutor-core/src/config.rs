use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use vidtutor_provider::{ProviderConfig, ProviderType};
use vidtutor_youtube::{THUMBNAIL_BASE, TIMEDTEXT_BASE, YOUTUBE_API_BASE};

pub const CONFIG_FILE: &str = "vidtutor.yaml";

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    500
}

fn default_max_history() -> usize {
    20
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// Model used to label admitted frames. Falls back to `chat_model`.
    #[serde(default)]
    pub vision_model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Attach image frame references as image input instead of text.
    #[serde(default = "default_true")]
    pub vision_enabled: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            chat_model: default_chat_model(),
            vision_model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_history: default_max_history(),
            vision_enabled: true,
        }
    }
}

impl LlmConfig {
    pub fn vision_model(&self) -> &str {
        self.vision_model.as_deref().unwrap_or(&self.chat_model)
    }
}

fn default_youtube_api_base() -> String {
    YOUTUBE_API_BASE.to_string()
}

fn default_timedtext_base() -> String {
    TIMEDTEXT_BASE.to_string()
}

fn default_thumbnail_base() -> String {
    THUMBNAIL_BASE.to_string()
}

fn default_transcript_lang() -> String {
    "en".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YouTubeConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_youtube_api_base")]
    pub api_base: String,
    #[serde(default = "default_timedtext_base")]
    pub timedtext_base: String,
    #[serde(default = "default_thumbnail_base")]
    pub thumbnail_base: String,
    #[serde(default = "default_transcript_lang")]
    pub transcript_lang: String,
    /// `None` keeps every transcript for the process lifetime.
    #[serde(default)]
    pub transcript_cache_capacity: Option<usize>,
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_youtube_api_base(),
            timedtext_base: default_timedtext_base(),
            thumbnail_base: default_thumbnail_base(),
            transcript_lang: default_transcript_lang(),
            transcript_cache_capacity: None,
        }
    }
}

impl YouTubeConfig {
    pub fn key_configured(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    #[default]
    Vision,
    None,
}

fn default_min_interval_ms() -> u64 {
    1000
}

fn default_similarity_threshold() -> f32 {
    0.85
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameGateConfig {
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Frames are admitted only while `|similarity|` stays below this.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default)]
    pub classifier: ClassifierKind,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for FrameGateConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            similarity_threshold: default_similarity_threshold(),
            classifier: ClassifierKind::default(),
            top_k: default_top_k(),
        }
    }
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_time_channel_capacity() -> usize {
    32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_time_channel_capacity")]
    pub time_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            time_channel_capacity: default_time_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VidtutorConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub youtube: YouTubeConfig,
    #[serde(default)]
    pub frame_gate: FrameGateConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join("config").join(CONFIG_FILE)
}

pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

/// Loads `<root>/config/vidtutor.yaml` when present, otherwise defaults,
/// then applies environment overrides and validates.
pub fn load_config(root: &Path) -> Result<VidtutorConfig> {
    let path = config_path(root);
    let mut config = if path.exists() {
        read_yaml_file(&path)?
    } else {
        VidtutorConfig::default()
    };

    resolve_config_env(&mut config);
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config)?;
    Ok(config)
}

/// `OPENAI_API_KEY` (or `NEXT_PUBLIC_OPENAI_API_KEY`), `YOUTUBE_API_KEY`
/// and `VIDTUTOR_BIND` take precedence over file values.
pub fn apply_env_overrides<F>(config: &mut VidtutorConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(key) =
        non_empty("OPENAI_API_KEY").or_else(|| non_empty("NEXT_PUBLIC_OPENAI_API_KEY"))
    {
        config.llm.provider.api_key = Some(key);
    }
    if let Some(key) = non_empty("YOUTUBE_API_KEY") {
        config.youtube.api_key = Some(key);
    }
    if let Some(bind) = non_empty("VIDTUTOR_BIND") {
        config.server.bind = bind;
    }
}

pub fn validate_config(config: &VidtutorConfig) -> Result<()> {
    let threshold = config.frame_gate.similarity_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(anyhow!(
            "frame_gate.similarity_threshold must be in (0, 1]: {threshold}"
        ));
    }
    if config.frame_gate.top_k == 0 {
        return Err(anyhow!("frame_gate.top_k must be at least 1"));
    }
    if config.llm.chat_model.trim().is_empty() {
        return Err(anyhow!("llm.chat_model must not be empty"));
    }
    if config.llm.max_history == 0 {
        return Err(anyhow!("llm.max_history must be at least 1"));
    }
    if config.llm.max_tokens == 0 {
        return Err(anyhow!("llm.max_tokens must be at least 1"));
    }
    if config.sessions.time_channel_capacity == 0 {
        return Err(anyhow!("sessions.time_channel_capacity must be at least 1"));
    }
    if config.youtube.transcript_cache_capacity == Some(0) {
        return Err(anyhow!("youtube.transcript_cache_capacity must be at least 1"));
    }
    if config.server.bind.parse::<std::net::SocketAddr>().is_err() {
        return Err(anyhow!("server.bind is not a socket address: {}", config.server.bind));
    }
    Ok(())
}

/// Startup diagnostics for missing credentials. Not fatal: requests that
/// need the key fail on their own.
pub fn missing_credentials(config: &VidtutorConfig) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if config.llm.provider.provider_type == ProviderType::OpenAI
        && !config.llm.provider.key_configured()
    {
        missing.push("OPENAI_API_KEY");
    }
    if !config.youtube.key_configured() {
        missing.push("YOUTUBE_API_KEY");
    }
    missing
}

fn read_yaml_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))
}

fn resolve_config_env(config: &mut VidtutorConfig) {
    config.server.bind = resolve_env_var(&config.server.bind);

    let provider = &mut config.llm.provider;
    if let Some(key) = &mut provider.api_key {
        *key = resolve_env_var(key);
    }
    if let Some(url) = &mut provider.base_url {
        *url = resolve_env_var(url);
    }
    config.llm.chat_model = resolve_env_var(&config.llm.chat_model);
    if let Some(model) = &mut config.llm.vision_model {
        *model = resolve_env_var(model);
    }

    let youtube = &mut config.youtube;
    if let Some(key) = &mut youtube.api_key {
        *key = resolve_env_var(key);
    }
    youtube.api_base = resolve_env_var(&youtube.api_base);
    youtube.timedtext_base = resolve_env_var(&youtube.timedtext_base);
    youtube.thumbnail_base = resolve_env_var(&youtube.thumbnail_base);
    youtube.transcript_lang = resolve_env_var(&youtube.transcript_lang);
}
