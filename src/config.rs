use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::snapshot::SnapshotOptions;

const CONFIG_PATH: &str = "sherpa.toml";

/// Known OpenAI-compatible providers for `[provider] name = "..."`. Each
/// base accepts `POST {base}/v1/chat/completions`.
const PROVIDER_BASES: &[(&str, &str)] = &[
    ("openai", "https://api.openai.com"),
    ("groq", "https://api.groq.com/openai"),
    ("ollama", "http://127.0.0.1:11434"),
    ("lmstudio", "http://127.0.0.1:1234"),
];

/// Settings from `sherpa.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub backend: BackendConfig,
    /// Present means "talk to this provider directly" instead of the proxy.
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    /// Overrides the detected OS display name in step prompts.
    #[serde(default)]
    pub os_name: Option<String>,
}

impl Settings {
    /// OS display name to hand the generator.
    pub fn os_name(&self) -> String {
        self.os_name
            .clone()
            .unwrap_or_else(|| detected_os_name().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Proxy base; the four operations live under it.
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

fn default_api_url() -> String {
    "http://127.0.0.1:8000/api".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl ProviderConfig {
    /// An explicit `base_url` wins over the known-provider table.
    pub fn resolved_base_url(&self) -> Option<String> {
        if let Some(url) = &self.base_url {
            return Some(url.trim_end_matches('/').to_string());
        }
        let name = self.name.as_deref()?.to_lowercase();
        PROVIDER_BASES
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, base)| (*base).to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_height_percent")]
    pub height_percent: f64,
    #[serde(default = "default_aspect")]
    pub aspect: f64,
    /// Optional pointer-glyph image; the built-in glyph is used without it.
    #[serde(default)]
    pub cursor_asset: Option<PathBuf>,
}

fn default_height_percent() -> f64 {
    15.0
}

fn default_aspect() -> f64 {
    2.5
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            height_percent: default_height_percent(),
            aspect: default_aspect(),
            cursor_asset: None,
        }
    }
}

impl SnapshotConfig {
    pub fn options(&self) -> SnapshotOptions {
        SnapshotOptions {
            height_percent: self.height_percent,
            aspect: self.aspect,
        }
    }
}

/// Load settings from `path` (default `sherpa.toml` in the working
/// directory), apply environment overrides, and validate.
///
/// A missing file means pure defaults. `SHERPA_API_URL` overrides the proxy
/// base; `SHERPA_API_KEY` overrides the provider key when a provider is
/// configured.
pub fn load(path: Option<&Path>) -> Result<Settings> {
    let path = path.unwrap_or(Path::new(CONFIG_PATH));
    let mut settings: Settings = if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?
    } else {
        Settings::default()
    };

    if let Ok(url) = std::env::var("SHERPA_API_URL")
        && !url.is_empty()
    {
        settings.backend.api_url = url;
    }
    if let Ok(key) = std::env::var("SHERPA_API_KEY")
        && !key.is_empty()
        && let Some(provider) = &mut settings.provider
    {
        provider.api_key = Some(key);
    }

    if let Some(provider) = &settings.provider
        && provider.resolved_base_url().is_none()
    {
        bail!(
            "provider {:?} is not known and no base_url is set",
            provider.name.as_deref().unwrap_or("")
        );
    }
    Ok(settings)
}

/// Display name of the host OS, as the step prompt expects it.
pub fn detected_os_name() -> &'static str {
    match std::env::consts::OS {
        "macos" => "macOS",
        "windows" => "Windows",
        "linux" => "Linux",
        other => other,
    }
}
