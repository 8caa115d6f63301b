use serde::Deserialize;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Tournesol API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Poll whose recommendations are requested
    #[serde(default = "default_poll_name")]
    pub poll_name: String,

    /// JSON file backing the extension's local storage
    #[serde(default = "default_storage_path")]
    pub storage_path: String,

    /// Languages reported by the browser, most preferred first (e.g. "fr-FR,en")
    #[serde(default = "default_navigator_languages")]
    pub navigator_languages: Vec<String>,

    /// Languages the recommendations can be filtered on
    #[serde(default = "default_supported_languages")]
    pub supported_languages: Vec<String>,

    /// Delay between two anchor lookups, in milliseconds
    #[serde(default = "default_anchor_poll_interval_ms")]
    pub anchor_poll_interval_ms: u64,

    /// Number of anchor lookups before the controller gives up
    #[serde(default = "default_anchor_max_polls")]
    pub anchor_max_polls: u32,

    /// Items per row of the overlay (primary items)
    #[serde(default = "default_videos_per_row")]
    pub videos_per_row: usize,

    /// Rows displayed once the overlay is expanded
    #[serde(default = "default_rows_when_expanded")]
    pub rows_when_expanded: usize,
}

fn default_api_url() -> String {
    "https://api.tournesol.app".to_string()
}

fn default_poll_name() -> String {
    "videos".to_string()
}

fn default_storage_path() -> String {
    ".tournesol-extension.json".to_string()
}

fn default_navigator_languages() -> Vec<String> {
    vec!["en-US".to_string(), "en".to_string()]
}

fn default_supported_languages() -> Vec<String> {
    ["ar", "de", "en", "es", "fr", "it", "ja", "nl", "pl", "pt", "ru", "tr", "uk", "zh"]
        .iter()
        .map(|lang| lang.to_string())
        .collect()
}

fn default_anchor_poll_interval_ms() -> u64 {
    300
}

fn default_anchor_max_polls() -> u32 {
    200
}

fn default_videos_per_row() -> usize {
    4
}

fn default_rows_when_expanded() -> usize {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            poll_name: default_poll_name(),
            storage_path: default_storage_path(),
            navigator_languages: default_navigator_languages(),
            supported_languages: default_supported_languages(),
            anchor_poll_interval_ms: default_anchor_poll_interval_ms(),
            anchor_max_polls: default_anchor_max_polls(),
            videos_per_row: default_videos_per_row(),
            rows_when_expanded: default_rows_when_expanded(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    pub fn anchor_poll_interval(&self) -> Duration {
        Duration::from_millis(self.anchor_poll_interval_ms)
    }

    /// Number of additional items fetched for the expanded overlay
    pub fn additional_videos(&self) -> usize {
        self.videos_per_row * self.rows_when_expanded.saturating_sub(1)
    }
}
