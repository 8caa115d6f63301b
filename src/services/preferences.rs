/// Extension local storage and the preferences derived from it
///
/// The background process and the content side both read settings from a
/// key/value store. Every read falls back to a computed default when the
/// key is absent, so an empty store is always valid.
use crate::{
    error::{AppError, AppResult},
    models::LanguagePreference,
};
use serde_json::{Map, Value};
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use tokio::sync::RwLock;

/// Languages explicitly chosen in the options page (JSON array)
pub const LANGUAGES_KEY: &str = "recommendations__default_languages";
/// Languages stored by older versions (comma-joined string)
pub const LEGACY_LANGUAGES_KEY: &str = "recommendationsLanguages";
/// Whether recommendations are injected into search results
pub const SEARCH_ENABLED_KEY: &str = "searchEnabled";
/// Bearer token for the Tournesol API
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Key/value store backing the extension settings
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> AppResult<()>;
}

/// Reads a string setting, ignoring values of another type
pub async fn get_string(store: &dyn PreferenceStore, key: &str) -> Option<String> {
    match store.get(key).await {
        Ok(Some(Value::String(value))) => Some(value),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(error = %e, key = %key, "Failed to read setting");
            None
        }
    }
}

/// In-memory store, used by tests and as the content-side cache
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: Arc<RwLock<HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let values = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            values: Arc::new(RwLock::new(values)),
        }
    }
}

#[async_trait::async_trait]
impl PreferenceStore for MemoryStore {
    async fn get(&self, key: &str) -> AppResult<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> AppResult<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// Store persisted as a single JSON object on disk
///
/// A missing file reads as an empty store; writes rewrite the whole file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    async fn load(&self) -> AppResult<Map<String, Value>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(Map::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                AppError::Storage(format!("Invalid storage file {}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(AppError::Storage(format!(
                "Failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

#[async_trait::async_trait]
impl PreferenceStore for JsonFileStore {
    async fn get(&self, key: &str) -> AppResult<Option<Value>> {
        let _guard = self.lock.read().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> AppResult<()> {
        let _guard = self.lock.write().await;
        let mut values = self.load().await?;
        values.insert(key.to_string(), value);

        let json = serde_json::to_string_pretty(&values)?;
        tokio::fs::write(&self.path, json).await.map_err(|e| {
            AppError::Storage(format!("Failed to write {}: {}", self.path.display(), e))
        })?;

        tracing::debug!(key = %key, path = %self.path.display(), "Setting persisted");
        Ok(())
    }
}

/// Resolves the languages recommendations are filtered on
///
/// Priority: explicit setting, legacy setting, navigator languages allowed
/// by `supported`, then `en`.
#[derive(Debug, Clone)]
pub struct LanguageResolver {
    navigator: Vec<String>,
    supported: Vec<String>,
}

impl LanguageResolver {
    pub fn new(navigator: Vec<String>, supported: Vec<String>) -> Self {
        Self {
            navigator,
            supported,
        }
    }

    pub async fn resolve(&self, store: &dyn PreferenceStore) -> LanguagePreference {
        if let Some(explicit) = self.explicit(store).await {
            return explicit;
        }

        if let Some(legacy) = get_string(store, LEGACY_LANGUAGES_KEY)
            .await
            .and_then(|value| LanguagePreference::from_comma_separated(&value))
        {
            return legacy;
        }

        self.from_navigator().unwrap_or_default()
    }

    async fn explicit(&self, store: &dyn PreferenceStore) -> Option<LanguagePreference> {
        match store.get(LANGUAGES_KEY).await {
            Ok(Some(Value::Array(values))) => {
                LanguagePreference::from_codes(values.iter().filter_map(Value::as_str))
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read language setting");
                None
            }
        }
    }

    /// Primary subtags of the navigator languages that are supported
    fn from_navigator(&self) -> Option<LanguagePreference> {
        let codes = self.navigator.iter().filter_map(|tag| {
            let primary = tag.split(['-', '_']).next()?.trim().to_lowercase();
            self.supported
                .iter()
                .any(|s| s.eq_ignore_ascii_case(&primary))
                .then_some(primary)
        });

        LanguagePreference::from_codes(codes)
    }
}
