//! Configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge built-in defaults + `config.toml` + `config.<env>.toml`
//! + `APP_*` env vars (`__` separates nested keys, e.g.
//! `APP_RETRIEVAL__ALPHA=0.7`). Provides a helper to expand `~` and `${VAR}` in
//! configured paths.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    /// Load from the current directory and the process environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_in(Path::new("."))
    }

    /// Load `config.toml` and the `RUST_ENV` overlay from `dir`.
    pub fn load_in(dir: &Path) -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(dir.join("config.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment })
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Extract and validate the full typed settings tree.
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to read settings: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub retrieval: RetrievalSettings,
    pub embedding: EmbeddingSettings,
    pub reranker: RerankerSettings,
    pub storage: StorageSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        if !(0.0..=1.0).contains(&r.alpha) {
            return Err(Error::InvalidConfig(format!(
                "retrieval.alpha must be within [0, 1], got {}",
                r.alpha
            )));
        }
        let positive = [
            ("retrieval.candidate_pool", r.candidate_pool),
            ("retrieval.top_k", r.top_k),
            ("retrieval.rerank_concurrency", r.rerank_concurrency),
            ("retrieval.retry.max_attempts", r.retry.max_attempts as usize),
            ("embedding.dimension", self.embedding.dimension),
            ("reranker.max_len", self.reranker.max_len),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{key} must be greater than zero")));
            }
        }
        if r.retry.base_backoff_ms > r.retry.max_backoff_ms {
            return Err(Error::InvalidConfig(
                "retrieval.retry.base_backoff_ms exceeds max_backoff_ms".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Weight of the dense side in the fused score.
    pub alpha: f32,
    /// Fused candidates handed to the reranker; also the per-index search limit.
    pub candidate_pool: usize,
    pub top_k: usize,
    pub rerank_concurrency: usize,
    pub rerank_timeout_ms: u64,
    pub retry: RetrySettings,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            candidate_pool: 50,
            top_k: 6,
            rerank_concurrency: 2,
            rerank_timeout_ms: 2000,
            retry: RetrySettings::default(),
        }
    }
}

impl RetrievalSettings {
    pub fn rerank_timeout(&self) -> Duration {
        Duration::from_millis(self.rerank_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_attempts: 3, base_backoff_ms: 50, max_backoff_ms: 1000 }
    }
}

/// Similarity used by the dense index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Inner product over L2-normalized vectors.
    #[default]
    Cosine,
    Dot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EmbeddingBackend {
    #[default]
    #[serde(rename = "bge-m3")]
    BgeM3,
    #[serde(rename = "hash")]
    Hash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub dimension: usize,
    pub metric: Metric,
    pub backend: EmbeddingBackend,
    pub model_dir: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { dimension: 1024, metric: Metric::Cosine, backend: EmbeddingBackend::BgeM3, model_dir: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RerankerBackend {
    #[default]
    #[serde(rename = "bge-reranker")]
    BgeReranker,
    #[serde(rename = "lexical")]
    Lexical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerSettings {
    pub backend: RerankerBackend,
    pub model_dir: Option<String>,
    pub max_len: usize,
}

impl Default for RerankerSettings {
    fn default() -> Self {
        Self { backend: RerankerBackend::BgeReranker, model_dir: None, max_len: 512 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: Option<String>,
    pub writer_memory_bytes: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self { data_dir: None, writer_memory_bytes: 50_000_000 }
    }
}

impl StorageSettings {
    pub fn data_dir_path(&self) -> Option<PathBuf> {
        self.data_dir.as_deref().map(expand_path)
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}
