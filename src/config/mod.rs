//! Configuration management.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration for craftlore.
#[derive(Debug, Clone)]
pub struct CraftloreConfig {
    /// Directory holding the index and cache databases.
    pub data_dir: PathBuf,
    /// Chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks, in characters.
    pub chunk_overlap: usize,
    /// Retrieval settings.
    pub retrieval: RetrievalConfig,
    /// Prompt assembly settings.
    pub prompt: PromptConfig,
    /// Response cache settings.
    pub cache: CacheConfig,
    /// Generation backend settings.
    pub llm: LlmConfig,
}

/// Retrieval settings.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Number of nearest chunks to fetch per query.
    pub top_k: usize,
    /// Minimum similarity score for a chunk to be used.
    pub min_score: f32,
    /// Domain hint prepended to queries before embedding.
    pub query_prefix: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            min_score: 0.1,
            query_prefix: String::new(),
        }
    }
}

/// Prompt assembly settings.
#[derive(Debug, Clone)]
pub struct PromptConfig {
    /// Optional external template file; the built-in default is used when
    /// absent.
    pub template_path: Option<PathBuf>,
    /// Character budget for the context portion of the prompt.
    pub max_context_chars: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            template_path: None,
            max_context_chars: 2000,
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Maximum cached entries (0 = unbounded).
    pub max_entries: usize,
}

/// Generation backend settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Backend endpoint override.
    pub endpoint: Option<String>,
    /// Model name override.
    pub model: Option<String>,
    /// Maximum tokens per completion.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Request timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: None,
            max_tokens: 300,
            temperature: 0.3,
            timeout_ms: None,
        }
    }
}

impl Default for CraftloreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".craftlore"),
            chunk_size: crate::ingest::DEFAULT_CHUNK_SIZE,
            chunk_overlap: crate::ingest::DEFAULT_OVERLAP,
            retrieval: RetrievalConfig::default(),
            prompt: PromptConfig::default(),
            cache: CacheConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl CraftloreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the chunk index database.
    #[must_use]
    pub fn index_db_path(&self) -> PathBuf {
        self.data_dir.join("chunks.db")
    }

    /// Path of the response cache database.
    #[must_use]
    pub fn cache_db_path(&self) -> PathBuf {
        self.data_dir.join("qa_cache.db")
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: e.to_string(),
            })?;

        let file: ConfigFile =
            toml::from_str(&contents).map_err(|e| crate::Error::OperationFailed {
                operation: "parse_config_file".to_string(),
                cause: e.to_string(),
            })?;

        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the following paths in order:
    /// 1. Platform-specific config dir (`~/Library/Application Support/craftlore/` on macOS)
    /// 2. XDG config dir (`~/.config/craftlore/` for Unix compatibility)
    ///
    /// Returns default configuration if no config file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let platform_config = base_dirs.config_dir().join("craftlore").join("config.toml");
        if platform_config.exists() {
            if let Ok(config) = Self::load_from_file(&platform_config) {
                return config;
            }
        }

        let xdg_config = base_dirs
            .home_dir()
            .join(".config")
            .join("craftlore")
            .join("config.toml");
        if xdg_config.exists() {
            if let Ok(config) = Self::load_from_file(&xdg_config) {
                return config;
            }
        }

        Self::default()
    }

    /// Converts a `ConfigFile` to `CraftloreConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(data_dir) = file.data_dir {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(chunk_size) = file.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(chunk_overlap) = file.chunk_overlap {
            config.chunk_overlap = chunk_overlap;
        }
        if let Some(retrieval) = file.retrieval {
            if let Some(v) = retrieval.top_k {
                config.retrieval.top_k = v;
            }
            if let Some(v) = retrieval.min_score {
                config.retrieval.min_score = v;
            }
            if let Some(v) = retrieval.query_prefix {
                config.retrieval.query_prefix = v;
            }
        }
        if let Some(prompt) = file.prompt {
            config.prompt.template_path = prompt.template_path.map(PathBuf::from);
            if let Some(v) = prompt.max_context_chars {
                config.prompt.max_context_chars = v;
            }
        }
        if let Some(cache) = file.cache {
            if let Some(v) = cache.max_entries {
                config.cache.max_entries = v;
            }
        }
        if let Some(llm) = file.llm {
            config.llm.endpoint = llm.endpoint;
            config.llm.model = llm.model;
            if let Some(v) = llm.max_tokens {
                config.llm.max_tokens = v;
            }
            if let Some(v) = llm.temperature {
                config.llm.temperature = v;
            }
            config.llm.timeout_ms = llm.timeout_ms;
        }

        config
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Sets the cache capacity (0 = unbounded).
    #[must_use]
    pub const fn with_cache_max_entries(mut self, max_entries: usize) -> Self {
        self.cache.max_entries = max_entries;
        self
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// Chunk size.
    pub chunk_size: Option<usize>,
    /// Chunk overlap.
    pub chunk_overlap: Option<usize>,
    /// Retrieval section.
    pub retrieval: Option<ConfigFileRetrieval>,
    /// Prompt section.
    pub prompt: Option<ConfigFilePrompt>,
    /// Cache section.
    pub cache: Option<ConfigFileCache>,
    /// LLM section.
    pub llm: Option<ConfigFileLlm>,
}

/// Retrieval section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileRetrieval {
    /// Top-k candidates.
    pub top_k: Option<usize>,
    /// Minimum similarity score.
    pub min_score: Option<f32>,
    /// Query prefix.
    pub query_prefix: Option<String>,
}

/// Prompt section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFilePrompt {
    /// External template path.
    pub template_path: Option<String>,
    /// Context character budget.
    pub max_context_chars: Option<usize>,
}

/// Cache section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileCache {
    /// Max entries.
    pub max_entries: Option<usize>,
}

/// LLM section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLlm {
    /// Endpoint URL.
    pub endpoint: Option<String>,
    /// Model name.
    pub model: Option<String>,
    /// Max tokens.
    pub max_tokens: Option<u32>,
    /// Temperature.
    pub temperature: Option<f32>,
    /// Request timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}
