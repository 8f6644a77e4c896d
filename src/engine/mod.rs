//! The answer engine.
//!
//! Owns the chunk index, response cache, retriever, prompt assembler, and
//! generation client as one explicitly constructed object with explicit
//! lifecycle. Call sites receive the engine, never module-level
//! singletons. Encapsulates the full query flow:
//!
//! cache lookup → (hit: stored answer) → (miss: retrieve → assemble →
//! generate → store → return)

use crate::config::CraftloreConfig;
use crate::embedding::{Embedder, FastEmbedEmbedder};
use crate::ingest::{IngestReport, chunk_documents};
use crate::llm::{GenerationClient, GenerationRequest};
use crate::models::{CacheEntry, CacheStats, Document, IndexMetadata, SourceRef};
use crate::prompt::PromptAssembler;
use crate::retrieval::Retriever;
use crate::storage::{SqliteChunkIndex, SqliteResponseCache};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::instrument;

/// Answer returned when retrieval finds nothing above the score threshold.
///
/// This is a valid outcome, not an error, and it is never cached: a later
/// index rebuild should get a fresh chance at the question.
pub const NO_INFO_ANSWER: &str =
    "I couldn't find any relevant information in my knowledge base.";

/// The result of one query.
#[derive(Debug, Clone)]
pub struct AnswerResponse {
    /// The generated (or cached) answer text.
    pub answer_text: String,
    /// Source citations in retrieval rank order.
    pub sources: Vec<SourceRef>,
    /// Whether the answer came from the response cache.
    pub from_cache: bool,
}

impl AnswerResponse {
    /// Renders the answer as chat markdown with a sources footer.
    #[must_use]
    pub fn to_chat_markdown(&self) -> String {
        let mut message = self.answer_text.clone();
        if !self.sources.is_empty() {
            message.push_str("\n\n**Sources:**\n");
            for source in &self.sources {
                message.push_str(&format!("• [{}]({})\n", source.title, source.url));
            }
        }
        message
    }
}

/// The knowledge retrieval and response cache engine.
pub struct AnswerEngine {
    config: CraftloreConfig,
    index: Arc<SqliteChunkIndex>,
    cache: SqliteResponseCache,
    retriever: Retriever,
    assembler: PromptAssembler,
    generator: Arc<dyn GenerationClient>,
}

impl AnswerEngine {
    /// Opens the engine against on-disk stores.
    ///
    /// Creates the data directory if needed, opens both databases, and
    /// validates the prompt template. Template problems fail here, at
    /// startup, never per-query.
    ///
    /// # Errors
    ///
    /// Returns an error if a store cannot be opened or the configured
    /// template is invalid.
    pub fn open(config: CraftloreConfig, generator: Arc<dyn GenerationClient>) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).map_err(|e| Error::OperationFailed {
            operation: "create_data_dir".to_string(),
            cause: e.to_string(),
        })?;

        let embedder: Arc<dyn Embedder> = Arc::new(FastEmbedEmbedder::new());
        let index = Arc::new(SqliteChunkIndex::open(
            config.index_db_path(),
            Arc::clone(&embedder),
        )?);
        let cache = SqliteResponseCache::open(config.cache_db_path(), config.cache.max_entries)?;

        Self::assemble_engine(config, index, cache, embedder, generator)
    }

    /// Creates an engine over in-memory stores (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails.
    pub fn in_memory(
        config: CraftloreConfig,
        generator: Arc<dyn GenerationClient>,
    ) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(FastEmbedEmbedder::new());
        let index = Arc::new(SqliteChunkIndex::in_memory(Arc::clone(&embedder))?);
        let cache = SqliteResponseCache::in_memory(config.cache.max_entries)?;

        Self::assemble_engine(config, index, cache, embedder, generator)
    }

    fn assemble_engine(
        config: CraftloreConfig,
        index: Arc<SqliteChunkIndex>,
        cache: SqliteResponseCache,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn GenerationClient>,
    ) -> Result<Self> {
        let assembler = match &config.prompt.template_path {
            Some(path) => PromptAssembler::from_file(path, config.prompt.max_context_chars)?,
            None => PromptAssembler::with_default_template(config.prompt.max_context_chars)?,
        };

        let retriever = Retriever::new(Arc::clone(&index), embedder)
            .with_query_prefix(config.retrieval.query_prefix.clone());

        Ok(Self {
            config,
            index,
            cache,
            retriever,
            assembler,
            generator,
        })
    }

    /// Answers a query, consulting the cache first.
    ///
    /// On a miss, runs retrieval, prompt assembly, and generation, then
    /// stores the answer. Generation failures surface as typed errors and
    /// never reach the cache; an empty retrieval yields the
    /// [`NO_INFO_ANSWER`] response (also uncached).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for blank queries,
    /// [`Error::StaleIndex`] if the index needs a rebuild, and
    /// generation/storage errors from the respective stages.
    #[instrument(skip(self, raw_query))]
    pub fn answer(&self, raw_query: &str) -> Result<AnswerResponse> {
        if crate::storage::normalize_query(raw_query).is_empty() {
            return Err(Error::InvalidInput("query is empty".to_string()));
        }

        if let Some(entry) = self.cache.lookup(raw_query)? {
            return Ok(AnswerResponse {
                answer_text: entry.answer_text,
                sources: entry.sources,
                from_cache: true,
            });
        }

        let results = self.retriever.retrieve(
            raw_query,
            self.config.retrieval.top_k,
            self.config.retrieval.min_score,
        )?;

        if results.is_empty() {
            tracing::info!("no passages cleared the score threshold");
            metrics::counter!("answers_no_info_total").increment(1);
            return Ok(AnswerResponse {
                answer_text: NO_INFO_ANSWER.to_string(),
                sources: Vec::new(),
                from_cache: false,
            });
        }

        let prompt = self.assembler.assemble(raw_query, &results);
        let answer_text = self.generator.generate(&GenerationRequest {
            prompt,
            max_tokens: self.config.llm.max_tokens,
            temperature: self.config.llm.temperature,
        })?;

        let sources: Vec<SourceRef> = results
            .iter()
            .map(|r| SourceRef::new(r.chunk.source_title.clone(), r.chunk.source_url.clone()))
            .collect();

        // A cache write failure must not discard a freshly generated
        // answer; the next miss simply regenerates
        if let Err(e) = self.cache.store(raw_query, &answer_text, &sources) {
            tracing::warn!(error = %e, "failed to store answer in cache");
        }

        Ok(AnswerResponse {
            answer_text,
            sources,
            from_cache: false,
        })
    }

    /// Incrementally ingests documents into the index.
    ///
    /// Unchanged documents re-chunk to identical ids, so re-ingestion is
    /// an idempotent overwrite.
    ///
    /// # Errors
    ///
    /// Returns an error if chunking parameters are invalid or the upsert
    /// fails.
    pub fn ingest(&self, documents: &[Document]) -> Result<IngestReport> {
        let (chunks, report) =
            chunk_documents(documents, self.config.chunk_size, self.config.chunk_overlap)?;
        self.index.upsert(&chunks)?;
        Ok(report)
    }

    /// Rebuilds the index from scratch.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset or the ingestion fails.
    #[instrument(skip(self, documents), fields(documents = documents.len()))]
    pub fn rebuild_index(&self, documents: &[Document]) -> Result<IngestReport> {
        self.index.reset()?;
        self.ingest(documents)
    }

    /// Destroys all cached answers.
    ///
    /// # Errors
    ///
    /// Returns an error on database failures.
    pub fn clear_cache(&self) -> Result<()> {
        self.cache.clear()
    }

    /// Returns the index metadata.
    ///
    /// # Errors
    ///
    /// Returns an error on database failures.
    pub fn index_stats(&self) -> Result<IndexMetadata> {
        self.index.stats()
    }

    /// Returns aggregate cache statistics.
    ///
    /// # Errors
    ///
    /// Returns an error on database failures.
    pub fn cache_stats(&self) -> Result<CacheStats> {
        self.cache.stats()
    }

    /// Returns the `n` most popular cached queries.
    ///
    /// # Errors
    ///
    /// Returns an error on database failures.
    pub fn top_queries(&self, n: usize) -> Result<Vec<CacheEntry>> {
        self.cache.top_queries(n)
    }
}
