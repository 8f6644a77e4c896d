//! Prompt assembly.
//!
//! Merges retrieved passages with the user query into a single generation
//! prompt. Assembly is a pure function: no I/O, fully deterministic given
//! its inputs. Template loading (with a built-in fallback) happens once
//! at startup, so a bad template can never surface per-query.

use crate::models::RetrievalResult;
use crate::{Error, Result};
use std::path::Path;

/// Separator between passages; keeps each passage visually attributed to
/// its `[Source N: title]` header.
const PASSAGE_SEPARATOR: &str = "\n\n---\n\n";

/// A truncated passage shorter than this carries no useful signal, so the
/// passage is dropped instead.
const MIN_TRUNCATED_CHARS: usize = 200;

/// Default prompt template used when no external template is configured.
const DEFAULT_TEMPLATE: &str = "\
You are a friendly game guide. Answer the player's question using only the
wiki passages provided below.

WIKI PASSAGES:
{context}

PLAYER QUESTION:
{query}

INSTRUCTIONS:
- Answer based only on the passages above.
- If the passages contain a recipe, list the ingredients and the steps.
- Use short sentences and bullet points.
- If the answer is not in the passages, say you don't have that
  information in your knowledge base.

ANSWER:
";

/// Assembles generation prompts from a template and retrieved passages.
pub struct PromptAssembler {
    template: String,
    max_context_chars: usize,
}

impl PromptAssembler {
    /// Creates an assembler, validating the template up front.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Template`] if the template is missing the
    /// `{context}` or `{query}` placeholder.
    pub fn new(template: impl Into<String>, max_context_chars: usize) -> Result<Self> {
        let template = template.into();
        for placeholder in ["{context}", "{query}"] {
            if !template.contains(placeholder) {
                return Err(Error::Template {
                    reason: format!("template is missing the {placeholder} placeholder"),
                });
            }
        }
        Ok(Self {
            template,
            max_context_chars,
        })
    }

    /// Creates an assembler with the built-in default template.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the default template carries both
    /// placeholders.
    pub fn with_default_template(max_context_chars: usize) -> Result<Self> {
        Self::new(DEFAULT_TEMPLATE, max_context_chars)
    }

    /// Loads the template from a file, falling back to the default.
    ///
    /// A missing or unreadable file is logged and replaced by the default
    /// template; a present-but-invalid template is a hard error so a typo
    /// in the placeholders cannot silently degrade answers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Template`] if the loaded template is invalid.
    pub fn from_file(path: &Path, max_context_chars: usize) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loaded prompt template");
                Self::new(contents.trim().to_string(), max_context_chars)
            },
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "prompt template not readable, using built-in default"
                );
                Self::with_default_template(max_context_chars)
            },
        }
    }

    /// Returns the built-in default template.
    #[must_use]
    pub const fn default_template() -> &'static str {
        DEFAULT_TEMPLATE
    }

    /// Builds the generation prompt for a query and its retrieved passages.
    ///
    /// Passages are concatenated in ranked order with source attribution.
    /// The cumulative context never exceeds the configured character
    /// budget: the last included passage is truncated to fit (earlier ones
    /// never are), and a passage whose remaining room is too small to be
    /// useful is dropped entirely.
    #[must_use]
    pub fn assemble(&self, query: &str, results: &[RetrievalResult]) -> String {
        let mut context = String::new();
        let mut used_chars = 0usize;
        let sep_chars = PASSAGE_SEPARATOR.chars().count();

        for (i, result) in results.iter().enumerate() {
            let passage = format!(
                "[Source {}: {}]\n{}",
                i + 1,
                result.chunk.source_title,
                result.chunk.text
            );
            let passage_chars = passage.chars().count();
            let lead_chars = if context.is_empty() { 0 } else { sep_chars };

            if used_chars + lead_chars + passage_chars <= self.max_context_chars {
                if !context.is_empty() {
                    context.push_str(PASSAGE_SEPARATOR);
                }
                context.push_str(&passage);
                used_chars += lead_chars + passage_chars;
                continue;
            }

            let remaining = self
                .max_context_chars
                .saturating_sub(used_chars + lead_chars);
            if remaining >= MIN_TRUNCATED_CHARS {
                if !context.is_empty() {
                    context.push_str(PASSAGE_SEPARATOR);
                }
                let truncated: String = passage.chars().take(remaining - 3).collect();
                context.push_str(&truncated);
                context.push_str("...");
            }
            break;
        }

        self.template
            .replace("{context}", &context)
            .replace("{query}", query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkId};

    fn result(title: &str, text: &str, score: f32) -> RetrievalResult {
        RetrievalResult {
            chunk: Chunk {
                id: ChunkId::derive(title, 0),
                text: text.to_string(),
                source_title: title.to_string(),
                source_url: format!("https://wiki/{title}"),
                chunk_index: 0,
                embedding: None,
            },
            score,
        }
    }

    /// Extracts the substituted context portion from a marker template.
    fn context_portion(prompt: &str) -> &str {
        let start = prompt.find("<<").map(|i| i + 2).unwrap_or(0);
        let end = prompt.find(">>").unwrap_or(prompt.len());
        &prompt[start..end]
    }

    #[test]
    fn test_missing_placeholders_rejected() {
        assert!(matches!(
            PromptAssembler::new("no placeholders here", 1000),
            Err(Error::Template { .. })
        ));
        assert!(matches!(
            PromptAssembler::new("only {query}", 1000),
            Err(Error::Template { .. })
        ));
        assert!(matches!(
            PromptAssembler::new("only {context}", 1000),
            Err(Error::Template { .. })
        ));
        assert!(PromptAssembler::new("{context} and {query}", 1000).is_ok());
    }

    #[test]
    fn test_default_template_valid() {
        assert!(PromptAssembler::with_default_template(2000).is_ok());
    }

    #[test]
    fn test_substitutes_query_and_context() {
        let assembler = PromptAssembler::new("C: {context}\nQ: {query}", 1000).unwrap();
        let prompt = assembler.assemble(
            "how do i make a torch",
            &[result("Torch", "Coal plus stick.", 0.9)],
        );

        assert!(prompt.contains("Q: how do i make a torch"));
        assert!(prompt.contains("[Source 1: Torch]\nCoal plus stick."));
    }

    #[test]
    fn test_passages_separated_with_attribution() {
        let assembler = PromptAssembler::new("<<{context}>> {query}", 1000).unwrap();
        let prompt = assembler.assemble(
            "q",
            &[
                result("Torch", "Coal plus stick.", 0.9),
                result("Furnace", "Eight cobblestone.", 0.8),
            ],
        );

        let context = context_portion(&prompt);
        assert!(context.contains("[Source 1: Torch]"));
        assert!(context.contains("[Source 2: Furnace]"));
        assert!(context.contains("\n\n---\n\n"));
    }

    #[test]
    fn test_context_never_exceeds_budget() {
        let budget = 600;
        let assembler = PromptAssembler::new("<<{context}>> {query}", budget).unwrap();
        let long = "torch crafting details ".repeat(40);
        let prompt = assembler.assemble(
            "q",
            &[
                result("Torch", &long, 0.9),
                result("Furnace", &long, 0.8),
                result("Anvil", &long, 0.7),
            ],
        );

        let context = context_portion(&prompt);
        assert!(
            context.chars().count() <= budget,
            "context {} chars exceeds budget {budget}",
            context.chars().count()
        );
    }

    #[test]
    fn test_only_last_passage_truncated() {
        // First passage fits whole; second is cut
        let assembler = PromptAssembler::new("<<{context}>>{query}", 700).unwrap();
        let first = "alpha ".repeat(50);
        let second = "bravo ".repeat(100);
        let prompt = assembler.assemble("q", &[
            result("First", first.trim(), 0.9),
            result("Second", second.trim(), 0.8),
        ]);

        let context = context_portion(&prompt);
        assert!(context.contains(first.trim()), "first passage must be intact");
        assert!(context.contains("[Source 2: Second]"));
        assert!(context.ends_with("..."), "last passage should be truncated");
    }

    #[test]
    fn test_tiny_remainder_drops_passage() {
        // Budget leaves fewer than MIN_TRUNCATED_CHARS for the second
        // passage, so it is dropped rather than truncated to noise
        let first = "a".repeat(500);
        let assembler = PromptAssembler::new("<<{context}>>{query}", 550).unwrap();
        let prompt = assembler.assemble("q", &[
            result("First", &first, 0.9),
            result("Second", "useful detail", 0.8),
        ]);

        let context = context_portion(&prompt);
        assert!(!context.contains("[Source 2"));
    }

    #[test]
    fn test_empty_results_yield_empty_context() {
        let assembler = PromptAssembler::new("<<{context}>> {query}", 1000).unwrap();
        let prompt = assembler.assemble("q", &[]);
        assert_eq!(context_portion(&prompt), "");
    }

    #[test]
    fn test_assemble_deterministic() {
        let assembler = PromptAssembler::new("{context}|{query}", 500).unwrap();
        let results = vec![result("Torch", "Coal plus stick.", 0.9)];
        assert_eq!(
            assembler.assemble("q", &results),
            assembler.assemble("q", &results)
        );
    }

    #[test]
    fn test_from_file_missing_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let assembler =
            PromptAssembler::from_file(&dir.path().join("missing.txt"), 1000).unwrap();
        let prompt = assembler.assemble("q", &[]);
        assert!(prompt.contains("PLAYER QUESTION"));
    }

    #[test]
    fn test_from_file_invalid_template_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.txt");
        std::fs::write(&path, "no placeholders").unwrap();

        assert!(matches!(
            PromptAssembler::from_file(&path, 1000),
            Err(Error::Template { .. })
        ));
    }

    #[test]
    fn test_from_file_reads_valid_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.txt");
        std::fs::write(&path, "CTX {context} ASK {query}").unwrap();

        let assembler = PromptAssembler::from_file(&path, 1000).unwrap();
        let prompt = assembler.assemble("hello", &[]);
        assert!(prompt.starts_with("CTX "));
        assert!(prompt.ends_with("ASK hello"));
    }
}
