//! Dataset import with optional LLM entity extraction and Wikidata resolution.

use std::collections::{BTreeMap, HashSet};

use kgqa_core::llm::{CompletionRequest, LlmBackend, LlmError, TokenUsage};
use kgqa_core::models::{BatchFile, Question};
use kgqa_core::sparql::QueryExecutor;

use crate::qald::QaldDataset;
use crate::IngestError;

const EXTRACTION_SYSTEM: &str = "You are an expert in extracting named entities from questions.";
const EXTRACTION_MAX_TOKENS: u32 = 50;
const EXTRACTION_TEMPERATURE: f32 = 0.2;

fn extraction_prompt(question: &str) -> String {
    format!(
        "Extract the most relevant named wikidata entities from the following question:\n\n\
         Question: \"{question}\"\n\n\
         Return a comma-separated list of entity names without explanations. Think rationally \
         and in context of the question but respond only with entities literally named in the \
         question. Extracted entities should be in singular form."
    )
}

fn escape_literal(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Asks the model for entity mentions and maps them to knowledge-graph identifiers.
pub struct EntityExtractor<'a> {
    llm: &'a dyn LlmBackend,
    resolver: &'a dyn QueryExecutor,
}

impl<'a> EntityExtractor<'a> {
    pub fn new(llm: &'a dyn LlmBackend, resolver: &'a dyn QueryExecutor) -> Self {
        Self { llm, resolver }
    }

    pub async fn extract_names(&self, question: &str) -> Result<(Vec<String>, TokenUsage), LlmError> {
        let request = CompletionRequest {
            system: EXTRACTION_SYSTEM.to_string(),
            prompt: extraction_prompt(question),
            max_tokens: EXTRACTION_MAX_TOKENS,
            temperature: EXTRACTION_TEMPERATURE,
        };
        let completion = self.llm.complete(&request).await?;

        let names = completion
            .content
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();
        Ok((names, completion.usage))
    }

    /// Exact English-label match; the identifier is the last path segment of the IRI.
    /// Names without a match are left out.
    pub async fn resolve(&self, names: &[String]) -> BTreeMap<String, String> {
        let mut resolved = BTreeMap::new();
        for name in names {
            let query = format!(
                "PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>\n\
                 SELECT ?entity WHERE {{ ?entity rdfs:label \"{}\"@en . }} LIMIT 1",
                escape_literal(name)
            );
            let result = self.resolver.execute(&query).await;
            match result.values().first() {
                Some(iri) => {
                    let id = iri.rsplit('/').next().unwrap_or(iri).to_string();
                    tracing::debug!(name = %name, id = %id, "Entity resolved");
                    resolved.insert(name.clone(), id);
                }
                None if result.is_error() => {
                    tracing::warn!(name = %name, result = %result, "Entity lookup failed")
                }
                None => tracing::debug!(name = %name, "No entity with this label"),
            }
        }
        resolved
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    /// Keep only the first `limit` questions.
    pub limit: Option<usize>,
}

/// Turn a QALD dataset into a fresh batch. With an extractor, each question also gets
/// its resolved entity map; extraction failures are logged and leave the map empty.
///
/// Duplicate ids among the imported questions are rejected before any model call.
pub async fn import_dataset(
    dataset: &QaldDataset,
    options: ImportOptions,
    extractor: Option<&EntityExtractor<'_>>,
) -> Result<BatchFile, IngestError> {
    let limit = options.limit.unwrap_or(dataset.questions.len());

    let mut seen = HashSet::new();
    for (index, entry) in dataset.questions.iter().take(limit).enumerate() {
        if entry.english_text().is_none() {
            continue;
        }
        let id = entry.display_id(index);
        if !seen.insert(id.clone()) {
            return Err(IngestError::DuplicateId(id.to_string()));
        }
    }
    let mut questions: Vec<Question> = Vec::new();
    let mut usage = Vec::new();

    for (index, entry) in dataset.questions.iter().take(limit).enumerate() {
        let Some(mut question) = entry.to_question(index) else {
            tracing::warn!(question_id = %entry.display_id(index), "Skipping question without text");
            continue;
        };

        let mut question_usage = TokenUsage::default();
        if let Some(extractor) = extractor {
            match extractor.extract_names(&question.text).await {
                Ok((names, u)) => {
                    question_usage = u;
                    question.entities = Some(extractor.resolve(&names).await);
                }
                Err(e) => {
                    tracing::warn!(question_id = %question.id, error = %e, "Entity extraction failed");
                }
            }
        }

        tracing::info!(question_id = %question.id, "Imported question");
        questions.push(question);
        usage.push(question_usage);
    }

    let mut batch = BatchFile::new(questions);
    for (record, u) in batch.questions.iter_mut().zip(usage) {
        record.usage = u;
    }
    Ok(batch)
}
