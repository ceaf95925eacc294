//! SPARQL execution against a remote endpoint or an in-memory local graph.
//!
//! Both executors flatten results into a plain list of value strings and never
//! return `Err`: every failure becomes an [`ExecutionResult::Error`] so the retry
//! loop can feed it back to the model.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use oxigraph::io::RdfFormat;
use oxigraph::model::Term;
use oxigraph::sparql::{Query, QueryResults};
use oxigraph::store::Store;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::{TargetConfig, TargetSpec};
use crate::error::KgqaError;
use crate::models::{ErrorDescriptor, ErrorKind, ExecutionResult};

const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";

// ============================================================================
// QueryExecutor trait
// ============================================================================

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &str) -> ExecutionResult;

    /// Short description for logging.
    fn name(&self) -> &str;
}

/// Build the executor for the configured target. Local graphs are loaded here, once.
pub fn create_executor(
    target: &TargetSpec,
    config: &TargetConfig,
) -> Result<Box<dyn QueryExecutor>, KgqaError> {
    match target {
        TargetSpec::Remote { endpoint_url } => Ok(Box::new(RemoteEndpoint::new(
            endpoint_url.clone(),
            EndpointSettings::from(config),
        )?)),
        TargetSpec::Local { paths } => Ok(Box::new(LocalGraph::load(paths)?)),
    }
}

// ============================================================================
// RemoteEndpoint
// ============================================================================

#[derive(Debug, Clone)]
pub struct EndpointSettings {
    pub user_agent: String,
    /// Total tries when the gateway answers 502/503/504.
    pub max_attempts: usize,
    pub backoff_ms: u64,
    /// Sleep after every call, successful or not.
    pub courtesy_delay: Duration,
}

impl From<&TargetConfig> for EndpointSettings {
    fn from(config: &TargetConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_attempts: config.max_attempts,
            backoff_ms: config.backoff_ms,
            courtesy_delay: Duration::from_millis(config.courtesy_delay_ms),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SparqlJson {
    #[serde(default)]
    head: SparqlHead,
    #[serde(default)]
    results: Option<SparqlBindings>,
    #[serde(default)]
    boolean: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct SparqlHead {
    #[serde(default)]
    vars: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SparqlBindings {
    #[serde(default)]
    bindings: Vec<HashMap<String, SparqlTerm>>,
}

#[derive(Debug, Deserialize)]
struct SparqlTerm {
    value: String,
}

impl SparqlJson {
    /// All values of the first variable, then all of the second, and so on.
    fn flatten(self) -> Vec<String> {
        if let Some(b) = self.boolean {
            return vec![b.to_string()];
        }
        let mut rows = self.results.map(|r| r.bindings).unwrap_or_default();
        let mut values = Vec::new();
        for var in &self.head.vars {
            for row in rows.iter_mut() {
                if let Some(term) = row.remove(var) {
                    values.push(term.value);
                }
            }
        }
        values
    }
}

enum CallFailure {
    Gateway { status: StatusCode },
    Fatal(ErrorDescriptor),
}

impl CallFailure {
    fn is_gateway(&self) -> bool {
        matches!(self, CallFailure::Gateway { .. })
    }
}

fn is_gateway_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

#[derive(Debug, Clone)]
pub struct RemoteEndpoint {
    client: Client,
    url: String,
    settings: EndpointSettings,
}

impl RemoteEndpoint {
    pub fn new(url: String, settings: EndpointSettings) -> Result<Self, KgqaError> {
        let client = Client::builder().user_agent(settings.user_agent.clone()).build()?;
        Ok(Self {
            client,
            url,
            settings,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn settings(&self) -> &EndpointSettings {
        &self.settings
    }

    async fn call_once(&self, query: &str) -> Result<Vec<String>, CallFailure> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("query", query), ("format", "json")])
            .header(reqwest::header::ACCEPT, SPARQL_RESULTS_JSON)
            .send()
            .await
            .map_err(|e| {
                CallFailure::Fatal(ErrorDescriptor {
                    kind: ErrorKind::Network,
                    message: e.to_string(),
                })
            })?;

        let status = response.status();
        if is_gateway_status(status) {
            tracing::warn!(endpoint = %self.url, status = status.as_u16(), "Endpoint gateway error");
            return Err(CallFailure::Gateway { status });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(300).collect();
            return Err(CallFailure::Fatal(ErrorDescriptor {
                kind: ErrorKind::Http,
                message: format!("HTTP {}: {}", status.as_u16(), snippet.trim()),
            }));
        }

        let body = response.text().await.map_err(|e| {
            CallFailure::Fatal(ErrorDescriptor {
                kind: ErrorKind::Network,
                message: e.to_string(),
            })
        })?;
        let parsed: SparqlJson = serde_json::from_str(&body).map_err(|e| {
            CallFailure::Fatal(ErrorDescriptor {
                kind: ErrorKind::Decode,
                message: e.to_string(),
            })
        })?;

        Ok(parsed.flatten())
    }
}

#[async_trait]
impl QueryExecutor for RemoteEndpoint {
    async fn execute(&self, query: &str) -> ExecutionResult {
        let factor = (self.settings.backoff_ms / 2).max(1);
        let retry_strategy = ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(Duration::from_secs(30))
            .map(jitter)
            .take(self.settings.max_attempts.saturating_sub(1));

        let outcome = RetryIf::spawn(
            retry_strategy,
            || self.call_once(query),
            |e: &CallFailure| e.is_gateway(),
        )
        .await;

        if !self.settings.courtesy_delay.is_zero() {
            tokio::time::sleep(self.settings.courtesy_delay).await;
        }

        match outcome {
            Ok(values) => ExecutionResult::Bindings(values),
            Err(CallFailure::Gateway { status }) => {
                tracing::error!(
                    endpoint = %self.url,
                    attempts = self.settings.max_attempts,
                    "Endpoint still failing after retries"
                );
                ExecutionResult::error(
                    ErrorKind::Http,
                    format!(
                        "HTTP {} after {} attempts",
                        status.as_u16(),
                        self.settings.max_attempts.max(1)
                    ),
                )
            }
            Err(CallFailure::Fatal(descriptor)) => ExecutionResult::Error(descriptor),
        }
    }

    fn name(&self) -> &str {
        &self.url
    }
}

// ============================================================================
// LocalGraph
// ============================================================================

/// In-memory oxigraph store loaded from RDF files at startup.
pub struct LocalGraph {
    store: Store,
    description: String,
}

/// RDF syntax for a file, chosen by extension. Unknown extensions are read as Turtle.
pub fn rdf_format_for(path: &Path) -> RdfFormat {
    match extension_of(path).as_deref() {
        Some("rdf") | Some("xml") | Some("owl") => RdfFormat::RdfXml,
        Some("nt") => RdfFormat::NTriples,
        _ => RdfFormat::Turtle,
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn is_recognised_rdf(path: &Path) -> bool {
    matches!(
        extension_of(path).as_deref(),
        Some("ttl" | "rdf" | "xml" | "owl" | "nt")
    )
}

impl LocalGraph {
    /// Load every path into one store. Directories contribute each recognised RDF
    /// file they contain (non-recursive, in name order).
    pub fn load(paths: &[PathBuf]) -> Result<Self, KgqaError> {
        let store = Store::new().map_err(|e| KgqaError::Graph(format!("store init: {e}")))?;

        let mut files = Vec::new();
        for path in paths {
            if path.is_dir() {
                let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
                    .filter_map(|entry| entry.ok().map(|e| e.path()))
                    .filter(|p| p.is_file() && is_recognised_rdf(p))
                    .collect();
                entries.sort();
                if entries.is_empty() {
                    tracing::warn!(dir = %path.display(), "No RDF files found in directory");
                }
                files.extend(entries);
            } else {
                files.push(path.clone());
            }
        }

        for file in &files {
            let format = rdf_format_for(file);
            let reader = BufReader::new(File::open(file)?);
            store.load_from_reader(format, reader).map_err(|e| {
                KgqaError::Graph(format!("failed to load {}: {e}", file.display()))
            })?;
            tracing::info!(file = %file.display(), format = ?format, "Loaded RDF file");
        }

        let triples = store.len().unwrap_or_default();
        tracing::info!(files = files.len(), triples, "Local graph ready");

        Ok(Self {
            store,
            description: format!("local graph ({} files)", files.len()),
        })
    }

    fn run(&self, query: &str) -> ExecutionResult {
        #[allow(deprecated)]
        let syntax = Query::parse(query, None);
        if let Err(e) = syntax {
            return ExecutionResult::error(ErrorKind::Parse, e.to_string());
        }

        #[allow(deprecated)]
        let results = match self.store.query(query) {
            Ok(r) => r,
            Err(e) => return ExecutionResult::error(ErrorKind::Query, e.to_string()),
        };

        match results {
            QueryResults::Solutions(solutions) => {
                let mut values = Vec::new();
                for solution in solutions {
                    let solution = match solution {
                        Ok(s) => s,
                        Err(e) => return ExecutionResult::error(ErrorKind::Query, e.to_string()),
                    };
                    for (_, term) in solution.iter() {
                        values.push(term_value(term));
                    }
                }
                ExecutionResult::Bindings(values)
            }
            QueryResults::Boolean(b) => ExecutionResult::Bindings(vec![b.to_string()]),
            QueryResults::Graph(_) => ExecutionResult::error(
                ErrorKind::Unsupported,
                "CONSTRUCT/DESCRIBE results cannot be flattened to values",
            ),
        }
    }
}

/// Lexical form for literals, the bare IRI for named nodes.
fn term_value(term: &Term) -> String {
    match term {
        Term::NamedNode(n) => n.as_str().to_string(),
        Term::BlankNode(b) => b.as_str().to_string(),
        Term::Literal(l) => l.value().to_string(),
        #[allow(unreachable_patterns)]
        other => other.to_string(),
    }
}

#[async_trait]
impl QueryExecutor for LocalGraph {
    async fn execute(&self, query: &str) -> ExecutionResult {
        self.run(query)
    }

    fn name(&self) -> &str {
        &self.description
    }
}

// ============================================================================
// TESTS
// ============================================================================
