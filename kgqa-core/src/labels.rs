//! English labels for Wikidata entity URIs, looked up once per run.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::config::{LabelConfig, TargetConfig};
use crate::error::KgqaError;
use crate::sparql::{EndpointSettings, QueryExecutor, RemoteEndpoint};

pub const WIKIDATA_ENTITY_PREFIX: &str = "http://www.wikidata.org/entity/";

/// Endpoint used for label lookups; its courtesy delay is the configured pause
/// between lookups.
pub fn label_endpoint(
    labels: &LabelConfig,
    target: &TargetConfig,
) -> Result<RemoteEndpoint, KgqaError> {
    RemoteEndpoint::new(
        labels.endpoint_url.clone(),
        EndpointSettings {
            courtesy_delay: Duration::from_millis(labels.delay_ms),
            ..EndpointSettings::from(target)
        },
    )
}

/// Memoised URI → label map. Owned by a single verification run.
#[derive(Debug, Default)]
pub struct LabelCache {
    language: String,
    labels: HashMap<String, String>,
    lookups: usize,
}

fn language_tag_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z]{1,8}(-[A-Za-z0-9]{1,8})*$").ok())
        .as_ref()
}

/// BCP 47 shape (`en`, `pt-BR`, `zh-Hant`); the tag ends up inside a SPARQL literal.
pub fn is_language_tag(tag: &str) -> bool {
    language_tag_re().is_some_and(|re| re.is_match(tag))
}

impl LabelCache {
    pub fn new(language: impl Into<String>) -> Result<Self, KgqaError> {
        let language = language.into();
        if !is_language_tag(&language) {
            return Err(KgqaError::InvalidConfig(format!(
                "labels.language {language:?} is not a language tag"
            )));
        }
        Ok(Self {
            language,
            labels: HashMap::new(),
            lookups: 0,
        })
    }

    /// Number of endpoint lookups performed so far.
    pub fn lookups(&self) -> usize {
        self.lookups
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    fn label_query(&self, uri: &str) -> String {
        format!(
            "PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>\n\
             SELECT ?label WHERE {{ <{uri}> rdfs:label ?label . FILTER(LANG(?label) = \"{}\") }}",
            self.language
        )
    }

    /// Label for a value. Non-entity values and failed lookups come back unchanged.
    pub async fn label_for(&mut self, executor: &dyn QueryExecutor, value: &str) -> String {
        if !value.starts_with(WIKIDATA_ENTITY_PREFIX) {
            return value.to_string();
        }
        if let Some(label) = self.labels.get(value) {
            return label.clone();
        }

        self.lookups += 1;
        let result = executor.execute(&self.label_query(value)).await;
        let label = match result.values().first() {
            Some(label) if !label.trim().is_empty() => label.clone(),
            _ => {
                if result.is_error() {
                    tracing::warn!(uri = value, result = %result, "Label lookup failed, keeping URI");
                }
                value.to_string()
            }
        };

        self.labels.insert(value.to_string(), label.clone());
        label
    }

    pub async fn map_values(
        &mut self,
        executor: &dyn QueryExecutor,
        values: &[String],
    ) -> Vec<String> {
        let mut mapped = Vec::with_capacity(values.len());
        for value in values {
            mapped.push(self.label_for(executor, value).await);
        }
        mapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorKind, ExecutionResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeLabels {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QueryExecutor for FakeLabels {
        async fn execute(&self, query: &str) -> ExecutionResult {
            self.calls.lock().unwrap().push(query.to_string());
            if query.contains("Q90>") {
                ExecutionResult::Bindings(vec!["Paris".into()])
            } else if query.contains("Q404>") {
                ExecutionResult::error(ErrorKind::Http, "HTTP 500")
            } else {
                ExecutionResult::Bindings(vec![])
            }
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    #[tokio::test]
    async fn test_each_uri_is_looked_up_once() {
        let fake = FakeLabels {
            calls: Mutex::new(Vec::new()),
        };
        let mut cache = LabelCache::new("en").unwrap();
        let paris = format!("{WIKIDATA_ENTITY_PREFIX}Q90");

        let mapped = cache
            .map_values(&fake, &[paris.clone(), "42".to_string(), paris.clone()])
            .await;
        assert_eq!(mapped, vec!["Paris", "42", "Paris"]);
        assert_eq!(cache.lookups(), 1);

        let calls = fake.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains("FILTER(LANG(?label) = \"en\")"));
    }

    #[test]
    fn test_label_endpoint_pauses_between_lookups() {
        let labels = LabelConfig {
            delay_ms: 250,
            ..LabelConfig::default()
        };
        let target = TargetConfig {
            user_agent: "LabelBot/2.0".into(),
            ..TargetConfig::default()
        };
        let endpoint = label_endpoint(&labels, &target).unwrap();
        assert_eq!(endpoint.url(), labels.endpoint_url);
        assert_eq!(endpoint.settings().courtesy_delay, Duration::from_millis(250));
        assert_eq!(endpoint.settings().user_agent, "LabelBot/2.0");
    }

    #[test]
    fn test_language_must_be_a_tag() {
        assert!(LabelCache::new("pt-BR").is_ok());
        assert!(LabelCache::new("zh-Hant").is_ok());
        assert!(matches!(
            LabelCache::new("en\") || true || (\""),
            Err(KgqaError::InvalidConfig(_))
        ));
        assert!(LabelCache::new("").is_err());
        assert!(LabelCache::new("en us").is_err());
    }

    #[tokio::test]
    async fn test_failed_or_missing_label_keeps_uri() {
        let fake = FakeLabels {
            calls: Mutex::new(Vec::new()),
        };
        let mut cache = LabelCache::new("en").unwrap();
        let broken = format!("{WIKIDATA_ENTITY_PREFIX}Q404");
        let unlabeled = format!("{WIKIDATA_ENTITY_PREFIX}Q1");

        assert_eq!(cache.label_for(&fake, &broken).await, broken);
        assert_eq!(cache.label_for(&fake, &unlabeled).await, unlabeled);
        assert_eq!(cache.label_for(&fake, &broken).await, broken);
        assert_eq!(cache.lookups(), 2);
        assert_eq!(cache.len(), 2);
    }
}
