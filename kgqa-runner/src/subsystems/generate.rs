//! Generation subsystem: the self-correcting retry loop and the batch driver.
//!
//! Each question gets at most `max_retries + 1` logical attempts. A failed attempt
//! feeds its query and result back into the next prompt; the temperature rises by
//! 0.1 per attempt, capped at 2.0. LLM calls that return nothing usable are recorded
//! as transient failures and still use up an attempt.

use std::path::Path;
use std::time::Duration;

use kgqa_core::config::KgqaConfig;
use kgqa_core::extract::extract_query;
use kgqa_core::judge::faulty_reason;
use kgqa_core::llm::{CompletionRequest, LlmBackend, TokenUsage};
use kgqa_core::models::{
    Attempt, BatchFile, ErrorKind, ExecutionResult, RetryStatus, TransientFailure,
};
use kgqa_core::prompt::{with_previous_failure, PromptContext, PromptTemplate, SYSTEM_MESSAGE};
use kgqa_core::shapes::ShapeSource;
use kgqa_core::sparql::QueryExecutor;

const MAX_TEMPERATURE: f32 = 2.0;
const TEMPERATURE_STEP: f32 = 0.1;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_temperature: f32,
    pub max_tokens: u32,
    /// Pause between attempts of the same question.
    pub retry_delay: Duration,
    /// More values than this and the result is discarded.
    pub max_result_size: usize,
}

impl From<&KgqaConfig> for RetryPolicy {
    fn from(config: &KgqaConfig) -> Self {
        Self {
            max_retries: config.retry.max_retries,
            initial_temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            retry_delay: Duration::from_millis(config.retry.retry_delay_ms),
            max_result_size: config.retry.max_result_size,
        }
    }
}

/// Temperature for the zero-based `attempt`, rounded to two decimals.
pub fn temperature_for(initial: f32, attempt: u32) -> f32 {
    let raw = (initial + TEMPERATURE_STEP * attempt as f32).min(MAX_TEMPERATURE);
    (raw * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    pub attempts: Vec<Attempt>,
    pub transient_failures: Vec<TransientFailure>,
    pub status: RetryStatus,
    pub usage: TokenUsage,
}

/// Drive one question to success or exhaustion.
pub async fn run_retry_loop(
    base_prompt: &str,
    llm: &dyn LlmBackend,
    executor: &dyn QueryExecutor,
    policy: &RetryPolicy,
) -> RetryOutcome {
    let mut outcome = RetryOutcome {
        attempts: Vec::new(),
        transient_failures: Vec::new(),
        status: RetryStatus::ExhaustedRetries,
        usage: TokenUsage::default(),
    };
    let mut previous_failure: Option<(String, ExecutionResult)> = None;
    let mut attempt: u32 = 0;

    loop {
        let number = attempt + 1;
        let temperature = temperature_for(policy.initial_temperature, attempt);
        let prompt = match &previous_failure {
            Some((query, result)) => with_previous_failure(base_prompt, query, result),
            None => base_prompt.to_string(),
        };
        let request = CompletionRequest {
            system: SYSTEM_MESSAGE.to_string(),
            prompt,
            max_tokens: policy.max_tokens,
            temperature,
        };

        match llm.complete(&request).await {
            Err(e) => {
                tracing::warn!(attempt = number, temperature, error = %e, "LLM call failed");
                outcome.transient_failures.push(TransientFailure {
                    attempt: number,
                    temperature,
                    message: e.to_string(),
                });
            }
            Ok(completion) => {
                outcome.usage.add(completion.usage);

                let query = extract_query(&completion.content);
                let mut result = executor.execute(&query).await;
                let mut reason = None;

                let size = result.values().len();
                if size > policy.max_result_size {
                    let message = format!(
                        "result exceeded size ceiling ({size} values, limit {})",
                        policy.max_result_size
                    );
                    result = ExecutionResult::error(ErrorKind::Query, message.clone());
                    reason = Some(message);
                } else if let Some(why) = faulty_reason(&result) {
                    reason = Some(why.to_string());
                }
                let failed = reason.is_some();

                tracing::info!(
                    attempt = number,
                    temperature,
                    failed,
                    values = result.values().len(),
                    "Attempt executed"
                );
                outcome.attempts.push(Attempt {
                    attempt: number,
                    temperature,
                    query: query.clone(),
                    result: result.clone(),
                    failed,
                    reason,
                });

                if !failed {
                    outcome.status = RetryStatus::Succeeded { attempt: number };
                    return outcome;
                }
                previous_failure = Some((query, result));
            }
        }

        attempt += 1;
        if attempt > policy.max_retries {
            tracing::warn!(attempts = attempt, "Retries exhausted");
            return outcome;
        }
        if !policy.retry_delay.is_zero() {
            tokio::time::sleep(policy.retry_delay).await;
        }
    }
}

// ============================================================================
// Batch driver
// ============================================================================

pub struct GenerateContext<'a> {
    pub llm: &'a dyn LlmBackend,
    pub executor: &'a dyn QueryExecutor,
    pub template: &'a PromptTemplate,
    pub shapes: Option<&'a ShapeSource>,
    pub ontology: &'a str,
    pub target_is_local: bool,
    pub policy: RetryPolicy,
    /// Regenerate questions that already have a status.
    pub force: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GenerateStats {
    pub processed: usize,
    pub succeeded: usize,
    pub exhausted: usize,
    pub skipped: usize,
}

/// Generate queries for every pending question, rewriting `path` after each one.
pub async fn generate_batch(
    batch: &mut BatchFile,
    path: &Path,
    ctx: &GenerateContext<'_>,
) -> anyhow::Result<GenerateStats> {
    let mut stats = GenerateStats::default();
    let shape_type = ctx
        .shapes
        .map(|s| s.shape_type())
        .unwrap_or_default()
        .label();

    // A local graph shares one shape; it has to be there before anything runs.
    let shared_shape = match ctx.shapes {
        Some(source) if ctx.target_is_local => match source.load("")? {
            Some(text) => Some(text),
            None => anyhow::bail!(
                "local graph shape file not found: {}",
                source.path_for("").display()
            ),
        },
        _ => None,
    };

    for index in 0..batch.questions.len() {
        let record = &batch.questions[index];
        let question_id = record.question.id.clone();

        if record.is_generated() && !ctx.force {
            tracing::debug!(question_id = %question_id, "Already generated, skipping");
            continue;
        }

        let shape = match (&record.question.shape, &shared_shape, ctx.shapes) {
            (Some(inline), _, _) => inline.clone(),
            (None, Some(shared), _) => shared.clone(),
            (None, None, Some(source)) => match source.load(&question_id.to_string())? {
                Some(text) => text,
                None => {
                    tracing::warn!(
                        question_id = %question_id,
                        path = %source.path_for(&question_id.to_string()).display(),
                        "Shape file missing, skipping question"
                    );
                    stats.skipped += 1;
                    continue;
                }
            },
            (None, None, None) => String::new(),
        };

        let prompt = ctx.template.render(&PromptContext {
            question: &record.question.text,
            ontology: ctx.ontology,
            shape: &shape,
            shape_type,
        });

        tracing::info!(question_id = %question_id, model = ctx.llm.model(), "Generating query");
        let outcome = run_retry_loop(&prompt, ctx.llm, ctx.executor, &ctx.policy).await;

        match outcome.status {
            RetryStatus::Succeeded { attempt } => {
                stats.succeeded += 1;
                tracing::info!(question_id = %question_id, attempt, "Query accepted");
            }
            RetryStatus::ExhaustedRetries => {
                stats.exhausted += 1;
                tracing::warn!(question_id = %question_id, "No acceptable query");
            }
        }
        stats.processed += 1;

        let record = &mut batch.questions[index];
        record.attempts = outcome.attempts;
        record.transient_failures = outcome.transient_failures;
        record.status = Some(outcome.status);
        record.usage.add(outcome.usage);
        // Later stages compare against the new final attempt.
        record.comparison = None;

        batch.save(path)?;
    }

    tracing::info!(
        processed = stats.processed,
        succeeded = stats.succeeded,
        exhausted = stats.exhausted,
        skipped = stats.skipped,
        "Generation finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kgqa_core::llm::{Completion, LlmError};
    use kgqa_core::models::Question;
    use kgqa_core::shapes::ShapeType;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned completions; `None` simulates a failed call.
    struct ScriptedLlm {
        replies: Mutex<VecDeque<Option<&'static str>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Option<&'static str>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedLlm {
        async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            match self.replies.lock().unwrap().pop_front().flatten() {
                Some(content) => Ok(Completion {
                    content: content.to_string(),
                    usage: TokenUsage {
                        prompt_tokens: 10,
                        completion_tokens: 2,
                    },
                }),
                None => Err(LlmError::EmptyResponse),
            }
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    /// `GOOD` queries answer Paris, `HUGE` ones return many rows, anything else is empty.
    struct KeywordGraph;

    #[async_trait]
    impl QueryExecutor for KeywordGraph {
        async fn execute(&self, query: &str) -> ExecutionResult {
            if query.contains("GOOD") {
                ExecutionResult::Bindings(vec!["Paris".into()])
            } else if query.contains("HUGE") {
                ExecutionResult::Bindings((0..20).map(|i| i.to_string()).collect())
            } else if query.contains("ZERO") {
                ExecutionResult::Bindings(vec!["0".into()])
            } else {
                ExecutionResult::Bindings(vec![])
            }
        }

        fn name(&self) -> &str {
            "keywords"
        }
    }

    fn policy(max_retries: u32, initial_temperature: f32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_temperature,
            max_tokens: 256,
            retry_delay: Duration::ZERO,
            max_result_size: 10,
        }
    }

    #[tokio::test]
    async fn test_three_failures_then_success_stops_at_fourth_attempt() {
        let llm = ScriptedLlm::new(vec![
            Some("BAD 1"),
            Some("ZERO"),
            Some("BAD 3"),
            Some("GOOD\n```"),
            Some("GOOD never asked"),
        ]);
        let outcome = run_retry_loop("PROMPT", &llm, &KeywordGraph, &policy(5, 0.1)).await;

        assert_eq!(outcome.attempts.len(), 4);
        assert_eq!(outcome.status, RetryStatus::Succeeded { attempt: 4 });
        assert_eq!(llm.requests().len(), 4);
        assert!(outcome.attempts[..3].iter().all(|a| a.failed));
        assert_eq!(outcome.attempts[1].reason.as_deref(), Some("only placeholder values"));
        assert_eq!(outcome.attempts[3].query, "GOOD");
        assert_eq!(outcome.usage.prompt_tokens, 40);
    }

    #[tokio::test]
    async fn test_never_more_than_max_retries_plus_one_attempts() {
        let llm = ScriptedLlm::new(vec![Some("BAD"); 10]);
        let outcome = run_retry_loop("PROMPT", &llm, &KeywordGraph, &policy(2, 0.1)).await;

        assert_eq!(outcome.attempts.len(), 3);
        assert_eq!(outcome.status, RetryStatus::ExhaustedRetries);
        let numbers: Vec<u32> = outcome.attempts.iter().map(|a| a.attempt).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_attempt() {
        let llm = ScriptedLlm::new(vec![Some("BAD"), Some("GOOD")]);
        let outcome = run_retry_loop("PROMPT", &llm, &KeywordGraph, &policy(0, 0.1)).await;
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.status, RetryStatus::ExhaustedRetries);
    }

    #[tokio::test]
    async fn test_temperature_rises_and_caps() {
        let llm = ScriptedLlm::new(vec![Some("BAD"); 8]);
        let outcome = run_retry_loop("PROMPT", &llm, &KeywordGraph, &policy(7, 1.55)).await;

        let temps: Vec<f32> = outcome.attempts.iter().map(|a| a.temperature).collect();
        assert_eq!(temps, vec![1.55, 1.65, 1.75, 1.85, 1.95, 2.0, 2.0, 2.0]);
        assert!(temps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_temperature_rounding() {
        assert_eq!(temperature_for(0.1, 0), 0.1);
        assert_eq!(temperature_for(0.1, 2), 0.3);
        assert_eq!(temperature_for(0.0, 25), 2.0);
    }

    #[tokio::test]
    async fn test_transient_failures_are_separate_but_use_budget() {
        let llm = ScriptedLlm::new(vec![None, Some("BAD"), None, Some("GOOD")]);
        let outcome = run_retry_loop("PROMPT", &llm, &KeywordGraph, &policy(3, 0.1)).await;

        assert_eq!(outcome.transient_failures.len(), 2);
        assert_eq!(outcome.transient_failures[0].attempt, 1);
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.attempts[0].attempt, 2);
        assert_eq!(outcome.status, RetryStatus::Succeeded { attempt: 4 });

        let exhausted = ScriptedLlm::new(vec![None, None, None]);
        let outcome = run_retry_loop("PROMPT", &exhausted, &KeywordGraph, &policy(2, 0.1)).await;
        assert!(outcome.attempts.is_empty());
        assert_eq!(outcome.transient_failures.len(), 3);
        assert_eq!(outcome.status, RetryStatus::ExhaustedRetries);
    }

    #[tokio::test]
    async fn test_failed_attempt_is_fed_back() {
        let llm = ScriptedLlm::new(vec![Some("SELECT BAD"), Some("GOOD")]);
        run_retry_loop("PROMPT", &llm, &KeywordGraph, &policy(1, 0.1)).await;

        let requests = llm.requests();
        assert_eq!(requests[0].prompt, "PROMPT");
        assert_eq!(requests[0].system, SYSTEM_MESSAGE);
        assert!(requests[1]
            .prompt
            .starts_with("PROMPT\n\n### Previous attempt (failed):\nQuery: SELECT BAD\nResult: []"));
    }

    #[tokio::test]
    async fn test_oversized_result_is_discarded() {
        let llm = ScriptedLlm::new(vec![Some("HUGE"), Some("GOOD")]);
        let outcome = run_retry_loop("PROMPT", &llm, &KeywordGraph, &policy(1, 0.1)).await;

        let first = &outcome.attempts[0];
        assert!(first.failed);
        assert!(first.result.values().is_empty());
        assert!(first
            .reason
            .as_deref()
            .unwrap()
            .starts_with("result exceeded size ceiling"));
        assert_eq!(outcome.status, RetryStatus::Succeeded { attempt: 2 });
    }

    fn batch_with(questions: Vec<Question>) -> BatchFile {
        BatchFile::new(questions)
    }

    #[tokio::test]
    async fn test_batch_skips_missing_remote_shapes_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let shapes_dir = dir.path().join("shapes");
        std::fs::create_dir_all(&shapes_dir).unwrap();
        std::fs::write(shapes_dir.join("question_1_shape.shex"), "<City> {}").unwrap();
        let shapes = ShapeSource::new(&shapes_dir, ShapeType::Shex, false);

        let mut batch = batch_with(vec![
            Question::new(1, "Capital of France?"),
            Question::new(2, "No shape for me"),
        ]);
        let path = dir.path().join("batch.json");
        let llm = ScriptedLlm::new(vec![Some("GOOD")]);
        let template = PromptTemplate::default();

        let ctx = GenerateContext {
            llm: &llm,
            executor: &KeywordGraph,
            template: &template,
            shapes: Some(&shapes),
            ontology: "wikidata",
            target_is_local: false,
            policy: policy(2, 0.1),
            force: false,
        };
        let stats = generate_batch(&mut batch, &path, &ctx).await.unwrap();

        assert_eq!(
            stats,
            GenerateStats {
                processed: 1,
                succeeded: 1,
                exhausted: 0,
                skipped: 1
            }
        );
        assert!(llm.requests()[0].prompt.contains("### Shape Constraints:\n<City> {}"));

        let saved = BatchFile::load(&path).unwrap();
        assert_eq!(
            saved.questions[0].status,
            Some(RetryStatus::Succeeded { attempt: 1 })
        );
        assert!(saved.questions[1].status.is_none());

        // A second pass leaves finished questions alone.
        let stats = generate_batch(&mut batch, &path, &ctx).await.unwrap();
        assert_eq!(stats.processed, 0);
        assert_eq!(llm.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_local_target_requires_shared_shape() {
        let dir = tempfile::tempdir().unwrap();
        let shapes = ShapeSource::new(dir.path(), ShapeType::Shex, true);
        let mut batch = batch_with(vec![Question::new(1, "q")]);
        let llm = ScriptedLlm::new(vec![Some("GOOD")]);
        let template = PromptTemplate::default();

        let ctx = GenerateContext {
            llm: &llm,
            executor: &KeywordGraph,
            template: &template,
            shapes: Some(&shapes),
            ontology: "local",
            target_is_local: true,
            policy: policy(0, 0.1),
            force: false,
        };
        let result = generate_batch(&mut batch, &dir.path().join("b.json"), &ctx).await;
        assert!(result.is_err());
        assert!(llm.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delay_is_awaited_between_attempts() {
        let delayed = RetryPolicy {
            retry_delay: Duration::from_secs(5),
            ..policy(3, 0.1)
        };

        let llm = ScriptedLlm::new(vec![Some("BAD"), None, Some("GOOD")]);
        let start = tokio::time::Instant::now();
        let outcome = run_retry_loop("PROMPT", &llm, &KeywordGraph, &delayed).await;
        assert_eq!(outcome.status, RetryStatus::Succeeded { attempt: 3 });
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(11), "elapsed {elapsed:?}");

        // No pause after the last allowed attempt.
        let single = RetryPolicy {
            max_retries: 0,
            ..delayed
        };
        let llm = ScriptedLlm::new(vec![Some("BAD")]);
        let start = tokio::time::Instant::now();
        run_retry_loop("PROMPT", &llm, &KeywordGraph, &single).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_llm_timeout_is_a_transient_failure() {
        use kgqa_core::llm::{LlmProvider, LlmSettings, OpenAiCompatibleClient};
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({
                        "choices": [{ "message": { "content": "GOOD" } }]
                    }))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let settings = LlmSettings {
            provider: LlmProvider::OpenAi,
            model: "gpt-4o-mini".to_string(),
            base_url: "unused".to_string(),
            api_key: Some("sk-test".to_string()),
            timeout: Some(Duration::from_secs(1)),
        };
        let llm = OpenAiCompatibleClient::with_base_url(settings, server.uri()).unwrap();

        let start = std::time::Instant::now();
        let outcome = run_retry_loop("PROMPT", &llm, &KeywordGraph, &policy(1, 0.1)).await;
        let elapsed = start.elapsed();

        assert_eq!(outcome.status, RetryStatus::ExhaustedRetries);
        assert!(outcome.attempts.is_empty());
        assert_eq!(outcome.transient_failures.len(), 2);
        assert_eq!(outcome.transient_failures[1].attempt, 2);
        assert!(elapsed >= Duration::from_secs(2), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "elapsed {elapsed:?}");
    }
}
