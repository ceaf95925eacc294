use serde::{Deserialize, Serialize};

use super::execution::ExecutionResult;

/// One logical attempt: a query was obtained from the model and executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// 1-based position in the question's retry sequence.
    pub attempt: u32,
    pub temperature: f32,
    pub query: String,
    pub result: ExecutionResult,
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The model call itself produced nothing usable (network, API or empty content).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransientFailure {
    pub attempt: u32,
    pub temperature: f32,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RetryStatus {
    Succeeded { attempt: u32 },
    ExhaustedRetries,
}

impl RetryStatus {
    pub fn succeeded(&self) -> bool {
        matches!(self, RetryStatus::Succeeded { .. })
    }
}
