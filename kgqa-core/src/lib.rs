pub mod config;
pub mod error;
pub mod extract;
pub mod judge;
pub mod labels;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod shapes;
pub mod sparql;

pub use config::{KgqaConfig, TargetSpec};
pub use error::KgqaError;
pub use extract::extract_query;
pub use judge::{compare, compare_results, faulty_reason, is_degenerate, is_faulty};
pub use labels::LabelCache;
pub use llm::{
    create_llm, Completion, CompletionRequest, LlmBackend, LlmError, LlmProvider, LlmSettings,
    OpenAiCompatibleClient, TokenUsage,
};
pub use prompt::{PromptContext, PromptTemplate, SYSTEM_MESSAGE};
pub use shapes::{ShapeSource, ShapeType};
pub use sparql::{create_executor, EndpointSettings, LocalGraph, QueryExecutor, RemoteEndpoint};
