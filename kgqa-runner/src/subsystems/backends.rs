//! Backend construction from the loaded configuration.
//!
//! Everything that can fail on bad configuration happens here, before any question
//! is touched, so the binary can exit early with a clear message.

use anyhow::Context;
use kgqa_core::config::{expand_path, KgqaConfig, TargetSpec};
use kgqa_core::llm::{create_llm, LlmBackend, LlmError, LlmSettings};
use kgqa_core::prompt::PromptTemplate;
use kgqa_core::shapes::ShapeSource;
use kgqa_core::sparql::{create_executor, QueryExecutor};

/// Create the generation client from `[llm]`.
pub fn create_llm_from_config(config: &KgqaConfig) -> Result<Box<dyn LlmBackend>, LlmError> {
    let settings = LlmSettings::from_config(&config.llm)?;
    tracing::info!(
        provider = %settings.provider,
        model = %settings.model,
        base_url = %settings.base_url,
        "LLM backend configured"
    );
    create_llm(settings)
}

/// Validate `[target]` and build its executor. Local graphs are loaded here.
pub fn create_executor_from_config(
    config: &KgqaConfig,
) -> anyhow::Result<(TargetSpec, Box<dyn QueryExecutor>)> {
    let target = config.target.resolve()?;
    let executor = create_executor(&target, &config.target)?;
    tracing::info!(executor = executor.name(), "Query target ready");
    Ok((target, executor))
}

pub fn load_prompt_template(config: &KgqaConfig) -> anyhow::Result<PromptTemplate> {
    let template = config.prompt.template_path.as_deref().map(expand_path);
    let instructions = config.prompt.system_prompt_path.as_deref().map(expand_path);
    PromptTemplate::from_files(template.as_deref(), instructions.as_deref())
        .context("failed to read prompt template or system prompt file")
}

/// Shape lookup for the target, or `None` when no shape directory is configured.
pub fn shape_source(config: &KgqaConfig, target: &TargetSpec) -> Option<ShapeSource> {
    config.prompt.shape_dir.as_deref().map(|dir| {
        ShapeSource::new(expand_path(dir), config.prompt.shape_type, target.is_local())
    })
}
