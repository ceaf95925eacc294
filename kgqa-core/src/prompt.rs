//! Prompt construction for query generation.
//!
//! Templates use `{name}` placeholders. Known names are `instructions`, `question`,
//! `ontology`, `shape` and `shape_type`; anything else is left as written. Values
//! are substituted in a single pass, so braces inside a question or shape are never
//! expanded again.

use std::path::Path;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::models::ExecutionResult;

/// System message sent with every generation call.
pub const SYSTEM_MESSAGE: &str = "You are a SPARQL expert. Only output valid SPARQL queries.";

/// Used when no system prompt file is configured.
pub const DEFAULT_INSTRUCTIONS: &str = "Translate the user query into one SPARQL query \
for the {ontology} knowledge graph. Use only classes and properties allowed by the \
{shape_type} shape constraints below. Output the query only, without explanations.";

pub const DEFAULT_TEMPLATE: &str = "{instructions}

### User Query:
{question}

### Shape Constraints:
{shape}

### Expected SPARQL Query:
```sparql
";

/// Characters of the previous result quoted back to the model on retry.
pub const FAILURE_RESULT_MAX_CHARS: usize = 1000;

fn placeholder_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").ok()).as_ref()
}

/// Values for one rendered prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub question: &'a str,
    pub ontology: &'a str,
    pub shape: &'a str,
    pub shape_type: &'a str,
}

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
    instructions: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE, DEFAULT_INSTRUCTIONS)
    }
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            instructions: instructions.into(),
        }
    }

    /// Load optional template and instruction files, falling back to the defaults.
    pub fn from_files(
        template_path: Option<&Path>,
        instructions_path: Option<&Path>,
    ) -> std::io::Result<Self> {
        let template = match template_path {
            Some(p) => std::fs::read_to_string(p)?,
            None => DEFAULT_TEMPLATE.to_string(),
        };
        let instructions = match instructions_path {
            Some(p) => std::fs::read_to_string(p)?.trim().to_string(),
            None => DEFAULT_INSTRUCTIONS.to_string(),
        };
        Ok(Self::new(template, instructions))
    }

    pub fn render(&self, ctx: &PromptContext<'_>) -> String {
        let instructions = substitute(&self.instructions, ctx, None);
        substitute(&self.template, ctx, Some(&instructions))
    }
}

fn substitute(text: &str, ctx: &PromptContext<'_>, instructions: Option<&str>) -> String {
    let Some(re) = placeholder_re() else {
        return text.to_string();
    };
    re.replace_all(text, |caps: &Captures<'_>| {
        let value = match &caps[1] {
            "question" => Some(ctx.question),
            "ontology" => Some(ctx.ontology),
            "shape" => Some(ctx.shape),
            "shape_type" => Some(ctx.shape_type),
            "instructions" => instructions,
            _ => None,
        };
        value.unwrap_or(&caps[0]).to_string()
    })
    .into_owned()
}

/// Append the previous failed query and its (truncated) result to a rendered prompt.
pub fn with_previous_failure(prompt: &str, query: &str, result: &ExecutionResult) -> String {
    format!(
        "{prompt}\n\n### Previous attempt (failed):\nQuery: {query}\nResult: {}\n\n### Revised SPARQL Query:\n```sparql",
        result.render_truncated(FAILURE_RESULT_MAX_CHARS)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PromptContext<'static> {
        PromptContext {
            question: "What is the capital of {France}?",
            ontology: "wikidata",
            shape: "<City> { wdt:P1376 @<Country> }",
            shape_type: "ShEx",
        }
    }

    #[test]
    fn test_default_template_layout() {
        let prompt = PromptTemplate::default().render(&ctx());
        assert!(prompt.starts_with("Translate the user query into one SPARQL query for the wikidata"));
        assert!(prompt.contains("ShEx shape constraints"));
        assert!(prompt.contains("### User Query:\nWhat is the capital of {France}?\n"));
        assert!(prompt.contains("### Shape Constraints:\n<City> { wdt:P1376 @<Country> }\n"));
        assert!(prompt.ends_with("### Expected SPARQL Query:\n```sparql\n"));
    }

    #[test]
    fn test_unknown_placeholders_left_verbatim() {
        let template = PromptTemplate::new("{instructions} | {question} | {model} | {}", "Be brief.");
        assert_eq!(
            template.render(&ctx()),
            "Be brief. | What is the capital of {France}? | {model} | {}"
        );
    }

    #[test]
    fn test_failure_block_is_appended() {
        let result = ExecutionResult::Bindings(vec![]);
        let prompt = with_previous_failure("BASE", "SELECT ?x WHERE {}", &result);
        assert_eq!(
            prompt,
            "BASE\n\n### Previous attempt (failed):\nQuery: SELECT ?x WHERE {}\nResult: []\n\n### Revised SPARQL Query:\n```sparql"
        );
    }

    #[test]
    fn test_failure_block_truncates_long_results() {
        let result = ExecutionResult::Bindings(vec!["x".repeat(5000)]);
        let prompt = with_previous_failure("BASE", "q", &result);
        assert!(prompt.contains("…(truncated)"));
        assert!(prompt.len() < 2000);
    }
}
