//! Prompt template configuration for the three LLM tasks.
//!
//! Every required template key is an explicit field, with its absence policy
//! documented here instead of duck-typed settings lookups at call sites:
//!
//! - `lookup`: recoverable when absent — the classifier step is skipped and
//!   the orchestrator proceeds with the documented fallback defaults.
//! - `resolve`: fatal when absent at the point candidates need
//!   disambiguation. There is no safe default for "decide which of these is
//!   the same entity"; skipping silently would leave duplicates unresolved
//!   indefinitely.
//! - `merge`: fatal when absent at the point a merge is required, for the
//!   same reason.

use thiserror::Error;

/// A required prompt template is missing. Fatal: aborts the batch with a
/// descriptive message rather than silently skipping entities.
#[derive(Debug, Error)]
#[error("required prompt template '{key}' is not configured: {detail}")]
pub struct MissingTemplate {
    pub key: &'static str,
    pub detail: &'static str,
}

/// The set of prompt templates the pipeline renders before each LLM call.
///
/// Templates use `{{placeholder}}` substitution; unknown placeholders are
/// left in place so a malformed template is visible in the payload rather
/// than silently dropped.
#[derive(Debug, Clone, Default)]
pub struct PromptSet {
    pub lookup: Option<String>,
    pub resolve: Option<String>,
    pub merge: Option<String>,
}

impl PromptSet {
    /// Templates suitable for tests and for backends that accept a bare
    /// JSON payload (the placeholders expand to the full request body).
    pub fn passthrough() -> Self {
        Self {
            lookup: Some("{{request}}".to_string()),
            resolve: Some("{{request}}".to_string()),
            merge: Some("{{request}}".to_string()),
        }
    }

    pub fn with_lookup(mut self, template: impl Into<String>) -> Self {
        self.lookup = Some(template.into());
        self
    }

    pub fn with_resolve(mut self, template: impl Into<String>) -> Self {
        self.resolve = Some(template.into());
        self
    }

    pub fn with_merge(mut self, template: impl Into<String>) -> Self {
        self.merge = Some(template.into());
        self
    }

    /// The resolve template, or the fatal configuration error.
    pub fn require_resolve(&self) -> Result<&str, MissingTemplate> {
        self.resolve.as_deref().ok_or(MissingTemplate {
            key: "resolve",
            detail: "cannot disambiguate candidate entities without it",
        })
    }

    /// The merge template, or the fatal configuration error.
    pub fn require_merge(&self) -> Result<&str, MissingTemplate> {
        self.merge.as_deref().ok_or(MissingTemplate {
            key: "merge",
            detail: "cannot combine entry content without it",
        })
    }
}

/// Substitute `{{key}}` placeholders in a template.
pub fn render(template: &str, substitutions: &[(&str, &str)]) -> String {
    let mut rendered = template.to_string();
    for (key, value) in substitutions {
        rendered = rendered.replace(&format!("{{{{{}}}}}", key), value);
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_placeholders() {
        let out = render(
            "Entity: {{entity}}\nRegistry:\n{{registry}}",
            &[("entity", "character-Mira"), ("registry", "1. id: a1")],
        );
        assert_eq!(out, "Entity: character-Mira\nRegistry:\n1. id: a1");
    }

    #[test]
    fn unknown_placeholders_are_left_visible() {
        let out = render("{{entity}} {{typo}}", &[("entity", "x")]);
        assert_eq!(out, "x {{typo}}");
    }

    #[test]
    fn missing_resolve_template_is_a_config_error() {
        let prompts = PromptSet::default().with_lookup("{{request}}");
        let err = prompts.require_resolve().unwrap_err();
        assert!(err.to_string().contains("resolve"));
    }

    #[test]
    fn passthrough_has_all_templates() {
        let prompts = PromptSet::passthrough();
        assert!(prompts.require_resolve().is_ok());
        assert!(prompts.require_merge().is_ok());
        assert!(prompts.lookup.is_some());
    }
}
