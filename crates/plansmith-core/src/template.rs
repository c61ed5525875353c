//! Prompt templates with named placeholders
//!
//! Templates reference upstream artifacts as `{{name}}`. The set of names is
//! closed: `section_text`, `section_id`, `section_title`, `previous`,
//! `rolling_summary`, `input`, and `stage.<stage name>`.

use crate::types::SectionInput;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is valid")
});

/// Artifact a template can ask for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Placeholder {
    /// Section source text
    SectionText,
    /// Section identifier
    SectionId,
    /// Section title from metadata
    SectionTitle,
    /// Merged output of the preceding stage
    Previous,
    /// Merged output of a named earlier stage
    Stage(String),
    /// Cross-section rolling summary
    RollingSummary,
    /// Sequential chain input
    Input,
}

impl Placeholder {
    /// Parse a placeholder name, `None` if unknown
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "section_text" => Some(Self::SectionText),
            "section_id" => Some(Self::SectionId),
            "section_title" => Some(Self::SectionTitle),
            "previous" => Some(Self::Previous),
            "rolling_summary" => Some(Self::RollingSummary),
            "input" => Some(Self::Input),
            other => other
                .strip_prefix("stage.")
                .filter(|stage| !stage.is_empty())
                .map(|stage| Self::Stage(stage.to_string())),
        }
    }

    /// Name of the upstream stage this placeholder depends on, if any
    ///
    /// `previous_stage` is the name of the stage immediately before the one
    /// being rendered.
    #[must_use]
    pub fn upstream<'a>(&'a self, previous_stage: Option<&'a str>) -> Option<&'a str> {
        match self {
            Self::Stage(name) => Some(name.as_str()),
            Self::Previous => previous_stage,
            _ => None,
        }
    }
}

/// Collect the placeholders of `template` in order of appearance
///
/// # Errors
/// Returns the first unknown placeholder name.
pub fn scan(template: &str) -> Result<Vec<Placeholder>, String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|caps| {
            let name = &caps[1];
            Placeholder::parse(name).ok_or_else(|| name.to_string())
        })
        .collect()
}

/// Artifacts available while rendering one prompt
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    /// Section being processed
    pub section: &'a SectionInput,
    /// Merged output of the preceding stage
    pub previous: Option<&'a str>,
    /// Merged outputs of completed stages by name
    pub stages: &'a HashMap<String, String>,
    /// Rendered rolling summary
    pub rolling_summary: &'a str,
    /// Sequential chain input
    pub input: Option<&'a str>,
}

impl TemplateContext<'_> {
    fn resolve(&self, placeholder: &Placeholder) -> String {
        match placeholder {
            Placeholder::SectionText => self.section.text.clone(),
            Placeholder::SectionId => self.section.id.to_string(),
            Placeholder::SectionTitle => self.section.title(),
            Placeholder::Previous => self.previous.unwrap_or_default().to_string(),
            Placeholder::Stage(name) => self.stages.get(name).cloned().unwrap_or_default(),
            Placeholder::RollingSummary => self.rolling_summary.to_string(),
            Placeholder::Input => self
                .input
                .or(self.previous)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// Fill every placeholder of `template` from `ctx`
///
/// Unknown placeholders are left verbatim; definitions are validated before
/// they reach rendering.
#[must_use]
pub fn render(template: &str, ctx: &TemplateContext<'_>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match Placeholder::parse(&caps[1]) {
            Some(placeholder) => ctx.resolve(&placeholder),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Template text with every placeholder removed
///
/// Used to bound the fixed overhead a template adds to its artifacts.
#[must_use]
pub fn strip_placeholders(template: &str) -> String {
    PLACEHOLDER.replace_all(template, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section() -> SectionInput {
        SectionInput::new("3.2", 4, "The unit SHALL boot in 5s.")
            .with_metadata(serde_json::json!({ "title": "Boot" }))
    }

    #[test]
    fn scan_recognises_all_names() {
        let found = scan(
            "{{section_text}} {{ section_id }} {{section_title}} {{previous}} \
             {{stage.extract}} {{rolling_summary}} {{input}}",
        )
        .unwrap();
        assert_eq!(
            found,
            vec![
                Placeholder::SectionText,
                Placeholder::SectionId,
                Placeholder::SectionTitle,
                Placeholder::Previous,
                Placeholder::Stage("extract".into()),
                Placeholder::RollingSummary,
                Placeholder::Input,
            ]
        );
    }

    #[test]
    fn scan_rejects_unknown() {
        assert_eq!(scan("{{section_text}} {{bogus}}").unwrap_err(), "bogus");
        assert_eq!(scan("{{stage.}}").unwrap_err(), "stage.");
    }

    #[test]
    fn render_fills_artifacts() {
        let section = section();
        let mut stages = HashMap::new();
        stages.insert("extract".to_string(), "REQ-1".to_string());
        let ctx = TemplateContext {
            section: &section,
            previous: Some("prev"),
            stages: &stages,
            rolling_summary: "earlier",
            input: None,
        };

        let out = render(
            "[{{section_title}}] {{section_text}} | {{stage.extract}} | {{input}} | {{rolling_summary}}",
            &ctx,
        );
        assert_eq!(out, "[Boot] The unit SHALL boot in 5s. | REQ-1 | prev | earlier");
    }

    #[test]
    fn render_missing_stage_is_empty() {
        let section = section();
        let stages = HashMap::new();
        let ctx = TemplateContext {
            section: &section,
            previous: None,
            stages: &stages,
            rolling_summary: "",
            input: None,
        };
        assert_eq!(render("<{{stage.nope}}>", &ctx), "<>");
    }

    #[test]
    fn upstream_dependencies() {
        assert_eq!(Placeholder::Previous.upstream(Some("a")), Some("a"));
        assert_eq!(Placeholder::Previous.upstream(None), None);
        assert_eq!(Placeholder::Stage("b".into()).upstream(Some("a")), Some("b"));
        assert_eq!(Placeholder::SectionText.upstream(Some("a")), None);
    }

    #[test]
    fn strip_leaves_fixed_text() {
        assert_eq!(strip_placeholders("Review: {{previous}}!"), "Review: !");
    }
}
