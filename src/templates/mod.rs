// Prompt templates for the two agents, rendered with Tera
//
// Resolution order:
// 1. Override directory ({templates_dir}/{name}.tera), if configured
// 2. Builtin - compiled-in default templates

pub mod builtin;

use log::{debug, info};
use serde::Serialize;
use std::path::Path;
use tera::{Context, Tera};

/// Context of the research prompt
#[derive(Debug, Clone, Serialize)]
pub struct ResearchContext<'a> {
    pub subject: &'a str,
    /// 1-based iteration number
    pub iteration: u32,
    pub total_iterations: u32,
}

/// Context of the synthesis prompt
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisContext<'a> {
    pub subject: &'a str,
    pub findings: &'a [String],
}

/// Compiled prompt templates
pub struct PromptTemplates {
    tera: Tera,
}

impl PromptTemplates {
    /// Compile the builtin templates
    pub fn builtin() -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        // Prompts are plain text, never HTML
        tera.autoescape_on(vec![]);
        for (name, content) in builtin::get_builtin_templates() {
            tera.add_raw_template(&name, &content)?;
        }
        Ok(Self { tera })
    }

    /// Compile the builtin templates, replacing any that have a
    /// `{name}.tera` file in `dir`
    pub fn load(dir: Option<&Path>) -> Result<Self, tera::Error> {
        let mut templates = Self::builtin()?;

        let Some(dir) = dir else {
            return Ok(templates);
        };

        for name in [builtin::RESEARCH_PROMPT, builtin::SYNTHESIS_PROMPT] {
            let path = dir.join(format!("{}.tera", name));
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    templates.tera.add_raw_template(name, &content)?;
                    info!("Template '{}' resolved from {:?}", name, path);
                }
                Err(_) => debug!("No override for template '{}' in {:?}", name, dir),
            }
        }

        Ok(templates)
    }

    pub fn render_research(&self, ctx: &ResearchContext<'_>) -> Result<String, tera::Error> {
        self.render(builtin::RESEARCH_PROMPT, ctx)
    }

    pub fn render_synthesis(&self, ctx: &SynthesisContext<'_>) -> Result<String, tera::Error> {
        self.render(builtin::SYNTHESIS_PROMPT, ctx)
    }

    fn render<T: Serialize>(&self, name: &str, ctx: &T) -> Result<String, tera::Error> {
        let context = Context::from_serialize(ctx)?;
        self.tera.render(name, &context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_research_prompt_mentions_subject_and_iteration() {
        let templates = PromptTemplates::builtin().unwrap();
        let prompt = templates
            .render_research(&ResearchContext {
                subject: "Acme <Logistics>",
                iteration: 2,
                total_iterations: 2,
            })
            .unwrap();

        assert!(prompt.contains("\"Acme <Logistics>\""));
        assert!(prompt.contains("Research iteration: 2 of 2."));
        assert!(prompt.contains("150 words"));
    }

    #[test]
    fn test_synthesis_prompt_lists_findings() {
        let templates = PromptTemplates::builtin().unwrap();
        let findings = vec!["finding-1".to_string(), "finding-2".to_string()];
        let prompt = templates
            .render_synthesis(&SynthesisContext {
                subject: "Acme",
                findings: &findings,
            })
            .unwrap();

        assert!(prompt.contains("- finding-1\n- finding-2"));
        assert!(prompt.contains("3 concrete"));
    }

    #[test]
    fn test_override_directory_replaces_builtin() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("research_prompt.tera"),
            "Research {{ subject }} #{{ iteration }}",
        )
        .unwrap();

        let templates = PromptTemplates::load(Some(temp_dir.path())).unwrap();
        let prompt = templates
            .render_research(&ResearchContext {
                subject: "Acme",
                iteration: 1,
                total_iterations: 2,
            })
            .unwrap();
        assert_eq!(prompt, "Research Acme #1");

        // Synthesis falls back to the builtin
        let synthesis = templates
            .render_synthesis(&SynthesisContext {
                subject: "Acme",
                findings: &[],
            })
            .unwrap();
        assert!(synthesis.contains("Juan"));
    }
}
