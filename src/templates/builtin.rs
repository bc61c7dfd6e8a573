// Built-in prompt templates

use std::collections::HashMap;

/// Built-in template names
pub const RESEARCH_PROMPT: &str = "research_prompt";
pub const SYNTHESIS_PROMPT: &str = "synthesis_prompt";

/// Get all built-in templates
pub fn get_builtin_templates() -> HashMap<String, String> {
    let mut templates = HashMap::new();
    templates.insert(
        RESEARCH_PROMPT.to_string(),
        RESEARCH_PROMPT_TEMPLATE.to_string(),
    );
    templates.insert(
        SYNTHESIS_PROMPT.to_string(),
        SYNTHESIS_PROMPT_TEMPLATE.to_string(),
    );
    templates
}

const RESEARCH_PROMPT_TEMPLATE: &str = r#"You are Pedro, a technical consultant specialized in AI and engineering.
Goal: research technical opportunities for: "{{ subject }}".
Research iteration: {{ iteration }}{% if total_iterations %} of {{ total_iterations }}{% endif %}.

Instructions:
1. Look for recent technologies, patents or digital use cases that are relevant.
2. Be technical, precise and analytical.
{% if iteration > 1 %}3. Go beyond what an earlier pass would already have covered.
4. Maximum 150 words.{% else %}3. Maximum 150 words.{% endif %}
"#;

const SYNTHESIS_PROMPT_TEMPLATE: &str = r#"You are Juan, a senior project manager and digital strategist.

Client context: "{{ subject }}"

Technical findings (from Pedro):
{% for finding in findings -%}
- {{ finding }}
{% endfor %}
Your task:
Write a final executive report in Markdown.
1. Executive summary: translate the technical findings into business value.
2. Value proposition: 3 concrete, profitable AI solutions.
3. Tone: professional, empathetic, results-oriented.
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_cover_both_agents() {
        let templates = get_builtin_templates();
        assert_eq!(templates.len(), 2);
        assert!(templates[RESEARCH_PROMPT].contains("{{ subject }}"));
        assert!(templates[SYNTHESIS_PROMPT].contains("{% for finding in findings"));
    }
}
