// Turning generation results (or failures) into persisted text

use crate::generation::{Generation, GenerationError, SourceCitation};

/// Prefix of any contribution that stands in for a failed generation call
pub const ERROR_MARKER: &str = "[ERROR]";

pub const EMPTY_RESEARCH_FALLBACK: &str = "No relevant information was found in this search.";
pub const EMPTY_REPORT_FALLBACK: &str = "The final report could not be generated.";

/// Whether a finding or report stands in for a failed generation call
pub fn is_error_content(content: &str) -> bool {
    content.starts_with(ERROR_MARKER)
}

/// Render a generation failure as a contribution
pub fn error_text(err: &GenerationError) -> String {
    match &err.details {
        Some(details) => format!("{} {} ({})", ERROR_MARKER, err, details),
        None => format!("{} {}", ERROR_MARKER, err),
    }
}

/// Text of one research iteration
pub fn research_text(result: Result<Generation, GenerationError>) -> String {
    match result {
        Ok(generation) => {
            let text = generation.text.trim();
            let text = if text.is_empty() {
                EMPTY_RESEARCH_FALLBACK
            } else {
                text
            };
            with_sources(text, &generation.sources)
        }
        Err(err) => error_text(&err),
    }
}

/// Text of the final report. Never empty.
pub fn report_text(result: Result<Generation, GenerationError>) -> String {
    match result {
        Ok(generation) if generation.text.trim().is_empty() => EMPTY_REPORT_FALLBACK.to_string(),
        Ok(generation) => generation.text.trim().to_string(),
        Err(err) => error_text(&err),
    }
}

fn with_sources(text: &str, sources: &[SourceCitation]) -> String {
    if sources.is_empty() {
        return text.to_string();
    }

    let mut out = format!("{}\n\nSources:", text);
    for source in sources {
        out.push_str(&format!("\n- [{}]({})", source.title, source.url));
    }
    out
}
