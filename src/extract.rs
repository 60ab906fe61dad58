//! Recovers a translation from raw, unstructured model output.
//!
//! The full-precision backend decodes the echoed prompt along with the answer
//! and has no hard stop after the target-language block, so extraction is
//! best-effort. Each strategy is a pure function `(output, code) -> Option`;
//! they are tried in order and the first non-empty result wins.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

/// Returned when nothing usable could be recovered from the output.
pub const FAILURE_SENTINEL: &str = "Translation failed";

pub type Strategy = fn(&str, &str) -> Option<String>;

/// Extraction strategies in the order they are tried.
pub const STRATEGIES: &[(&str, Strategy)] = &[
    ("marker pattern", marker_pattern),
    ("line scan", line_scan),
    ("labeled fallback", labeled_fallback),
];

static ANY_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<[a-z]{2}>").unwrap_or_else(|e| panic!("invalid marker regex: {e}"))
});

static LEADING_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z]+\s*:").unwrap_or_else(|e| panic!("invalid label regex: {e}"))
});

#[derive(Debug, Clone, Copy)]
enum Terminator {
    /// Next `<` that does not open a closing tag
    NextOpening,
    /// Next `<` of any kind
    AnyOpening,
    /// Next blank line
    BlankLine,
    /// End of output
    End,
}

#[derive(Debug, Clone, Copy)]
struct MarkerVariant {
    leading_bracket: bool,
    skip_whitespace: bool,
    terminator: Terminator,
}

const MARKER_VARIANTS: &[MarkerVariant] = &[
    MarkerVariant { leading_bracket: true, skip_whitespace: false, terminator: Terminator::NextOpening },
    MarkerVariant { leading_bracket: true, skip_whitespace: false, terminator: Terminator::End },
    MarkerVariant { leading_bracket: false, skip_whitespace: false, terminator: Terminator::AnyOpening },
    MarkerVariant { leading_bracket: true, skip_whitespace: true, terminator: Terminator::BlankLine },
];

fn marker_regex(code: &str, optional_bracket: bool) -> Option<Regex> {
    let pattern = if optional_bracket {
        format!("(?i)<?{}>", regex::escape(code))
    } else {
        format!("(?i){}", regex::escape(code))
    };
    Regex::new(&pattern).ok()
}

/// The full-precision cue ends in `<code>:`, so answers often start with a colon.
fn clean_capture(captured: &str) -> Option<String> {
    let cleaned = captured.trim().trim_start_matches(':').trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

fn cut(rest: &str, terminator: Terminator) -> &str {
    let end = match terminator {
        Terminator::NextOpening => rest
            .char_indices()
            .find(|&(i, c)| c == '<' && !rest[i + 1..].starts_with('/'))
            .map(|(i, _)| i),
        Terminator::AnyOpening => rest.find('<'),
        Terminator::BlankLine => rest.find("\n\n"),
        Terminator::End => None,
    };
    &rest[..end.unwrap_or(rest.len())]
}

/// Text following the first target marker, trying several marker spellings.
pub fn marker_pattern(output: &str, code: &str) -> Option<String> {
    for variant in MARKER_VARIANTS {
        let marker = if variant.leading_bracket {
            format!("<{}>", code)
        } else {
            format!("{}>", code)
        };
        let Some(re) = marker_regex(&marker, false) else {
            continue;
        };
        let Some(found) = re.find(output) else {
            continue;
        };

        let mut rest = &output[found.end()..];
        if variant.skip_whitespace {
            rest = rest.trim_start();
        }

        if let Some(text) = clean_capture(cut(rest, variant.terminator)) {
            return Some(text);
        }
    }
    None
}

/// Lines from the target marker up to the next language marker of any kind.
pub fn line_scan(output: &str, code: &str) -> Option<String> {
    let target = marker_regex(code, true)?;

    let mut found_marker = false;
    let mut lines: Vec<&str> = Vec::new();

    for line in output.split('\n') {
        if let Some(m) = target.find(line) {
            found_marker = true;
            let remainder = line[m.end()..].trim();
            if !remainder.is_empty() {
                lines.push(remainder);
            }
            continue;
        }

        if found_marker {
            if ANY_MARKER.is_match(line) {
                break;
            }
            lines.push(line);
        }
    }

    clean_capture(&lines.join("\n"))
}

/// Whatever follows a literal "Translation in" label.
pub fn labeled_fallback(output: &str, _code: &str) -> Option<String> {
    let (_, after) = output.split_once("Translation in")?;
    let without_markers = ANY_MARKER.replace_all(after.trim(), "");
    let without_label = LEADING_LABEL.replace(without_markers.trim(), "");

    let result = without_label.trim();
    if result.is_empty() {
        None
    } else {
        Some(result.to_string())
    }
}

/// Run the strategies in order; `None` means every strategy missed.
pub fn extract(output: &str, code: &str) -> Option<String> {
    STRATEGIES.iter().find_map(|(name, strategy)| {
        let result = strategy(output, code)?;
        debug!("Extracted translation with {} strategy", name);
        Some(result)
    })
}

/// Extract a translation, falling back to the output with the prompt and any
/// markers stripped, or [`FAILURE_SENTINEL`] when nothing remains.
pub fn recover(output: &str, prompt: &str, code: &str) -> String {
    if let Some(translation) = extract(output, code) {
        return translation;
    }

    debug!("No extraction strategy matched; stripping prompt from raw output");
    let residue = if !prompt.is_empty() && output.contains(prompt) {
        output.replace(prompt, "")
    } else {
        output.to_string()
    };
    let residue = ANY_MARKER.replace_all(&residue, "");
    let residue = residue.trim();

    if residue.is_empty() {
        FAILURE_SENTINEL.to_string()
    } else {
        residue.to_string()
    }
}
