use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::language::LanguageDirectory;

/// A rendered prompt together with what the backends need to interpret the
/// model's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub text: String,
    pub target_code: String,
    /// Character count of the text being translated, not of the whole prompt
    pub source_chars: usize,
}

/// Renders backend-specific prompts; language names and codes come from the
/// injected directory.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    languages: LanguageDirectory,
}

impl PromptBuilder {
    pub fn new(languages: LanguageDirectory) -> Self {
        Self { languages }
    }

    pub fn languages(&self) -> &LanguageDirectory {
        &self.languages
    }

    /// Resolve both languages (names or codes) and render the prompt.
    pub fn prompt_for(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        chain_of_thought: bool,
        backend: BackendKind,
    ) -> Prompt {
        let source_name = self.languages.name_for(source_lang);
        let target_name = self.languages.name_for(target_lang);
        let target_code = self.languages.code_for(target_lang);

        Prompt {
            text: build(text, &source_name, &target_name, &target_code, chain_of_thought, backend),
            target_code,
            source_chars: text.chars().count(),
        }
    }
}

/// The quantized model continues straight after the trailing `<code>` marker.
/// The full-precision model tends to echo the prompt unless it gets the
/// explicit "Translation in" cue, except in chain-of-thought mode where both
/// share the same instruction.
pub fn build(
    text: &str,
    source_name: &str,
    target_name: &str,
    target_code: &str,
    chain_of_thought: bool,
    backend: BackendKind,
) -> String {
    if chain_of_thought {
        return format!(
            "Translate the following {} text into {} and explain it in detail:\n{} <{}>",
            source_name, target_name, text, target_code
        );
    }

    match backend {
        BackendKind::Quantized => format!(
            "Translate the following {} text into {}:\n{} <{}>",
            source_name, target_name, text, target_code
        ),
        BackendKind::FullPrecision => format!(
            "Translate the following {} text into {}:\n{}\n\nTranslation in {} <{}>:",
            source_name, target_name, text, target_name, target_code
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantized_prompt() {
        let prompt = build("Hello world", "English", "Polish", "pl", false, BackendKind::Quantized);
        assert_eq!(prompt, "Translate the following English text into Polish:\nHello world <pl>");
    }

    #[test]
    fn test_quantized_chain_of_thought() {
        let prompt = build("Hello", "English", "German", "de", true, BackendKind::Quantized);
        assert_eq!(
            prompt,
            "Translate the following English text into German and explain it in detail:\nHello <de>"
        );
    }

    #[test]
    fn test_full_precision_prompt_has_cue() {
        let prompt = build("Hello", "English", "Polish", "pl", false, BackendKind::FullPrecision);
        assert_eq!(
            prompt,
            "Translate the following English text into Polish:\nHello\n\nTranslation in Polish <pl>:"
        );
    }

    #[test]
    fn test_full_precision_chain_of_thought_matches_quantized() {
        let full = build("Hi", "English", "French", "fr", true, BackendKind::FullPrecision);
        let quantized = build("Hi", "English", "French", "fr", true, BackendKind::Quantized);
        assert_eq!(full, quantized);
    }

    #[test]
    fn test_prompt_for_resolves_languages() {
        let builder = PromptBuilder::new(LanguageDirectory::builtin());
        let prompt = builder.prompt_for("Zażółć", "pl", "English", false, BackendKind::Quantized);

        assert_eq!(prompt.target_code, "en");
        assert_eq!(prompt.source_chars, 6);
        assert_eq!(prompt.text, "Translate the following Polish text into English:\nZażółć <en>");
    }

    #[test]
    fn test_prompt_for_unknown_language() {
        let builder = PromptBuilder::new(LanguageDirectory::builtin());
        let prompt = builder.prompt_for("Hi", "English", "Elvish", false, BackendKind::Quantized);
        assert_eq!(prompt.target_code, "elvish");
        assert!(prompt.text.contains("into Elvish:"));
    }
}
