//! Name/code registry for the languages the model was trained on.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageEntry {
    pub name: String,
    pub code: String,
}

/// Immutable bidirectional lookup between language names and two-letter codes.
///
/// Lookups never fail: unknown input is passed through so a prompt can still
/// be built for a language the directory does not list.
#[derive(Debug, Clone)]
pub struct LanguageDirectory {
    entries: Vec<LanguageEntry>,
}

const BUILTIN: &[(&str, &str)] = &[
    ("Arabic", "ar"),
    ("Czech", "cs"),
    ("Danish", "da"),
    ("German", "de"),
    ("English", "en"),
    ("Spanish", "es"),
    ("Finnish", "fi"),
    ("French", "fr"),
    ("Croatian", "hr"),
    ("Hungarian", "hu"),
    ("Indonesian", "id"),
    ("Italian", "it"),
    ("Japanese", "ja"),
    ("Korean", "ko"),
    ("Malay", "ms"),
    ("Norwegian Bokmål", "nb"),
    ("Dutch", "nl"),
    ("Norwegian", "no"),
    ("Polish", "pl"),
    ("Portuguese", "pt"),
    ("Romanian", "ro"),
    ("Russian", "ru"),
    ("Swedish", "sv"),
    ("Thai", "th"),
    ("Turkish", "tr"),
    ("Ukrainian", "uk"),
    ("Vietnamese", "vi"),
    ("Chinese", "zh"),
];

impl LanguageDirectory {
    pub fn new(entries: Vec<LanguageEntry>) -> Self {
        Self { entries }
    }

    /// The languages supported by Seed-X models.
    pub fn builtin() -> Self {
        Self::new(
            BUILTIN
                .iter()
                .map(|(name, code)| LanguageEntry {
                    name: name.to_string(),
                    code: code.to_string(),
                })
                .collect(),
        )
    }

    pub fn entries(&self) -> &[LanguageEntry] {
        &self.entries
    }

    fn find(&self, input: &str) -> Option<&LanguageEntry> {
        let input = input.trim();
        self.entries.iter().find(|entry| {
            entry.code.eq_ignore_ascii_case(input) || entry.name.to_lowercase() == input.to_lowercase()
        })
    }

    /// Code for a name or code; unknown input comes back lower-cased.
    pub fn code_for(&self, input: &str) -> String {
        match self.find(input) {
            Some(entry) => entry.code.clone(),
            None => input.to_lowercase(),
        }
    }

    /// Name for a code or name; unknown input comes back unchanged.
    pub fn name_for(&self, input: &str) -> String {
        match self.find(input) {
            Some(entry) => entry.name.clone(),
            None => input.to_string(),
        }
    }
}

impl Default for LanguageDirectory {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_is_unique() {
        let directory = LanguageDirectory::builtin();
        let mut codes: Vec<_> = directory.entries().iter().map(|e| e.code.clone()).collect();
        let mut names: Vec<_> = directory.entries().iter().map(|e| e.name.to_lowercase()).collect();
        codes.sort();
        codes.dedup();
        names.sort();
        names.dedup();
        assert_eq!(codes.len(), directory.entries().len());
        assert_eq!(names.len(), directory.entries().len());
    }

    #[test]
    fn test_round_trips_for_registered_entries() {
        let directory = LanguageDirectory::builtin();
        for entry in directory.entries() {
            assert_eq!(directory.code_for(&directory.name_for(&entry.code)), entry.code);
            assert_eq!(directory.name_for(&directory.code_for(&entry.name)), entry.name);
        }
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let directory = LanguageDirectory::builtin();
        assert_eq!(directory.code_for("polish"), "pl");
        assert_eq!(directory.code_for("PL"), "pl");
        assert_eq!(directory.name_for("PL"), "Polish");
        assert_eq!(directory.name_for("norwegian bokmål"), "Norwegian Bokmål");
    }

    #[test]
    fn test_unregistered_input_passes_through() {
        let directory = LanguageDirectory::builtin();
        assert_eq!(directory.code_for("Klingon"), "klingon");
        assert_eq!(directory.name_for("Klingon"), "Klingon");
        assert_eq!(directory.code_for("XX"), "xx");
        assert_eq!(directory.name_for("XX"), "XX");
    }
}
