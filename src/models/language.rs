use serde::{Deserialize, Serialize};

/// Fallback when no other source yields a language
pub const DEFAULT_LANGUAGE: &str = "en";

/// Ordered, duplicate-free and never empty list of ISO 639-1 codes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguagePreference(Vec<String>);

impl LanguagePreference {
    /// Builds a preference from raw codes
    ///
    /// Blank entries and duplicates are dropped. Returns `None` when nothing
    /// usable is left so the caller can fall through to the next source.
    pub fn from_codes<I, S>(codes: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut languages: Vec<String> = Vec::new();
        for code in codes {
            let code = code.as_ref().trim();
            if code.is_empty() || languages.iter().any(|l| l == code) {
                continue;
            }
            languages.push(code.to_string());
        }

        if languages.is_empty() {
            None
        } else {
            Some(Self(languages))
        }
    }

    /// Parses the legacy comma-joined representation ("fr,en")
    pub fn from_comma_separated(value: &str) -> Option<Self> {
        Self::from_codes(value.split(','))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Comma-joined representation, as sent back to the content side
    pub fn joined(&self) -> String {
        self.0.join(",")
    }
}

impl Default for LanguagePreference {
    fn default() -> Self {
        Self(vec![DEFAULT_LANGUAGE.to_string()])
    }
}
