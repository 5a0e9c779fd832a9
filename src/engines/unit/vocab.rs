use std::path::Path;

use serde::{Deserialize, Serialize};

use super::model::UnitError;

/// The closed, ordered set of words an engine can speak.
///
/// Words are stored lowercase; every lookup is case-insensitive. A word's
/// index is its position in the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
    words: Vec<String>,
}

impl Vocabulary {
    /// Build a vocabulary, lowercasing entries and dropping blanks and duplicates.
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for word in words {
            let word = word.as_ref().trim().to_lowercase();
            if !word.is_empty() && !out.contains(&word) {
                out.push(word);
            }
        }
        Self { words: out }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Position of `word` in the vocabulary, ignoring case.
    pub fn index_of(&self, word: &str) -> Option<usize> {
        let word = word.to_lowercase();
        self.words.iter().position(|w| *w == word)
    }

    pub fn contains(&self, word: &str) -> bool {
        self.index_of(word).is_some()
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        hardcoded_vocabulary()
    }
}

impl From<Vec<String>> for Vocabulary {
    fn from(words: Vec<String>) -> Self {
        Self::new(words)
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(vocab: Vocabulary) -> Self {
        vocab.words
    }
}

/// Load a vocabulary from a JSON file.
///
/// The file must contain a `"vocabulary"` field holding an array of words.
pub fn load_vocabulary(config_path: &Path) -> Result<Vocabulary, UnitError> {
    let content = std::fs::read_to_string(config_path)?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| UnitError::Config(format!("Failed to parse JSON: {e}")))?;

    let entries = json
        .get("vocabulary")
        .ok_or_else(|| UnitError::Config("Missing 'vocabulary' field".to_string()))?
        .as_array()
        .ok_or_else(|| UnitError::Config("'vocabulary' must be an array".to_string()))?;

    let mut words = Vec::with_capacity(entries.len());
    for entry in entries {
        let word = entry
            .as_str()
            .ok_or_else(|| UnitError::Config(format!("Non-string vocabulary entry {entry}")))?;
        words.push(word);
    }

    let vocab = Vocabulary::new(words);
    if vocab.is_empty() {
        return Err(UnitError::Config("'vocabulary' is empty".to_string()));
    }
    Ok(vocab)
}

/// Built-in ten-word Indonesian demo vocabulary.
///
/// Only used when no vocabulary is configured.
pub fn hardcoded_vocabulary() -> Vocabulary {
    Vocabulary::new([
        "aku", "kamu", "makan", "selamat", "siang", "malam", "pagi", "sore", "kita", "mereka",
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let vocab = hardcoded_vocabulary();
        assert_eq!(vocab.len(), 10);
        assert_eq!(vocab.index_of("Aku"), Some(0));
        assert_eq!(vocab.index_of("MEREKA"), Some(9));
        assert!(!vocab.contains("xyz"));
    }

    #[test]
    fn new_normalizes_and_dedups() {
        let vocab = Vocabulary::new(["Pagi", " pagi ", "", "Sore"]);
        assert_eq!(vocab.words(), &["pagi".to_string(), "sore".to_string()]);
    }

    #[test]
    fn loads_vocabulary_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"vocabulary": ["Halo", "dunia"]}"#).unwrap();

        let vocab = load_vocabulary(&path).unwrap();
        assert_eq!(vocab.words(), &["halo".to_string(), "dunia".to_string()]);
    }

    #[test]
    fn rejects_missing_vocabulary_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"words": []}"#).unwrap();

        assert!(matches!(load_vocabulary(&path), Err(UnitError::Config(_))));
    }
}
