//! Spell-checking of entry notes against a shared word list.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

static WORD_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{L}][\p{L}']*").expect("invalid word regex"));

pub trait Dictionary: Send + Sync {
    fn is_known_word(&self, word: &str) -> bool;
}

/// Case-insensitive set of accepted words.
#[derive(Debug, Clone, Default)]
pub struct WordList {
    words: HashSet<String>,
}

impl WordList {
    /// Every whitespace-separated token of `text` is a word. Surrounding markup such as `#`
    /// headings or `*` bullets is stripped from each token.
    pub fn from_text(text: &str) -> Self {
        let mut list = WordList::default();
        list.extend_from_text(text);
        list
    }

    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        Ok(Self::from_text(&fs::read_to_string(path)?))
    }

    pub fn extend_from_text(&mut self, text: &str) {
        self.words.extend(
            text.split_whitespace()
                .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric() && c != '\''))
                .filter(|word| !word.is_empty())
                .map(str::to_lowercase),
        );
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl Dictionary for WordList {
    fn is_known_word(&self, word: &str) -> bool {
        self.words.contains(&word.to_lowercase())
    }
}

/// Unknown words in `notes`, in order of first appearance.
///
/// Issue references, numbers, single letters and all-caps acronyms are never reported.
pub fn misspelled_words(notes: &str, dictionary: &dyn Dictionary) -> Vec<String> {
    let mut seen = HashSet::new();
    WORD_REGEX
        .find_iter(notes)
        .map(|found| found.as_str().trim_end_matches('\''))
        .filter(|word| word.chars().count() > 1)
        .filter(|word| !word.chars().all(|c| !c.is_lowercase()))
        .filter(|word| !dictionary.is_known_word(word))
        .filter(|word| seen.insert(word.to_lowercase()))
        .map(str::to_string)
        .collect()
}
