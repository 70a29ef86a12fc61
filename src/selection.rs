use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("unknown gene: {0}")]
    UnknownGene(String),
    #[error("gene vocabulary is empty")]
    EmptyVocabulary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneChange {
    pub previous: String,
    pub current: String,
}

#[derive(Debug, Default)]
pub struct Matches<'a> {
    pub names: Vec<&'a str>,
    pub total: usize,
}

/// Currently selected gene, always a member of a fixed vocabulary.
pub struct GeneSelector {
    vocabulary: Vec<String>,
    index: HashMap<String, usize>,
    current: usize,
    /// Text typed into the autocomplete input.
    pub query: String,
}

impl GeneSelector {
    pub fn new(vocabulary: Vec<String>, default_gene: &str) -> Result<Self, SelectError> {
        let mut unique = Vec::with_capacity(vocabulary.len());
        let mut index = HashMap::with_capacity(vocabulary.len());
        for name in vocabulary {
            if index.contains_key(&name) {
                warn!("duplicate gene name {name} ignored");
                continue;
            }
            index.insert(name.clone(), unique.len());
            unique.push(name);
        }
        if unique.is_empty() {
            return Err(SelectError::EmptyVocabulary);
        }
        let current = match index.get(default_gene) {
            Some(&i) => i,
            None => {
                warn!(
                    "default gene {default_gene} not in vocabulary, using {}",
                    unique[0]
                );
                0
            }
        };
        Ok(Self {
            query: unique[current].clone(),
            vocabulary: unique,
            index,
            current,
        })
    }

    pub fn current(&self) -> &str {
        &self.vocabulary[self.current]
    }

    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    /// `Ok(None)` when `name` is already selected.
    pub fn select(&mut self, name: &str) -> Result<Option<GeneChange>, SelectError> {
        let &idx = self
            .index
            .get(name)
            .ok_or_else(|| SelectError::UnknownGene(name.to_string()))?;
        self.query = name.to_string();
        if idx == self.current {
            return Ok(None);
        }
        let previous = self.current().to_string();
        self.current = idx;
        debug!(from = %previous, to = name, "gene selected");
        Ok(Some(GeneChange {
            previous,
            current: name.to_string(),
        }))
    }

    /// Exact name, or the single case-insensitive match.
    pub fn resolve(&self, text: &str) -> Option<&str> {
        let text = text.trim();
        if let Some(&i) = self.index.get(text) {
            return Some(&self.vocabulary[i]);
        }
        let mut found = self
            .vocabulary
            .iter()
            .filter(|name| name.eq_ignore_ascii_case(text));
        match (found.next(), found.next()) {
            (Some(name), None) => Some(name),
            _ => None,
        }
    }

    /// Case-insensitive autocomplete: prefix matches first, then substring
    /// matches, each in vocabulary order. Empty query lists everything.
    pub fn matches(&self, query: &str, limit: usize) -> Matches<'_> {
        let needle = query.trim().to_ascii_lowercase();
        let mut prefix = Vec::new();
        let mut inner = Vec::new();
        for name in &self.vocabulary {
            let lower = name.to_ascii_lowercase();
            if lower.starts_with(&needle) {
                prefix.push(name.as_str());
            } else if lower.contains(&needle) {
                inner.push(name.as_str());
            }
        }
        let total = prefix.len() + inner.len();
        let mut names = prefix;
        names.extend(inner);
        names.truncate(limit);
        Matches { names, total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector() -> GeneSelector {
        let vocab = ["ACTB", "GAPDH", "GAP43", "MYGAP", "VIM"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        GeneSelector::new(vocab, "GAPDH").unwrap()
    }

    #[test]
    fn starts_on_default_gene() {
        let s = selector();
        assert_eq!(s.current(), "GAPDH");
        assert_eq!(s.query, "GAPDH");
    }

    #[test]
    fn missing_default_falls_back_to_first_gene() {
        let s = GeneSelector::new(vec!["VIM".into(), "ACTB".into()], "GAPDH").unwrap();
        assert_eq!(s.current(), "VIM");
    }

    #[test]
    fn empty_vocabulary_is_rejected() {
        assert_eq!(
            GeneSelector::new(Vec::new(), "GAPDH").err(),
            Some(SelectError::EmptyVocabulary)
        );
    }

    #[test]
    fn unknown_gene_leaves_selection_unchanged() {
        let mut s = selector();
        assert_eq!(
            s.select("UNKNOWNGENE"),
            Err(SelectError::UnknownGene("UNKNOWNGENE".into()))
        );
        assert_eq!(s.current(), "GAPDH");
    }

    #[test]
    fn reselecting_current_gene_is_not_a_change() {
        let mut s = selector();
        assert_eq!(s.select("GAPDH"), Ok(None));
        let change = s.select("VIM").unwrap().unwrap();
        assert_eq!(change.previous, "GAPDH");
        assert_eq!(change.current, "VIM");
        assert_eq!(s.current(), "VIM");
    }

    #[test]
    fn prefix_matches_come_before_substring_matches() {
        let s = selector();
        let m = s.matches("gap", 10);
        assert_eq!(m.names, vec!["GAPDH", "GAP43", "MYGAP"]);
        assert_eq!(m.total, 3);

        let limited = s.matches("", 2);
        assert_eq!(limited.names, vec!["ACTB", "GAPDH"]);
        assert_eq!(limited.total, 5);
    }

    #[test]
    fn resolve_accepts_case_insensitive_unique_match() {
        let s = selector();
        assert_eq!(s.resolve(" vim "), Some("VIM"));
        assert_eq!(s.resolve("GAP43"), Some("GAP43"));
        assert_eq!(s.resolve("gap"), None);
    }
}
