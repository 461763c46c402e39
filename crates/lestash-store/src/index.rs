//! Derived full-text index over item rows.
//!
//! The index is never replicated. Local writes keep it current; merged
//! changes do not, so callers rebuild it after applying a remote batch.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use serde_json::Value;

/// Table whose rows feed the text index.
pub const INDEXED_TABLE: &str = "items";

/// Columns of [`INDEXED_TABLE`] that are tokenized.
pub const INDEXED_COLUMNS: [&str; 3] = ["title", "content", "author"];

/// Lowercased alphanumeric terms of `text`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Terms of the indexed columns of one row.
pub fn row_terms(values: &BTreeMap<String, Value>) -> BTreeSet<String> {
    INDEXED_COLUMNS
        .iter()
        .filter_map(|c| values.get(*c))
        .filter_map(Value::as_str)
        .flat_map(tokenize)
        .collect()
}

/// One search result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub pk: String,
    pub matched_terms: usize,
}

/// Inverted index from term to row primary keys.
#[derive(Debug, Default)]
pub struct TextIndex {
    postings: HashMap<String, BTreeSet<String>>,
    rows: HashMap<String, BTreeSet<String>>,
}

impl TextIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the indexed terms of `pk`.
    pub fn index_row(&mut self, pk: &str, values: &BTreeMap<String, Value>) {
        self.remove_row(pk);
        let terms = row_terms(values);
        if terms.is_empty() {
            return;
        }
        for term in &terms {
            self.postings.entry(term.clone()).or_default().insert(pk.to_string());
        }
        self.rows.insert(pk.to_string(), terms);
    }

    pub fn remove_row(&mut self, pk: &str) {
        let Some(terms) = self.rows.remove(pk) else {
            return;
        };
        for term in terms {
            if let Some(pks) = self.postings.get_mut(&term) {
                pks.remove(pk);
                if pks.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
    }

    /// Drop everything and index `rows` from scratch.
    pub fn rebuild<'a, I>(&mut self, rows: I)
    where
        I: IntoIterator<Item = (&'a str, &'a BTreeMap<String, Value>)>,
    {
        self.postings.clear();
        self.rows.clear();
        for (pk, values) in rows {
            self.index_row(pk, values);
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows matching any query term, best match first.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        rank_hits(
            tokenize(query)
                .into_iter()
                .collect::<BTreeSet<_>>()
                .iter()
                .filter_map(|t| self.postings.get(t))
                .flatten()
                .map(String::as_str),
            limit,
        )
    }
}

/// Count how many query terms hit each pk and order by that count, then pk.
pub fn rank_hits<'a>(pks: impl IntoIterator<Item = &'a str>, limit: usize) -> Vec<SearchHit> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for pk in pks {
        *counts.entry(pk).or_default() += 1;
    }
    let mut hits: Vec<SearchHit> = counts
        .into_iter()
        .map(|(pk, matched_terms)| SearchHit { pk: pk.to_string(), matched_terms })
        .collect();
    hits.sort_by(|a, b| b.matched_terms.cmp(&a.matched_terms).then_with(|| a.pk.cmp(&b.pk)));
    hits.truncate(limit);
    hits
}
