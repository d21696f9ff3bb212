use anyhow::Result;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::db::Database;
use crate::normalize::normalize;

/// Standard English stop words, excluded from the vocabulary.
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "herself",
    "him", "himself", "his", "how", "if", "in", "into", "is", "it", "its", "itself", "just",
    "me", "more", "most", "my", "myself", "no", "nor", "not", "now", "of", "off", "on", "once",
    "only", "or", "other", "our", "ours", "ourselves", "out", "over", "own", "same", "she",
    "should", "so", "some", "such", "than", "that", "the", "their", "theirs", "them",
    "themselves", "then", "there", "these", "they", "this", "those", "through", "to", "too",
    "under", "until", "up", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "you", "your", "yours", "yourself",
    "yourselves",
];

fn is_stop_word(term: &str) -> bool {
    STOP_WORDS.binary_search(&term).is_ok()
}

/// Terms of a document: normalized tokens of at least two characters, stop
/// words removed.
fn terms(text: &str) -> Vec<String> {
    normalize(text)
        .split_whitespace()
        .filter(|t| t.len() >= 2 && !is_stop_word(t))
        .map(|t| t.to_string())
        .collect()
}

/// One TF-IDF vector space fitted over a document set. Weights follow the
/// smoothed scheme: tf * (ln((1 + n) / (1 + df)) + 1), rows L2-normalized,
/// so cosine similarity reduces to a dot product.
pub struct TfidfSpace {
    vocab: Vec<String>,
    vectors: Vec<HashMap<usize, f64>>,
}

impl TfidfSpace {
    pub fn fit(documents: &[String]) -> Self {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut doc_terms: Vec<Vec<String>> = Vec::with_capacity(documents.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for doc in documents {
            let ts = terms(doc);
            let mut seen = std::collections::HashSet::new();
            for t in &ts {
                if seen.insert(t.clone()) {
                    *doc_freq.entry(t.clone()).or_insert(0) += 1;
                }
            }
            doc_terms.push(ts);
        }

        // Alphabetical vocabulary so term iteration order is deterministic.
        let mut vocab: Vec<String> = doc_freq.keys().cloned().collect();
        vocab.sort();
        for (i, t) in vocab.iter().enumerate() {
            index.insert(t.clone(), i);
        }

        let n = documents.len() as f64;
        let idf: Vec<f64> = vocab
            .iter()
            .map(|t| {
                let df = doc_freq[t] as f64;
                ((1.0 + n) / (1.0 + df)).ln() + 1.0
            })
            .collect();

        let vectors = doc_terms
            .into_iter()
            .map(|ts| {
                let mut counts: HashMap<usize, f64> = HashMap::new();
                for t in ts {
                    if let Some(&i) = index.get(&t) {
                        *counts.entry(i).or_insert(0.0) += 1.0;
                    }
                }
                for (i, w) in counts.iter_mut() {
                    *w *= idf[*i];
                }
                let norm: f64 = counts.values().map(|w| w * w).sum::<f64>().sqrt();
                if norm > 0.0 {
                    for w in counts.values_mut() {
                        *w /= norm;
                    }
                }
                counts
            })
            .collect();

        Self { vocab, vectors }
    }

    /// Cosine similarity between two fitted documents. Vectors are unit
    /// length, so this is a dot product; an all-zero vector yields 0.
    pub fn similarity(&self, a: usize, b: usize) -> f64 {
        let (small, large) = if self.vectors[a].len() <= self.vectors[b].len() {
            (&self.vectors[a], &self.vectors[b])
        } else {
            (&self.vectors[b], &self.vectors[a])
        };
        small
            .iter()
            .filter_map(|(i, w)| large.get(i).map(|v| w * v))
            .sum()
    }

    /// Top contributing terms between two fitted documents, by elementwise
    /// product of the two weights. Strictly positive contributions only,
    /// descending, ties broken by vocabulary order; at most `limit` entries.
    pub fn top_contributions(&self, a: usize, b: usize, limit: usize) -> Vec<(String, f64)> {
        let mut contributions: Vec<(usize, f64)> = self.vectors[a]
            .iter()
            .filter_map(|(i, w)| {
                self.vectors[b]
                    .get(i)
                    .map(|v| (*i, w * v))
                    .filter(|(_, c)| *c > 0.0)
            })
            .collect();
        contributions.sort_by(|x, y| x.0.cmp(&y.0));
        contributions.sort_by(|x, y| y.1.partial_cmp(&x.1).unwrap_or(std::cmp::Ordering::Equal));
        contributions
            .into_iter()
            .take(limit)
            .map(|(i, c)| (self.vocab[i].clone(), c))
            .collect()
    }
}

/// Cosine similarity of the resume against each job text, in job order.
/// One vector space is fitted over {resume, jobs...}; document 0 is the
/// resume.
pub fn score_jobs(resume_text: &str, job_texts: &[String]) -> Vec<f64> {
    let mut documents = Vec::with_capacity(job_texts.len() + 1);
    documents.push(resume_text.to_string());
    documents.extend(job_texts.iter().cloned());
    let space = TfidfSpace::fit(&documents);
    (1..documents.len()).map(|j| space.similarity(0, j)).collect()
}

/// Deep-dive for a single resume/job pair: overall similarity plus the top
/// ten contributing keywords.
pub fn score_pair_with_keywords(resume_text: &str, job_text: &str) -> (f64, Vec<(String, f64)>) {
    let documents = vec![resume_text.to_string(), job_text.to_string()];
    let space = TfidfSpace::fit(&documents);
    (space.similarity(0, 1), space.top_contributions(0, 1, 10))
}

/// Batch stage: score every stored job description against the resume and
/// write the lexical similarity column. A per-row write failure is logged
/// and skipped; the rest of the batch continues.
pub fn update_lexical_scores(db: &Database, resume_text: &str) -> Result<()> {
    let jobs = db.jobs_for_scoring()?;
    if jobs.is_empty() {
        info!("no job entries found to update TF-IDF scores");
        return Ok(());
    }
    let job_texts: Vec<String> = jobs.iter().map(|(_, desc)| desc.clone()).collect();
    let scores = score_jobs(resume_text, &job_texts);
    info!(count = scores.len(), "computed TF-IDF similarity scores");

    for ((job_id, _), score) in jobs.iter().zip(scores.iter()) {
        if let Err(e) = db.update_lexical_score(*job_id, *score) {
            warn!(job_id, error = %e, "failed to store TF-IDF score");
        }
    }
    Ok(())
}
