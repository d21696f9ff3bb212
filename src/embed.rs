use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use crate::db::Database;
use crate::normalize::tokenize;

// --- Embedder trait ---

/// Encodes passages of text into fixed-size dense vectors. Model and
/// dimensionality are a configuration choice; the only contract is that one
/// embedder instance is used for both the resume and the jobs in a run.
pub trait Embedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn model_name(&self) -> &str;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    dot / (norm_a * norm_b).max(1e-10)
}

// --- OpenAI-compatible provider ---

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingEntry {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

/// Blocking embeddings client for OpenAI-compatible endpoints. Rate-limit
/// and server errors are retried with a fixed delay up to a fixed budget.
pub struct OpenAiEmbedder {
    api_key: String,
    model_id: String,
    endpoint: String,
    max_retries: usize,
    retry_delay: Duration,
    client: reqwest::blocking::Client,
}

impl OpenAiEmbedder {
    pub fn new(model_id: Option<String>) -> Result<Self> {
        let api_key = crate::config::require_env("OPENAI_API_KEY")?;
        let client = reqwest::blocking::Client::new();
        Ok(Self {
            api_key,
            model_id: model_id.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            endpoint: OPENAI_EMBEDDINGS_URL.to_string(),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            client,
        })
    }
}

impl Embedder for OpenAiEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        for attempt in 0..self.max_retries {
            let request = EmbeddingRequest {
                model: &self.model_id,
                input: texts,
            };
            let response = self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&request)
                .send();

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    warn!(attempt, error = %e, "embedding request failed");
                    // No point delaying once the attempts are spent.
                    if attempt + 1 < self.max_retries {
                        thread::sleep(self.retry_delay);
                    }
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                warn!(attempt, %status, "embedding endpoint busy, retrying");
                if attempt + 1 < self.max_retries {
                    thread::sleep(self.retry_delay);
                }
                continue;
            }
            if !status.is_success() {
                let body = response.text().unwrap_or_default();
                return Err(anyhow!(
                    "Embedding request failed with status {}: {}",
                    status,
                    body
                ));
            }

            let mut parsed: EmbeddingResponse = response
                .json()
                .context("Failed to parse embedding response")?;
            parsed.data.sort_by_key(|entry| entry.index);
            if parsed.data.len() != texts.len() {
                return Err(anyhow!(
                    "Embedding endpoint returned {} vectors for {} inputs",
                    parsed.data.len(),
                    texts.len()
                ));
            }
            return Ok(parsed.data.into_iter().map(|e| e.embedding).collect());
        }

        Err(anyhow!(
            "Embedding request gave up after {} attempts",
            self.max_retries
        ))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Semantic scoring ---

/// Cosine similarity of the resume embedding against each job embedding,
/// in job order. The resume is encoded alongside the jobs in one batch.
pub fn score_jobs(embedder: &dyn Embedder, resume_text: &str, job_texts: &[String]) -> Result<Vec<f64>> {
    let mut inputs = Vec::with_capacity(job_texts.len() + 1);
    inputs.push(resume_text.to_string());
    inputs.extend(job_texts.iter().cloned());
    let vectors = embedder.embed(&inputs)?;
    let resume_vec = &vectors[0];
    Ok(vectors[1..]
        .iter()
        .map(|v| cosine_similarity(resume_vec, v) as f64)
        .collect())
}

/// Deep-dive for one resume/job pair: encode each resume token separately
/// and score it against the job embedding. Tokens of length <= 1 are
/// dropped; duplicates are folded case-insensitively keeping the maximum
/// similarity; the top ten come back descending, ties in first-occurrence
/// order.
pub fn token_contributions(
    embedder: &dyn Embedder,
    resume_text: &str,
    job_text: &str,
) -> Result<Vec<(String, f64)>> {
    let tokens: Vec<String> = tokenize(resume_text)
        .into_iter()
        .filter(|t| t.len() > 1)
        .collect();
    if tokens.is_empty() {
        return Ok(Vec::new());
    }

    let job_embedding = embedder
        .embed(&[job_text.to_string()])?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No embedding returned for job text"))?;
    let token_embeddings = embedder.embed(&tokens)?;

    let mut order: Vec<String> = Vec::new();
    let mut best: HashMap<String, f64> = HashMap::new();
    for (token, embedding) in tokens.iter().zip(token_embeddings.iter()) {
        let sim = cosine_similarity(embedding, &job_embedding) as f64;
        match best.get_mut(token) {
            Some(existing) => {
                if sim > *existing {
                    *existing = sim;
                }
            }
            None => {
                order.push(token.clone());
                best.insert(token.clone(), sim);
            }
        }
    }

    let mut ranked: Vec<(String, f64)> = order
        .into_iter()
        .map(|t| {
            let s = best[&t];
            (t, s)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(10);
    Ok(ranked)
}

/// Batch stage: embed the resume and every stored job description, write
/// the semantic similarity column. Per-row write failures are logged and
/// skipped.
pub fn update_semantic_scores(db: &Database, embedder: &dyn Embedder, resume_text: &str) -> Result<()> {
    let jobs = db.jobs_for_scoring()?;
    if jobs.is_empty() {
        info!("no job entries found to update semantic scores");
        return Ok(());
    }
    let job_texts: Vec<String> = jobs.iter().map(|(_, desc)| desc.clone()).collect();
    let scores = score_jobs(embedder, resume_text, &job_texts)?;
    info!(
        count = scores.len(),
        model = embedder.model_name(),
        "computed semantic similarity scores"
    );

    for ((job_id, _), score) in jobs.iter().zip(scores.iter()) {
        if let Err(e) = db.update_semantic_score(*job_id, *score) {
            warn!(job_id, error = %e, "failed to store semantic score");
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::StubEmbedder;
    use super::*;

    #[test]
    fn test_cosine_identical_vectors() {
        let v = vec![0.5, 0.2, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_cosine_zero_vector_is_zero_not_nan() {
        let sim = cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]);
        assert!(sim.is_finite());
        assert_eq!(sim, 0.0);
    }

    #[test]
    fn test_score_jobs_orders_by_relevance() {
        let embedder = StubEmbedder::new();
        let scores = score_jobs(
            &embedder,
            "rust trading finance",
            &[
                "rust trading systems".to_string(),
                "coffee pastry shop".to_string(),
            ],
        )
        .unwrap();
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn test_token_contributions_dedup_and_cap() {
        let embedder = StubEmbedder::new();
        let contributions = token_contributions(
            &embedder,
            "Rust rust RUST trading python finance a b",
            "rust trading desk",
        )
        .unwrap();
        // Single-char tokens dropped, case-insensitive dedup applied.
        let tokens: Vec<&str> = contributions.iter().map(|(t, _)| t.as_str()).collect();
        assert!(tokens.contains(&"rust"));
        assert_eq!(tokens.iter().filter(|t| **t == "rust").count(), 1);
        assert!(!tokens.contains(&"a"));
        assert!(contributions.len() <= 10);
        for pair in contributions.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn test_embed_gives_up_without_trailing_delay() {
        // Port 1 refuses the connection immediately, so elapsed time is
        // dominated by the sleeps between attempts: two for three tries,
        // none after the last.
        let embedder = OpenAiEmbedder {
            api_key: "unused".to_string(),
            model_id: "m".to_string(),
            endpoint: "http://127.0.0.1:1/v1/embeddings".to_string(),
            max_retries: 3,
            retry_delay: Duration::from_millis(250),
            client: reqwest::blocking::Client::new(),
        };
        let start = std::time::Instant::now();
        assert!(embedder.embed(&["x".to_string()]).is_err());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_millis(750));
    }

    #[test]
    fn test_update_semantic_scores_writes_rows() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db.insert_job(Some("a"), "T", "C", None, Some("rust trading"), None, None)
            .unwrap();
        db.insert_job(Some("b"), "T", "C", None, Some("coffee pastry"), None, None)
            .unwrap();

        let embedder = StubEmbedder::new();
        update_semantic_scores(&db, &embedder, "rust trading finance").unwrap();

        let jobs = db.list_jobs().unwrap();
        assert!(jobs[0].similarity_score_sbert.unwrap() > jobs[1].similarity_score_sbert.unwrap());
    }
}
