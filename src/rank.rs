use anyhow::Result;
use tracing::{info, warn};

use crate::config::ScoreConfig;
use crate::db::Database;
use crate::embed::{self, Embedder};
use crate::extract::{compute_bonus, count_matches};
use crate::models::Job;
use crate::tfidf;

fn bonus_text(job: &Job) -> String {
    format!(
        "{} {} {}",
        job.title,
        job.description.as_deref().unwrap_or(""),
        job.location.as_deref().unwrap_or("")
    )
}

/// Final score for one job: the semantic base score (0.0 when unscored)
/// plus the regex-derived bonuses.
pub fn fuse_score(cfg: &ScoreConfig, job: &Job) -> f64 {
    let base = job.similarity_score_sbert.unwrap_or(0.0);
    base + compute_bonus(cfg, &bonus_text(job))
}

/// Batch stage: compute and persist the final fused score for every job.
pub fn update_final_scores(db: &Database, cfg: &ScoreConfig) -> Result<()> {
    let jobs = db.list_jobs()?;
    if jobs.is_empty() {
        info!("no job entries found to rank");
        return Ok(());
    }
    for job in &jobs {
        let score = fuse_score(cfg, job);
        if let Err(e) = db.update_final_score(job.id, score) {
            warn!(job_id = job.id, error = %e, "failed to store final score");
        }
    }
    info!(count = jobs.len(), "final similarity scores updated");
    Ok(())
}

/// Top N jobs by final score, descending, stable for ties.
pub fn top_ranked(db: &Database, limit: usize) -> Result<Vec<Job>> {
    db.ranked_jobs(limit)
}

fn top_by<F>(jobs: &[Job], score: F) -> Option<&Job>
where
    F: Fn(&Job) -> Option<f64>,
{
    let mut best: Option<(&Job, f64)> = None;
    for job in jobs {
        if let Some(s) = score(job) {
            // Strictly greater keeps the first occurrence on ties.
            match best {
                Some((_, current)) if s <= current => {}
                _ => best = Some((job, s)),
            }
        }
    }
    best.map(|(job, _)| job)
}

/// Deep-dive analysis: for the single top job under each method, persist
/// one parser-result row per top contributing term/token. Explanatory
/// artifact only, not exhaustive over the corpus.
pub fn run_deep_dive(db: &Database, embedder: &dyn Embedder, resume_text: &str) -> Result<()> {
    let jobs = db.list_jobs()?;
    if jobs.is_empty() {
        info!("no job entries found for deep-dive analysis");
        return Ok(());
    }

    if let Some(top) = top_by(&jobs, |j| j.similarity_score) {
        let description = top.description.as_deref().unwrap_or("");
        let (similarity, keywords) = tfidf::score_pair_with_keywords(resume_text, description);
        info!(
            job_id = top.id,
            title = %top.title,
            similarity,
            "top TF-IDF match"
        );
        db.save_parser_results(top.id, "TF-IDF", similarity, &keywords)?;
    } else {
        info!("no lexical scores present, skipping TF-IDF deep dive");
    }

    if let Some(top) = top_by(&jobs, |j| j.similarity_score_sbert) {
        let description = top.description.as_deref().unwrap_or("");
        match embed::token_contributions(embedder, resume_text, description) {
            Ok(tokens) => {
                let overall = top.similarity_score_sbert.unwrap_or(0.0);
                info!(
                    job_id = top.id,
                    title = %top.title,
                    overall,
                    "top semantic match"
                );
                db.save_parser_results(top.id, "SBERT", overall, &tokens)?;
            }
            Err(e) => warn!(job_id = top.id, error = %e, "semantic deep dive failed"),
        }
    } else {
        info!("no semantic scores present, skipping SBERT deep dive");
    }

    Ok(())
}

/// Analysis pass: log per-job and aggregate regex match counts across the
/// corpus.
pub fn analyze_matches(db: &Database, cfg: &ScoreConfig) -> Result<()> {
    let jobs = db.list_jobs()?;
    let mut totals = (0usize, 0usize, 0usize);
    for job in &jobs {
        let (salary, location, education) = count_matches(cfg, &bonus_text(job));
        totals.0 += salary;
        totals.1 += location;
        totals.2 += education;
        info!(
            job_id = job.id,
            salary_matches = salary,
            location_matches = location,
            education_matches = education,
            final_score = ?job.final_similarity_score,
        );
    }
    info!(
        jobs = jobs.len(),
        salary_matches = totals.0,
        location_matches = totals.1,
        education_matches = totals.2,
        "aggregate regex match counts"
    );
    Ok(())
}
