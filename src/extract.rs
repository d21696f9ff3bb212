use anyhow::Result;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::config::ScoreConfig;
use crate::db::Database;
use crate::models::Job;

/// Placeholder stored when no extraction method succeeds. Downstream
/// consumers treat it as "no data", never as an error.
pub const EMPTY_FIELD: &str = "N/A";

// --- Bonus pattern matching ---

/// First salary figure in the text, in whole dollars. A trailing k/K on the
/// captured amount multiplies by 1000.
pub fn extract_salary(cfg: &ScoreConfig, text: &str) -> Option<i64> {
    let caps = cfg.salary_pattern.captures(text)?;
    let digits: String = caps[1].chars().filter(|c| c.is_ascii_digit()).collect();
    let amount: i64 = digits.parse().ok()?;
    if caps.get(2).is_some() {
        Some(amount * 1000)
    } else {
        Some(amount)
    }
}

pub fn location_mention(cfg: &ScoreConfig, text: &str) -> Option<String> {
    cfg.location_pattern
        .find(text)
        .map(|m| m.as_str().to_string())
}

pub fn education_mention(cfg: &ScoreConfig, text: &str) -> Option<String> {
    cfg.education_pattern
        .find(text)
        .map(|m| m.as_str().to_string())
}

/// Sum of the applicable bonuses for a job text. Each category contributes
/// at most once regardless of match count.
pub fn compute_bonus(cfg: &ScoreConfig, text: &str) -> f64 {
    let mut bonus = 0.0;
    if let Some(salary) = extract_salary(cfg, text) {
        if salary >= cfg.salary_threshold {
            bonus += cfg.salary_bonus;
        }
    }
    if location_mention(cfg, text).is_some() {
        bonus += cfg.location_bonus;
    }
    if education_mention(cfg, text).is_some() {
        bonus += cfg.education_bonus;
    }
    bonus
}

/// Match counts for the analysis pass: (salary, location, education).
pub fn count_matches(cfg: &ScoreConfig, text: &str) -> (usize, usize, usize) {
    (
        cfg.salary_pattern.find_iter(text).count(),
        cfg.location_pattern.find_iter(text).count(),
        cfg.education_pattern.find_iter(text).count(),
    )
}

// --- Detail payload decoding ---

/// A stored enrichment payload is either well-formed JSON or legacy
/// unstructured text; malformed JSON is kept as text and falls through to
/// the regex path rather than aborting extraction.
pub enum DetailPayload<'a> {
    Json(Value),
    Text(&'a str),
}

impl<'a> DetailPayload<'a> {
    pub fn decode(raw: &'a str) -> Self {
        match serde_json::from_str(raw) {
            Ok(value) => DetailPayload::Json(value),
            Err(e) => {
                debug!(error = %e, "payload is not JSON, treating as text");
                DetailPayload::Text(raw)
            }
        }
    }

    /// String value for a key, from the structured shape when available,
    /// otherwise via a targeted regex over the raw text. Legacy payloads
    /// quoted keys and values with either quote style.
    fn field(&self, key: &str) -> Option<String> {
        match self {
            DetailPayload::Json(value) => lookup_key(value, key)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
            DetailPayload::Text(raw) => pair_pattern()
                .captures_iter(raw)
                .find(|caps| &caps[1] == key)
                .map(|caps| caps[2].to_string()),
        }
    }
}

/// Depth-first search for a key anywhere in the payload; detail endpoints
/// nest the interesting fields under a data array.
fn lookup_key<'v>(value: &'v Value, key: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => {
            if let Some(v) = map.get(key) {
                return Some(v);
            }
            map.values().find_map(|v| lookup_key(v, key))
        }
        Value::Array(items) => items.iter().find_map(|v| lookup_key(v, key)),
        _ => None,
    }
}

/// Quoted key/value pairs in legacy payload text, compiled once and
/// filtered by key at the call site.
fn pair_pattern() -> &'static Regex {
    static PAIR: OnceLock<Regex> = OnceLock::new();
    PAIR.get_or_init(|| {
        Regex::new(r#"["'](\w+)["']\s*:\s*["']([^"']+)["']"#).expect("pair pattern")
    })
}

fn url_pattern() -> &'static Regex {
    static URL: OnceLock<Regex> = OnceLock::new();
    URL.get_or_init(|| Regex::new(r#"https?://[^\s"'<>]+"#).expect("url pattern"))
}

/// Last-resort constructed link: a search-engine query keyed by employer.
fn search_fallback(company: &str, suffix: &str) -> String {
    let query = company.trim().replace(' ', "+");
    format!("https://www.google.com/search?q={query}+{suffix}")
}

/// Link extraction fallback chain: structured payload value, targeted
/// regex, generic URL, then a constructed search query. The structured
/// value always wins even when a different URL also appears in the text.
fn extract_link(raw: Option<&str>, key: &str, company: &str, suffix: &str) -> String {
    if let Some(raw) = raw {
        let payload = DetailPayload::decode(raw);
        if let Some(value) = payload.field(key) {
            return value;
        }
        if let Some(m) = url_pattern().find(raw) {
            return m.as_str().to_string();
        }
    }
    if company.trim().is_empty() || company == EMPTY_FIELD {
        EMPTY_FIELD.to_string()
    } else {
        search_fallback(company, suffix)
    }
}

/// Plain-field fallback chain: structured payload value, targeted regex,
/// then the empty-result sentinel. No constructed fallback for non-links.
fn extract_text_field(raw: Option<&str>, key: &str) -> String {
    raw.map(DetailPayload::decode)
        .and_then(|p| p.field(key))
        .unwrap_or_else(|| EMPTY_FIELD.to_string())
}

// --- Per-job extraction ---

#[derive(Debug, PartialEq)]
pub struct ExtractedFields {
    pub salary: String,
    pub location_match: String,
    pub education_match: String,
    pub posted_at: String,
    pub days_ago: String,
    pub apply_link: String,
    pub employer_website: String,
}

pub fn extract_job_fields(cfg: &ScoreConfig, job: &Job) -> ExtractedFields {
    let text = format!(
        "{} {} {}",
        job.title,
        job.description.as_deref().unwrap_or(""),
        job.location.as_deref().unwrap_or("")
    );

    let salary = extract_salary(cfg, &text)
        .map(|s| s.to_string())
        .unwrap_or_else(|| EMPTY_FIELD.to_string());
    let location_match = location_mention(cfg, &text).unwrap_or_else(|| EMPTY_FIELD.to_string());
    let education_match = education_mention(cfg, &text).unwrap_or_else(|| EMPTY_FIELD.to_string());

    let details = job.details.as_deref();
    ExtractedFields {
        salary,
        location_match,
        education_match,
        posted_at: extract_text_field(details, "job_posted_at_datetime_utc"),
        days_ago: extract_text_field(details, "job_posted_at"),
        apply_link: extract_link(details, "job_apply_link", &job.company, "careers+apply"),
        employer_website: extract_link(details, "employer_website", &job.company, "official+website"),
    }
}

/// Batch stage: run the extractors over every stored job and write the
/// extracted columns. Per-row failures are logged and skipped.
pub fn update_extracted_fields(db: &Database, cfg: &ScoreConfig) -> Result<()> {
    let jobs = db.list_jobs()?;
    if jobs.is_empty() {
        info!("no job entries found to extract fields from");
        return Ok(());
    }
    let mut updated = 0usize;
    for job in &jobs {
        let fields = extract_job_fields(cfg, job);
        if let Err(e) = db.update_extracted_fields(
            job.id,
            &fields.salary,
            &fields.location_match,
            &fields.education_match,
            &fields.posted_at,
            &fields.days_ago,
            &fields.apply_link,
            &fields.employer_website,
        ) {
            warn!(job_id = job.id, error = %e, "failed to store extracted fields");
            continue;
        }
        updated += 1;
    }
    info!(updated, total = jobs.len(), "extraction pass complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ScoreConfig {
        ScoreConfig::default()
    }

    fn job_with(description: &str, details: Option<&str>) -> Job {
        Job {
            id: 1,
            source_job_id: Some("x".to_string()),
            title: "Analyst".to_string(),
            company: "Acme Capital".to_string(),
            location: None,
            description: Some(description.to_string()),
            ticker: None,
            posted_date: None,
            scraped_date: "2026-01-01".to_string(),
            details: details.map(|d| d.to_string()),
            estimated_salary: None,
            company_salary: None,
            similarity_score: None,
            similarity_score_sbert: None,
            final_similarity_score: None,
            salary_extracted: None,
            location_match: None,
            education_match: None,
            posted_at: None,
            days_ago: None,
            apply_link: None,
            employer_website: None,
            emailed_date: None,
        }
    }

    #[test]
    fn test_salary_with_separators() {
        assert_eq!(extract_salary(&cfg(), "salary of $90,000"), Some(90_000));
    }

    #[test]
    fn test_salary_k_multiplier() {
        assert_eq!(extract_salary(&cfg(), "pay up to $85k"), Some(85_000));
    }

    #[test]
    fn test_salary_first_match_only() {
        let text = "salary $95,000; other compensation $50,000";
        assert_eq!(extract_salary(&cfg(), text), Some(95_000));
    }

    #[test]
    fn test_salary_requires_cue_word() {
        assert_eq!(extract_salary(&cfg(), "we raised $200,000 in funding"), None);
    }

    #[test]
    fn test_bonus_additivity() {
        let c = cfg();
        let text = "Compensation: salary $90,000. Located in Denver. \
                    Master of Science in Finance required.";
        let expected = c.salary_bonus + c.location_bonus + c.education_bonus;
        assert!((compute_bonus(&c, text) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_salary_threshold_boundary() {
        let c = cfg();
        assert_eq!(compute_bonus(&c, "salary $79,999 in a remote role"), 0.0);
        assert!((compute_bonus(&c, "salary $80,000 in a remote role") - c.salary_bonus).abs() < 1e-9);
    }

    #[test]
    fn test_bonus_not_scaled_by_match_count() {
        let c = cfg();
        let once = compute_bonus(&c, "Denver office");
        let thrice = compute_bonus(&c, "Denver or Boulder, Colorado");
        assert!((once - thrice).abs() < 1e-9);
    }

    #[test]
    fn test_structured_value_beats_generic_url() {
        // A distinct generic URL is present in the same payload; the
        // structured apply link must still win.
        let details = r#"{"data": [{"job_apply_link": "https://jobs.example.com/apply/42",
                         "notes": "see https://unrelated.example.org/page"}]}"#;
        let job = job_with("desc", Some(details));
        let fields = extract_job_fields(&cfg(), &job);
        assert_eq!(fields.apply_link, "https://jobs.example.com/apply/42");
    }

    #[test]
    fn test_targeted_regex_on_legacy_text_payload() {
        // Legacy rows stored a stringified dict, not JSON.
        let details = "{'job_apply_link': 'https://jobs.example.com/apply/7', 'job_posted_at': '3 days ago'}";
        let job = job_with("desc", Some(details));
        let fields = extract_job_fields(&cfg(), &job);
        assert_eq!(fields.apply_link, "https://jobs.example.com/apply/7");
        assert_eq!(fields.days_ago, "3 days ago");
    }

    #[test]
    fn test_legacy_keys_matched_exactly() {
        // One key is a prefix of the other; each must resolve to its own
        // value.
        let details = "{'job_posted_at_datetime_utc': '2026-08-20T00:00:00Z', 'job_posted_at': '3 days ago'}";
        let job = job_with("desc", Some(details));
        let fields = extract_job_fields(&cfg(), &job);
        assert_eq!(fields.posted_at, "2026-08-20T00:00:00Z");
        assert_eq!(fields.days_ago, "3 days ago");
    }

    #[test]
    fn test_generic_url_fallback() {
        let details = "apply via https://careers.example.com/listing/9 today";
        let job = job_with("desc", Some(details));
        let fields = extract_job_fields(&cfg(), &job);
        assert_eq!(fields.apply_link, "https://careers.example.com/listing/9");
    }

    #[test]
    fn test_search_engine_last_resort_for_links() {
        let job = job_with("desc", Some("no links here"));
        let fields = extract_job_fields(&cfg(), &job);
        assert_eq!(
            fields.apply_link,
            "https://www.google.com/search?q=Acme+Capital+careers+apply"
        );
        assert_eq!(
            fields.employer_website,
            "https://www.google.com/search?q=Acme+Capital+official+website"
        );
    }

    #[test]
    fn test_sentinel_when_nothing_matches() {
        let job = job_with("a plain description with no signals", None);
        let fields = extract_job_fields(&cfg(), &job);
        assert_eq!(fields.salary, EMPTY_FIELD);
        assert_eq!(fields.location_match, EMPTY_FIELD);
        assert_eq!(fields.education_match, EMPTY_FIELD);
        assert_eq!(fields.posted_at, EMPTY_FIELD);
        assert_eq!(fields.days_ago, EMPTY_FIELD);
    }

    #[test]
    fn test_posted_at_from_structured_payload() {
        let details = r#"{"data": [{"job_posted_at_datetime_utc": "2026-08-20T00:00:00Z"}]}"#;
        let job = job_with("desc", Some(details));
        let fields = extract_job_fields(&cfg(), &job);
        assert_eq!(fields.posted_at, "2026-08-20T00:00:00Z");
    }

    #[test]
    fn test_batch_update_writes_columns() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db.insert_job(
            Some("a"),
            "Quant",
            "Acme",
            Some("Denver, US"),
            Some("salary $90,000, MSF preferred"),
            None,
            None,
        )
        .unwrap();

        update_extracted_fields(&db, &cfg()).unwrap();

        let job = db.get_job(1).unwrap().unwrap();
        assert_eq!(job.salary_extracted.as_deref(), Some("90000"));
        assert_eq!(job.location_match.as_deref(), Some("Denver"));
        assert_eq!(job.education_match.as_deref(), Some("MSF"));
    }
}
