use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub source_job_id: Option<String>, // unique upstream id; NULL on legacy rows
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub description: Option<String>,
    pub ticker: Option<String>,
    pub posted_date: Option<String>,
    pub scraped_date: String,
    // Opaque payloads from the detail/salary endpoints, stored as text.
    pub details: Option<String>,
    pub estimated_salary: Option<String>,
    pub company_salary: Option<String>,
    // Derived by the scoring stages.
    pub similarity_score: Option<f64>,
    pub similarity_score_sbert: Option<f64>,
    pub final_similarity_score: Option<f64>,
    // Extracted by the regex stage.
    pub salary_extracted: Option<String>,
    pub location_match: Option<String>,
    pub education_match: Option<String>,
    pub posted_at: Option<String>,
    pub days_ago: Option<String>,
    pub apply_link: Option<String>,
    pub employer_website: Option<String>,
    pub emailed_date: Option<String>,
}

/// One top-contributor row explaining a job's score under one method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserResult {
    pub id: i64,
    pub job_id: i64,
    pub parser_type: String, // "TF-IDF" or "SBERT"
    pub keyword: String,
    pub ranking: i64, // 1 to 10
    pub score: f64,
    pub overall_similarity: f64,
    pub analysis_timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub ticker: String,
    pub sector: Option<String>,
    pub industry: Option<String>,
}
