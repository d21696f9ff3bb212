use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::Value;
use std::thread;
use tracing::{error, info, warn};

use crate::config::ApiConfig;
use crate::db::Database;

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    status: Option<String>,
    #[serde(default)]
    data: Value,
    error: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobSummary {
    pub job_id: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub employer_name: Option<String>,
    #[serde(default)]
    pub job_city: Option<String>,
    #[serde(default)]
    pub job_country: Option<String>,
    #[serde(default)]
    pub job_description: Option<String>,
    #[serde(default)]
    pub job_posted_at_datetime_utc: Option<String>,
}

impl JobSummary {
    pub fn location_string(&self) -> String {
        let city = self.job_city.as_deref().unwrap_or("");
        let country = self.job_country.as_deref().unwrap_or("");
        if city.is_empty() && country.is_empty() {
            "Location not provided".to_string()
        } else {
            format!("{city}, {country}")
        }
    }
}

/// Blocking client for the JSearch-style search API. Rate limiting (429)
/// is retried with a fixed delay up to the configured budget; any other
/// failure skips that unit of work and the run continues with partial data.
pub struct JobSearchClient {
    config: ApiConfig,
    client: reqwest::blocking::Client,
}

impl JobSearchClient {
    pub fn new(config: ApiConfig) -> Self {
        Self {
            config,
            client: reqwest::blocking::Client::new(),
        }
    }

    fn call(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<ApiEnvelope> {
        let url = format!("{}{}", self.config.base_url, endpoint);
        for attempt in 0..self.config.max_retries {
            let response = self
                .client
                .get(&url)
                .header("x-rapidapi-key", &self.config.api_key)
                .header("x-rapidapi-host", &self.config.api_host)
                .query(params)
                .send();

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    warn!(endpoint, attempt, error = %e, "request failed");
                    // No point delaying once the attempts are spent.
                    if attempt + 1 < self.config.max_retries {
                        thread::sleep(self.config.retry_delay);
                    }
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 {
                warn!(endpoint, attempt, "rate limit hit, waiting before retry");
                if attempt + 1 < self.config.max_retries {
                    thread::sleep(self.config.retry_delay);
                }
                continue;
            }
            if !status.is_success() {
                return Err(anyhow!(
                    "Endpoint {} returned status {}",
                    endpoint,
                    status
                ));
            }

            let envelope: ApiEnvelope = response
                .json()
                .with_context(|| format!("Failed to parse response from {endpoint}"))?;
            if envelope.status.as_deref() != Some("OK") {
                return Err(anyhow!(
                    "API error from {}: {:?}",
                    endpoint,
                    envelope.error
                ));
            }
            return Ok(envelope);
        }
        Err(anyhow!(
            "Endpoint {} gave up after {} attempts",
            endpoint,
            self.config.max_retries
        ))
    }

    /// One page batch of job summaries for a query. Decode failures yield
    /// an empty page, logged.
    pub fn search(&self, query: &str, page: u32, num_pages: u32) -> Vec<JobSummary> {
        let page_s = page.to_string();
        let num_pages_s = num_pages.to_string();
        let params = [
            ("query", query),
            ("location", "us"),
            ("page", page_s.as_str()),
            ("num_pages", num_pages_s.as_str()),
        ];
        match self.call("/search", &params) {
            Ok(envelope) => match serde_json::from_value::<Vec<JobSummary>>(envelope.data) {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(query, error = %e, "failed to decode search results");
                    Vec::new()
                }
            },
            Err(e) => {
                error!(query, error = %e, "search failed");
                Vec::new()
            }
        }
    }

    /// Opaque detail payload for a job id, serialized back to text for
    /// storage.
    pub fn job_details(&self, job_id: &str) -> String {
        match self.call("/job-details", &[("job_id", job_id)]) {
            Ok(envelope) => envelope.data.to_string(),
            Err(e) => {
                warn!(job_id, error = %e, "job-details lookup failed");
                String::new()
            }
        }
    }

    pub fn estimated_salary(&self, job_title: &str) -> String {
        let params = [("job_title", job_title), ("location", "us")];
        match self.call("/estimated-salary", &params) {
            Ok(envelope) => envelope.data.to_string(),
            Err(e) => {
                warn!(job_title, error = %e, "estimated-salary lookup failed");
                String::new()
            }
        }
    }

    pub fn company_job_salary(&self, job_title: &str, company: &str) -> String {
        let params = [
            ("job_title", job_title),
            ("company", company),
            ("location", "us"),
        ];
        match self.call("/company-job-salary", &params) {
            Ok(envelope) => envelope.data.to_string(),
            Err(e) => {
                warn!(job_title, company, error = %e, "company-job-salary lookup failed");
                String::new()
            }
        }
    }
}

/// Run the search queries, ingest summaries (deduplicated on the upstream
/// job id), then fold the enrichment payloads into each new record.
pub fn scrape_jobs(db: &Database, client: &JobSearchClient, queries: &[String], num_pages: u32) -> Result<usize> {
    let mut ingested = 0usize;
    let mut enrich: Vec<JobSummary> = Vec::new();

    for query in queries {
        info!(query, "searching jobs");
        let jobs = client.search(query, 1, num_pages);
        info!(query, count = jobs.len(), "search returned jobs");
        for job in jobs {
            let title = job.job_title.as_deref().unwrap_or("N/A");
            let company = job.employer_name.as_deref().unwrap_or("N/A");
            let location = job.location_string();
            let inserted = db.insert_job(
                job.job_id.as_deref(),
                title,
                company,
                Some(&location),
                job.job_description.as_deref(),
                None,
                job.job_posted_at_datetime_utc.as_deref(),
            )?;
            if inserted {
                ingested += 1;
                enrich.push(job);
            }
        }
    }

    info!(count = enrich.len(), "updating details for new jobs");
    for job in &enrich {
        let Some(source_id) = job.job_id.as_deref() else {
            continue;
        };
        let details = client.job_details(source_id);
        let (estimated, company_salary) = match job.job_title.as_deref() {
            Some(title) if !title.trim().is_empty() => (
                client.estimated_salary(title),
                client.company_job_salary(title, job.employer_name.as_deref().unwrap_or("")),
            ),
            _ => (String::new(), String::new()),
        };
        if let Err(e) = db.update_job_payloads(source_id, &details, &estimated, &company_salary) {
            warn!(source_id, error = %e, "failed to store enrichment payloads");
        }
    }

    Ok(ingested)
}
