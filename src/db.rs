use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, params};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::models::{Company, Job, ParserResult};

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

/// Additive schema migrations, in the order they were introduced. Each one
/// is idempotent: "duplicate column name" is success, anything else is a
/// real schema error.
const JOBS_MIGRATIONS: &[(&str, &str)] = &[
    ("similarity_score_sbert", "REAL"),
    ("final_similarity_score", "REAL"),
    ("salary_extracted", "TEXT"),
    ("location_match", "TEXT"),
    ("education_match", "TEXT"),
    ("posted_at", "TEXT"),
    ("days_ago", "TEXT"),
    ("apply_link", "TEXT"),
    ("employer_website", "TEXT"),
    ("emailed_date", "TEXT"),
];

impl Database {
    pub fn open() -> Result<Self> {
        let path = Self::default_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Ok(Self { conn, path })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn default_path() -> Result<PathBuf> {
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobscout") {
            Ok(proj_dirs.data_dir().join("jobscout.db"))
        } else {
            Ok(PathBuf::from("jobscout.db"))
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_job_id TEXT UNIQUE,
                title TEXT NOT NULL,
                company TEXT NOT NULL,
                location TEXT,
                description TEXT,
                ticker TEXT,
                posted_date TEXT,
                scraped_date TEXT NOT NULL DEFAULT (datetime('now')),
                details TEXT,
                estimated_salary TEXT,
                company_salary TEXT,
                similarity_score REAL
            );

            CREATE TABLE IF NOT EXISTS parser_results (
                result_id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER REFERENCES jobs(job_id),
                parser_type TEXT,
                keyword TEXT,
                ranking INTEGER,
                score REAL,
                overall_similarity REAL,
                analysis_timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS companies (
                company_id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                ticker TEXT NOT NULL UNIQUE,
                sector TEXT,
                industry TEXT
            );
            "#,
        )?;
        self.run_migrations()?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        for (column, decl) in JOBS_MIGRATIONS {
            self.add_jobs_column(column, decl)?;
        }
        Ok(())
    }

    fn add_jobs_column(&self, column: &str, decl: &str) -> Result<()> {
        let sql = format!("ALTER TABLE jobs ADD COLUMN {column} {decl}");
        match self.conn.execute(&sql, []) {
            Ok(_) => {
                info!(column, "added column to jobs table");
                Ok(())
            }
            Err(e) if e.to_string().to_lowercase().contains("duplicate column name") => {
                debug!(column, "column already exists");
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to add column '{column}'")),
        }
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='jobs'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Database not initialized. Run 'jobscout init' first."));
        }
        Ok(())
    }

    // --- Ingestion ---

    /// Insert a job summary from the search endpoint. Re-ingesting the same
    /// source id is a no-op; returns true only when a new row was created.
    pub fn insert_job(
        &self,
        source_job_id: Option<&str>,
        title: &str,
        company: &str,
        location: Option<&str>,
        description: Option<&str>,
        ticker: Option<&str>,
        posted_date: Option<&str>,
    ) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO jobs (source_job_id, title, company, location, description, ticker, posted_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![source_job_id, title, company, location, description, ticker, posted_date],
        )?;
        Ok(changed > 0)
    }

    pub fn update_job_payloads(
        &self,
        source_job_id: &str,
        details: &str,
        estimated_salary: &str,
        company_salary: &str,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE jobs SET details = ?1, estimated_salary = ?2, company_salary = ?3
             WHERE source_job_id = ?4",
            params![details, estimated_salary, company_salary, source_job_id],
        )?;
        Ok(())
    }

    // --- Scoring reads and writes ---

    /// All (job_id, description) pairs, in internal-id order. Rows with no
    /// description come back as empty text so score vectors stay parallel.
    pub fn jobs_for_scoring(&self) -> Result<Vec<(i64, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT job_id, COALESCE(description, '') FROM jobs ORDER BY job_id")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to load jobs for scoring")
    }

    pub fn update_lexical_score(&self, job_id: i64, score: f64) -> Result<()> {
        self.conn.execute(
            "UPDATE jobs SET similarity_score = ?1 WHERE job_id = ?2",
            params![score, job_id],
        )?;
        Ok(())
    }

    pub fn update_semantic_score(&self, job_id: i64, score: f64) -> Result<()> {
        self.conn.execute(
            "UPDATE jobs SET similarity_score_sbert = ?1 WHERE job_id = ?2",
            params![score, job_id],
        )?;
        Ok(())
    }

    pub fn update_final_score(&self, job_id: i64, score: f64) -> Result<()> {
        self.conn.execute(
            "UPDATE jobs SET final_similarity_score = ?1 WHERE job_id = ?2",
            params![score, job_id],
        )?;
        Ok(())
    }

    pub fn update_extracted_fields(
        &self,
        job_id: i64,
        salary: &str,
        location_match: &str,
        education_match: &str,
        posted_at: &str,
        days_ago: &str,
        apply_link: &str,
        employer_website: &str,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE jobs SET salary_extracted = ?1, location_match = ?2, education_match = ?3,
                    posted_at = ?4, days_ago = ?5, apply_link = ?6, employer_website = ?7
             WHERE job_id = ?8",
            params![
                salary,
                location_match,
                education_match,
                posted_at,
                days_ago,
                apply_link,
                employer_website,
                job_id
            ],
        )?;
        Ok(())
    }

    // --- Queries ---

    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let mut stmt = self.conn.prepare(&format!(
            "{JOB_COLUMNS_SQL} FROM jobs ORDER BY job_id"
        ))?;
        let rows = stmt.query_map([], Self::row_to_job)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list jobs")
    }

    pub fn get_job(&self, id: i64) -> Result<Option<Job>> {
        let result = self.conn.query_row(
            &format!("{JOB_COLUMNS_SQL} FROM jobs WHERE job_id = ?1"),
            [id],
            Self::row_to_job,
        );
        match result {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All rows with a final score, descending. SQLite's ORDER BY is stable
    /// with the job_id tiebreak, so equal scores keep scan order.
    pub fn ranked_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        let mut stmt = self.conn.prepare(&format!(
            "{JOB_COLUMNS_SQL} FROM jobs
             WHERE final_similarity_score IS NOT NULL
             ORDER BY final_similarity_score DESC, job_id ASC
             LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit as i64], Self::row_to_job)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to rank jobs")
    }

    /// Top unemailed rows by semantic score; rows already claimed by a
    /// digest are never selected again.
    pub fn top_unemailed(&self, limit: usize) -> Result<Vec<Job>> {
        let mut stmt = self.conn.prepare(&format!(
            "{JOB_COLUMNS_SQL} FROM jobs
             WHERE emailed_date IS NULL
             ORDER BY similarity_score_sbert DESC
             LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit as i64], Self::row_to_job)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to select unemailed jobs")
    }

    pub fn mark_emailed(&self, job_ids: &[i64]) -> Result<()> {
        let now = chrono::Local::now().to_rfc3339();
        for id in job_ids {
            self.conn.execute(
                "UPDATE jobs SET emailed_date = ?1 WHERE job_id = ?2",
                params![now, id],
            )?;
        }
        info!(count = job_ids.len(), "marked jobs as emailed");
        Ok(())
    }

    // --- Parser results ---

    pub fn save_parser_results(
        &self,
        job_id: i64,
        parser_type: &str,
        overall_similarity: f64,
        results: &[(String, f64)],
    ) -> Result<()> {
        for (ranking, (keyword, score)) in results.iter().enumerate() {
            self.conn.execute(
                "INSERT INTO parser_results (job_id, parser_type, keyword, ranking, score, overall_similarity)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![job_id, parser_type, keyword, (ranking + 1) as i64, score, overall_similarity],
            )?;
        }
        info!(
            count = results.len(),
            parser_type, job_id, "saved parser results"
        );
        Ok(())
    }

    pub fn parser_results_for_job(&self, job_id: i64) -> Result<Vec<ParserResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT result_id, job_id, parser_type, keyword, ranking, score, overall_similarity, analysis_timestamp
             FROM parser_results WHERE job_id = ?1 ORDER BY parser_type, ranking",
        )?;
        let rows = stmt.query_map([job_id], |row| {
            Ok(ParserResult {
                id: row.get(0)?,
                job_id: row.get(1)?,
                parser_type: row.get(2)?,
                keyword: row.get(3)?,
                ranking: row.get(4)?,
                score: row.get(5)?,
                overall_similarity: row.get(6)?,
                analysis_timestamp: row.get(7)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to load parser results")
    }

    // --- Companies ---

    /// Insert or overwrite the descriptive fields for a ticker.
    pub fn upsert_company(
        &self,
        name: &str,
        ticker: &str,
        sector: Option<&str>,
        industry: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO companies (name, ticker, sector, industry)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(ticker) DO UPDATE SET name = ?1, sector = ?3, industry = ?4",
            params![name, ticker, sector, industry],
        )?;
        Ok(())
    }

    pub fn get_company(&self, ticker: &str) -> Result<Option<Company>> {
        let result = self.conn.query_row(
            "SELECT company_id, name, ticker, sector, industry FROM companies WHERE ticker = ?1",
            [ticker],
            |row| {
                Ok(Company {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    ticker: row.get(2)?,
                    sector: row.get(3)?,
                    industry: row.get(4)?,
                })
            },
        );
        match result {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        Ok(Job {
            id: row.get(0)?,
            source_job_id: row.get(1)?,
            title: row.get(2)?,
            company: row.get(3)?,
            location: row.get(4)?,
            description: row.get(5)?,
            ticker: row.get(6)?,
            posted_date: row.get(7)?,
            scraped_date: row.get(8)?,
            details: row.get(9)?,
            estimated_salary: row.get(10)?,
            company_salary: row.get(11)?,
            similarity_score: row.get(12)?,
            similarity_score_sbert: row.get(13)?,
            final_similarity_score: row.get(14)?,
            salary_extracted: row.get(15)?,
            location_match: row.get(16)?,
            education_match: row.get(17)?,
            posted_at: row.get(18)?,
            days_ago: row.get(19)?,
            apply_link: row.get(20)?,
            employer_website: row.get(21)?,
            emailed_date: row.get(22)?,
        })
    }
}

const JOB_COLUMNS_SQL: &str = "SELECT job_id, source_job_id, title, company, location, description, ticker,
        posted_date, scraped_date, details, estimated_salary, company_salary,
        similarity_score, similarity_score_sbert, final_similarity_score,
        salary_extracted, location_match, education_match, posted_at, days_ago,
        apply_link, employer_website, emailed_date";

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db
    }

    #[test]
    fn test_init_twice_is_idempotent() {
        let db = test_db();
        // Second init re-runs every additive migration against existing columns.
        db.init().unwrap();
        let count: i64 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('jobs') WHERE name = 'emailed_date'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_insert_job_dedups_on_source_id() {
        let db = test_db();
        let first = db
            .insert_job(Some("abc-1"), "Quant", "Acme", None, Some("desc"), None, None)
            .unwrap();
        let second = db
            .insert_job(Some("abc-1"), "Quant", "Acme", None, Some("desc"), None, None)
            .unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(db.list_jobs().unwrap().len(), 1);
    }

    #[test]
    fn test_legacy_rows_tolerate_null_source_id() {
        let db = test_db();
        db.insert_job(None, "A", "X", None, None, None, None).unwrap();
        db.insert_job(None, "B", "Y", None, None, None, None).unwrap();
        assert_eq!(db.list_jobs().unwrap().len(), 2);
    }

    #[test]
    fn test_ranked_jobs_stable_descending() {
        let db = test_db();
        for (i, score) in [0.9, 0.7, 0.9, 0.2].iter().enumerate() {
            db.insert_job(
                Some(&format!("j{i}")),
                "T",
                "C",
                None,
                Some("d"),
                None,
                None,
            )
            .unwrap();
            db.update_final_score((i + 1) as i64, *score).unwrap();
        }
        let ranked = db.ranked_jobs(10).unwrap();
        let ids: Vec<i64> = ranked.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![1, 3, 2, 4]);
    }

    #[test]
    fn test_top_unemailed_excludes_claimed_rows() {
        let db = test_db();
        db.insert_job(Some("a"), "T", "C", None, Some("d"), None, None)
            .unwrap();
        db.insert_job(Some("b"), "T", "C", None, Some("d"), None, None)
            .unwrap();
        db.update_semantic_score(1, 0.9).unwrap();
        db.update_semantic_score(2, 0.5).unwrap();

        db.mark_emailed(&[1]).unwrap();

        let top = db.top_unemailed(10).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].id, 2);
    }

    #[test]
    fn test_upsert_company_overwrites_by_ticker() {
        let db = test_db();
        db.upsert_company("Acme Corp", "ACME", Some("Tech"), None)
            .unwrap();
        db.upsert_company("Acme Holdings", "ACME", Some("Finance"), Some("Banking"))
            .unwrap();
        let company = db.get_company("ACME").unwrap().unwrap();
        assert_eq!(company.name, "Acme Holdings");
        assert_eq!(company.sector.as_deref(), Some("Finance"));
        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM companies", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_parser_results_roundtrip() {
        let db = test_db();
        db.insert_job(Some("a"), "T", "C", None, Some("d"), None, None)
            .unwrap();
        db.save_parser_results(
            1,
            "TF-IDF",
            0.42,
            &[("trading".to_string(), 0.12), ("python".to_string(), 0.08)],
        )
        .unwrap();
        let results = db.parser_results_for_job(1).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].ranking, 1);
        assert_eq!(results[0].keyword, "trading");
        assert_eq!(results[1].ranking, 2);
        assert!((results[0].overall_similarity - 0.42).abs() < 1e-9);
    }
}
