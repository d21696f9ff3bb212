mod config;
mod db;
mod digest;
mod embed;
mod extract;
mod jsearch;
mod models;
mod normalize;
mod rank;
mod tfidf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{ApiConfig, MailConfig, ScoreConfig};
use db::Database;
use embed::{Embedder, OpenAiEmbedder};
use jsearch::JobSearchClient;

#[derive(Parser)]
#[command(name = "jobscout")]
#[command(about = "Job search aggregation - scrape, score against a resume, rank, and email a digest")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database and run schema migrations
    Init,

    /// Search the job API and ingest postings
    Scrape {
        /// Search query, repeatable
        #[arg(short, long, default_value = "quantitative trading")]
        query: Vec<String>,

        /// Pages to request per query (roughly 10 jobs per page)
        #[arg(short, long, default_value = "10")]
        pages: u32,
    },

    /// Compute lexical and semantic similarity scores against a resume
    Score {
        /// Path to the resume text file
        #[arg(short, long, default_value = "resume.txt")]
        resume: PathBuf,

        /// Embedding model identifier
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Run the regex extraction pass over stored jobs
    Extract,

    /// Compute final fused scores and show the ranking
    Rank {
        /// Number of jobs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Deep-dive analysis: persist top-contributor explanations for the
    /// best match under each scoring method
    Analyze {
        /// Path to the resume text file
        #[arg(short, long, default_value = "resume.txt")]
        resume: PathBuf,

        /// Embedding model identifier
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Email the daily digest of top unemailed jobs
    Digest {
        /// Sender address (must be verified with the mail provider)
        #[arg(long)]
        sender: String,

        /// Recipient address
        #[arg(long)]
        recipient: String,

        /// Number of jobs to include
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Compose without sending or marking
        #[arg(long)]
        dry_run: bool,
    },

    /// Manage auxiliary company records
    Company {
        #[command(subcommand)]
        command: CompanyCommands,
    },

    /// List stored jobs
    List,

    /// Show one job with its parser results
    Show {
        /// Job ID
        id: i64,
    },

    /// Full pipeline: scrape, score, extract, rank
    Run {
        /// Search query, repeatable
        #[arg(short, long, default_value = "quantitative trading")]
        query: Vec<String>,

        /// Pages to request per query
        #[arg(short, long, default_value = "10")]
        pages: u32,

        /// Path to the resume text file
        #[arg(short, long, default_value = "resume.txt")]
        resume: PathBuf,

        /// Embedding model identifier
        #[arg(short, long)]
        model: Option<String>,
    },
}

#[derive(Subcommand)]
enum CompanyCommands {
    /// Add or overwrite a company by ticker
    Add {
        /// Ticker symbol
        ticker: String,

        /// Company name
        name: String,

        #[arg(short, long)]
        sector: Option<String>,

        #[arg(short, long)]
        industry: Option<String>,
    },

    /// Show a company by ticker
    Show {
        /// Ticker symbol
        ticker: String,
    },
}

fn load_resume(path: &PathBuf) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read resume file: {}", path.display()))
}

fn make_embedder(model: Option<String>) -> Result<Box<dyn Embedder>> {
    Ok(Box::new(OpenAiEmbedder::new(model)?))
}

fn run_scoring(db: &Database, resume: &PathBuf, model: Option<String>) -> Result<()> {
    let resume_text = load_resume(resume)?;
    if resume_text.trim().is_empty() {
        info!("resume is empty, nothing to score");
        return Ok(());
    }
    tfidf::update_lexical_scores(db, &resume_text)?;
    let embedder = make_embedder(model)?;
    embed::update_semantic_scores(db, embedder.as_ref(), &resume_text)?;
    Ok(())
}

fn print_ranking(db: &Database, limit: usize) -> Result<()> {
    let jobs = rank::top_ranked(db, limit)?;
    if jobs.is_empty() {
        println!("No jobs to rank.");
        return Ok(());
    }
    println!(
        "{:<5} {:<6} {:<30} {:<20} {:>8} {:>8} {:>8}",
        "RANK", "ID", "TITLE", "COMPANY", "TF-IDF", "SBERT", "FINAL"
    );
    println!("{}", "-".repeat(92));
    for (i, job) in jobs.iter().enumerate() {
        println!(
            "{:<5} {:<6} {:<30} {:<20} {:>8} {:>8} {:>8}",
            i + 1,
            job.id,
            truncate(&job.title, 28),
            truncate(&job.company, 18),
            fmt_score(job.similarity_score),
            fmt_score(job.similarity_score_sbert),
            fmt_score(job.final_similarity_score),
        );
    }
    Ok(())
}

fn fmt_score(score: Option<f64>) -> String {
    match score {
        Some(s) => format!("{s:.4}"),
        None => "-".to_string(),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let db = Database::open()?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Scrape { query, pages } => {
            db.ensure_initialized()?;
            let client = JobSearchClient::new(ApiConfig::from_env()?);
            let ingested = jsearch::scrape_jobs(&db, &client, &query, pages)?;
            println!("Ingested {ingested} new job(s).");
        }

        Commands::Score { resume, model } => {
            db.ensure_initialized()?;
            run_scoring(&db, &resume, model)?;
            println!("Similarity scores updated.");
        }

        Commands::Extract => {
            db.ensure_initialized()?;
            let cfg = ScoreConfig::default();
            extract::update_extracted_fields(&db, &cfg)?;
            println!("Extraction pass complete.");
        }

        Commands::Rank { limit } => {
            db.ensure_initialized()?;
            let cfg = ScoreConfig::default();
            rank::update_final_scores(&db, &cfg)?;
            rank::analyze_matches(&db, &cfg)?;
            print_ranking(&db, limit)?;
        }

        Commands::Analyze { resume, model } => {
            db.ensure_initialized()?;
            let resume_text = load_resume(&resume)?;
            let embedder = make_embedder(model)?;
            rank::run_deep_dive(&db, embedder.as_ref(), &resume_text)?;
            println!("Deep-dive analysis saved.");
        }

        Commands::Digest {
            sender,
            recipient,
            limit,
            dry_run,
        } => {
            db.ensure_initialized()?;
            let config = MailConfig::from_env(&sender, &recipient)?;
            let sent = digest::send_digest(&db, &config, limit, dry_run)?;
            if dry_run {
                println!("Would email {sent} job(s). (Dry run - nothing sent)");
            } else {
                println!("Emailed {sent} job(s).");
            }
        }

        Commands::Company { command } => {
            db.ensure_initialized()?;
            match command {
                CompanyCommands::Add {
                    ticker,
                    name,
                    sector,
                    industry,
                } => {
                    db.upsert_company(&name, &ticker, sector.as_deref(), industry.as_deref())?;
                    println!("Saved company '{name}' ({ticker}).");
                }
                CompanyCommands::Show { ticker } => match db.get_company(&ticker)? {
                    Some(company) => {
                        println!("Company #{}", company.id);
                        println!("Name: {}", company.name);
                        println!("Ticker: {}", company.ticker);
                        if let Some(sector) = &company.sector {
                            println!("Sector: {sector}");
                        }
                        if let Some(industry) = &company.industry {
                            println!("Industry: {industry}");
                        }
                    }
                    None => {
                        println!("Company '{ticker}' not found.");
                    }
                },
            }
        }

        Commands::List => {
            db.ensure_initialized()?;
            let jobs = db.list_jobs()?;
            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                println!(
                    "{:<6} {:<30} {:<20} {:<20} {:>8}",
                    "ID", "TITLE", "COMPANY", "LOCATION", "FINAL"
                );
                println!("{}", "-".repeat(88));
                for job in jobs {
                    println!(
                        "{:<6} {:<30} {:<20} {:<20} {:>8}",
                        job.id,
                        truncate(&job.title, 28),
                        truncate(&job.company, 18),
                        truncate(job.location.as_deref().unwrap_or("-"), 18),
                        fmt_score(job.final_similarity_score),
                    );
                }
            }
        }

        Commands::Show { id } => {
            db.ensure_initialized()?;
            match db.get_job(id)? {
                Some(job) => {
                    println!("Job #{}", job.id);
                    println!("Title: {}", job.title);
                    println!("Company: {}", job.company);
                    if let Some(location) = &job.location {
                        println!("Location: {location}");
                    }
                    if let Some(source) = &job.source_job_id {
                        println!("Source ID: {source}");
                    }
                    println!("Scraped: {}", job.scraped_date);
                    println!("TF-IDF score: {}", fmt_score(job.similarity_score));
                    println!("SBERT score: {}", fmt_score(job.similarity_score_sbert));
                    println!("Final score: {}", fmt_score(job.final_similarity_score));
                    if let Some(salary) = &job.salary_extracted {
                        println!("Salary: {salary}");
                    }
                    if let Some(link) = &job.apply_link {
                        println!("Apply: {link}");
                    }
                    if let Some(site) = &job.employer_website {
                        println!("Website: {site}");
                    }
                    if let Some(emailed) = &job.emailed_date {
                        println!("Emailed: {emailed}");
                    }

                    let results = db.parser_results_for_job(id)?;
                    if !results.is_empty() {
                        println!("\nParser results:");
                        for r in results {
                            println!(
                                "  [{}] #{} {} ({:.4})",
                                r.parser_type, r.ranking, r.keyword, r.score
                            );
                        }
                    }

                    if let Some(description) = &job.description {
                        println!("\n--- Description ---\n{description}");
                    }
                }
                None => {
                    println!("Job #{id} not found.");
                }
            }
        }

        Commands::Run {
            query,
            pages,
            resume,
            model,
        } => {
            db.ensure_initialized()?;
            info!("starting full scraping and matching pipeline");

            let client = JobSearchClient::new(ApiConfig::from_env()?);
            let ingested = jsearch::scrape_jobs(&db, &client, &query, pages)?;
            println!("Ingested {ingested} new job(s).");

            run_scoring(&db, &resume, model)?;

            let cfg = ScoreConfig::default();
            extract::update_extracted_fields(&db, &cfg)?;
            rank::update_final_scores(&db, &cfg)?;
            print_ranking(&db, 10)?;

            info!("pipeline complete");
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    // Back up to a char boundary so multibyte text never splits mid-char.
    let mut end = max.saturating_sub(3);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
