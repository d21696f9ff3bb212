use anyhow::{Context, Result, anyhow};
use serde_json::json;
use tracing::info;

use crate::config::MailConfig;
use crate::db::Database;
use crate::models::Job;

const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

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

fn fmt_score(score: Option<f64>) -> String {
    match score {
        Some(s) => format!("{s:.4}"),
        None => "-".to_string(),
    }
}

/// HTML table of the digest rows. Every emitted record carries the fields
/// the notification consumer is owed: identifiers, descriptive fields, the
/// extracted side-channel fields, and all three scores.
pub fn compose_email_body(jobs: &[Job]) -> String {
    let mut html = String::from("<html><body>");
    html.push_str(&format!("<h2>Top {} New Jobs for Today</h2>", jobs.len()));
    html.push_str("<table border='1' cellpadding='5' cellspacing='0'>");
    html.push_str(
        "<tr><th>Job ID</th><th>Title</th><th>Company</th><th>Location</th>\
         <th>Salary</th><th>Education</th><th>Posted</th><th>Days Ago</th>\
         <th>Apply</th><th>Website</th>\
         <th>TF-IDF</th><th>SBERT</th><th>Final</th><th>Description</th></tr>",
    );
    for job in jobs {
        let description = job.description.as_deref().unwrap_or("");
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td>\
             <td>{}</td><td>{}</td><td>{}</td><td>{}</td>\
             <td>{}</td><td>{}</td>\
             <td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            job.id,
            job.title,
            job.company,
            job.location.as_deref().unwrap_or("-"),
            job.salary_extracted.as_deref().unwrap_or("-"),
            job.education_match.as_deref().unwrap_or("-"),
            job.posted_at.as_deref().unwrap_or("-"),
            job.days_ago.as_deref().unwrap_or("-"),
            job.apply_link.as_deref().unwrap_or("-"),
            job.employer_website.as_deref().unwrap_or("-"),
            fmt_score(job.similarity_score),
            fmt_score(job.similarity_score_sbert),
            fmt_score(job.final_similarity_score),
            truncate(description, 200),
        ));
    }
    html.push_str("</table></body></html>");
    html
}

fn send_email(config: &MailConfig, subject: &str, body: &str) -> Result<()> {
    let payload = json!({
        "personalizations": [{"to": [{"email": config.recipient}]}],
        "from": {"email": config.sender},
        "subject": subject,
        "content": [{"type": "text/html", "value": body}],
    });

    let client = reqwest::blocking::Client::new();
    let response = client
        .post(SENDGRID_SEND_URL)
        .header("Authorization", format!("Bearer {}", config.api_key))
        .header("Content-Type", "application/json")
        .json(&payload)
        .send()
        .context("Failed to send digest request")?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(anyhow!("Mail API returned status {}: {}", status, body));
    }
    info!(%status, "digest email sent");
    Ok(())
}

/// Send the daily digest: select the top unemailed jobs by semantic score,
/// email them, and stamp the emailed marker so they are never selected
/// again. Dry run composes but neither sends nor marks.
pub fn send_digest(db: &Database, config: &MailConfig, limit: usize, dry_run: bool) -> Result<usize> {
    let jobs = db.top_unemailed(limit)?;
    if jobs.is_empty() {
        info!("no new jobs to email today");
        return Ok(0);
    }

    let body = compose_email_body(&jobs);
    let subject = format!("Daily Job Digest: Top {} New Jobs", jobs.len());

    if dry_run {
        info!(count = jobs.len(), "dry run, skipping send and mark");
        return Ok(jobs.len());
    }

    send_email(config, &subject, &body)?;
    let ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();
    db.mark_emailed(&ids)?;
    Ok(jobs.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_long_description() {
        let long = "x".repeat(300);
        let out = truncate(&long, 200);
        assert_eq!(out.len(), 200);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_truncate_multibyte_description() {
        // Postings routinely carry accents and smart punctuation; the cut
        // at byte 197 lands on the second byte of the 'é'.
        let description = format!("{}é plus trailing text", "x".repeat(196));
        let out = truncate(&description, 200);
        assert!(out.len() <= 200);
        assert!(out.ends_with("..."));
        assert!(out.starts_with(&"x".repeat(196)));
    }

    #[test]
    fn test_compose_body_includes_scores_and_fields() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db.insert_job(
            Some("a"),
            "Quant Analyst",
            "Acme",
            Some("Denver, US"),
            Some("desc"),
            None,
            None,
        )
        .unwrap();
        db.update_lexical_score(1, 0.1234).unwrap();
        db.update_semantic_score(1, 0.5678).unwrap();
        db.update_final_score(1, 0.7178).unwrap();

        let jobs = db.top_unemailed(10).unwrap();
        let body = compose_email_body(&jobs);
        assert!(body.contains("Quant Analyst"));
        assert!(body.contains("0.1234"));
        assert!(body.contains("0.5678"));
        assert!(body.contains("0.7178"));
        assert!(body.contains("Denver, US"));
    }

    #[test]
    fn test_dry_run_does_not_mark_emailed() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db.insert_job(Some("a"), "T", "C", None, Some("d"), None, None)
            .unwrap();
        db.update_semantic_score(1, 0.9).unwrap();

        let config = MailConfig {
            api_key: "unused".to_string(),
            sender: "me@example.com".to_string(),
            recipient: "you@example.com".to_string(),
        };
        let sent = send_digest(&db, &config, 10, true).unwrap();
        assert_eq!(sent, 1);
        assert_eq!(db.top_unemailed(10).unwrap().len(), 1);
    }
}
