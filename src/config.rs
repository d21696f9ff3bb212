use anyhow::{Context, Result};
use regex::Regex;
use std::env;
use std::time::Duration;

/// Everything the bonus extractor and ranker need, passed in explicitly so
/// scoring runs with different weights are testable in isolation.
#[derive(Debug, Clone)]
pub struct ScoreConfig {
    pub salary_bonus: f64,
    pub location_bonus: f64,
    pub education_bonus: f64,
    pub salary_threshold: i64,
    pub salary_pattern: Regex,
    pub location_pattern: Regex,
    pub education_pattern: Regex,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            salary_bonus: 0.10,
            location_bonus: 0.15,
            education_bonus: 0.10,
            salary_threshold: 80_000,
            // A currency amount within 20 characters of a salary cue word,
            // with optional thousands separators and a trailing k multiplier.
            salary_pattern: Regex::new(
                r"(?i)(?:salary|compensation|pay)[^$]{0,20}\$\s*(\d{1,3}(?:,\d{3})+|\d{1,3})\s*([kK])?",
            )
            .expect("salary pattern"),
            // Target-region variants: full name, abbreviations, truncations.
            location_pattern: Regex::new(
                r"(?i)\b(?:Colorado|Colo\.|CO|Co\.|Denver|Den\.?|Boulder|Bld\.?)\b",
            )
            .expect("location pattern"),
            // Master-of-Science-in-Finance phrasings.
            education_pattern: Regex::new(
                r"(?i)\b(?:Master(?:'s)?\s+Degree|Master(?:'s)?\s+of\s+(?:Science\s+in\s+Finance|Finance)|MSF|MSc(?:\s+Finance)?)\b",
            )
            .expect("education pattern"),
        }
    }
}

/// Required secret lookup with a uniform, actionable error message.
pub(crate) fn require_env(name: &str) -> Result<String> {
    env::var(name).with_context(|| {
        format!("{name} environment variable not set. Set it with: export {name}=your-key-here")
    })
}

/// Job-search API settings. The key comes from the environment; everything
/// else has fixed defaults matching the upstream service.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_host: String,
    pub api_key: String,
    pub max_retries: usize,
    pub retry_delay: Duration,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = require_env("JSEARCH_API_KEY")?;
        Ok(Self {
            base_url: "https://jsearch.p.rapidapi.com".to_string(),
            api_host: "jsearch.p.rapidapi.com".to_string(),
            api_key,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        })
    }
}

/// Digest delivery settings for the SendGrid-style mail API.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_key: String,
    pub sender: String,
    pub recipient: String,
}

impl MailConfig {
    pub fn from_env(sender: &str, recipient: &str) -> Result<Self> {
        let api_key = require_env("SENDGRID_API_KEY")?;
        Ok(Self {
            api_key,
            sender: sender.to_string(),
            recipient: recipient.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights() {
        let cfg = ScoreConfig::default();
        assert_eq!(cfg.salary_threshold, 80_000);
        assert!((cfg.salary_bonus + cfg.location_bonus + cfg.education_bonus - 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_salary_pattern_matches_cue_word() {
        let cfg = ScoreConfig::default();
        let caps = cfg
            .salary_pattern
            .captures("Base salary of $120,000 per year")
            .unwrap();
        assert_eq!(&caps[1], "120,000");
    }

    #[test]
    fn test_location_pattern_word_bounded() {
        let cfg = ScoreConfig::default();
        assert!(cfg.location_pattern.is_match("Hybrid role in Denver"));
        assert!(!cfg.location_pattern.is_match("Coordination skills required"));
    }

    #[test]
    fn test_require_env_reports_missing_variable() {
        // A name nothing sets; no process-global env mutation needed.
        let result = require_env("JOBSCOUT_KEY_THAT_IS_NEVER_SET");
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("JOBSCOUT_KEY_THAT_IS_NEVER_SET")
        );
    }
}
