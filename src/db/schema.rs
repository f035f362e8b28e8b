use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identity::VoterIdentity;

pub const QUESTION_MIN_LEN: usize = 5;
pub const QUESTION_MAX_LEN: usize = 200;
pub const OPTIONS_MIN: usize = 2;
pub const OPTIONS_MAX: usize = 10;
pub const OPTION_TEXT_MAX_LEN: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollOption {
    pub id: String,
    pub text: String,
    /// Derived at read time from the vote ledger; the stored value is never trusted.
    #[serde(default)]
    pub votes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PollSettings {
    #[serde(default)]
    pub allow_multiple_selections: bool,
    #[serde(default)]
    pub show_results_before_voting: bool,
    #[serde(default)]
    pub allow_change_vote: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Poll {
    pub id: String,
    pub question: String,
    pub options: Vec<PollOption>,
    pub settings: PollSettings,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub total_votes: u64,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct Vote {
    pub id: String,
    pub poll_id: String,
    pub user_id: Option<String>,
    pub ip_hash: Option<String>,
    pub selected_options: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Vote {
    /// Exactly one of `user_id`/`ip_hash` is expected; a row carrying
    /// neither has no reconcilable identity.
    pub fn voter(&self) -> Option<VoterIdentity> {
        match (&self.user_id, &self.ip_hash) {
            (Some(id), _) => Some(VoterIdentity::User(id.clone())),
            (None, Some(hash)) => Some(VoterIdentity::Anonymous(hash.clone())),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub created_polls_count: i64,
}

#[derive(Debug, Clone)]
pub struct NewPoll {
    pub question: String,
    pub options: Vec<String>,
    pub settings: PollSettings,
}

#[derive(Debug, Clone)]
pub struct NewVote {
    pub poll_id: String,
    pub user_id: Option<String>,
    pub ip_hash: Option<String>,
    pub selected_options: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Active,
    Ended,
    MyPolls,
}

#[derive(Debug, Clone)]
pub struct PollListFilter {
    pub status: StatusFilter,
    /// Required when `status` is `MyPolls`.
    pub created_by: Option<String>,
    pub search: String,
    pub page: u32,
    pub limit: u32,
}

impl Default for PollListFilter {
    fn default() -> Self {
        Self {
            status: StatusFilter::All,
            created_by: None,
            search: String::new(),
            page: 1,
            limit: 10,
        }
    }
}

impl PollListFilter {
    pub fn offset(&self) -> u32 {
        self.page.saturating_sub(1) * self.limit
    }
}

//

/// Decodes the `options` JSON column, rejecting unknown shapes instead of
/// trusting them.
pub fn decode_options(raw: Value) -> Result<Vec<PollOption>> {
    let options: Vec<PollOption> = serde_json::from_value(raw)
        .map_err(|e| Error::Validation(format!("malformed options column: {}", e)))?;
    validate_options(&options)?;
    Ok(options)
}

/// Decodes the `settings` JSON column, rejecting unknown shapes.
pub fn decode_settings(raw: Value) -> Result<PollSettings> {
    serde_json::from_value(raw)
        .map_err(|e| Error::Validation(format!("malformed settings column: {}", e)))
}

pub fn validate_question(question: &str) -> Result<()> {
    let len = question.chars().count();
    if len < QUESTION_MIN_LEN {
        return Err(Error::Validation(format!(
            "question must be at least {} characters", QUESTION_MIN_LEN
        )));
    }
    if len > QUESTION_MAX_LEN {
        return Err(Error::Validation(format!(
            "question must be less than {} characters", QUESTION_MAX_LEN
        )));
    }
    Ok(())
}

pub fn validate_options(options: &[PollOption]) -> Result<()> {
    if options.len() < OPTIONS_MIN {
        return Err(Error::Validation(format!(
            "at least {} options are required", OPTIONS_MIN
        )));
    }
    if options.len() > OPTIONS_MAX {
        return Err(Error::Validation(format!(
            "at most {} options are allowed", OPTIONS_MAX
        )));
    }

    for opt in options {
        if opt.text.trim().is_empty() {
            return Err(Error::Validation(format!("option '{}' has empty text", opt.id)));
        }
        if opt.text.chars().count() > OPTION_TEXT_MAX_LEN {
            return Err(Error::Validation(format!(
                "option '{}' text must be less than {} characters", opt.id, OPTION_TEXT_MAX_LEN
            )));
        }
    }

    let mut seen = std::collections::HashSet::new();
    for opt in options {
        if !seen.insert(opt.id.as_str()) {
            return Err(Error::Validation(format!("duplicate option id '{}'", opt.id)));
        }
    }

    Ok(())
}
