use chrono::{DateTime, Utc};

use crate::db::schema::Poll;
use crate::tally::TallyResult;

/// The externally observable state of a poll at one instant: its definition
/// with freshly computed counts, plus the open/closed and visibility flags.
#[derive(Debug, Clone)]
pub struct PollView {
    pub poll: Poll,
    pub is_expired: bool,
    pub is_open_for_voting: bool,
    pub can_see_results_before_voting: bool,
}

impl PollView {
    pub fn should_show_ballot(&self, has_voted: bool) -> bool {
        self.is_open_for_voting && !has_voted
    }

    pub fn should_show_results(&self, has_voted: bool) -> bool {
        !self.should_show_ballot(has_voted) || self.can_see_results_before_voting
    }
}

pub fn is_expired(poll: &Poll, now: DateTime<Utc>) -> bool {
    match poll.ends_at {
        None => false,
        Some(ends_at) => ends_at < now,
    }
}

pub fn is_open_for_voting(poll: &Poll, now: DateTime<Utc>) -> bool {
    poll.is_active && !is_expired(poll, now)
}

/// Combines a poll definition with its tally and the injected wall-clock.
/// Pure in all three inputs; `now` is a parameter so expiry is testable
/// without clock tricks. Stored per-option counts and `total_votes` are
/// replaced wholesale by the tally.
pub fn project(poll: &Poll, tally: &TallyResult, now: DateTime<Utc>) -> PollView {
    let is_expired = is_expired(poll, now);

    let mut poll = poll.clone();
    for opt in &mut poll.options {
        opt.votes = tally.count(&opt.id);
    }
    poll.total_votes = tally.total;

    PollView {
        is_expired,
        is_open_for_voting: poll.is_active && !is_expired,
        can_see_results_before_voting: poll.settings.show_results_before_voting,
        poll,
    }
}
