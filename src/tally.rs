use std::collections::HashMap;

use itertools::Itertools;

use crate::db::schema::{PollOption, Vote};
use crate::identity::VoterIdentity;

/// Aggregation of a poll's vote rows into per-option counts and derived
/// percentages. Always recomputed from the ledger; never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyResult {
    pub per_option: HashMap<String, u64>,
    /// Number of counted voters, not of selections: one multi-select row
    /// counts once here while incrementing several option counts, so this
    /// can be less than the sum of `per_option`.
    pub total: u64,
    /// Rounded independently per option (half away from zero) and never
    /// normalized; under multi-select the percentages may sum past 100.
    pub per_option_percentage: HashMap<String, u64>,
}

impl TallyResult {
    pub fn count(&self, option_id: &str) -> u64 {
        self.per_option.get(option_id).copied().unwrap_or(0)
    }

    pub fn percentage(&self, option_id: &str) -> u64 {
        self.per_option_percentage.get(option_id).copied().unwrap_or(0)
    }

    /// Options ordered by count descending; equal counts keep their
    /// original poll order.
    pub fn ranked<'a>(&self, options: &'a [PollOption]) -> Vec<(&'a PollOption, u64)> {
        options
            .iter()
            .map(|opt| (opt, self.count(&opt.id)))
            .sorted_by(|a, b| b.1.cmp(&a.1))
            .collect()
    }
}

/// Pure aggregation of `votes` over `options`. Deterministic and free of
/// I/O, so a re-fetch-and-recompute flow can run it at will.
///
/// Rows are first reconciled to at most one per voter identity, keeping the
/// most recent row; duplicates left behind by racing submissions therefore
/// count once, last write winning. Selected ids that are not in the poll's
/// option set are ignored, and a row with no resolvable selection
/// contributes nothing to `total`.
pub fn tally(options: &[PollOption], votes: &[Vote]) -> TallyResult {
    // Latest row per identity; rows without an identity cannot be
    // reconciled and are kept as-is.
    let mut latest: HashMap<VoterIdentity, &Vote> = HashMap::new();
    let mut unattributed: Vec<&Vote> = Vec::new();

    for vote in votes {
        match vote.voter() {
            Some(voter) => {
                let slot = latest.entry(voter).or_insert(vote);
                if vote.created_at >= slot.created_at {
                    *slot = vote;
                }
            }
            None => unattributed.push(vote),
        }
    }

    let mut per_option: HashMap<String, u64> =
        options.iter().map(|o| (o.id.clone(), 0)).collect();
    let mut total = 0u64;

    for vote in latest.values().copied().chain(unattributed) {
        let mut counted = false;

        for selected in &vote.selected_options {
            // Ids not in the poll's option set are ignored, never an error.
            if let Some(count) = per_option.get_mut(selected.as_str()) {
                *count += 1;
                counted = true;
            }
        }

        if counted {
            total += 1;
        }
    }

    let per_option_percentage = per_option
        .iter()
        .map(|(id, count)| {
            let pct = if total > 0 {
                (100.0 * *count as f64 / total as f64).round() as u64
            } else {
                0
            };
            (id.clone(), pct)
        })
        .collect();

    TallyResult {
        per_option,
        total,
        per_option_percentage,
    }
}
