use crate::db::schema::PollOption;
use crate::tally::TallyResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionStat {
    pub option_id: String,
    pub votes: u64,
    pub percentage: u64,
}

/// Summary numbers backing the results display: per-option stats in
/// ranked order plus the headline figures.
#[derive(Debug, Clone)]
pub struct PollStats {
    pub total_votes: u64,
    /// Count-descending; ties keep the poll's option order.
    pub options_stats: Vec<OptionStat>,
    pub highest_votes: u64,
    /// Share of the leading option, rounded like every other percentage.
    pub winner_margin_percentage: u64,
}

pub fn poll_stats(options: &[PollOption], tally: &TallyResult) -> PollStats {
    let options_stats: Vec<OptionStat> = tally
        .ranked(options)
        .into_iter()
        .map(|(opt, votes)| OptionStat {
            option_id: opt.id.clone(),
            votes,
            percentage: tally.percentage(&opt.id),
        })
        .collect();

    let highest_votes = options_stats.first().map(|s| s.votes).unwrap_or(0);
    let winner_margin_percentage = if tally.total > 0 {
        (100.0 * highest_votes as f64 / tally.total as f64).round() as u64
    } else {
        0
    };

    PollStats {
        total_votes: tally.total,
        options_stats,
        highest_votes,
        winner_margin_percentage,
    }
}

/// The exported results table: a header row plus `Option,Votes,Percentage`
/// per option, in the poll's option order.
pub fn results_csv(options: &[PollOption], tally: &TallyResult) -> String {
    let mut rows = vec!["Option,Votes,Percentage".to_owned()];

    for opt in options {
        rows.push(format!(
            "{},{},{}%",
            opt.text,
            tally.count(&opt.id),
            tally.percentage(&opt.id),
        ));
    }

    rows.join("\n")
}
