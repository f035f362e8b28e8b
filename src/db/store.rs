use async_trait::async_trait;

use crate::db::schema::{NewVote, Poll, PollListFilter, PollOption, PollSettings, Profile, Vote};
use crate::error::Result;
use crate::identity::VoterIdentity;

/// The narrow surface this core consumes from the remote record store.
/// Backends: `postgres::PgStore` against the managed datastore, and
/// `memory::MemoryStore` for tests. One network round trip per call; no
/// transaction primitive is assumed (see the race note on `insert_vote`).
#[async_trait]
pub trait PollStore: Send + Sync {
    async fn get_poll(&self, poll_id: &str) -> Result<Option<Poll>>;

    /// Filtered page of polls plus the total matching count.
    async fn list_polls(&self, filter: &PollListFilter) -> Result<(Vec<Poll>, u64)>;

    async fn insert_poll(
        &self,
        created_by: &str,
        question: &str,
        options: &[PollOption],
        settings: &PollSettings,
    ) -> Result<Poll>;

    /// Flips `is_active`; restricted to the creator. Returns whether a row
    /// was affected.
    async fn set_poll_active(&self, poll_id: &str, created_by: &str, active: bool) -> Result<bool>;

    /// All vote rows for a poll; order is irrelevant to tallying.
    async fn votes_for_poll(&self, poll_id: &str) -> Result<Vec<Vote>>;

    async fn count_votes(&self, poll_id: &str) -> Result<u64>;

    /// The identity's own existing vote, if any.
    async fn vote_for(&self, poll_id: &str, voter: &VoterIdentity) -> Result<Option<Vote>>;

    /// Appends a row. The check-for-existing / insert pair in the ledger is
    /// not atomic; racing duplicates are reconciled at tally time.
    async fn insert_vote(&self, vote: NewVote) -> Result<Vote>;

    /// Replaces the selections of an existing row (vote change).
    async fn update_vote_selections(
        &self,
        poll_id: &str,
        vote_id: &str,
        selections: &[String],
    ) -> Result<Vote>;

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>>;

    async fn insert_profile(&self, user_id: &str, email: &str) -> Result<Profile>;

    async fn set_created_polls_count(&self, user_id: &str, count: i64) -> Result<()>;
}
