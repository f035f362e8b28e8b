use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use itertools::Itertools;

use crate::db::new_row_id;
use crate::db::schema::{
    NewVote, Poll, PollListFilter, PollOption, PollSettings, Profile, StatusFilter, Vote,
};
use crate::db::store::PollStore;
use crate::error::{Error, Result};
use crate::identity::VoterIdentity;

/// In-process `PollStore` with the same observable semantics as the
/// Postgres backend. The test double, and a convenient reference backend.
#[derive(Default)]
pub struct MemoryStore {
    polls: DashMap<String, Poll>,
    votes: DashMap<String, Vec<Vote>>,
    profiles: DashMap<String, Profile>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(poll: &Poll, filter: &PollListFilter) -> bool {
    let status_ok = match filter.status {
        StatusFilter::All => true,
        StatusFilter::Active => poll.is_active,
        StatusFilter::Ended => !poll.is_active,
        StatusFilter::MyPolls => match &filter.created_by {
            None => false,
            Some(user) => &poll.created_by == user,
        },
    };

    let search_ok = filter.search.is_empty()
        || poll.question.to_lowercase().contains(&filter.search.to_lowercase());

    status_ok && search_ok
}

#[async_trait]
impl PollStore for MemoryStore {
    async fn get_poll(&self, poll_id: &str) -> Result<Option<Poll>> {
        Ok(self.polls.get(poll_id).map(|p| p.clone()))
    }

    async fn list_polls(&self, filter: &PollListFilter) -> Result<(Vec<Poll>, u64)> {
        let matching = self
            .polls
            .iter()
            .filter(|e| matches(e.value(), filter))
            .map(|e| e.value().clone())
            .sorted_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)))
            .collect::<Vec<Poll>>();

        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit as usize)
            .collect();

        Ok((page, total))
    }

    async fn insert_poll(
        &self,
        created_by: &str,
        question: &str,
        options: &[PollOption],
        settings: &PollSettings,
    ) -> Result<Poll> {
        let poll = Poll {
            id: new_row_id(),
            question: question.to_owned(),
            options: options.to_vec(),
            settings: settings.clone(),
            created_by: created_by.to_owned(),
            created_at: Utc::now(),
            ends_at: settings.end_date,
            total_votes: 0,
            is_active: true,
        };

        self.polls.insert(poll.id.clone(), poll.clone());
        Ok(poll)
    }

    async fn set_poll_active(&self, poll_id: &str, created_by: &str, active: bool) -> Result<bool> {
        match self.polls.get_mut(poll_id) {
            Some(mut poll) if poll.created_by == created_by => {
                poll.is_active = active;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn votes_for_poll(&self, poll_id: &str) -> Result<Vec<Vote>> {
        Ok(self.votes.get(poll_id).map(|v| v.clone()).unwrap_or_default())
    }

    async fn count_votes(&self, poll_id: &str) -> Result<u64> {
        Ok(self.votes.get(poll_id).map(|v| v.len() as u64).unwrap_or(0))
    }

    async fn vote_for(&self, poll_id: &str, voter: &VoterIdentity) -> Result<Option<Vote>> {
        let votes = match self.votes.get(poll_id) {
            None => return Ok(None),
            Some(v) => v,
        };

        Ok(votes
            .iter()
            .find(|v| v.voter().as_ref() == Some(voter))
            .cloned())
    }

    async fn insert_vote(&self, vote: NewVote) -> Result<Vote> {
        if !self.polls.contains_key(&vote.poll_id) {
            return Err(Error::NotFound(vote.poll_id));
        }

        let row = Vote {
            id: new_row_id(),
            poll_id: vote.poll_id.clone(),
            user_id: vote.user_id,
            ip_hash: vote.ip_hash,
            selected_options: vote.selected_options,
            created_at: Utc::now(),
        };

        self.votes
            .entry(vote.poll_id)
            .or_insert_with(Vec::new)
            .push(row.clone());
        Ok(row)
    }

    async fn update_vote_selections(
        &self,
        poll_id: &str,
        vote_id: &str,
        selections: &[String],
    ) -> Result<Vote> {
        let mut votes = self
            .votes
            .get_mut(poll_id)
            .ok_or_else(|| Error::NotFound(poll_id.to_owned()))?;

        let row = votes
            .iter_mut()
            .find(|v| v.id == vote_id)
            .ok_or_else(|| Error::NotFound(vote_id.to_owned()))?;

        row.selected_options = selections.to_vec();
        row.created_at = Utc::now();
        Ok(row.clone())
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        Ok(self.profiles.get(user_id).map(|p| p.clone()))
    }

    async fn insert_profile(&self, user_id: &str, email: &str) -> Result<Profile> {
        let profile = Profile {
            id: user_id.to_owned(),
            email: email.to_owned(),
            created_polls_count: 0,
        };

        self.profiles.insert(user_id.to_owned(), profile.clone());
        Ok(profile)
    }

    async fn set_created_polls_count(&self, user_id: &str, count: i64) -> Result<()> {
        match self.profiles.get_mut(user_id) {
            None => Err(Error::NotFound(user_id.to_owned())),
            Some(mut profile) => {
                profile.created_polls_count = count;
                Ok(())
            }
        }
    }
}
