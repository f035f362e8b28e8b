use chrono::{DateTime, Utc};

use crate::db::schema::{NewVote, Vote};
use crate::db::store::PollStore;
use crate::device::DeviceStore;
use crate::error::{Error, Result};
use crate::identity::VoterIdentity;
use crate::project;

/// All vote rows for a poll, unordered.
pub async fn fetch_votes(store: &dyn PollStore, poll_id: &str) -> Result<Vec<Vote>> {
    store.votes_for_poll(poll_id).await
}

/// The caller's own existing vote, if any.
pub async fn fetch_vote_for(
    store: &dyn PollStore,
    poll_id: &str,
    voter: &VoterIdentity,
) -> Result<Option<Vote>> {
    store.vote_for(poll_id, voter).await
}

/// Whether this identity already voted. For anonymous voters the
/// device-local marker also counts, mirroring how a browser remembers an
/// anonymous vote even when the derived token has changed.
pub async fn has_voted(
    store: &dyn PollStore,
    device: &DeviceStore,
    poll_id: &str,
    voter: &VoterIdentity,
) -> Result<bool> {
    if store.vote_for(poll_id, voter).await?.is_some() {
        return Ok(true);
    }

    Ok(voter.is_anonymous() && device.has_voted(poll_id))
}

/// Submits a ballot for `voter`. Exactly one datastore write: an append
/// for a first vote, or a replacement of the existing row when the poll
/// allows changing votes; otherwise the existing vote stands and the call
/// fails with `Conflict`.
///
/// The existing-vote check and the write are not atomic in the underlying
/// store, so two racing submissions from one identity can both land; the
/// tally reconciles such duplicates to the latest row. Accepted limitation.
pub async fn submit_vote(
    store: &dyn PollStore,
    device: &DeviceStore,
    poll_id: &str,
    voter: &VoterIdentity,
    selections: &[String],
    now: DateTime<Utc>,
) -> Result<Vote> {
    if selections.is_empty() {
        return Err(Error::Validation(
            "at least one option must be selected".to_owned(),
        ));
    }

    let poll = store
        .get_poll(poll_id)
        .await?
        .ok_or_else(|| Error::NotFound(poll_id.to_owned()))?;

    if !project::is_open_for_voting(&poll, now) {
        return Err(Error::Validation("voting is closed for this poll".to_owned()));
    }

    if selections.len() > 1 && !poll.settings.allow_multiple_selections {
        return Err(Error::Validation(
            "this poll does not allow multiple selections".to_owned(),
        ));
    }

    let existing = store.vote_for(poll_id, voter).await?;

    let vote = match existing {
        None => {
            store
                .insert_vote(NewVote {
                    poll_id: poll_id.to_owned(),
                    user_id: voter.user_id().map(str::to_owned),
                    ip_hash: voter.ip_hash().map(str::to_owned),
                    selected_options: selections.to_vec(),
                })
                .await?
        }
        Some(previous) => {
            if !poll.settings.allow_change_vote {
                return Err(Error::Conflict);
            }

            store
                .update_vote_selections(poll_id, &previous.id, selections)
                .await?
        }
    };

    // Only after the write is confirmed.
    if voter.is_anonymous() {
        device.mark_voted(poll_id, selections);
    }

    Ok(vote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::schema::{PollOption, PollSettings};

    fn options() -> Vec<PollOption> {
        vec![
            PollOption { id: "option_0".to_owned(), text: "Red".to_owned(), votes: 0 },
            PollOption { id: "option_1".to_owned(), text: "Blue".to_owned(), votes: 0 },
        ]
    }

    async fn poll_with(store: &MemoryStore, settings: PollSettings) -> String {
        store
            .insert_poll("owner", "Which color?", &options(), &settings)
            .await
            .unwrap()
            .id
    }

    fn red() -> Vec<String> {
        vec!["option_0".to_owned()]
    }

    fn blue() -> Vec<String> {
        vec!["option_1".to_owned()]
    }

    #[tokio::test]
    async fn empty_selection_is_rejected() {
        let store = MemoryStore::new();
        let device = DeviceStore::in_memory();
        let poll_id = poll_with(&store, PollSettings::default()).await;
        let voter = VoterIdentity::User("u1".to_owned());

        let r = submit_vote(&store, &device, &poll_id, &voter, &[], Utc::now()).await;
        assert!(matches!(r, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn unknown_poll_is_not_found() {
        let store = MemoryStore::new();
        let device = DeviceStore::in_memory();
        let voter = VoterIdentity::User("u1".to_owned());

        let r = submit_vote(&store, &device, "missing", &voter, &red(), Utc::now()).await;
        assert!(matches!(r, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn multiple_selections_require_the_setting() {
        let store = MemoryStore::new();
        let device = DeviceStore::in_memory();
        let poll_id = poll_with(&store, PollSettings::default()).await;
        let voter = VoterIdentity::User("u1".to_owned());

        let both = vec!["option_0".to_owned(), "option_1".to_owned()];
        let r = submit_vote(&store, &device, &poll_id, &voter, &both, Utc::now()).await;
        assert!(matches!(r, Err(Error::Validation(_))));

        let multi = PollSettings { allow_multiple_selections: true, ..Default::default() };
        let poll_id = poll_with(&store, multi).await;
        let r = submit_vote(&store, &device, &poll_id, &voter, &both, Utc::now()).await;
        assert!(r.is_ok());
    }

    #[tokio::test]
    async fn second_vote_conflicts_when_change_is_disabled() {
        let store = MemoryStore::new();
        let device = DeviceStore::in_memory();
        let poll_id = poll_with(&store, PollSettings::default()).await;
        let voter = VoterIdentity::User("u1".to_owned());

        submit_vote(&store, &device, &poll_id, &voter, &red(), Utc::now()).await.unwrap();
        let r = submit_vote(&store, &device, &poll_id, &voter, &blue(), Utc::now()).await;
        assert!(matches!(r, Err(Error::Conflict)));

        // The original vote stands.
        let vote = fetch_vote_for(&store, &poll_id, &voter).await.unwrap().unwrap();
        assert_eq!(vote.selected_options, red());
    }

    #[tokio::test]
    async fn change_vote_replaces_instead_of_accumulating() {
        let store = MemoryStore::new();
        let device = DeviceStore::in_memory();
        let settings = PollSettings { allow_change_vote: true, ..Default::default() };
        let poll_id = poll_with(&store, settings).await;
        let voter = VoterIdentity::User("u1".to_owned());

        submit_vote(&store, &device, &poll_id, &voter, &red(), Utc::now()).await.unwrap();
        submit_vote(&store, &device, &poll_id, &voter, &blue(), Utc::now()).await.unwrap();

        let votes = fetch_votes(&store, &poll_id).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].selected_options, blue());
    }

    #[tokio::test]
    async fn closed_poll_rejects_votes() {
        let store = MemoryStore::new();
        let device = DeviceStore::in_memory();
        let poll_id = poll_with(&store, PollSettings::default()).await;
        store.set_poll_active(&poll_id, "owner", false).await.unwrap();

        let voter = VoterIdentity::User("u1".to_owned());
        let r = submit_vote(&store, &device, &poll_id, &voter, &red(), Utc::now()).await;
        assert!(matches!(r, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn expired_poll_rejects_votes() {
        let store = MemoryStore::new();
        let device = DeviceStore::in_memory();
        let settings = PollSettings {
            end_date: Some(Utc::now() - chrono::Duration::minutes(1)),
            ..Default::default()
        };
        let poll_id = poll_with(&store, settings).await;

        let voter = VoterIdentity::User("u1".to_owned());
        let r = submit_vote(&store, &device, &poll_id, &voter, &red(), Utc::now()).await;
        assert!(matches!(r, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn anonymous_vote_writes_device_marker_after_confirmation() {
        let store = MemoryStore::new();
        let device = DeviceStore::in_memory();
        let poll_id = poll_with(&store, PollSettings::default()).await;
        let voter = VoterIdentity::Anonymous("abcdef1234".to_owned());

        assert!(!has_voted(&store, &device, &poll_id, &voter).await.unwrap());

        submit_vote(&store, &device, &poll_id, &voter, &red(), Utc::now()).await.unwrap();
        assert_eq!(device.voted_selections(&poll_id).unwrap(), red());
        assert!(has_voted(&store, &device, &poll_id, &voter).await.unwrap());
    }

    #[tokio::test]
    async fn failed_write_leaves_no_device_marker() {
        let store = MemoryStore::new();
        let device = DeviceStore::in_memory();
        let voter = VoterIdentity::Anonymous("abcdef1234".to_owned());

        let r = submit_vote(&store, &device, "missing", &voter, &red(), Utc::now()).await;
        assert!(r.is_err());
        assert!(!device.has_voted("missing"));
    }
}
