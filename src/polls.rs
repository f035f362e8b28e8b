use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use evlog::meta;

use crate::db::schema::{self, NewPoll, Poll, PollListFilter, PollOption};
use crate::db::store::PollStore;
use crate::error::{Error, Result};
use crate::identity::AuthContext;
use crate::ledger;
use crate::project::{self, PollView};
use crate::runtime::get_logger;
use crate::tally;

/// Creates a poll owned by the authenticated user. Option ids are assigned
/// positionally; blank option texts are dropped before validation. A
/// `profiles` row is ensured first, and the owner's created-polls count is
/// bumped afterwards on a best-effort basis.
pub async fn create_poll(
    store: &dyn PollStore,
    auth: &dyn AuthContext,
    new: NewPoll,
) -> Result<Poll> {
    let user = auth
        .current_user()
        .ok_or_else(|| Error::Validation("you must be signed in to create a poll".to_owned()))?;

    let question = new.question.trim().to_owned();
    schema::validate_question(&question)?;

    let options: Vec<PollOption> = new
        .options
        .iter()
        .map(|text| text.trim())
        .filter(|text| !text.is_empty())
        .enumerate()
        .map(|(i, text)| PollOption {
            id: format!("option_{}", i),
            text: text.to_owned(),
            votes: 0,
        })
        .collect();
    schema::validate_options(&options)?;

    if store.get_profile(&user.id).await?.is_none() {
        store
            .insert_profile(&user.id, user.email.as_deref().unwrap_or(""))
            .await?;
    }

    let poll = store
        .insert_poll(&user.id, &question, &options, &new.settings)
        .await?;

    // Count bookkeeping is advisory; a failure must not fail the creation.
    match store.get_profile(&user.id).await {
        Ok(Some(profile)) => {
            let bumped = store
                .set_created_polls_count(&user.id, profile.created_polls_count + 1)
                .await;
            if let Err(e) = bumped {
                get_logger().info("Could not update created-polls count.", meta! {
                    "UserID" => &user.id,
                    "Error" => e,
                });
            }
        }
        Ok(None) => {}
        Err(e) => {
            get_logger().info("Could not fetch profile for poll-count update.", meta! {
                "UserID" => &user.id,
                "Error" => e,
            });
        }
    }

    Ok(poll)
}

/// Explicitly closes a poll. Only the creator's update matches a row;
/// returns whether anything was closed.
pub async fn close_poll(
    store: &dyn PollStore,
    auth: &dyn AuthContext,
    poll_id: &str,
) -> Result<bool> {
    let user = auth
        .current_user()
        .ok_or_else(|| Error::Validation("you must be signed in to close a poll".to_owned()))?;

    store.set_poll_active(poll_id, &user.id, false).await
}

/// The full read path for a single poll: definition, ledger, tally,
/// projection. A missing poll is `NotFound`; a failed votes read degrades
/// to an empty tally with a logged diagnostic so the poll stays viewable.
pub async fn load_poll_view(
    store: &dyn PollStore,
    poll_id: &str,
    now: DateTime<Utc>,
) -> Result<PollView> {
    let poll = store
        .get_poll(poll_id)
        .await?
        .ok_or_else(|| Error::NotFound(poll_id.to_owned()))?;

    let votes = match ledger::fetch_votes(store, poll_id).await {
        Ok(v) => v,
        Err(e) => {
            get_logger().error_with_err("Vote fetch failed; tallying an empty ledger.", &e, None);
            Vec::new()
        }
    };

    let result = tally::tally(&poll.options, &votes);
    Ok(project::project(&poll, &result, now))
}

#[derive(Debug, Clone)]
pub struct BrowsePage {
    pub polls: Vec<Poll>,
    pub total_count: u64,
    pub has_more: bool,
}

impl BrowsePage {
    fn empty() -> Self {
        Self {
            polls: Vec::new(),
            total_count: 0,
            has_more: false,
        }
    }
}

/// Filtered, paged poll listing. Each `fetch` is stamped with a generation
/// number; when a newer fetch has started by the time a result is ready,
/// the stale result is discarded (`None`) so a slow response can never
/// overwrite a newer filter's page. Cancellation is advisory only: the
/// in-flight datastore call itself is not aborted.
pub struct PollBrowser {
    store: Arc<dyn PollStore>,
    generation: AtomicU64,
}

impl PollBrowser {
    pub fn new(store: Arc<dyn PollStore>) -> Self {
        Self {
            store,
            generation: AtomicU64::new(0),
        }
    }

    /// `None` means this fetch was superseded by a newer one. Datastore
    /// read errors degrade to an empty page with a logged diagnostic so
    /// the listing stays usable.
    pub async fn fetch(&self, filter: &PollListFilter) -> Option<BrowsePage> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let (mut polls, total_count) = match self.store.list_polls(filter).await {
            Ok(v) => v,
            Err(e) => {
                get_logger().error_with_err("Poll list fetch failed; showing an empty page.", &e, None);
                return self.unless_superseded(generation, BrowsePage::empty());
            }
        };

        // Per-poll totals are independent fetches and may complete in any
        // order; each count lands only on its own poll.
        let counts =
            futures::future::join_all(polls.iter().map(|p| self.store.count_votes(&p.id))).await;

        for (poll, count) in polls.iter_mut().zip(counts) {
            match count {
                Ok(c) => poll.total_votes = c,
                Err(e) => {
                    get_logger().error_with_err("Vote count fetch failed for poll.", &e, None);
                    poll.total_votes = 0;
                }
            }
        }

        let has_more = total_count > (filter.offset() + filter.limit) as u64;
        self.unless_superseded(
            generation,
            BrowsePage {
                polls,
                total_count,
                has_more,
            },
        )
    }

    fn unless_superseded(&self, generation: u64, page: BrowsePage) -> Option<BrowsePage> {
        if self.generation.load(Ordering::SeqCst) != generation {
            return None;
        }
        Some(page)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::schema::{NewVote, PollSettings, Profile, StatusFilter, Vote};
    use crate::identity::{User, VoterIdentity};

    struct FixedAuth(User);

    impl AuthContext for FixedAuth {
        fn current_user(&self) -> Option<User> {
            Some(self.0.clone())
        }

        fn sign_out(&self) {}
    }

    struct NoAuth;

    impl AuthContext for NoAuth {
        fn current_user(&self) -> Option<User> {
            None
        }

        fn sign_out(&self) {}
    }

    fn owner() -> FixedAuth {
        FixedAuth(User {
            id: "owner".to_owned(),
            email: Some("owner@example.com".to_owned()),
        })
    }

    fn new_poll(question: &str, options: &[&str]) -> NewPoll {
        NewPoll {
            question: question.to_owned(),
            options: options.iter().map(|s| (*s).to_owned()).collect(),
            settings: PollSettings::default(),
        }
    }

    #[tokio::test]
    async fn create_assigns_positional_ids_and_bumps_profile() {
        let store = MemoryStore::new();

        let poll = create_poll(&store, &owner(), new_poll("Which color?", &["Red", " ", "Blue"]))
            .await
            .unwrap();

        assert_eq!(poll.options.len(), 2);
        assert_eq!(poll.options[0].id, "option_0");
        assert_eq!(poll.options[1].id, "option_1");
        assert_eq!(poll.options[1].text, "Blue");

        let profile = store.get_profile("owner").await.unwrap().unwrap();
        assert_eq!(profile.email, "owner@example.com");
        assert_eq!(profile.created_polls_count, 1);
    }

    #[tokio::test]
    async fn create_rejects_invalid_input() {
        let store = MemoryStore::new();

        let r = create_poll(&store, &owner(), new_poll("Hm?", &["Red", "Blue"])).await;
        assert!(matches!(r, Err(Error::Validation(_))));

        let r = create_poll(&store, &owner(), new_poll("Which color?", &["Red"])).await;
        assert!(matches!(r, Err(Error::Validation(_))));

        let eleven: Vec<String> = (0..11).map(|i| format!("Option {}", i)).collect();
        let eleven_refs: Vec<&str> = eleven.iter().map(String::as_str).collect();
        let r = create_poll(&store, &owner(), new_poll("Which color?", &eleven_refs)).await;
        assert!(matches!(r, Err(Error::Validation(_))));

        let r = create_poll(&store, &NoAuth, new_poll("Which color?", &["Red", "Blue"])).await;
        assert!(matches!(r, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn close_is_creator_only() {
        let store = MemoryStore::new();
        let poll = create_poll(&store, &owner(), new_poll("Which color?", &["Red", "Blue"]))
            .await
            .unwrap();

        let stranger = FixedAuth(User { id: "stranger".to_owned(), email: None });
        assert!(!close_poll(&store, &stranger, &poll.id).await.unwrap());
        assert!(store.get_poll(&poll.id).await.unwrap().unwrap().is_active);

        assert!(close_poll(&store, &owner(), &poll.id).await.unwrap());
        assert!(!store.get_poll(&poll.id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn view_carries_fresh_counts_and_not_found() {
        let store = MemoryStore::new();
        let poll = create_poll(&store, &owner(), new_poll("Which color?", &["Red", "Blue"]))
            .await
            .unwrap();

        store
            .insert_vote(NewVote {
                poll_id: poll.id.clone(),
                user_id: Some("u1".to_owned()),
                ip_hash: None,
                selected_options: vec!["option_0".to_owned()],
            })
            .await
            .unwrap();

        let view = load_poll_view(&store, &poll.id, Utc::now()).await.unwrap();
        assert_eq!(view.poll.total_votes, 1);
        assert_eq!(view.poll.options[0].votes, 1);
        assert_eq!(view.poll.options[1].votes, 0);

        let r = load_poll_view(&store, "missing", Utc::now()).await;
        assert!(matches!(r, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn browser_reports_remaining_pages_with_counts() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..3 {
            create_poll(&*store, &owner(), new_poll(&format!("Question number {}?", i), &["A", "B"]))
                .await
                .unwrap();
        }

        let browser = PollBrowser::new(store);
        let filter = PollListFilter { limit: 2, ..PollListFilter::default() };

        let page = browser.fetch(&filter).await.unwrap();
        assert_eq!(page.polls.len(), 2);
        assert_eq!(page.total_count, 3);
        assert!(page.has_more);
        assert!(page.polls.iter().all(|p| p.total_votes == 0));

        let filter = PollListFilter { limit: 2, page: 2, ..PollListFilter::default() };
        let page = browser.fetch(&filter).await.unwrap();
        assert_eq!(page.polls.len(), 1);
        assert!(!page.has_more);
    }

    /// Delegating store whose first `list_polls` call stalls, to let a
    /// newer fetch overtake it.
    struct StallingStore {
        inner: MemoryStore,
        list_calls: AtomicUsize,
    }

    #[async_trait]
    impl PollStore for StallingStore {
        async fn get_poll(&self, poll_id: &str) -> Result<Option<Poll>> {
            self.inner.get_poll(poll_id).await
        }

        async fn list_polls(&self, filter: &PollListFilter) -> Result<(Vec<Poll>, u64)> {
            if self.list_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
            self.inner.list_polls(filter).await
        }

        async fn insert_poll(
            &self,
            created_by: &str,
            question: &str,
            options: &[PollOption],
            settings: &PollSettings,
        ) -> Result<Poll> {
            self.inner.insert_poll(created_by, question, options, settings).await
        }

        async fn set_poll_active(&self, poll_id: &str, created_by: &str, active: bool) -> Result<bool> {
            self.inner.set_poll_active(poll_id, created_by, active).await
        }

        async fn votes_for_poll(&self, poll_id: &str) -> Result<Vec<Vote>> {
            self.inner.votes_for_poll(poll_id).await
        }

        async fn count_votes(&self, poll_id: &str) -> Result<u64> {
            self.inner.count_votes(poll_id).await
        }

        async fn vote_for(&self, poll_id: &str, voter: &VoterIdentity) -> Result<Option<Vote>> {
            self.inner.vote_for(poll_id, voter).await
        }

        async fn insert_vote(&self, vote: NewVote) -> Result<Vote> {
            self.inner.insert_vote(vote).await
        }

        async fn update_vote_selections(
            &self,
            poll_id: &str,
            vote_id: &str,
            selections: &[String],
        ) -> Result<Vote> {
            self.inner.update_vote_selections(poll_id, vote_id, selections).await
        }

        async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>> {
            self.inner.get_profile(user_id).await
        }

        async fn insert_profile(&self, user_id: &str, email: &str) -> Result<Profile> {
            self.inner.insert_profile(user_id, email).await
        }

        async fn set_created_polls_count(&self, user_id: &str, count: i64) -> Result<()> {
            self.inner.set_created_polls_count(user_id, count).await
        }
    }

    #[tokio::test]
    async fn superseded_fetch_is_discarded() {
        let store = Arc::new(StallingStore {
            inner: MemoryStore::new(),
            list_calls: AtomicUsize::new(0),
        });
        create_poll(&*store, &owner(), new_poll("Which color?", &["Red", "Blue"]))
            .await
            .unwrap();

        let browser = Arc::new(PollBrowser::new(store));

        let slow = {
            let browser = Arc::clone(&browser);
            tokio::spawn(async move { browser.fetch(&PollListFilter::default()).await })
        };

        // Let the slow fetch claim its generation before starting a newer one.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let newer = PollListFilter { status: StatusFilter::Active, ..PollListFilter::default() };
        let fresh = browser.fetch(&newer).await;
        assert!(fresh.is_some());

        let stale = slow.await.unwrap();
        assert!(stale.is_none());
    }

    /// Store whose reads always fail, to exercise read degradation.
    struct FailingStore;

    #[async_trait]
    impl PollStore for FailingStore {
        async fn get_poll(&self, _: &str) -> Result<Option<Poll>> {
            Err(Error::ExternalService("down".to_owned()))
        }

        async fn list_polls(&self, _: &PollListFilter) -> Result<(Vec<Poll>, u64)> {
            Err(Error::ExternalService("down".to_owned()))
        }

        async fn insert_poll(
            &self,
            _: &str,
            _: &str,
            _: &[PollOption],
            _: &PollSettings,
        ) -> Result<Poll> {
            Err(Error::ExternalService("down".to_owned()))
        }

        async fn set_poll_active(&self, _: &str, _: &str, _: bool) -> Result<bool> {
            Err(Error::ExternalService("down".to_owned()))
        }

        async fn votes_for_poll(&self, _: &str) -> Result<Vec<Vote>> {
            Err(Error::ExternalService("down".to_owned()))
        }

        async fn count_votes(&self, _: &str) -> Result<u64> {
            Err(Error::ExternalService("down".to_owned()))
        }

        async fn vote_for(&self, _: &str, _: &VoterIdentity) -> Result<Option<Vote>> {
            Err(Error::ExternalService("down".to_owned()))
        }

        async fn insert_vote(&self, _: NewVote) -> Result<Vote> {
            Err(Error::ExternalService("down".to_owned()))
        }

        async fn update_vote_selections(&self, _: &str, _: &str, _: &[String]) -> Result<Vote> {
            Err(Error::ExternalService("down".to_owned()))
        }

        async fn get_profile(&self, _: &str) -> Result<Option<Profile>> {
            Err(Error::ExternalService("down".to_owned()))
        }

        async fn insert_profile(&self, _: &str, _: &str) -> Result<Profile> {
            Err(Error::ExternalService("down".to_owned()))
        }

        async fn set_created_polls_count(&self, _: &str, _: i64) -> Result<()> {
            Err(Error::ExternalService("down".to_owned()))
        }
    }

    #[tokio::test]
    async fn list_read_failure_degrades_to_empty_page() {
        let browser = PollBrowser::new(Arc::new(FailingStore));

        let page = browser.fetch(&PollListFilter::default()).await.unwrap();
        assert!(page.polls.is_empty());
        assert_eq!(page.total_count, 0);
        assert!(!page.has_more);
    }
}
