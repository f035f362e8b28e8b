use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, QueryBuilder, Row};
use tokio_stream::StreamExt;

use crate::db::new_row_id;
use crate::db::schema::{
    self, NewVote, Poll, PollListFilter, PollOption, PollSettings, Profile, StatusFilter, Vote,
};
use crate::db::store::PollStore;
use crate::error::{Error, Result};
use crate::identity::VoterIdentity;

/// `PollStore` backed by the managed Postgres datastore.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn poll_from_row(row: &PgRow) -> Result<Poll> {
    let options = schema::decode_options(row.try_get::<Value, _>("options")?)?;
    let settings = schema::decode_settings(row.try_get::<Value, _>("settings")?)?;

    Ok(Poll {
        id: row.try_get("id")?,
        question: row.try_get("question")?,
        options,
        settings,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        ends_at: row.try_get::<Option<DateTime<Utc>>, _>("ends_at")?,
        total_votes: 0,
        is_active: row.try_get("is_active")?,
    })
}

fn vote_from_row(row: &PgRow) -> Result<Vote> {
    Ok(Vote {
        id: row.try_get("id")?,
        poll_id: row.try_get("poll_id")?,
        user_id: row.try_get("user_id")?,
        ip_hash: row.try_get("ip_hash")?,
        selected_options: row.try_get("selected_options")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn push_filters<'a>(qb: &mut QueryBuilder<'a, sqlx::Postgres>, filter: &'a PollListFilter) {
    match filter.status {
        StatusFilter::All => {}
        StatusFilter::Active => {
            qb.push(" AND is_active=TRUE");
        }
        StatusFilter::Ended => {
            qb.push(" AND is_active=FALSE");
        }
        StatusFilter::MyPolls => {
            qb.push(" AND created_by=");
            qb.push_bind(filter.created_by.as_deref().unwrap_or(""));
        }
    }

    if !filter.search.is_empty() {
        qb.push(" AND question ILIKE ");
        qb.push_bind(format!("%{}%", filter.search));
    }
}

#[async_trait]
impl PollStore for PgStore {
    async fn get_poll(&self, poll_id: &str) -> Result<Option<Poll>> {
        let row = sqlx::query("SELECT * FROM polls WHERE id=$1")
            .bind(poll_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            None => Ok(None),
            Some(row) => Ok(Some(poll_from_row(&row)?)),
        }
    }

    async fn list_polls(&self, filter: &PollListFilter) -> Result<(Vec<Poll>, u64)> {
        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM polls WHERE TRUE");
        push_filters(&mut count_qb, filter);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::new("SELECT * FROM polls WHERE TRUE");
        push_filters(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC LIMIT ");
        qb.push_bind(filter.limit as i64);
        qb.push(" OFFSET ");
        qb.push_bind(filter.offset() as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut polls = Vec::new();
        for row in &rows {
            polls.push(poll_from_row(row)?);
        }

        Ok((polls, total as u64))
    }

    async fn insert_poll(
        &self,
        created_by: &str,
        question: &str,
        options: &[PollOption],
        settings: &PollSettings,
    ) -> Result<Poll> {
        let options_json =
            serde_json::to_value(options).map_err(|e| Error::ExternalService(e.to_string()))?;
        let settings_json =
            serde_json::to_value(settings).map_err(|e| Error::ExternalService(e.to_string()))?;

        let id = new_row_id();
        let row = sqlx::query(
            "INSERT INTO polls (id, question, options, settings, created_by, created_at, ends_at, is_active)
             VALUES ($1, $2, $3, $4, $5, NOW(), $6, TRUE)
             RETURNING created_at",
        )
        .bind(&id)
        .bind(question)
        .bind(&options_json)
        .bind(&settings_json)
        .bind(created_by)
        .bind(settings.end_date)
        .fetch_one(&self.pool)
        .await?;

        Ok(Poll {
            id,
            question: question.to_owned(),
            options: options.to_vec(),
            settings: settings.clone(),
            created_by: created_by.to_owned(),
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            ends_at: settings.end_date,
            total_votes: 0,
            is_active: true,
        })
    }

    async fn set_poll_active(&self, poll_id: &str, created_by: &str, active: bool) -> Result<bool> {
        let r = sqlx::query("UPDATE polls SET is_active=$3 WHERE id=$1 AND created_by=$2")
            .bind(poll_id)
            .bind(created_by)
            .bind(active)
            .execute(&self.pool)
            .await?;

        Ok(r.rows_affected() > 0)
    }

    async fn votes_for_poll(&self, poll_id: &str) -> Result<Vec<Vote>> {
        let mut stream = sqlx::query("SELECT * FROM votes WHERE poll_id=$1")
            .bind(poll_id)
            .fetch(&self.pool);

        let mut votes = Vec::new();
        while let Some(row) = stream.try_next().await? {
            votes.push(vote_from_row(&row)?);
        }

        Ok(votes)
    }

    async fn count_votes(&self, poll_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM votes WHERE poll_id=$1")
            .bind(poll_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }

    async fn vote_for(&self, poll_id: &str, voter: &VoterIdentity) -> Result<Option<Vote>> {
        let query = match voter {
            VoterIdentity::User(id) => {
                sqlx::query("SELECT * FROM votes WHERE poll_id=$1 AND user_id=$2").bind(poll_id).bind(id)
            }
            VoterIdentity::Anonymous(hash) => {
                sqlx::query("SELECT * FROM votes WHERE poll_id=$1 AND ip_hash=$2").bind(poll_id).bind(hash)
            }
        };

        let row = query.fetch_optional(&self.pool).await?;

        match row {
            None => Ok(None),
            Some(row) => Ok(Some(vote_from_row(&row)?)),
        }
    }

    async fn insert_vote(&self, vote: NewVote) -> Result<Vote> {
        let id = new_row_id();
        let row = sqlx::query(
            "INSERT INTO votes (id, poll_id, user_id, ip_hash, selected_options, created_at)
             VALUES ($1, $2, $3, $4, $5, NOW())
             RETURNING created_at",
        )
        .bind(&id)
        .bind(&vote.poll_id)
        .bind(&vote.user_id)
        .bind(&vote.ip_hash)
        .bind(&vote.selected_options)
        .fetch_one(&self.pool)
        .await?;

        Ok(Vote {
            id,
            poll_id: vote.poll_id,
            user_id: vote.user_id,
            ip_hash: vote.ip_hash,
            selected_options: vote.selected_options,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        })
    }

    async fn update_vote_selections(
        &self,
        poll_id: &str,
        vote_id: &str,
        selections: &[String],
    ) -> Result<Vote> {
        // Changing a vote refreshes created_at so the latest-row-wins
        // reconciliation in the tally sees it as most recent.
        let row = sqlx::query(
            "UPDATE votes SET selected_options=$3, created_at=NOW()
             WHERE poll_id=$1 AND id=$2
             RETURNING *",
        )
        .bind(poll_id)
        .bind(vote_id)
        .bind(selections.to_vec())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Err(Error::NotFound(vote_id.to_owned())),
            Some(row) => vote_from_row(&row),
        }
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let row = sqlx::query("SELECT * FROM profiles WHERE id=$1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            None => Ok(None),
            Some(row) => Ok(Some(Profile {
                id: row.try_get("id")?,
                email: row.try_get("email")?,
                created_polls_count: row.try_get("created_polls_count")?,
            })),
        }
    }

    async fn insert_profile(&self, user_id: &str, email: &str) -> Result<Profile> {
        sqlx::query("INSERT INTO profiles (id, email, created_polls_count) VALUES ($1, $2, 0)")
            .bind(user_id)
            .bind(email)
            .execute(&self.pool)
            .await?;

        Ok(Profile {
            id: user_id.to_owned(),
            email: email.to_owned(),
            created_polls_count: 0,
        })
    }

    async fn set_created_polls_count(&self, user_id: &str, count: i64) -> Result<()> {
        sqlx::query("UPDATE profiles SET created_polls_count=$2 WHERE id=$1")
            .bind(user_id)
            .bind(count)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
