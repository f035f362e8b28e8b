//! Vote-tallying and poll-state core for a real-time polling application.
//!
//! Polls, votes, and profiles live in a remote record store reached through
//! the narrow [`db::store::PollStore`] surface; this crate owns the rules
//! layered on top of it: how a voter's identity is established (an
//! authenticated user id, or a weak anonymous token derived from the public
//! address), how raw vote rows are reconciled and aggregated into counts
//! and percentages, and how a poll's open/closed and ballot/results state
//! is projected at a given instant.
//!
//! Anonymous deduplication is best effort by design: voters sharing a
//! network collide on the same token, and clearing the device store allows
//! re-voting. Counts are always recomputed from the vote ledger and never
//! persisted per option.

pub mod config;
pub mod db;
pub mod device;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod polls;
pub mod project;
pub mod runtime;
pub mod stats;
pub mod tally;

pub use crate::config::Config;
pub use crate::device::DeviceStore;
pub use crate::error::{Error, Result};
pub use crate::identity::{resolve_voter_identity, AuthContext, IpLookup, User, VoterIdentity};
pub use crate::polls::{BrowsePage, PollBrowser};
pub use crate::project::{project, PollView};
pub use crate::tally::{tally, TallyResult};
