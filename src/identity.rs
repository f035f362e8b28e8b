use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use evlog::meta;
use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use serde::Deserialize;

use crate::device::DeviceStore;
use crate::error::Result;
use crate::runtime::get_logger;

pub const ANON_TOKEN_LEN: usize = 10;

/// The acting voter for a poll: an authenticated user id, or a derived
/// anonymous token. Exactly one of the two.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VoterIdentity {
    User(String),
    Anonymous(String),
}

impl VoterIdentity {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            VoterIdentity::User(id) => Some(id),
            VoterIdentity::Anonymous(_) => None,
        }
    }

    pub fn ip_hash(&self) -> Option<&str> {
        match self {
            VoterIdentity::User(_) => None,
            VoterIdentity::Anonymous(hash) => Some(hash),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, VoterIdentity::Anonymous(_))
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
}

/// Injected auth collaborator; never read from ambient scope.
pub trait AuthContext: Send + Sync {
    fn current_user(&self) -> Option<User>;
    fn sign_out(&self);
}

#[async_trait]
pub trait IpLookup: Send + Sync {
    async fn public_ip(&self) -> Result<String>;
}

#[derive(Deserialize)]
struct IpResponse {
    ip: String,
}

/// Looks up the caller's public address from an ipify-style endpoint
/// returning `{"ip": "..."}`.
pub struct IpifyLookup {
    client: reqwest::Client,
    endpoint: String,
}

impl IpifyLookup {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl IpLookup for IpifyLookup {
    async fn public_ip(&self) -> Result<String> {
        let resp = self.client.get(&self.endpoint).send().await?;
        let body: IpResponse = resp.json().await?;
        Ok(body.ip)
    }
}

static NON_ALPHANUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new("[^a-zA-Z0-9]").unwrap());

/// base64 of the address, stripped to alphanumerics and truncated. Not a
/// cryptographic hash: anonymous identity is best-effort by design, and
/// voters behind the same network resolve to the same token.
pub fn anonymous_token_from_ip(ip: &str) -> String {
    let encoded = STANDARD.encode(ip);
    let cleaned = NON_ALPHANUMERIC.replace_all(&encoded, "");
    cleaned.chars().take(ANON_TOKEN_LEN).collect()
}

pub fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ANON_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Resolves the acting voter for `poll_id`. Authenticated users win; for
/// anonymous voters the token is derived from the public address (random on
/// lookup failure) and cached per poll on this device, so revisiting the
/// same poll reuses the same identity.
pub async fn resolve_voter_identity(
    auth: &dyn AuthContext,
    lookup: &dyn IpLookup,
    device: &DeviceStore,
    poll_id: &str,
) -> VoterIdentity {
    if let Some(user) = auth.current_user() {
        return VoterIdentity::User(user.id);
    }

    if let Some(token) = device.cached_identity(poll_id) {
        return VoterIdentity::Anonymous(token);
    }

    let token = match lookup.public_ip().await {
        Ok(ip) => anonymous_token_from_ip(&ip),
        Err(e) => {
            get_logger().info("Public IP lookup failed; falling back to a random token.", meta! {
                "PollID" => poll_id,
                "Error" => e,
            });
            random_token()
        }
    };

    device.cache_identity(poll_id, &token);
    VoterIdentity::Anonymous(token)
}
