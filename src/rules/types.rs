use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Login name reserved for JWT-authenticated principals. A profile stored
/// under the same name carries the size limit for those sessions.
pub const TOKEN_LOGIN: &str = "token";

/// Raw profile row exactly as the operator-configured profiles query returns
/// it: list columns are comma-joined strings, absent values are NULL. This is
/// also the fallback-cache wire format, so a cache read replays the same
/// compile step as a live load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRow {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub open: bool,
    pub host: Option<String>,
    pub rcpt: Option<String>,
    pub rcpt_re: Option<String>,
    pub maxsize: Option<i64>,
}

/// Raw user row from the users query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRow {
    pub username: String,
    pub password: Option<String>,
    pub profile_id: Option<i64>,
    pub froms: Option<String>,
}

/// A compiled bundle of relay permissions. Built once per snapshot load; the
/// recipient patterns are compiled here, never per check.
#[derive(Debug, Clone)]
pub struct Profile {
    /// `"token"` for the sentinel profile, otherwise `"p-<id>"`.
    pub key: String,
    pub name: String,
    /// Open bar: every recipient is authorized.
    pub open: bool,
    pub host_allow: HashSet<String>,
    pub rcpt_exact: HashSet<String>,
    pub rcpt_patterns: Vec<Regex>,
    /// Byte ceiling for message bodies; `None` means unlimited.
    pub max_size: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    /// Encoded secret (`$6$salt$hash`); `None` or malformed means the user
    /// cannot authenticate, it is never an error.
    pub password: Option<String>,
    pub profile_id: Option<i64>,
    /// Never empty after a snapshot build.
    pub froms: HashSet<String>,
}

impl User {
    pub fn profile_key(&self) -> Option<String> {
        self.profile_id.map(|id| format!("p-{id}"))
    }
}

/// The authenticated principal for one connection. Created per authentication
/// attempt, never cached across connections. Serde-tagged so the host gateway
/// can hold onto it between checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    Unauthenticated,
    /// JWT login, bound to exactly one sender address.
    Token { mail: String },
    /// Password login, resolved against the snapshot's users.
    User { username: String },
}

/// A recipient as handed over by the host: parsed mailbox parts plus the
/// original literal text for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcptAddress {
    pub user: String,
    pub host: String,
    pub original: String,
}

impl RcptAddress {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        let user = user.into();
        let host = host.into();
        let original = format!("<{user}@{host}>");
        Self { user, host, original }
    }

    /// The `user@host` form the allow-lists and patterns are matched against.
    pub fn route(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl std::fmt::Display for RcptAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.original)
    }
}

/// Outcome of a single authorization check. `DenyDisconnect` fails the whole
/// session, a plain `Deny` only the current transaction; the host translates
/// these into its protocol-level response codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny { reason: String },
    DenyDisconnect { reason: String },
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rcpt_address_route_and_original() {
        let rcpt = RcptAddress::new("sales", "example.org");
        assert_eq!(rcpt.route(), "sales@example.org");
        assert_eq!(rcpt.to_string(), "<sales@example.org>");
    }

    #[test]
    fn test_profile_key_rendering() {
        let user = User {
            username: "alice".into(),
            password: None,
            profile_id: Some(7),
            froms: HashSet::new(),
        };
        assert_eq!(user.profile_key().as_deref(), Some("p-7"));

        let orphan = User {
            username: "bob".into(),
            password: None,
            profile_id: None,
            froms: HashSet::new(),
        };
        assert!(orphan.profile_key().is_none());
    }

    #[test]
    fn test_identity_round_trips_through_json() {
        let identity = Identity::Token {
            mail: "alice@example.com".into(),
        };
        let json = serde_json::to_string(&identity).unwrap();
        let back: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(identity, back);

        let json = serde_json::to_value(&Identity::Unauthenticated).unwrap();
        assert_eq!(json["kind"], "unauthenticated");
    }

    #[test]
    fn test_decision_serializes_action_tag() {
        let decision = Decision::DenyDisconnect {
            reason: "nope".into(),
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["action"], "deny_disconnect");
        assert_eq!(json["reason"], "nope");
    }
}
