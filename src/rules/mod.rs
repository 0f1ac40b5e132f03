pub mod engine;
pub mod registry;
pub mod types;

use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use types::{Profile, ProfileRow, User, UserRow, TOKEN_LOGIN};

/// Fully resolved set of profiles and users for one point in time.
/// Immutable after construction — a reload produces a wholly new snapshot,
/// which is what makes concurrent reads safe without per-read locking.
#[derive(Debug)]
pub struct RuleSnapshot {
    /// `"token"` or `"p-<id>"` -> Profile
    pub profiles: HashMap<String, Profile>,
    /// username -> User
    pub users: HashMap<String, User>,
    pub loaded_at: DateTime<Utc>,
}

impl RuleSnapshot {
    /// Compile raw rows into a snapshot: split delimited columns, compile
    /// recipient patterns, default empty sender lists. A pattern that fails to
    /// compile is dropped with a warning; it never aborts the build.
    pub fn build(profile_rows: Vec<ProfileRow>, user_rows: Vec<UserRow>, default_domain: &str) -> Self {
        let mut profiles = HashMap::new();
        for row in profile_rows {
            let key = if row.name == TOKEN_LOGIN {
                TOKEN_LOGIN.to_string()
            } else {
                format!("p-{}", row.id)
            };

            let mut rcpt_patterns = Vec::new();
            for source in split_list(row.rcpt_re.as_deref()) {
                match Regex::new(&source) {
                    Ok(re) => rcpt_patterns.push(re),
                    Err(err) => {
                        tracing::warn!(
                            profile = %key,
                            pattern = %source,
                            %err,
                            "Dropping unparseable recipient pattern"
                        );
                    }
                }
            }

            profiles.insert(
                key.clone(),
                Profile {
                    key,
                    name: row.name,
                    open: row.open,
                    host_allow: split_list(row.host.as_deref()).into_iter().collect(),
                    rcpt_exact: split_list(row.rcpt.as_deref()).into_iter().collect(),
                    rcpt_patterns,
                    max_size: row.maxsize.and_then(|v| u64::try_from(v).ok()),
                },
            );
        }

        let mut users = HashMap::new();
        for row in user_rows {
            let mut froms: HashSet<String> =
                split_list(row.froms.as_deref()).into_iter().collect();
            if froms.is_empty() {
                froms.insert(format!("{}@{}", row.username, default_domain));
            }
            users.insert(
                row.username.clone(),
                User {
                    username: row.username,
                    password: row.password,
                    profile_id: row.profile_id,
                    froms,
                },
            );
        }

        Self {
            profiles,
            users,
            loaded_at: Utc::now(),
        }
    }

    pub fn user(&self, login: &str) -> Option<&User> {
        self.users.get(login)
    }

    pub fn profile_for_user(&self, user: &User) -> Option<&Profile> {
        self.profiles.get(&user.profile_key()?)
    }

    /// The sentinel profile applied to JWT-authenticated sessions.
    pub fn token_profile(&self) -> Option<&Profile> {
        self.profiles.get(TOKEN_LOGIN)
    }
}

/// Comma-joined column -> collection. Empty or NULL yields an empty
/// collection, never null; blank fragments are discarded.
fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|joined| {
        joined
            .split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect()
    })
    .unwrap_or_default()
}
