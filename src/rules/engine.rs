//! The per-transaction authorization checks.
//!
//! Each check is a pure function over one borrowed [`RuleSnapshot`]; the
//! caller reads `SnapshotRegistry::current()` once per check so a concurrent
//! reload can never produce a half-updated view mid-decision. Ordering
//! (sender -> recipient -> size) is the host's responsibility; the checks
//! themselves are stateless and independent.

use crate::rules::types::{Decision, Identity, RcptAddress};
use crate::rules::RuleSnapshot;

/// Authentication methods offered to the client, only over a confidential
/// transport.
pub const AUTH_METHODS: &[&str] = &["PLAIN", "LOGIN"];

/// Capability negotiation: whether (and which) AUTH methods the host should
/// advertise for this session.
pub fn offered_auth_methods(tls_enabled: bool) -> Option<&'static [&'static str]> {
    tls_enabled.then_some(AUTH_METHODS)
}

/// MAIL FROM check: a token identity may only use its bound address, a
/// password identity any address in its `froms` set. Unauthenticated sessions
/// are not restricted by this engine.
pub fn authorize_sender(snapshot: &RuleSnapshot, identity: &Identity, mail_from: &str) -> Decision {
    match identity {
        Identity::Unauthenticated => Decision::Allow,
        Identity::Token { mail } => {
            if mail_from == mail {
                Decision::Allow
            } else {
                tracing::info!(%mail_from, bound = %mail, "Tokenized MAIL FROM check failed");
                Decision::Deny {
                    reason: "your token is not authorized to send from this address".into(),
                }
            }
        }
        Identity::User { username } => {
            let Some(user) = snapshot.user(username) else {
                // User vanished across a reload: no sender policy applies.
                tracing::info!(%username, "Authenticated user not in snapshot, skipping MAIL FROM check");
                return Decision::Allow;
            };
            if user.froms.contains(mail_from) {
                Decision::Allow
            } else {
                tracing::info!(%username, %mail_from, "MAIL FROM not in sender list");
                Decision::Deny {
                    reason: "you are not authorized to send from this address".into(),
                }
            }
        }
    }
}

/// RCPT TO check, evaluated in order: open bar, host allow-list, exact
/// recipient, recipient patterns. A recipient no rule allows is treated as an
/// abuse signal: the denial ends the session, not just the transaction.
pub fn authorize_recipient(
    snapshot: &RuleSnapshot,
    identity: &Identity,
    rcpt: &RcptAddress,
) -> Decision {
    let username = match identity {
        // No per-recipient policy applies to token identities.
        Identity::Token { .. } => return Decision::Allow,
        Identity::Unauthenticated => return Decision::Allow,
        Identity::User { username } => username,
    };

    let Some(user) = snapshot.user(username) else {
        tracing::info!(%username, "Authenticated user not in snapshot, skipping RCPT check");
        return Decision::Allow;
    };
    let Some(profile) = snapshot.profile_for_user(user) else {
        // A dangling profile reference is not itself a denial.
        tracing::warn!(
            %username,
            profile = user.profile_key().as_deref().unwrap_or("<none>"),
            "No profile found for user, skipping RCPT check"
        );
        return Decision::Allow;
    };

    if profile.open {
        tracing::debug!(%username, profile = %profile.name, "Open bar profile");
        return Decision::Allow;
    }

    if profile.host_allow.contains(&rcpt.host) {
        tracing::debug!(%username, host = %rcpt.host, "Recipient host allowed");
        return Decision::Allow;
    }

    let route = rcpt.route();
    if profile.rcpt_exact.contains(&route) {
        tracing::debug!(%username, %route, "Recipient explicitly allowed");
        return Decision::Allow;
    }

    // Allow if any pattern matches; scan order only affects performance,
    // not the decision.
    if profile.rcpt_patterns.iter().any(|re| re.is_match(&route)) {
        tracing::debug!(%username, %route, "Recipient matched an allowed pattern");
        return Decision::Allow;
    }

    tracing::info!(%username, rcpt = %rcpt.original, "Recipient not permitted, terminating session");
    Decision::DenyDisconnect {
        reason: format!(
            "user {username} is not allowed to send to recipient {}",
            rcpt.original
        ),
    }
}

/// End-of-body size check against the profile's byte ceiling. Token sessions
/// use the sentinel `"token"` profile; a missing profile or an absent ceiling
/// means unlimited.
pub fn check_message_size(snapshot: &RuleSnapshot, identity: &Identity, data_bytes: u64) -> Decision {
    let profile = match identity {
        Identity::Unauthenticated => return Decision::Allow,
        Identity::Token { .. } => snapshot.token_profile(),
        Identity::User { username } => snapshot
            .user(username)
            .and_then(|user| snapshot.profile_for_user(user)),
    };

    let Some(profile) = profile else {
        tracing::debug!("No profile resolves for identity, skipping size check");
        return Decision::Allow;
    };

    match profile.max_size {
        Some(max) if data_bytes > max => {
            tracing::info!(profile = %profile.name, %data_bytes, max, "Message exceeds size limit");
            Decision::Deny {
                reason: "message too large for this profile".into(),
            }
        }
        _ => Decision::Allow,
    }
}
