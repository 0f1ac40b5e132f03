//! Credential verification: stored sha512-crypt passwords and shared-secret
//! JWT logins. Every failure mode — unknown user, malformed stored encoding,
//! bad signature, missing claim — is a denial, never an error.

use josekit::jws::HS256;
use josekit::jwt;

use crate::rules::types::{Identity, TOKEN_LOGIN};
use crate::rules::RuleSnapshot;

/// Name of the token payload field holding the bound sender address.
const MAIL_CLAIM: &str = "mail";

pub struct CredentialVerifier {
    jwt_secret: Vec<u8>,
}

impl CredentialVerifier {
    pub fn new(jwt_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
        }
    }

    /// Verify a presented secret and yield the authenticated identity, or
    /// `None` when the credentials are denied. The login `"token"` selects
    /// JWT verification; anything else is a password lookup against the
    /// given snapshot.
    pub fn verify(&self, snapshot: &RuleSnapshot, login: &str, secret: &str) -> Option<Identity> {
        if login == TOKEN_LOGIN {
            self.verify_token(secret)
        } else {
            verify_password(snapshot, login, secret)
        }
    }

    fn verify_token(&self, token: &str) -> Option<Identity> {
        if self.jwt_secret.is_empty() {
            tracing::info!("Token login attempted but no jwt secret is configured");
            return None;
        }

        let verifier = match HS256.verifier_from_bytes(&self.jwt_secret) {
            Ok(verifier) => verifier,
            Err(err) => {
                tracing::warn!(%err, "Could not build token verifier from configured secret");
                return None;
            }
        };

        let payload = match jwt::decode_with_verifier(token, &verifier) {
            Ok((payload, _header)) => payload,
            Err(err) => {
                tracing::info!(%err, "Token invalid");
                return None;
            }
        };

        // A token without a bound sender is useless to every downstream
        // check; deny it here rather than let it send as nobody.
        match payload.claim(MAIL_CLAIM).and_then(|v| v.as_str()) {
            Some(mail) => {
                tracing::info!(%mail, "Token OK");
                Some(Identity::Token {
                    mail: mail.to_string(),
                })
            }
            None => {
                tracing::info!("Verified token carries no mail claim");
                None
            }
        }
    }
}

fn verify_password(snapshot: &RuleSnapshot, login: &str, secret: &str) -> Option<Identity> {
    let Some(user) = snapshot.user(login) else {
        tracing::info!(user = %login, "User unknown");
        return None;
    };
    let Some(stored) = user.password.as_deref() else {
        tracing::info!(user = %login, "User has no stored credential");
        return None;
    };

    // `$method$id$salt$hash`; fewer than 4 components is "no valid
    // credential", not an error.
    if stored.split('$').count() < 4 {
        tracing::warn!(user = %login, "Stored credential encoding is malformed");
        return None;
    }

    match sha_crypt::sha512_check(secret, stored) {
        Ok(()) => {
            tracing::info!(user = %login, "User authentication succeeded");
            Some(Identity::User {
                username: login.to_string(),
            })
        }
        Err(_) => {
            tracing::info!(user = %login, "User authentication failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::types::UserRow;
    use josekit::jws::JwsHeader;
    use josekit::jwt::JwtPayload;
    use serde_json::json;

    // Canonical sha512-crypt vector: password "Hello world!", salt "saltstring".
    const CRYPT_HELLO_WORLD: &str = "$6$saltstring$svn8UoSVapNtMuq1ukKS4tPQd8iKwSMHWjl/O817G3uBnIFNjnQJuesI68u4OTLiBFdcbYEdFCoEOfaS35inz1";

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn snapshot_with_password(password: Option<&str>) -> RuleSnapshot {
        RuleSnapshot::build(
            vec![],
            vec![UserRow {
                username: "alice".into(),
                password: password.map(str::to_string),
                profile_id: Some(1),
                froms: None,
            }],
            "local",
        )
    }

    fn sign_token(secret: &[u8], claims: &[(&str, serde_json::Value)]) -> String {
        let mut payload = JwtPayload::new();
        for (key, value) in claims {
            payload
                .set_claim(key, Some(value.clone()))
                .expect("setting claim");
        }
        let signer = HS256.signer_from_bytes(secret).expect("signer");
        jwt::encode_with_signer(&payload, &JwsHeader::new(), &signer).expect("signing")
    }

    #[test]
    fn test_password_match_yields_user_identity() {
        let verifier = CredentialVerifier::new(SECRET);
        let snapshot = snapshot_with_password(Some(CRYPT_HELLO_WORLD));
        assert_eq!(
            verifier.verify(&snapshot, "alice", "Hello world!"),
            Some(Identity::User {
                username: "alice".into()
            })
        );
    }

    #[test]
    fn test_password_mismatch_denied() {
        let verifier = CredentialVerifier::new(SECRET);
        let snapshot = snapshot_with_password(Some(CRYPT_HELLO_WORLD));
        assert_eq!(verifier.verify(&snapshot, "alice", "hello world!"), None);
    }

    #[test]
    fn test_unknown_user_and_missing_password_denied() {
        let verifier = CredentialVerifier::new(SECRET);
        let snapshot = snapshot_with_password(None);
        assert_eq!(verifier.verify(&snapshot, "alice", "anything"), None);
        assert_eq!(verifier.verify(&snapshot, "nobody", "anything"), None);
    }

    #[test]
    fn test_malformed_encoding_denied_not_panicking() {
        let verifier = CredentialVerifier::new(SECRET);
        for bad in ["$6$onlytwo", "plaintext", "", "$$", "$6$salt"] {
            let snapshot = snapshot_with_password(Some(bad));
            assert_eq!(verifier.verify(&snapshot, "alice", "Hello world!"), None);
        }
    }

    #[test]
    fn test_token_with_mail_claim_accepted() {
        let verifier = CredentialVerifier::new(SECRET);
        let snapshot = snapshot_with_password(None);
        let token = sign_token(SECRET, &[("mail", json!("alice@example.com"))]);
        assert_eq!(
            verifier.verify(&snapshot, "token", &token),
            Some(Identity::Token {
                mail: "alice@example.com".into()
            })
        );
    }

    #[test]
    fn test_token_without_mail_claim_denied() {
        let verifier = CredentialVerifier::new(SECRET);
        let snapshot = snapshot_with_password(None);
        let token = sign_token(SECRET, &[("sub", json!("alice"))]);
        assert_eq!(verifier.verify(&snapshot, "token", &token), None);
    }

    #[test]
    fn test_token_with_wrong_signature_denied() {
        let verifier = CredentialVerifier::new(SECRET);
        let snapshot = snapshot_with_password(None);
        let token = sign_token(
            b"another-secret-another-secret-xx",
            &[("mail", json!("alice@example.com"))],
        );
        assert_eq!(verifier.verify(&snapshot, "token", &token), None);
        assert_eq!(verifier.verify(&snapshot, "token", "not-a-jwt"), None);
    }

    #[test]
    fn test_token_login_denied_without_configured_secret() {
        let verifier = CredentialVerifier::new(Vec::new());
        let snapshot = snapshot_with_password(None);
        let token = sign_token(SECRET, &[("mail", json!("alice@example.com"))]);
        assert_eq!(verifier.verify(&snapshot, "token", &token), None);
    }
}
