//! Email confirmation-code flow.
//!
//! A code is `<base36 timestamp>-<hex HMAC-SHA256>`. The MAC covers the issue timestamp
//! and the account state (id, email, active flag, last login). Activating an account or
//! logging in changes that state, so each code works at most once.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{
    auth::issue_token_pair,
    config::AppConfig,
    error::ApiError,
    mail::{Mailer, OutgoingMail},
    models::{TokenPair, User},
    repository::Repository,
};

type HmacSha256 = Hmac<Sha256>;

/// ConfirmationCodes
///
/// Stateless generator/checker; nothing is stored server-side.
#[derive(Clone)]
pub struct ConfirmationCodes {
    secret: Vec<u8>,
    ttl_secs: i64,
}

impl ConfirmationCodes {
    pub fn new(secret: &str, ttl_secs: i64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl_secs,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.jwt_secret, config.confirmation_code_ttl_secs)
    }

    fn mac(&self, user: &User, timestamp: i64) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        let last_login = user
            .last_login
            .map(|t| t.timestamp_micros().to_string())
            .unwrap_or_default();
        mac.update(b"yamdb.confirmation-code");
        mac.update(user.id.as_bytes());
        mac.update(user.email.as_bytes());
        mac.update(&[user.is_active as u8]);
        mac.update(last_login.as_bytes());
        mac.update(&timestamp.to_be_bytes());
        mac
    }

    pub fn make_code(&self, user: &User) -> String {
        self.make_code_at(user, Utc::now().timestamp())
    }

    fn make_code_at(&self, user: &User, timestamp: i64) -> String {
        let tag = self.mac(user, timestamp).finalize().into_bytes();
        format!("{}-{}", to_base36(timestamp), hex::encode(tag))
    }

    /// True iff `code` was issued for the user's current state and has not expired.
    pub fn check_code(&self, user: &User, code: &str) -> bool {
        let Some((ts_part, tag_part)) = code.split_once('-') else {
            return false;
        };
        let (Some(timestamp), Some(tag)) = (from_base36(ts_part), hex::decode(tag_part)) else {
            return false;
        };
        let age = Utc::now().timestamp() - timestamp;
        if age < 0 || age > self.ttl_secs {
            return false;
        }
        // Constant-time comparison.
        self.mac(user, timestamp).verify_slice(&tag).is_ok()
    }
}

fn to_base36(mut n: i64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n <= 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn from_base36(s: &str) -> Option<i64> {
    if s.is_empty() || s.len() > 13 {
        return None;
    }
    i64::from_str_radix(s, 36).ok()
}

// Lowercase hex for the MAC part of a code.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn decode(s: &str) -> Option<Vec<u8>> {
        if s.len() % 2 != 0 || !s.is_ascii() {
            return None;
        }
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
            .collect()
    }
}

/// Username derived from the local part of an email address.
pub fn username_from_email(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

/// request_code
///
/// `unregistered → pending`. Creates the inactive account if needed (single atomic
/// upsert), then mails a fresh code. Calling it again for the same email returns the same
/// account with a new code. A mail failure aborts with an error.
pub async fn request_code(
    repo: &dyn Repository,
    mailer: &dyn Mailer,
    codes: &ConfirmationCodes,
    email: &str,
) -> Result<User, ApiError> {
    let username = username_from_email(email);
    if let Err(e) = crate::validation::validate_username(username) {
        let message = e.message.map(|m| m.to_string()).unwrap_or_default();
        return Err(ApiError::field("email", "username", message));
    }

    if let Some(existing) = repo.get_user_by_username(username).await? {
        if existing.email != email {
            return Err(ApiError::field(
                "email",
                "username_taken",
                format!("the username '{username}' derived from this email is already taken"),
            ));
        }
    }

    let user = repo.get_or_create_pending_user(email, username).await?;
    let code = codes.make_code(&user);

    mailer
        .send(OutgoingMail {
            to: user.email.clone(),
            subject: "Registration confirmation".to_string(),
            body: format!(
                "To obtain a token and confirm your registration, send a POST request with:\n\
                 email: {}\n\
                 confirmation_code: {}",
                user.email, code
            ),
        })
        .await?;

    tracing::info!(username = %user.username, active = user.is_active, "confirmation code issued");
    Ok(user)
}

/// verify_code
///
/// `pending → active`. Only a matching code activates the account and yields tokens.
/// Unknown email and wrong code give the same error, so the endpoint does not reveal
/// which addresses are registered.
pub async fn verify_code(
    repo: &dyn Repository,
    codes: &ConfirmationCodes,
    config: &AppConfig,
    email: &str,
    code: &str,
) -> Result<TokenPair, ApiError> {
    let invalid = || {
        ApiError::field(
            "confirmation_code",
            "invalid",
            "invalid email or confirmation code",
        )
    };

    let Some(user) = repo.get_user_by_email(email).await? else {
        tracing::info!("token requested for unknown email");
        return Err(invalid());
    };

    if !codes.check_code(&user, code) {
        tracing::info!(username = %user.username, "confirmation code rejected");
        return Err(invalid());
    }

    let user = repo.record_login(user.id).await?.ok_or_else(invalid)?;
    tracing::info!(username = %user.username, "account confirmed");
    issue_token_pair(config, user.id)
}
