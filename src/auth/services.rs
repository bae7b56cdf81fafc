use lazy_static::lazy_static;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use time::{Duration, OffsetDateTime};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// `len` bytes from the OS RNG, hex encoded.
pub fn random_hex(len: usize) -> String {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationToken {
    pub token: String,
    pub expires: OffsetDateTime,
}

impl VerificationToken {
    pub fn issue(now: OffsetDateTime, ttl_hours: i64) -> Self {
        Self {
            token: random_hex(32),
            expires: now + Duration::hours(ttl_hours),
        }
    }

    pub fn url(&self, app_url: &str) -> String {
        format!(
            "{}/verify-email?token={}",
            app_url.trim_end_matches('/'),
            self.token
        )
    }
}
