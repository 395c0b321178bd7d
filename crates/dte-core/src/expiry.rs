//! Folio authorization expiry

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::{CAF_VALIDITY_DAYS, EXPIRING_DOCUMENT_TYPES, EXPIRY_WARNING_DAYS};

/// Whether authorizations for this document type expire at all
pub fn is_expiring_type(document_type: u16) -> bool {
    EXPIRING_DOCUMENT_TYPES.contains(&document_type)
}

/// Expiry window of one authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CafExpiry {
    /// Start of the issuance day (UTC)
    pub issued_at: DateTime<Utc>,

    /// `None` for document types that never expire
    pub expires_at: Option<DateTime<Utc>>,
}

impl CafExpiry {
    pub fn new(document_type: u16, issued_on: NaiveDate) -> Self {
        let issued_at = issued_on.and_time(chrono::NaiveTime::MIN).and_utc();
        let expires_at = is_expiring_type(document_type)
            .then(|| issued_at + Duration::days(CAF_VALIDITY_DAYS));
        Self {
            issued_at,
            expires_at,
        }
    }

    /// Check if the authorization has expired at the given instant
    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| at >= expires_at)
    }

    /// Whole days left before expiry; `None` if the authorization never expires
    pub fn days_until_expiry(&self, at: DateTime<Utc>) -> Option<i64> {
        self.expires_at
            .map(|expires_at| (expires_at - at).num_days().max(0))
    }

    /// Check if in warning period (approaching expiry)
    pub fn is_warning_period(&self, at: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                at >= expires_at - Duration::days(EXPIRY_WARNING_DAYS) && !self.is_expired(at)
            }
            None => false,
        }
    }

    /// Human-readable status line
    pub fn status_message(&self, at: DateTime<Utc>) -> String {
        match self.expires_at {
            None => "OK: does not expire".to_string(),
            Some(expires_at) if self.is_expired(at) => {
                format!("Expired on {}", expires_at.format("%Y-%m-%d"))
            }
            Some(_) if self.is_warning_period(at) => format!(
                "Warning: {} days until expiry",
                self.days_until_expiry(at).unwrap_or_default()
            ),
            Some(_) => format!(
                "OK: {} days remaining",
                self.days_until_expiry(at).unwrap_or_default()
            ),
        }
    }
}
