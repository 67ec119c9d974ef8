use chrono::{DateTime, Duration, Utc};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::common::error::CredentialError;

/// Secret half of a lease. Wiped from memory on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct LeaseSecret {
    secret_access_key: String,
    session_token: String,
}

impl LeaseSecret {
    pub fn new(secret_access_key: String, session_token: String) -> Self {
        Self {
            secret_access_key,
            session_token,
        }
    }

    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    pub fn session_token(&self) -> &str {
        &self.session_token
    }
}

/// Temporary scoped credentials for exactly one run in one tenant account.
///
/// Deliberately not `Clone`: the lease moves into the connector of the run
/// that obtained it and dies with it.
pub struct CredentialLease {
    lease_id: String,
    customer_account_id: String,
    role_identifier: String,
    access_key_id: String,
    secret: LeaseSecret,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl CredentialLease {
    pub fn new(
        customer_account_id: impl Into<String>,
        role_identifier: impl Into<String>,
        access_key_id: impl Into<String>,
        secret: LeaseSecret,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            lease_id: uuid::Uuid::new_v4().to_string(),
            customer_account_id: customer_account_id.into(),
            role_identifier: role_identifier.into(),
            access_key_id: access_key_id.into(),
            secret,
            issued_at: Utc::now(),
            expires_at,
        }
    }

    pub fn lease_id(&self) -> &str {
        &self.lease_id
    }

    pub fn customer_account_id(&self) -> &str {
        &self.customer_account_id
    }

    pub fn role_identifier(&self) -> &str {
        &self.role_identifier
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret(&self) -> &LeaseSecret {
        &self.secret
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).max(Duration::zero())
    }

    /// Errors once the lease must no longer be used.
    pub fn ensure_valid(&self) -> Result<(), CredentialError> {
        if self.is_expired() {
            return Err(CredentialError::LeaseExpired {
                lease_id: self.lease_id.clone(),
                expired_at: self.expires_at,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for CredentialLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialLease")
            .field("lease_id", &self.lease_id)
            .field("customer_account_id", &self.customer_account_id)
            .field("role_identifier", &self.role_identifier)
            .field("access_key_id", &self.access_key_id)
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::lease_expiring_in;

    #[test]
    fn debug_output_redacts_secret_material() {
        let lease = lease_expiring_in(60);
        let debug = format!("{:?}", lease);
        assert!(debug.contains("ASIATESTKEY"));
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("session-token"));
    }

    #[test]
    fn expired_lease_is_rejected() {
        let lease = lease_expiring_in(-1);
        assert!(lease.is_expired());
        assert!(matches!(lease.ensure_valid(), Err(CredentialError::LeaseExpired { .. })));
        assert_eq!(lease.remaining(), Duration::zero());
    }

    #[test]
    fn fresh_lease_is_usable() {
        let lease = lease_expiring_in(3600);
        assert!(lease.ensure_valid().is_ok());
        assert!(lease.remaining() > Duration::minutes(59));
        assert_ne!(lease.lease_id(), lease_expiring_in(3600).lease_id());
    }
}
