//! Credential verification for device registrations.
//!
//! Location credentials need an exact access id and a password check whose
//! strictness is configurable ([`PasswordMatch`]). With the default `Prefix`
//! mode the configured password only has to be a byte-prefix of what the
//! device sent, which older firmware relies on. E-mail credentials need an
//! exact address and a byte-for-byte auth key.
//!
//! Secret comparisons go through `subtle` so timing does not leak how many
//! leading bytes matched.

use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::config::{AuthConfig, PasswordMatch};
use crate::error::{ProtocolError, Result};
use crate::protocol::registration::Credential;

#[derive(Debug, Clone, Copy, Default)]
pub struct Authenticator;

impl Authenticator {
    pub fn new() -> Self {
        Self
    }

    /// Check `offered` against `config`. The error text names the credential
    /// type and the values offered.
    pub fn authorize(&self, config: &AuthConfig, offered: &Credential) -> Result<()> {
        let outcome = match offered {
            Credential::Location {
                access_id,
                password,
            } => self.check_location(config, *access_id, password),
            Credential::Email { email, auth_key } => self.check_email(config, email, auth_key),
        };

        match &outcome {
            Ok(()) => debug!(credential = offered.kind(), "Credentials accepted"),
            Err(e) => warn!(credential = offered.kind(), error = %e, "Credentials rejected"),
        }
        outcome
    }

    pub fn is_authorized(&self, config: &AuthConfig, offered: &Credential) -> bool {
        self.authorize(config, offered).is_ok()
    }

    fn check_location(&self, config: &AuthConfig, access_id: i32, password: &str) -> Result<()> {
        let reject = |detail: &str| {
            ProtocolError::AuthorizationFailed(format!(
                "location credentials rejected ({detail}): access id {access_id}, password '{password}'"
            ))
        };

        let (Some(expected_id), Some(expected_pwd)) = (config.access_id, &config.location_password)
        else {
            return Err(reject("no location credentials configured"));
        };
        if expected_id != access_id {
            return Err(reject("access id mismatch"));
        }

        let offered = password.as_bytes();
        let expected = expected_pwd.as_bytes();
        let matches = match config.password_match {
            PasswordMatch::Prefix => {
                offered.len() >= expected.len()
                    && bool::from(offered[..expected.len()].ct_eq(expected))
            }
            PasswordMatch::Exact => bool::from(offered.ct_eq(expected)),
        };
        if !matches {
            return Err(reject("password mismatch"));
        }
        Ok(())
    }

    fn check_email(&self, config: &AuthConfig, email: &str, auth_key: &[u8]) -> Result<()> {
        let reject = |detail: &str| {
            ProtocolError::AuthorizationFailed(format!(
                "email credentials rejected ({detail}): email '{email}', auth key {}",
                hex::encode(auth_key)
            ))
        };

        let Some(expected_email) = &config.email else {
            return Err(reject("no email credentials configured"));
        };
        let expected_key = match config.auth_key_bytes() {
            Ok(Some(key)) => key,
            Ok(None) => return Err(reject("no auth key configured")),
            Err(e) => return Err(reject(&e.to_string())),
        };
        if expected_email != email {
            return Err(reject("email mismatch"));
        }
        if !bool::from(expected_key.as_slice().ct_eq(auth_key)) {
            return Err(reject("auth key mismatch"));
        }
        Ok(())
    }
}
