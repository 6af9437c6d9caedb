//! Sign-in credentials for the chart site.
//!
//! Passwords are held as [`SecretString`] so they never end up in logs or in
//! the `config` event sent back to the control panel.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};

/// Email + password pair used by the session manager to sign in.
#[derive(Clone)]
pub struct Credentials {
    email: String,
    password: SecretString,
}

impl Credentials {
    /// Build credentials, returning `None` if either part is blank.
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Option<Self> {
        let email = email.into().trim().to_string();
        let password = password.into();
        if email.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self {
            email,
            password: SecretString::from(password),
        })
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// Plaintext password, only for typing into the sign-in form.
    pub(crate) fn expose_password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}
