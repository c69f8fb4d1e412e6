//! Static credential authentication.
//!
//! Sessions authenticate with a single username/password pair taken from
//! configuration and compared exactly. There is no retry at this layer;
//! a failed attempt closes the connection.

use crate::config::ServerSettings;

/// Validates client credentials against the configured pair.
#[derive(Debug, Clone)]
pub struct Authenticator {
    username: String,
    password: String,
}

impl Authenticator {
    pub fn new(settings: &ServerSettings) -> Self {
        Self {
            username: settings.username.clone(),
            password: settings.password.clone(),
        }
    }

    /// Returns whether the presented credentials match exactly.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        username == self.username && password == self.password
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator() -> Authenticator {
        Authenticator::new(&ServerSettings::default())
    }

    #[test]
    fn test_correct_credentials() {
        assert!(authenticator().verify("confplane", "confplane"));
    }

    #[test]
    fn test_wrong_password() {
        assert!(!authenticator().verify("confplane", "wrong"));
    }

    #[test]
    fn test_wrong_username() {
        assert!(!authenticator().verify("admin", "confplane"));
    }

    #[test]
    fn test_exact_match_is_case_sensitive() {
        assert!(!authenticator().verify("Confplane", "confplane"));
        assert!(!authenticator().verify("confplane", "CONFPLANE"));
    }

    #[test]
    fn test_empty_credentials_rejected() {
        assert!(!authenticator().verify("", ""));
    }
}
