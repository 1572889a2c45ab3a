//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for bearer tokens sent to the
//! roster API. `SecretString` implements `Debug` with redaction, so a struct
//! deriving `Debug` that holds one is safe to log.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct RosterAuth {
//!     base_url: String,
//!     token: SecretString,
//! }
//!
//! let auth = RosterAuth {
//!     base_url: "http://127.0.0.1:8000/api/v1".to_string(),
//!     token: SecretString::from("eyJhbGciOi"),
//! };
//!
//! assert!(!format!("{auth:?}").contains("eyJhbGciOi"));
//! assert_eq!(auth.token.expose_secret(), "eyJhbGciOi");
//! ```

pub use secrecy::{ExposeSecret, SecretString};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("bearer-abc");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("bearer-abc"));
    }

    #[test]
    fn test_deserialize() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct ApiAuth {
            base_url: String,
            token: SecretString,
        }

        let json = r#"{"base_url": "http://roster", "token": "my-secret-value"}"#;
        let auth: ApiAuth = serde_json::from_str(json).expect("deserialize");

        assert_eq!(auth.token.expose_secret(), "my-secret-value");

        let debug = format!("{auth:?}");
        assert!(!debug.contains("my-secret-value"));
        assert!(debug.contains("REDACTED"));
    }
}
