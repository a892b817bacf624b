//! Error taxonomy for the broadcast relay
//!
//! Only [`RelayError::Configuration`] is allowed to leave the message pump.
//! Every other variant is handled where it occurs: connection failures back
//! off and retry, protocol failures reconnect immediately, decode failures are
//! acknowledged and dropped, and publish failures are logged and swallowed.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Decode error: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    #[error("Publish error: {message}")]
    Publish { message: String },
}

impl RelayError {
    /// Create configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create publish error
    pub fn publish<S: Into<String>>(message: S) -> Self {
        Self::Publish {
            message: message.into(),
        }
    }

    /// Whether this error must stop the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::Configuration { .. })
    }

    /// Display form with credentials redacted, for logging
    pub fn sanitized(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

impl From<crate::config::ConfigError> for RelayError {
    fn from(error: crate::config::ConfigError) -> Self {
        RelayError::configuration(error.to_string())
    }
}

static SECRET_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|passwd|token|secret)[=:]\s*\S+").expect("valid secret regex")
});

static URI_USERINFO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(amqps?://)([^:/@\s]+):[^@\s]*@").expect("valid userinfo regex")
});

/// Redact credentials from error text before it reaches the logs
///
/// Broker errors may echo the connection URI back, which embeds the password.
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PAIR.replace_all(message, "${1}=***").to_string();
    sanitized = URI_USERINFO
        .replace_all(&sanitized, "${1}${2}:***@")
        .to_string();

    // Truncate very long messages - ensure total length is <= 500
    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let mut cut = 500 - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}
