//! Client error types
//!
//! [`ClientError`] gathers the failures of every stage: token, trust anchor,
//! transport and configuration. Messages meant for humans go through
//! [`ClientError::user_message`], which strips anything that looks like a
//! credential.

use crate::auth::TokenError;
use crate::config::ConfigError;
use crate::session::SessionState;
use crate::transport::trust_anchor::ProvisionError;
use crate::transport::TransportError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Top-level error for client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Trust anchor error: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cannot {operation} while session is {}", .state.label())]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
}

impl ClientError {
    pub fn invalid_state(operation: &'static str, state: SessionState) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Broker return code when the failure was a refused CONNACK
    pub fn return_code(&self) -> Option<rumqttc::ConnectReturnCode> {
        match self {
            ClientError::Transport(e) => e.return_code(),
            _ => None,
        }
    }

    /// Display text safe to print or log at any level
    pub fn user_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret|sign)[=:]\s*[^\s&\]]+")
        .expect("secret pattern is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

const MAX_MESSAGE_LEN: usize = 500;

/// Redact secrets and sensitive paths, then cap the length
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let mut sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .into_owned();

    if sanitized.len() > MAX_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(truncate_suffix);
    }

    sanitized
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
