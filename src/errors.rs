//! Typed error taxonomy for the client.
//!
//! The platform overloads its numeric API error codes across HTTP statuses,
//! so errors carry the parsed error list alongside the status code. Account
//! lifecycle failures additionally carry a redacted identity snapshot so a
//! caller can tell which account died without re-inspecting logs.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::account::{Account, AccountStatus};
use crate::captcha::CaptchaError;
use crate::models::DecodeError;
use crate::session::TransportError;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error surfaced by [`crate::Client`].
#[derive(Debug, Error)]
pub enum Error {
    /// Caller misconfiguration (missing auth token, missing credentials for
    /// a recovery path). Never retried.
    #[error("{0}")]
    Usage(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("captcha error: {0}")]
    Captcha(#[from] CaptchaError),
    /// Platform HTTP error with no account lifecycle meaning.
    #[error(transparent)]
    Http(#[from] HttpApiError),
    /// Terminal (or recovery-exhausted) account condition.
    #[error(transparent)]
    Account(#[from] AccountError),
    /// A flow-task step failed in a way no branch handles.
    #[error(transparent)]
    Flow(#[from] FlowError),
}

impl Error {
    /// API error codes attached to this error, if any.
    pub fn api_codes(&self) -> &[i64] {
        match self {
            Error::Http(err) => &err.bundle.codes,
            Error::Account(err) => &err.bundle.codes,
            _ => &[],
        }
    }
}

/// HTTP status classes the platform is known to answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    RateLimited,
    ServerError,
    Unexpected,
}

impl HttpErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => HttpErrorKind::BadRequest,
            401 => HttpErrorKind::Unauthorized,
            403 => HttpErrorKind::Forbidden,
            404 => HttpErrorKind::NotFound,
            429 => HttpErrorKind::RateLimited,
            500.. => HttpErrorKind::ServerError,
            _ => HttpErrorKind::Unexpected,
        }
    }
}

impl fmt::Display for HttpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HttpErrorKind::BadRequest => "bad request",
            HttpErrorKind::Unauthorized => "unauthorized",
            HttpErrorKind::Forbidden => "forbidden",
            HttpErrorKind::NotFound => "not found",
            HttpErrorKind::RateLimited => "rate limited",
            HttpErrorKind::ServerError => "server error",
            HttpErrorKind::Unexpected => "unexpected status",
        };
        f.write_str(name)
    }
}

/// Parsed `errors` payload of a platform response.
///
/// Bodies come in three shapes: a JSON object with an `errors` array, a JSON
/// object with a single `error`/`detail` field, or raw HTML. All three are
/// normalised here.
#[derive(Debug, Clone, Default)]
pub struct ApiErrorBundle {
    pub status: u16,
    pub errors: Vec<Value>,
    pub codes: Vec<i64>,
    pub messages: Vec<String>,
}

impl ApiErrorBundle {
    /// Normalise a response body into the bundle. `body` is `None` for
    /// non-JSON (HTML) responses.
    pub fn from_body(status: u16, body: Option<&Value>) -> Self {
        let mut bundle = ApiErrorBundle {
            status,
            ..Default::default()
        };

        let Some(body) = body else {
            return bundle;
        };

        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            for error in errors {
                bundle.push_error(error);
            }
        } else if let Some(error) = body.get("error") {
            bundle.push_error(error);
        } else if let Some(detail) = body.get("detail").and_then(Value::as_str) {
            bundle.messages.push(detail.to_string());
        }

        bundle
    }

    fn push_error(&mut self, error: &Value) {
        self.errors.push(error.clone());
        match error {
            Value::String(message) => self.messages.push(message.clone()),
            Value::Object(fields) => {
                if let Some(code) = fields.get("code").and_then(Value::as_i64) {
                    self.codes.push(code);
                }
                if let Some(message) = fields.get("message").and_then(Value::as_str) {
                    self.messages.push(message.to_string());
                }
            }
            _ => {}
        }
    }

    pub fn has_code(&self, code: i64) -> bool {
        self.codes.contains(&code)
    }

    /// `bounce_location` of the first error carrying the given code.
    pub fn bounce_location(&self, code: i64) -> Option<&str> {
        self.errors.iter().find_map(|error| {
            (error.get("code").and_then(Value::as_i64) == Some(code))
                .then(|| error.get("bounce_location").and_then(Value::as_str))
                .flatten()
        })
    }

    fn summary(&self) -> String {
        let mut text = String::new();
        for error in &self.errors {
            let code = error.get("code").and_then(Value::as_i64);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| error.as_str());
            match (code, message) {
                (Some(code), Some(message)) => {
                    text.push_str(&format!(" ({code}) {message}"));
                }
                (None, Some(message)) => text.push_str(&format!(" {message}")),
                (Some(code), None) => text.push_str(&format!(" ({code})")),
                (None, None) => {}
            }
        }
        if text.is_empty() {
            for message in &self.messages {
                text.push_str(&format!(" {message}"));
            }
        }
        text
    }
}

impl fmt::Display for ApiErrorBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.status, self.summary())
    }
}

/// Platform HTTP error carrying the full parsed error detail.
#[derive(Debug, Error)]
#[error("{kind} ({bundle})")]
pub struct HttpApiError {
    pub kind: HttpErrorKind,
    pub bundle: ApiErrorBundle,
}

impl HttpApiError {
    pub fn new(kind: HttpErrorKind, bundle: ApiErrorBundle) -> Self {
        Self { kind, bundle }
    }

    pub fn status(&self) -> u16 {
        self.bundle.status
    }
}

/// Redacted account identity attached to lifecycle errors.
#[derive(Debug, Clone)]
pub struct AccountIdent {
    pub hidden_auth_token: Option<String>,
    pub id: Option<u64>,
    pub username: Option<String>,
}

impl AccountIdent {
    pub fn of(account: &Account) -> Self {
        Self {
            hidden_auth_token: account.hidden_auth_token(),
            id: account.id(),
            username: account.username().map(str::to_string),
        }
    }
}

impl fmt::Display for AccountIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(auth_token={}, id={}, username={})",
            self.hidden_auth_token.as_deref().unwrap_or("-"),
            self.id.map(|id| id.to_string()).as_deref().unwrap_or("-"),
            self.username.as_deref().unwrap_or("-"),
        )
    }
}

/// Terminal account conditions. The matching [`AccountStatus`] is always
/// written to the account before one of these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountErrorKind {
    BadToken,
    Locked,
    ConsentLocked,
    Suspended,
    NotFound,
}

impl AccountErrorKind {
    /// The status the account is left in.
    pub fn status(&self) -> AccountStatus {
        match self {
            AccountErrorKind::BadToken => AccountStatus::BadToken,
            AccountErrorKind::Locked => AccountStatus::Locked,
            AccountErrorKind::ConsentLocked => AccountStatus::ConsentLocked,
            AccountErrorKind::Suspended => AccountStatus::Suspended,
            AccountErrorKind::NotFound => AccountStatus::NotFound,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            AccountErrorKind::BadToken => "account auth_token is invalid or expired",
            AccountErrorKind::Locked => "account is locked; captcha required to unlock",
            AccountErrorKind::ConsentLocked => "account is locked behind a manual consent flow",
            AccountErrorKind::Suspended => "account is suspended",
            AccountErrorKind::NotFound => "account not found",
        }
    }
}

/// Account lifecycle error: the condition, who it happened to, and the raw
/// platform error detail that triggered it.
#[derive(Debug, Error)]
#[error("{account} {}: {bundle}", .kind.describe())]
pub struct AccountError {
    pub kind: AccountErrorKind,
    pub account: AccountIdent,
    pub bundle: ApiErrorBundle,
}

impl AccountError {
    pub fn new(kind: AccountErrorKind, account: AccountIdent, bundle: ApiErrorBundle) -> Self {
        Self {
            kind,
            account,
            bundle,
        }
    }
}

/// Failure inside a flow-task (login, 2FA enrollment, unlock): names the
/// subtask that failed and why.
#[derive(Debug, Error)]
#[error("flow task `{subtask}` failed: {reason}")]
pub struct FlowError {
    pub subtask: String,
    pub reason: String,
}

impl FlowError {
    pub fn new(subtask: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            subtask: subtask.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bundle_parses_errors_array() {
        let body = json!({
            "errors": [
                {"code": 326, "message": "locked", "bounce_location": "/i/flow/consent_flow"},
                {"code": 32, "message": "bad token"},
            ]
        });
        let bundle = ApiErrorBundle::from_body(403, Some(&body));
        assert_eq!(bundle.codes, vec![326, 32]);
        assert!(bundle.has_code(326));
        assert_eq!(bundle.bounce_location(326), Some("/i/flow/consent_flow"));
        assert_eq!(bundle.bounce_location(32), None);
    }

    #[test]
    fn bundle_parses_detail_only_body() {
        let body = json!({"detail": "something went wrong"});
        let bundle = ApiErrorBundle::from_body(400, Some(&body));
        assert!(bundle.codes.is_empty());
        assert_eq!(bundle.messages, vec!["something went wrong"]);
    }

    #[test]
    fn bundle_tolerates_html_body() {
        let bundle = ApiErrorBundle::from_body(429, None);
        assert_eq!(bundle.status, 429);
        assert!(bundle.errors.is_empty());
    }

    #[test]
    fn display_includes_status_and_codes() {
        let body = json!({"errors": [{"code": 64, "message": "suspended"}]});
        let bundle = ApiErrorBundle::from_body(403, Some(&body));
        let rendered = bundle.to_string();
        assert!(rendered.contains("403"));
        assert!(rendered.contains("(64) suspended"));
    }
}
