//! Response classification.
//!
//! The platform overloads HTTP statuses: a 403 can mean "locked", "stale
//! csrf token", or "suspended" depending on the embedded API error code, and
//! suspension codes can arrive inside a 200. Classification therefore
//! inspects both the status and the parsed error list, in a fixed priority
//! order: suspension and consent-lock codes are checked before the generic
//! lock/token codes so a suspended account is never mistaken for a merely
//! locked one.
//!
//! The result is a plain sum type. Callers branch on the tag; no error is
//! caught and re-inspected anywhere downstream.

use serde_json::Value;

use crate::errors::{ApiErrorBundle, HttpErrorKind};
use crate::session::TransportResponse;

/// API error code meaning the session token was rejected (on a 401).
pub const CODE_BAD_TOKEN: i64 = 32;
/// API error code meaning the account requires a challenge (on a 403 or 200).
pub const CODE_LOCKED: i64 = 326;
/// API error code meaning the csrf token must be rotated (on a 403).
pub const CODE_STALE_CSRF: i64 = 353;
/// API error codes meaning the account is suspended.
pub const CODES_SUSPENDED_OK: [i64; 2] = [141, 37];
pub const CODE_SUSPENDED_FORBIDDEN: i64 = 64;
/// API error code meaning "unknown subject": account gone on a 400, or a
/// rejected value inside a flow-task step.
pub const CODE_NOT_FOUND: i64 = 399;

/// `bounce_location` distinguishing a consent lock from a captcha lock.
pub const CONSENT_BOUNCE_LOCATION: &str = "/i/flow/consent_flow";

/// Outcome of classifying one response.
#[derive(Debug)]
pub enum Classified {
    /// 2xx with no `errors` field: the decoded payload (raw text for
    /// non-JSON bodies).
    Success(Value),
    /// A condition one of the recovery protocols can clear.
    Recoverable(Recovery),
    /// A terminal condition; raised as a typed error.
    Fatal(Rejection),
}

#[derive(Debug)]
pub enum Recovery {
    /// 429: wait until the quota window resets, then reissue.
    RateLimited { reset_at: Option<i64> },
    /// 403 code 353 with a fresh `ct0` cookie on the response.
    StaleCsrf {
        fresh_ct0: String,
        bundle: ApiErrorBundle,
    },
    /// Code 326 without the consent bounce: clearable via the unlock flow.
    Locked(ApiErrorBundle),
    /// 401 code 32: clearable via relogin.
    BadToken(ApiErrorBundle),
}

#[derive(Debug)]
pub enum Rejection {
    Suspended(ApiErrorBundle),
    ConsentLocked(ApiErrorBundle),
    /// 400 code 399: the platform no longer knows the account.
    AccountNotFound(ApiErrorBundle),
    /// Anything else, keyed by status class.
    Http(HttpErrorKind, ApiErrorBundle),
}

/// Classify a raw response. Pure: status mutation is the request engine's
/// job, after it has decided what the outcome means for the account.
pub fn classify(response: &TransportResponse) -> Classified {
    let status = response.status;
    let body = response.json.as_ref();

    if (200..300).contains(&status) {
        if body.is_some_and(|json| json.get("errors").is_some()) {
            let bundle = ApiErrorBundle::from_body(status, body);
            if CODES_SUSPENDED_OK.iter().any(|code| bundle.has_code(*code)) {
                return Classified::Fatal(Rejection::Suspended(bundle));
            }
            if bundle.has_code(CODE_LOCKED) {
                return classify_locked(bundle);
            }
            return Classified::Fatal(Rejection::Http(HttpErrorKind::Unexpected, bundle));
        }

        let payload = match body {
            Some(json) => json.clone(),
            None => Value::String(response.text.clone()),
        };
        return Classified::Success(payload);
    }

    let bundle = ApiErrorBundle::from_body(status, body);
    match status {
        400 => {
            if bundle.has_code(CODE_NOT_FOUND) {
                Classified::Fatal(Rejection::AccountNotFound(bundle))
            } else {
                Classified::Fatal(Rejection::Http(HttpErrorKind::BadRequest, bundle))
            }
        }
        401 => {
            if bundle.has_code(CODE_BAD_TOKEN) {
                Classified::Recoverable(Recovery::BadToken(bundle))
            } else {
                Classified::Fatal(Rejection::Http(HttpErrorKind::Unauthorized, bundle))
            }
        }
        403 => {
            if bundle.has_code(CODE_SUSPENDED_FORBIDDEN) {
                return Classified::Fatal(Rejection::Suspended(bundle));
            }
            if bundle.has_code(CODE_LOCKED) {
                return classify_locked(bundle);
            }
            if bundle.has_code(CODE_STALE_CSRF)
                && let Some(fresh_ct0) = response.session.csrf_token.clone()
            {
                return Classified::Recoverable(Recovery::StaleCsrf { fresh_ct0, bundle });
            }
            Classified::Fatal(Rejection::Http(HttpErrorKind::Forbidden, bundle))
        }
        404 => Classified::Fatal(Rejection::Http(HttpErrorKind::NotFound, bundle)),
        429 => {
            let reset_at = response
                .header("x-rate-limit-reset")
                .and_then(|value| value.trim().parse::<i64>().ok());
            Classified::Recoverable(Recovery::RateLimited { reset_at })
        }
        500.. => Classified::Fatal(Rejection::Http(HttpErrorKind::ServerError, bundle)),
        _ => Classified::Fatal(Rejection::Http(HttpErrorKind::Unexpected, bundle)),
    }
}

fn classify_locked(bundle: ApiErrorBundle) -> Classified {
    if bundle.bounce_location(CODE_LOCKED) == Some(CONSENT_BOUNCE_LOCATION) {
        Classified::Fatal(Rejection::ConsentLocked(bundle))
    } else {
        Classified::Recoverable(Recovery::Locked(bundle))
    }
}
