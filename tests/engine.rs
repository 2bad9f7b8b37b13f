//! Request engine scenarios against a scripted transport.
//!
//! Each test enqueues the exact transport responses a scenario produces and
//! asserts the engine's recovery decisions, the resulting account status,
//! and the requests that actually went out on the wire.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use http::HeaderMap;
use serde_json::{Value, json};
use url::Url;

use twclient_rs::{
    Account, AccountStatus, ApiRequest, CaptchaResult, CaptchaSolution, CaptchaSolver, Client,
    Error, FunCaptchaTask, HttpErrorKind, SessionDelta, SessionTransport, TransportError,
    TransportRequest, TransportResponse,
};

const TOKEN: &str = "0123456789abcdef0123456789abcdef01234567";
const ROTATED_TOKEN: &str = "fedcba9876543210fedcba9876543210fedcba98";

struct ScriptedTransport {
    responses: Mutex<VecDeque<TransportResponse>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    fn new(responses: impl IntoIterator<Item = TransportResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionTransport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::Request("scripted transport exhausted".into()))
    }
}

fn response(status: u16, body: Value) -> TransportResponse {
    TransportResponse {
        status,
        url: Url::parse("https://twitter.com/i/api/endpoint").unwrap(),
        headers: HeaderMap::new(),
        text: body.to_string(),
        json: Some(body),
        session: SessionDelta::default(),
    }
}

fn flow_response(flow_token: &str, subtask_ids: &[&str]) -> TransportResponse {
    let subtasks: Vec<Value> = subtask_ids
        .iter()
        .map(|id| json!({"subtask_id": id}))
        .collect();
    response(200, json!({"flow_token": flow_token, "subtasks": subtasks}))
}

fn with_session(
    mut response: TransportResponse,
    auth_token: Option<&str>,
    ct0: Option<&str>,
) -> TransportResponse {
    response.session = SessionDelta {
        auth_token: auth_token.map(str::to_string),
        csrf_token: ct0.map(str::to_string),
    };
    response
}

fn client_with(
    account: Account,
    transport: &Arc<ScriptedTransport>,
) -> Client {
    Client::builder()
        .with_transport(transport.clone() as Arc<dyn SessionTransport>)
        .build(account)
        .unwrap()
}

fn account_with_token() -> Account {
    Account::new(TOKEN).unwrap()
}

#[tokio::test]
async fn success_does_not_touch_account_status() {
    let transport = ScriptedTransport::new([response(200, json!({"data": {"ok": true}}))]);
    let mut client = client_with(account_with_token(), &transport);

    let response = client
        .request(ApiRequest::get("https://twitter.com/i/api/endpoint"))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(client.account().status(), AccountStatus::Unknown);
}

#[tokio::test]
async fn missing_auth_token_is_a_usage_error() {
    let transport = ScriptedTransport::new([]);
    let mut client = client_with(Account::default(), &transport);

    let err = client
        .request(ApiRequest::get("https://twitter.com/i/api/endpoint"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Usage(_)));
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn bad_token_without_credentials_is_fatal() {
    let body = json!({"errors": [{"code": 32, "message": "Could not authenticate you"}]});
    let transport = ScriptedTransport::new([response(401, body)]);
    let mut client = client_with(account_with_token(), &transport);

    let err = client
        .request(ApiRequest::get("https://twitter.com/i/api/endpoint"))
        .await
        .unwrap_err();

    assert_eq!(client.account().status(), AccountStatus::BadToken);
    assert!(err.api_codes().contains(&32));
    assert!(matches!(err, Error::Account(_)));
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn consent_bounce_locks_terminally() {
    let body = json!({"errors": [
        {"code": 326, "bounce_location": "/i/flow/consent_flow"}
    ]});
    let transport = ScriptedTransport::new([response(403, body)]);
    let mut client = client_with(account_with_token(), &transport);

    let err = client
        .request(ApiRequest::get("https://twitter.com/i/api/endpoint"))
        .await
        .unwrap_err();

    assert_eq!(client.account().status(), AccountStatus::ConsentLocked);
    assert!(matches!(err, Error::Account(_)));
}

#[tokio::test]
async fn plain_lock_without_solver_is_fatal_locked() {
    let body = json!({"errors": [{"code": 326}]});
    let transport = ScriptedTransport::new([response(403, body)]);
    let mut client = client_with(account_with_token(), &transport);

    let err = client
        .request(ApiRequest::get("https://twitter.com/i/api/endpoint"))
        .await
        .unwrap_err();

    assert_eq!(client.account().status(), AccountStatus::Locked);
    assert!(matches!(err, Error::Account(_)));
}

#[tokio::test]
async fn suspension_in_ok_body_beats_lock_code() {
    let body = json!({"errors": [{"code": 141}, {"code": 326}]});
    let transport = ScriptedTransport::new([response(200, body)]);
    let mut client = client_with(account_with_token(), &transport);

    client
        .request(ApiRequest::get("https://twitter.com/i/api/endpoint"))
        .await
        .unwrap_err();

    assert_eq!(client.account().status(), AccountStatus::Suspended);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_sleeps_until_reset_then_reissues_identically() {
    let reset_at = Utc::now().timestamp() + 5;
    let mut limited = response(429, json!({"errors": [{"code": 88}]}));
    limited
        .headers
        .insert("x-rate-limit-reset", reset_at.to_string().parse().unwrap());

    let transport =
        ScriptedTransport::new([limited, response(200, json!({"data": {"ok": true}}))]);
    let mut client = client_with(account_with_token(), &transport);

    let started = tokio::time::Instant::now();
    let request = ApiRequest::post("https://twitter.com/i/api/endpoint")
        .json(json!({"variables": {"tweet_id": "1"}}));
    let response = client.request(request).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.status, 200);
    assert!(elapsed >= std::time::Duration::from_secs(5), "slept {elapsed:?}");
    assert!(elapsed <= std::time::Duration::from_secs(7), "slept {elapsed:?}");

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].method, sent[1].method);
    assert_eq!(sent[0].url, sent[1].url);
    assert_eq!(format!("{:?}", sent[0].body), format!("{:?}", sent[1].body));
}

#[tokio::test]
async fn rate_limit_is_fatal_when_waiting_disabled() {
    let mut limited = response(429, json!({}));
    limited
        .headers
        .insert("x-rate-limit-reset", "1".parse().unwrap());
    let transport = ScriptedTransport::new([limited]);
    let mut client = client_with(account_with_token(), &transport);

    let err = client
        .request(
            ApiRequest::get("https://twitter.com/i/api/endpoint").wait_on_rate_limit(false),
        )
        .await
        .unwrap_err();

    let Error::Http(http) = err else {
        panic!("expected http error, got {err:?}");
    };
    assert_eq!(http.kind, HttpErrorKind::RateLimited);
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn stale_csrf_replays_exactly_once() {
    let stale = || {
        with_session(
            response(403, json!({"errors": [{"code": 353}]})),
            None,
            Some("rotated-ct0"),
        )
    };
    let transport = ScriptedTransport::new([stale(), stale()]);
    let mut client = client_with(account_with_token(), &transport);

    let err = client
        .request(ApiRequest::get("https://twitter.com/i/api/endpoint"))
        .await
        .unwrap_err();

    // One original send plus a single replay, then the loop gives up.
    assert_eq!(transport.sent().len(), 2);
    let Error::Http(http) = err else {
        panic!("expected http error, got {err:?}");
    };
    assert_eq!(http.kind, HttpErrorKind::Forbidden);
    assert_eq!(client.account().ct0(), Some("rotated-ct0"));
}

#[tokio::test]
async fn stale_csrf_replay_succeeds_with_fresh_token() {
    let stale = with_session(
        response(403, json!({"errors": [{"code": 353}]})),
        None,
        Some("fresh-ct0"),
    );
    let transport =
        ScriptedTransport::new([stale, response(200, json!({"data": {"ok": true}}))]);
    let mut client = client_with(account_with_token(), &transport);

    client
        .request(ApiRequest::get("https://twitter.com/i/api/endpoint"))
        .await
        .unwrap();

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    // The replay mirrors the fresh token into header and cookie.
    assert_eq!(
        sent[1].headers.get("x-csrf-token").unwrap().to_str().unwrap(),
        "fresh-ct0"
    );
    assert!(
        sent[1]
            .cookies
            .iter()
            .any(|(name, value)| name == "ct0" && value == "fresh-ct0")
    );
}

#[tokio::test]
async fn rotated_auth_token_is_harvested_from_cookies() {
    let ok = with_session(
        response(200, json!({"data": {}})),
        Some(ROTATED_TOKEN),
        Some("ct0-after-rotation"),
    );
    let transport = ScriptedTransport::new([ok]);
    let mut client = client_with(account_with_token(), &transport);

    client
        .request(ApiRequest::get("https://twitter.com/i/api/endpoint"))
        .await
        .unwrap();

    assert_eq!(client.account().auth_token(), Some(ROTATED_TOKEN));
    assert_eq!(client.account().ct0(), Some("ct0-after-rotation"));
}

fn login_script_prefix() -> Vec<TransportResponse> {
    vec![
        // guest/activate
        response(200, json!({"guest_token": "guest-123"})),
        // flow_name=login
        flow_response("flow-1", &["LoginEnterUserIdentifierSSO"]),
        // identifier, submitted twice
        flow_response("flow-2", &["LoginEnterUserIdentifierSSO"]),
        flow_response("flow-3", &["LoginEnterPassword"]),
        // password; the server hands out the session cookies here
        with_session(
            flow_response("flow-4", &["AccountDuplicationCheck"]),
            Some(TOKEN),
            Some("ct0-from-login"),
        ),
    ]
}

#[tokio::test]
async fn login_flow_populates_session_tokens_and_status() {
    let mut script = login_script_prefix();
    script.extend([
        // duplication check: no Acid, no 2FA challenge
        flow_response("flow-5", &[]),
        // finish
        flow_response("flow-6", &[]),
        // viewer
        response(200, json!({"data": {"viewer": {}}})),
        // establish_status probe
        response(200, json!({"name": "Alice"})),
    ]);

    let transport = ScriptedTransport::new(script);
    let account = Account::builder()
        .username("alice")
        .password("hunter2")
        .build()
        .unwrap();
    let mut client = client_with(account, &transport);

    client.relogin().await.unwrap();

    assert_eq!(client.account().auth_token(), Some(TOKEN));
    assert_eq!(client.account().ct0(), Some("ct0-from-login"));
    assert_eq!(client.account().status(), AccountStatus::Good);

    // Flow steps carry the guest token, not cookie auth.
    let sent = transport.sent();
    assert_eq!(
        sent[1].headers.get("x-guest-token").unwrap().to_str().unwrap(),
        "guest-123"
    );
    assert!(sent[1].cookies.is_empty());
}

#[tokio::test]
async fn two_factor_challenge_falls_back_to_backup_code() {
    let mut script = login_script_prefix();
    script.extend([
        // duplication check answers with the 2FA challenge
        flow_response("flow-5", &["LoginTwoFactorAuthChallenge"]),
        // totp code rejected with the bad-value code
        response(400, json!({"errors": [{"code": 399, "message": "incorrect code"}]})),
        // choose backup-code method
        flow_response("flow-6", &["LoginTwoFactorAuthChallenge"]),
        // backup code accepted
        flow_response("flow-7", &[]),
        // finish
        flow_response("flow-8", &[]),
        // viewer
        response(200, json!({"data": {"viewer": {}}})),
        // backup code was consumed: fetch a fresh one
        response(200, json!({"codes": ["freshbackup12"]})),
        // establish_status probe
        response(200, json!({"name": "Alice"})),
    ]);

    let transport = ScriptedTransport::new(script);
    let account = Account::builder()
        .username("alice")
        .password("hunter2")
        .totp_secret("JBSWY3DPEHPK3PXP")
        .backup_code("ab12cd34ef56")
        .build()
        .unwrap();
    let mut client = client_with(account, &transport);

    client.relogin().await.unwrap();

    assert_eq!(client.account().backup_code(), Some("freshbackup12"));
    assert_eq!(client.account().status(), AccountStatus::Good);
    // 13 exchanges: 5 to reach the challenge, 4 through the fallback, then
    // finish, viewer, backup refresh, probe.
    assert_eq!(transport.sent().len(), 13);
}

#[tokio::test]
async fn two_factor_challenge_without_backup_code_aborts() {
    let mut script = login_script_prefix();
    script.extend([
        flow_response("flow-5", &["LoginTwoFactorAuthChallenge"]),
        response(400, json!({"errors": [{"code": 399}]})),
    ]);

    let transport = ScriptedTransport::new(script);
    let account = Account::builder()
        .username("alice")
        .password("hunter2")
        .totp_secret("JBSWY3DPEHPK3PXP")
        .build()
        .unwrap();
    let mut client = client_with(account, &transport);

    let err = client.relogin().await.unwrap_err();
    assert!(matches!(err, Error::Flow(_)));
}

struct FixedSolver;

#[async_trait]
impl CaptchaSolver for FixedSolver {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn solve(&self, _task: &FunCaptchaTask) -> CaptchaResult {
        Ok(CaptchaSolution {
            token: "solved-token".into(),
        })
    }
}

fn unlock_page(extra: &str) -> TransportResponse {
    let html = format!(
        r#"<html><body><form action="/account/access" method="post">
            <input type="hidden" name="authenticity_token" value="auth-tok">
            <input type="hidden" name="assignment_token" value="assign-tok">
            {extra}
        </form></body></html>"#
    );
    TransportResponse {
        status: 200,
        url: Url::parse("https://twitter.com/account/access").unwrap(),
        headers: HeaderMap::new(),
        text: html,
        json: None,
        session: SessionDelta::default(),
    }
}

#[tokio::test]
async fn locked_account_unlocks_and_retries_original_request() {
    let locked_body = json!({"errors": [{"code": 326, "message": "locked"}]});
    let script = vec![
        // original request hits the lock
        response(403, locked_body),
        // unlock: challenge page with a start button
        unlock_page(r#"<input type="submit" value="Start">"#),
        // confirm start -> captcha widget appears
        unlock_page(r#"<input id="verification_string" type="hidden">"#),
        // submit solved token -> page is clean
        unlock_page(""),
        // establish_status probe after the unlock loop
        response(200, json!({"name": "Alice"})),
        // the original request is replayed and succeeds
        response(200, json!({"data": {"ok": true}})),
    ];

    let transport = ScriptedTransport::new(script);
    let mut client = Client::builder()
        .with_transport(transport.clone() as Arc<dyn SessionTransport>)
        .with_captcha_solver(Arc::new(FixedSolver))
        .build(account_with_token())
        .unwrap();

    let response = client
        .request(ApiRequest::get("https://twitter.com/i/api/endpoint"))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(client.account().status(), AccountStatus::Good);
    assert_eq!(transport.sent().len(), 6);

    // The solved token went out as the verification_string form field.
    let sent = transport.sent();
    let Some(twclient_rs::RequestBody::Form(fields)) = &sent[3].body else {
        panic!("expected a form submission");
    };
    assert!(
        fields
            .iter()
            .any(|(name, value)| name == "verification_string" && value == "solved-token")
    );
}
