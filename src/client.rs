//! Request engine orchestration.
//!
//! [`Client`] wires one [`Account`] to one [`SessionTransport`] and exposes
//! the authenticated `request()` entry point every higher-level action goes
//! through. The engine attaches auth material, classifies the response, and
//! runs the recovery protocols: rate-limit waits, a single stale-csrf
//! replay, the unlock flow for locked accounts, and a one-shot relogin for
//! expired tokens. Recovery bounds are enforced with per-call guard flags,
//! never by counting on the server to stop misbehaving.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use log::{debug, warn};
use serde_json::Value;
use tokio::time::sleep;
use url::Url;

use crate::account::{Account, AccountStatus};
use crate::captcha::{CapSolverFunCaptcha, CaptchaSolver};
use crate::classify::{Classified, Recovery, Rejection, classify};
use crate::errors::{
    AccountError, AccountErrorKind, AccountIdent, ApiErrorBundle, Error, HttpApiError,
    HttpErrorKind, Result,
};
use crate::session::{
    ReqwestSessionTransport, RequestBody, SessionTransport, TransportRequest, TransportResponse,
};

/// Constant per-client bearer credential of the platform's web frontend.
pub(crate) const BEARER_TOKEN: &str = "AAAAAAAAAAAAAAAAAAAAANRILgAAAAAAnNwIzUejRCOuH5E6I8xnZz4puTs%3D1Zv7ttfk8LF81IUq16cHjhLTvJu4FA33AGWWjCpTnA";

pub(crate) const GRAPHQL_URL: &str = "https://twitter.com/i/api/graphql";
pub(crate) const ONBOARDING_TASK_URL: &str = "https://api.twitter.com/1.1/onboarding/task.json";
pub(crate) const GUEST_ACTIVATE_URL: &str = "https://api.twitter.com/1.1/guest/activate.json";
pub(crate) const CAPTCHA_URL: &str = "https://twitter.com/account/access";
pub(crate) const CAPTCHA_SITE_KEY: &str = "0152B4EB-D2DC-460A-89A1-629838B529C9";

/// GraphQL operation → persisted query id. Immutable after initialization;
/// refreshing the table is a new-release concern, not runtime state.
const ACTION_QUERY_IDS: &[(&str, &str)] = &[
    ("CreateRetweet", "ojPdsZsimiJrUGLR1sjUtA"),
    ("FavoriteTweet", "lI07N6Otwv1PhnEgXILM7A"),
    ("UnfavoriteTweet", "ZYKSe-w7KEslx3JhSIk5LA"),
    ("CreateTweet", "v0en1yVV-Ybeek8ClmXwYw"),
    ("TweetResultByRestId", "V3vfsYzNEyD9tsf4xoFRgw"),
    ("DeleteTweet", "VaenaVgh5q5ih7kvyVjgtg"),
    ("UserTweets", "V1ze5q3ijDS1VeLwLY0m7g"),
    ("TweetDetail", "VWFGPVAGkZMGRKGe3GFFnA"),
    ("ProfileSpotlightsQuery", "9zwVLJ48lmVUk8u_Gh9DmA"),
    ("Following", "t-BPOrMIduGUJWO_LxcvNQ"),
    ("Followers", "3yX7xr2hKjcZYnXt6cU6lQ"),
    ("UserByScreenName", "G3KGOASz96M-Qu0nwmGXNg"),
    ("UsersByRestIds", "itEhGywpgX9b3GJCzOtSrA"),
    ("Viewer", "W62NnYgkgziw9bwyoVht0g"),
];

/// URL and query id of a GraphQL operation.
pub(crate) fn gql_action_url(action: &str) -> Result<(String, &'static str)> {
    let query_id = ACTION_QUERY_IDS
        .iter()
        .find(|(name, _)| *name == action)
        .map(|(_, id)| *id)
        .ok_or_else(|| Error::Usage(format!("unknown graphql action `{action}`")))?;
    Ok((format!("{GRAPHQL_URL}/{query_id}/{action}"), query_id))
}

/// Immutable engine configuration, fixed at build time.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub bearer_token: String,
    /// Sleep through 429s instead of failing (overridable per request).
    pub wait_on_rate_limit: bool,
    /// Re-run the login flow once when the session token goes bad.
    pub auto_relogin: bool,
    /// Captcha attempt budget of the unlock flow.
    pub max_unlock_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bearer_token: BEARER_TOKEN.to_string(),
            wait_on_rate_limit: true,
            auto_relogin: true,
            max_unlock_attempts: 5,
        }
    }
}

/// One authenticated API call. Defaults match the common case: bearer and
/// cookie auth on, engine-level recovery enabled.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub(crate) params: Vec<(String, String)>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) json: Option<Value>,
    pub(crate) form: Option<Vec<(String, String)>>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) auth: bool,
    pub(crate) bearer: bool,
    pub(crate) wait_on_rate_limit: Option<bool>,
    pub(crate) auto_unlock: bool,
    pub(crate) auto_relogin: Option<bool>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: Vec::new(),
            headers: Vec::new(),
            json: None,
            form: None,
            timeout: None,
            auth: true,
            bearer: true,
            wait_on_rate_limit: None,
            auto_unlock: true,
            auto_relogin: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, payload: Value) -> Self {
        self.json = Some(payload);
        self
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.form = Some(fields);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Toggle auth cookies (`auth_token`/`ct0`) for this call.
    pub fn auth(mut self, auth: bool) -> Self {
        self.auth = auth;
        self
    }

    /// Toggle the bearer authorization header for this call.
    pub fn bearer(mut self, bearer: bool) -> Self {
        self.bearer = bearer;
        self
    }

    /// Override the client-level rate limit policy for this call.
    pub fn wait_on_rate_limit(mut self, wait: bool) -> Self {
        self.wait_on_rate_limit = Some(wait);
        self
    }

    pub fn auto_unlock(mut self, auto_unlock: bool) -> Self {
        self.auto_unlock = auto_unlock;
        self
    }

    pub fn auto_relogin(mut self, auto_relogin: bool) -> Self {
        self.auto_relogin = Some(auto_relogin);
        self
    }
}

/// Successful API response: status, final URL (after redirects), and the
/// decoded payload. Non-JSON bodies surface as a JSON string value.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub url: Url,
    pub data: Value,
}

impl ApiResponse {
    /// Body as text; empty for structured payloads.
    pub fn text(&self) -> &str {
        self.data.as_str().unwrap_or_default()
    }
}

/// Fluent constructor for [`Client`].
pub struct ClientBuilder {
    config: ClientConfig,
    proxy: Option<String>,
    transport: Option<Arc<dyn SessionTransport>>,
    captcha: Option<Arc<dyn CaptchaSolver>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            proxy: None,
            transport: None,
            captcha: None,
        }
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Replace the transport entirely (tests, alternative HTTP stacks).
    pub fn with_transport(mut self, transport: Arc<dyn SessionTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Enable the unlock protocol through the CapSolver vendor.
    pub fn with_capsolver_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.captcha = Some(Arc::new(CapSolverFunCaptcha::new(api_key)));
        self
    }

    pub fn with_captcha_solver(mut self, solver: Arc<dyn CaptchaSolver>) -> Self {
        self.captcha = Some(solver);
        self
    }

    pub fn with_bearer_token(mut self, bearer_token: impl Into<String>) -> Self {
        self.config.bearer_token = bearer_token.into();
        self
    }

    pub fn wait_on_rate_limit(mut self, wait: bool) -> Self {
        self.config.wait_on_rate_limit = wait;
        self
    }

    pub fn auto_relogin(mut self, auto_relogin: bool) -> Self {
        self.config.auto_relogin = auto_relogin;
        self
    }

    pub fn max_unlock_attempts(mut self, attempts: u32) -> Self {
        self.config.max_unlock_attempts = attempts.max(1);
        self
    }

    pub fn build(self, account: Account) -> Result<Client> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestSessionTransport::new(self.proxy.as_deref())?),
        };

        Ok(Client {
            account,
            transport,
            config: self.config,
            captcha: self.captcha,
            guest_token: None,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Authenticated session over one account.
pub struct Client {
    pub(crate) account: Account,
    transport: Arc<dyn SessionTransport>,
    pub(crate) config: ClientConfig,
    pub(crate) captcha: Option<Arc<dyn CaptchaSolver>>,
    /// Guest credential used while a login flow is in progress.
    pub(crate) guest_token: Option<String>,
}

impl Client {
    /// Client with default configuration and a direct connection.
    pub fn new(account: Account) -> Result<Self> {
        ClientBuilder::new().build(account)
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn account_mut(&mut self) -> &mut Account {
        &mut self.account
    }

    /// Hand the account back when the session is done.
    pub fn into_account(self) -> Account {
        self.account
    }

    pub(crate) fn ident(&self) -> AccountIdent {
        AccountIdent::of(&self.account)
    }

    pub(crate) fn transport(&self) -> &Arc<dyn SessionTransport> {
        &self.transport
    }

    /// Issue an authenticated request, transparently recovering from the
    /// recoverable failure classes. See the module docs for the protocol.
    pub fn request(
        &mut self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + '_>> {
        Box::pin(async move {
        let mut csrf_replayed = false;
        let mut unlock_attempted = false;
        let mut relogin_attempted = false;

        loop {
            let response = self.send_raw(&request).await?;
            let status = response.status;
            let outcome = classify(&response);

            match outcome {
                Classified::Success(data) => {
                    return Ok(ApiResponse {
                        status,
                        url: response.url,
                        data,
                    });
                }

                Classified::Recoverable(Recovery::RateLimited { reset_at }) => {
                    let wait = request
                        .wait_on_rate_limit
                        .unwrap_or(self.config.wait_on_rate_limit);
                    let bundle = ApiErrorBundle::from_body(status, response.json.as_ref());
                    if !wait {
                        return Err(Error::Http(HttpApiError::new(
                            HttpErrorKind::RateLimited,
                            bundle,
                        )));
                    }
                    let Some(reset_at) = reset_at else {
                        return Err(Error::Http(HttpApiError::new(
                            HttpErrorKind::RateLimited,
                            bundle,
                        )));
                    };

                    let sleep_secs = (reset_at - Utc::now().timestamp() + 1).max(0);
                    if sleep_secs > 0 {
                        warn!("{} rate limited, sleeping {sleep_secs}s", self.ident());
                        sleep(Duration::from_secs(sleep_secs as u64)).await;
                    }
                    continue;
                }

                Classified::Recoverable(Recovery::StaleCsrf { fresh_ct0, bundle }) => {
                    self.account.set_ct0(fresh_ct0);
                    if csrf_replayed {
                        return Err(Error::Http(HttpApiError::new(
                            HttpErrorKind::Forbidden,
                            bundle,
                        )));
                    }
                    csrf_replayed = true;
                    debug!("{} csrf token rotated, replaying request", self.ident());
                    continue;
                }

                Classified::Recoverable(Recovery::Locked(bundle)) => {
                    self.account.set_status(AccountStatus::Locked);
                    if request.auto_unlock && !unlock_attempted && self.captcha.is_some() {
                        unlock_attempted = true;
                        boxed(self.unlock()).await?;
                        continue;
                    }
                    return Err(Error::Account(AccountError::new(
                        AccountErrorKind::Locked,
                        self.ident(),
                        bundle,
                    )));
                }

                Classified::Recoverable(Recovery::BadToken(bundle)) => {
                    self.account.set_status(AccountStatus::BadToken);
                    let auto = request.auto_relogin.unwrap_or(self.config.auto_relogin);
                    let has_credentials = self.account.password().is_some()
                        && (self.account.email().is_some() || self.account.username().is_some());
                    if auto && !relogin_attempted && has_credentials {
                        relogin_attempted = true;
                        boxed(self.relogin()).await?;
                        continue;
                    }
                    return Err(Error::Account(AccountError::new(
                        AccountErrorKind::BadToken,
                        self.ident(),
                        bundle,
                    )));
                }

                Classified::Fatal(rejection) => return Err(self.reject(rejection)),
            }
        }
        })
    }

    /// Turn a fatal classification into the typed error, mutating the
    /// account status first so callers catching the error observe a
    /// consistent terminal state.
    fn reject(&mut self, rejection: Rejection) -> Error {
        match rejection {
            Rejection::Suspended(bundle) => {
                self.account.set_status(AccountStatus::Suspended);
                Error::Account(AccountError::new(
                    AccountErrorKind::Suspended,
                    self.ident(),
                    bundle,
                ))
            }
            Rejection::ConsentLocked(bundle) => {
                self.account.set_status(AccountStatus::ConsentLocked);
                Error::Account(AccountError::new(
                    AccountErrorKind::ConsentLocked,
                    self.ident(),
                    bundle,
                ))
            }
            Rejection::AccountNotFound(bundle) => {
                self.account.set_status(AccountStatus::NotFound);
                Error::Account(AccountError::new(
                    AccountErrorKind::NotFound,
                    self.ident(),
                    bundle,
                ))
            }
            Rejection::Http(kind, bundle) => Error::Http(HttpApiError::new(kind, bundle)),
        }
    }

    /// One transport exchange: attach auth material, send, harvest the
    /// session delta back into the account.
    async fn send_raw(&mut self, request: &ApiRequest) -> Result<TransportResponse> {
        let url = Url::parse(&request.url)
            .map_err(|err| Error::Usage(format!("invalid url `{}`: {err}", request.url)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            insert_header(&mut headers, name, value)?;
        }

        let mut cookies: Vec<(String, String)> = Vec::new();

        if request.bearer {
            insert_header(
                &mut headers,
                "authorization",
                &format!("Bearer {}", self.config.bearer_token),
            )?;
        }

        if request.auth {
            let auth_token = self
                .account
                .auth_token()
                .ok_or_else(|| Error::Usage("no auth_token on account; login first".into()))?
                .to_string();
            cookies.push(("auth_token".into(), auth_token));
            insert_header(&mut headers, "x-twitter-auth-type", "OAuth2Session")?;
            if let Some(ct0) = self.account.ct0() {
                let ct0 = ct0.to_string();
                insert_header(&mut headers, "x-csrf-token", &ct0)?;
                cookies.push(("ct0".into(), ct0));
            }
        }

        if let Some(ref guest_token) = self.guest_token {
            insert_header(&mut headers, "x-guest-token", guest_token)?;
        }

        debug!("{} ==> {} {}", self.ident(), request.method, request.url);

        let transport_request = TransportRequest {
            method: request.method.clone(),
            url,
            params: request.params.clone(),
            headers,
            cookies,
            body: match (&request.json, &request.form) {
                (Some(json), _) => Some(RequestBody::Json(json.clone())),
                (None, Some(form)) => Some(RequestBody::Form(form.clone())),
                (None, None) => None,
            },
            timeout: request.timeout,
        };

        let response = self.transport.send(transport_request).await?;

        debug!(
            "{} <== {} {} status={}",
            self.ident(),
            request.method,
            request.url,
            response.status
        );

        if let Some(ct0) = response.session.csrf_token.clone() {
            self.account.set_ct0(ct0);
        }
        if let Some(auth_token) = response.session.auth_token.clone()
            && Some(auth_token.as_str()) != self.account.auth_token()
        {
            match self.account.set_auth_token(auth_token) {
                Ok(()) => warn!("{} server rotated auth_token", self.ident()),
                Err(err) => warn!("{} ignoring malformed auth_token cookie: {err}", self.ident()),
            }
        }

        Ok(response)
    }
}

/// Type-erase a recovery future. The recovery protocols call back into
/// [`Client::request`], so the edge must be boxed to keep the mutually
/// recursive future types finite.
fn boxed<'a, F>(future: F) -> Pin<Box<dyn Future<Output = F::Output> + Send + 'a>>
where
    F: Future + Send + 'a,
{
    Box::pin(future)
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let name = HeaderName::try_from(name)
        .map_err(|_| Error::Usage(format!("invalid header name `{name}`")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|_| Error::Usage(format!("invalid header value for `{name}`")))?;
    headers.insert(name, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gql_action_url_formats_known_actions() {
        let (url, query_id) = gql_action_url("UserByScreenName").unwrap();
        assert_eq!(query_id, "G3KGOASz96M-Qu0nwmGXNg");
        assert_eq!(
            url,
            "https://twitter.com/i/api/graphql/G3KGOASz96M-Qu0nwmGXNg/UserByScreenName"
        );
    }

    #[test]
    fn gql_action_url_rejects_unknown_actions() {
        assert!(matches!(
            gql_action_url("NoSuchOperation"),
            Err(Error::Usage(_))
        ));
    }

    #[test]
    fn request_defaults_enable_auth_and_recovery() {
        let request = ApiRequest::get("https://twitter.com/i/api/x");
        assert!(request.auth);
        assert!(request.bearer);
        assert!(request.auto_unlock);
        assert_eq!(request.wait_on_rate_limit, None);
        assert_eq!(request.auto_relogin, None);
    }
}
