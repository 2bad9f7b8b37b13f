//! Captcha-solving collaborator boundary.
//!
//! The unlock flow needs exactly one capability from the outside world:
//! given a challenge descriptor (page URL, site key, optionally the proxy
//! the account egresses through), produce a verification token. The vendor
//! protocol stays behind [`CaptchaSolver`] so the core never learns about
//! task ids or polling.

mod capsolver;

pub use capsolver::CapSolverFunCaptcha;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::session::ProxyEndpoint;

/// Polling behaviour for vendors that resolve tasks asynchronously.
#[derive(Debug, Clone)]
pub struct CaptchaConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(3),
        }
    }
}

/// Descriptor of the FunCaptcha challenge embedded in the unlock page.
#[derive(Debug, Clone)]
pub struct FunCaptchaTask {
    pub site_url: String,
    pub site_key: String,
    /// When set, the vendor solves through the same egress as the account.
    pub proxy: Option<ProxyEndpoint>,
}

impl FunCaptchaTask {
    pub fn new(site_url: impl Into<String>, site_key: impl Into<String>) -> Self {
        Self {
            site_url: site_url.into(),
            site_key: site_key.into(),
            proxy: None,
        }
    }

    pub fn with_proxy(mut self, proxy: ProxyEndpoint) -> Self {
        self.proxy = Some(proxy);
        self
    }
}

/// A solved challenge token.
#[derive(Debug, Clone)]
pub struct CaptchaSolution {
    pub token: String,
}

/// Errors surfaced by captcha vendors.
#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("captcha solver misconfigured: {0}")]
    Configuration(String),
    /// The vendor accepted the task but reported it unsolvable.
    #[error("captcha vendor error {code}: {description}")]
    Vendor { code: String, description: String },
    #[error("captcha solving timed out after {0:?}")]
    Timeout(Duration),
    #[error("captcha vendor request failed: {0}")]
    Transport(String),
}

pub type CaptchaResult = Result<CaptchaSolution, CaptchaError>;

/// Shared interface implemented by captcha vendors.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    fn name(&self) -> &'static str;
    async fn solve(&self, task: &FunCaptchaTask) -> CaptchaResult;
}
