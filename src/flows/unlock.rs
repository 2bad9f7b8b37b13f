//! Unlock flow: clear a captcha lock via the solving collaborator.
//!
//! The challenge lives on an HTML page, not the JSON API. The page comes in
//! two known variants (one asks for a "Delete" confirmation before the
//! challenge, one goes straight to it), so every loop iteration re-parses
//! the returned page and presses whatever confirm button it recognises
//! instead of assuming a fixed button set. A failed captcha solve burns an
//! attempt without submitting anything.

use log::warn;
use url::Url;

use crate::account::AccountStatus;
use crate::captcha::FunCaptchaTask;
use crate::client::{ApiRequest, CAPTCHA_SITE_KEY, CAPTCHA_URL, Client};
use crate::errors::{Error, FlowError, Result};
use crate::html::UnlockPage;

/// Landing page the platform redirects to once the account is free again.
const UNLOCKED_REDIRECT: &str = "https://twitter.com/?lang=en";

impl Client {
    /// Drive the unlock challenge to completion, then re-probe the account
    /// status. A no-op unless the account is currently `Locked`.
    pub async fn unlock(&mut self) -> Result<()> {
        if self.account.status() != AccountStatus::Locked {
            return Ok(());
        }
        let Some(captcha) = self.captcha.clone() else {
            return Err(Error::Usage(
                "account is locked and no captcha solver is configured".into(),
            ));
        };

        let response = self
            .request(ApiRequest::get(CAPTCHA_URL).bearer(false).auto_unlock(false))
            .await?;
        let mut page = UnlockPage::parse(response.text());

        if page.delete_button {
            (_, page) = self.confirm_unlock(&page, None).await?;
        }
        if page.has_confirm_button() {
            (_, page) = self.confirm_unlock(&page, None).await?;
        }

        let mut task = FunCaptchaTask::new(CAPTCHA_URL, CAPTCHA_SITE_KEY);
        if let Some(proxy) = self.transport().proxy() {
            task = task.with_proxy(proxy.clone());
        }

        let max_attempts = self.config.max_unlock_attempts;
        let mut attempt = 1u32;
        while page.needs_unlock && attempt <= max_attempts {
            let solution = match captcha.solve(&task).await {
                Ok(solution) => solution,
                Err(err) => {
                    warn!(
                        "{} captcha solve failed (attempt {attempt}/{max_attempts}): {err}",
                        self.ident()
                    );
                    attempt += 1;
                    continue;
                }
            };

            let (url, next) = self.confirm_unlock(&page, Some(&solution.token)).await?;
            if url.as_str() == UNLOCKED_REDIRECT {
                break;
            }
            page = next;

            if page.finish_button {
                (_, page) = self.confirm_unlock(&page, None).await?;
            }

            attempt += 1;
        }

        self.establish_status().await
    }

    /// Submit the unlock form, with or without a solved verification token,
    /// and re-parse the page the server answers with.
    async fn confirm_unlock(
        &mut self,
        page: &UnlockPage,
        verification_string: Option<&str>,
    ) -> Result<(Url, UnlockPage)> {
        let authenticity_token = page.authenticity_token.clone().ok_or_else(|| {
            Error::Flow(FlowError::new("unlock", "challenge page carries no authenticity_token"))
        })?;
        let assignment_token = page.assignment_token.clone().ok_or_else(|| {
            Error::Flow(FlowError::new("unlock", "challenge page carries no assignment_token"))
        })?;

        let mut fields = vec![
            ("authenticity_token".to_string(), authenticity_token),
            ("assignment_token".to_string(), assignment_token),
            ("lang".to_string(), "en".to_string()),
            ("flow".to_string(), String::new()),
        ];
        if let Some(token) = verification_string {
            fields.push(("verification_string".to_string(), token.to_string()));
            fields.push(("language_code".to_string(), "en".to_string()));
        }

        let response = self
            .request(
                ApiRequest::post(CAPTCHA_URL)
                    .bearer(false)
                    .auto_unlock(false)
                    .form(fields),
            )
            .await?;

        Ok((response.url.clone(), UnlockPage::parse(response.text())))
    }
}
