//! Login flow script.
//!
//! Guest-token bootstrap, identifier (submitted twice, since the server
//! re-prompts the first submission), password, duplication check, then the
//! conditional branches: alternate-identifier, email challenge (`LoginAcid`),
//! and the 2FA challenge with its backup-code fallback. Every step runs
//! unauthenticated; the session cookies land on the account via the
//! transport's session delta once the server issues them.

use log::warn;
use serde_json::Value;

use crate::account::AccountStatus;
use crate::classify::CODE_NOT_FOUND;
use crate::client::{ApiRequest, Client, GUEST_ACTIVATE_URL};
use crate::errors::{Error, FlowError, Result};
use crate::flows::inputs;

impl Client {
    /// Establish a working session. Reuses the existing `auth_token` when
    /// the status probe accepts it, otherwise falls back to [`Client::relogin`].
    pub async fn login(&mut self) -> Result<()> {
        if self.account.auth_token().is_some() {
            self.establish_status().await?;
            if !matches!(
                self.account.status(),
                AccountStatus::BadToken | AccountStatus::ConsentLocked
            ) {
                return Ok(());
            }
        }

        self.relogin().await
    }

    /// Run the full login flow from credentials, then refresh the viewer,
    /// the backup code (when the flow consumed it), and the account status.
    pub async fn relogin(&mut self) -> Result<()> {
        if self.account.email().is_none() && self.account.username().is_none() {
            return Err(Error::Usage(
                "relogin requires an email or username on the account".into(),
            ));
        }
        if self.account.password().is_none() {
            return Err(Error::Usage("relogin requires a password on the account".into()));
        }

        let backup_code_consumed = self.run_login_flow().await?;
        self.viewer().await?;

        if backup_code_consumed {
            self.update_backup_code().await?;
            warn!("{} backup code consumed, fetched a fresh one", self.ident());
        }

        self.establish_status().await
    }

    async fn run_login_flow(&mut self) -> Result<bool> {
        let guest_token = self.request_guest_token().await?;
        self.guest_token = Some(guest_token);
        let result = self.drive_login_flow().await;
        self.guest_token = None;
        result
    }

    async fn request_guest_token(&mut self) -> Result<String> {
        let response = self
            .request(ApiRequest::post(GUEST_ACTIVATE_URL).auth(false))
            .await?;
        response
            .data
            .get("guest_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Flow(FlowError::new("guest_activate", "response carries no guest_token"))
            })
    }

    /// Returns whether the backup code was consumed along the way.
    async fn drive_login_flow(&mut self) -> Result<bool> {
        let mut backup_code_consumed = false;
        let mut flow = self.start_flow("login", "splash_screen", false).await?;

        let identifier = self
            .account
            .username()
            .or(self.account.email())
            .expect("relogin validated credentials")
            .to_string();
        for _ in 0..2 {
            flow = self
                .advance_flow(
                    &flow.flow_token.clone(),
                    vec![inputs::user_identifier(&identifier)],
                    false,
                )
                .await?;
        }

        if flow.has("LoginEnterAlternateIdentifierSubtask") && self.account.username().is_none() {
            return Err(Error::Flow(FlowError::new(
                "LoginEnterAlternateIdentifierSubtask",
                "server asks for an alternate identifier but the account has no username",
            )));
        }

        let password = self
            .account
            .password()
            .expect("relogin validated credentials")
            .to_string();
        flow = self
            .advance_flow(
                &flow.flow_token.clone(),
                vec![inputs::enter_password("LoginEnterPassword", &password)],
                false,
            )
            .await?;
        flow = self
            .advance_flow(&flow.flow_token.clone(), vec![inputs::duplication_check()], false)
            .await?;

        if let Some(acid) = flow.find("LoginAcid") {
            let Some(email) = self.account.email().map(str::to_string) else {
                return Err(Error::Flow(FlowError::new(
                    "LoginAcid",
                    "email challenge issued but the account has no email",
                )));
            };
            if acid.primary_text.as_deref() == Some("Check your email") {
                return Err(Error::Flow(FlowError::new(
                    "LoginAcid",
                    "email confirmation required but no mailbox access is available",
                )));
            }

            flow = match self
                .advance_flow(
                    &flow.flow_token.clone(),
                    vec![inputs::enter_text("LoginAcid", &email)],
                    false,
                )
                .await
            {
                Ok(next) => next,
                Err(err) if err.api_codes().contains(&CODE_NOT_FOUND) => {
                    warn!("{} email rejected by the login flow", self.ident());
                    return Err(Error::Flow(FlowError::new("LoginAcid", "email rejected")));
                }
                Err(err) => return Err(err),
            };
        }

        if flow.has("LoginTwoFactorAuthChallenge") {
            if self.account.totp_secret().is_none() {
                return Err(Error::Flow(FlowError::new(
                    "LoginTwoFactorAuthChallenge",
                    "2FA challenge issued but the account has no totp_secret",
                )));
            }
            let code = self
                .account
                .totp_code()
                .map_err(|err| Error::Usage(err.to_string()))?;

            match self
                .advance_flow(
                    &flow.flow_token.clone(),
                    vec![inputs::enter_text("LoginTwoFactorAuthChallenge", &code)],
                    false,
                )
                .await
            {
                Ok(next) => flow = next,
                Err(err) if err.api_codes().contains(&CODE_NOT_FOUND) => {
                    warn!("{} totp code rejected, trying backup code", self.ident());
                    let Some(backup_code) = self.account.backup_code().map(str::to_string) else {
                        return Err(Error::Flow(FlowError::new(
                            "LoginTwoFactorAuthChallenge",
                            "totp code rejected and the account has no backup_code",
                        )));
                    };

                    flow = self
                        .advance_flow(
                            &flow.flow_token.clone(),
                            vec![inputs::choose_method(&[0])],
                            false,
                        )
                        .await?;
                    flow = match self
                        .advance_flow(
                            &flow.flow_token.clone(),
                            vec![inputs::enter_text("LoginTwoFactorAuthChallenge", &backup_code)],
                            false,
                        )
                        .await
                    {
                        Ok(next) => {
                            backup_code_consumed = true;
                            next
                        }
                        Err(err) if err.api_codes().contains(&CODE_NOT_FOUND) => {
                            warn!("{} backup code rejected", self.ident());
                            return Err(Error::Flow(FlowError::new(
                                "LoginTwoFactorAuthChallenge",
                                "backup code rejected",
                            )));
                        }
                        Err(err) => return Err(err),
                    };
                }
                Err(err) => return Err(err),
            }
        }

        self.advance_flow(&flow.flow_token.clone(), vec![], false).await?;
        Ok(backup_code_consumed)
    }
}
