//! 2FA enrollment flow script.
//!
//! Verify password, begin app enrollment, capture the provisioning secret
//! from the `show_code` payload, answer with a generated TOTP value, then
//! pull the single-use backup code out of the completion subtask's display
//! text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::client::{ApiRequest, Client};
use crate::errors::{Error, FlowError, Result};
use crate::flows::inputs;

const VERIFY_PASSWORD: &str = "TwoFactorEnrollmentVerifyPasswordSubtask";
const APP_BEGIN: &str = "TwoFactorEnrollmentAuthenticationAppBeginSubtask";
const APP_PLAIN_CODE: &str = "TwoFactorEnrollmentAuthenticationAppPlainCodeSubtask";
const APP_ENTER_CODE: &str = "TwoFactorEnrollmentAuthenticationAppEnterCodeSubtask";
const APP_COMPLETE: &str = "TwoFactorEnrollmentAuthenticationAppCompleteSubtask";

/// Backup codes are 12 lowercase alphanumerics on their own line.
static BACKUP_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n([a-z0-9]{12})\n").expect("invalid backup code regex"));

fn extract_backup_code(text: &str) -> Option<String> {
    BACKUP_CODE_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|code| code.as_str().to_string())
}

impl Client {
    /// Whether TOTP is already among the account's active 2FA methods.
    pub async fn totp_is_enabled(&mut self) -> Result<bool> {
        if self.account.id().is_none() {
            self.update_account_info().await?;
        }
        let id = self
            .account
            .id()
            .ok_or_else(|| Error::Usage("account id unknown".into()))?;

        let url = format!(
            "https://twitter.com/i/api/1.1/strato/column/User/{id}/account-security/twoFactorAuthSettings2"
        );
        let response = self.request(ApiRequest::get(url)).await?;

        let enabled = response
            .data
            .get("methods")
            .and_then(Value::as_array)
            .is_some_and(|methods| {
                methods.iter().any(|method| {
                    method.get("twoFactorType").and_then(Value::as_str) == Some("Totp")
                })
            });
        Ok(enabled)
    }

    /// Enroll TOTP-based 2FA. On success the account carries the new
    /// `totp_secret` and `backup_code`.
    pub async fn enable_totp(&mut self) -> Result<()> {
        if self.totp_is_enabled().await? {
            return Ok(());
        }
        if self.account.password().is_none() {
            return Err(Error::Usage("password required to enable totp".into()));
        }

        self.run_totp_enrollment().await
    }

    async fn run_totp_enrollment(&mut self) -> Result<()> {
        let mut flow = self
            .start_flow("two-factor-auth-app-enrollment", "settings", true)
            .await?;

        let password = self
            .account
            .password()
            .expect("enable_totp validated the password")
            .to_string();
        flow = self
            .advance_flow(
                &flow.flow_token.clone(),
                vec![inputs::enter_password(VERIFY_PASSWORD, &password)],
                true,
            )
            .await?;
        flow = self
            .advance_flow(&flow.flow_token.clone(), vec![inputs::action_list(APP_BEGIN)], true)
            .await?;

        let Some(plain_code) = flow.find(APP_PLAIN_CODE) else {
            return Err(Error::Flow(FlowError::new(
                APP_PLAIN_CODE,
                "server did not offer the authenticator enrollment step",
            )));
        };
        let secret = plain_code
            .raw
            .pointer("/show_code/code")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Flow(FlowError::new(
                    APP_PLAIN_CODE,
                    "show_code payload carries no provisioning secret",
                ))
            })?
            .to_string();
        self.account.set_totp_secret(secret);

        let code = self
            .account
            .totp_code()
            .map_err(|err| Error::Usage(err.to_string()))?;
        flow = self
            .advance_flow(
                &flow.flow_token.clone(),
                vec![
                    inputs::show_code_ack(APP_PLAIN_CODE),
                    inputs::enter_text(APP_ENTER_CODE, &code),
                ],
                true,
            )
            .await?;

        if let Some(complete) = flow.find(APP_COMPLETE) {
            let text = complete
                .raw
                .pointer("/cta/secondary_text/text")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if let Some(backup_code) = extract_backup_code(text) {
                self.account.set_backup_code(backup_code);
            }
        }

        self.advance_flow(
            &flow.flow_token.clone(),
            vec![inputs::finish_cta(APP_COMPLETE)],
            true,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_code_is_extracted_from_display_text() {
        let text = "Save this backup code:\nab12cd34ef56\nKeep it somewhere safe.";
        assert_eq!(extract_backup_code(text).as_deref(), Some("ab12cd34ef56"));
    }

    #[test]
    fn backup_code_requires_exact_shape() {
        assert_eq!(extract_backup_code("\nAB12CD34EF56\n"), None);
        assert_eq!(extract_backup_code("\nab12cd3\n"), None);
        assert_eq!(extract_backup_code("no code here"), None);
    }
}
