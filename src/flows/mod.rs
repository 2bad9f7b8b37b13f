//! Flow-task runner: the platform's generic server-directed wizard protocol.
//!
//! A flow is an opaque `flow_token` plus an ordered list of pending
//! subtasks. Advancing means POSTing typed inputs keyed by subtask id; the
//! server answers with a new token and a new subtask list. The runner never
//! hard-codes the full task graph: each flow script submits its expected
//! linear sequence and branches on which subtask ids the server actually
//! returned.

mod login;
mod totp;
mod unlock;

use log::debug;
use serde_json::{Value, json};

use crate::client::{ApiRequest, Client, ONBOARDING_TASK_URL};
use crate::errors::{Error, FlowError, Result};
use crate::models::Subtask;

/// Current position inside a flow task.
#[derive(Debug, Clone)]
pub struct FlowState {
    pub flow_token: String,
    pub subtasks: Vec<Subtask>,
}

impl FlowState {
    pub fn has(&self, subtask_id: &str) -> bool {
        self.subtasks.iter().any(|subtask| subtask.id == subtask_id)
    }

    pub fn find(&self, subtask_id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|subtask| subtask.id == subtask_id)
    }
}

/// Typed subtask input payloads.
pub(crate) mod inputs {
    use serde_json::{Value, json};

    pub fn enter_text(subtask_id: &str, text: &str) -> Value {
        json!({
            "subtask_id": subtask_id,
            "enter_text": {"link": "next_link", "text": text},
        })
    }

    pub fn enter_password(subtask_id: &str, password: &str) -> Value {
        json!({
            "subtask_id": subtask_id,
            "enter_password": {"link": "next_link", "password": password},
        })
    }

    pub fn user_identifier(identifier: &str) -> Value {
        json!({
            "subtask_id": "LoginEnterUserIdentifierSSO",
            "settings_list": {
                "link": "next_link",
                "setting_responses": [{
                    "key": "user_identifier",
                    "response_data": {"text_data": {"result": identifier}},
                }],
            },
        })
    }

    pub fn duplication_check() -> Value {
        json!({
            "subtask_id": "AccountDuplicationCheck",
            "check_logged_in_account": {"link": "AccountDuplicationCheck_false"},
        })
    }

    pub fn choose_method(choices: &[u32]) -> Value {
        let choices: Vec<String> = choices.iter().map(u32::to_string).collect();
        json!({
            "subtask_id": "LoginTwoFactorAuthChooseMethod",
            "choice_selection": {"link": "next_link", "selected_choices": choices},
        })
    }

    pub fn action_list(subtask_id: &str) -> Value {
        json!({"subtask_id": subtask_id, "action_list": {"link": "next_link"}})
    }

    pub fn show_code_ack(subtask_id: &str) -> Value {
        json!({"subtask_id": subtask_id, "show_code": {"link": "next_link"}})
    }

    pub fn finish_cta(subtask_id: &str) -> Value {
        json!({"subtask_id": subtask_id, "cta": {"link": "finish_link"}})
    }
}

impl Client {
    /// Open a flow task and return its first state.
    pub(crate) async fn start_flow(
        &mut self,
        flow_name: &str,
        start_location: &str,
        auth: bool,
    ) -> Result<FlowState> {
        let request = ApiRequest::post(ONBOARDING_TASK_URL)
            .param("flow_name", flow_name)
            .json(json!({
                "input_flow_data": {
                    "flow_context": {
                        "debug_overrides": {},
                        "start_location": {"location": start_location},
                    }
                },
                "subtask_versions": subtask_versions(),
            }))
            .auth(auth);
        self.submit_flow(request).await
    }

    /// Submit subtask inputs and return the next state. An empty input list
    /// acknowledges the flow as finished.
    pub(crate) async fn advance_flow(
        &mut self,
        flow_token: &str,
        subtask_inputs: Vec<Value>,
        auth: bool,
    ) -> Result<FlowState> {
        let request = ApiRequest::post(ONBOARDING_TASK_URL)
            .json(json!({
                "flow_token": flow_token,
                "subtask_inputs": subtask_inputs,
            }))
            .auth(auth);
        self.submit_flow(request).await
    }

    async fn submit_flow(&mut self, request: ApiRequest) -> Result<FlowState> {
        let response = self.request(request).await?;

        let flow_token = response
            .data
            .get("flow_token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Flow(FlowError::new("onboarding", "response carries no flow_token"))
            })?
            .to_string();

        let mut subtasks = Vec::new();
        if let Some(raw_subtasks) = response.data.get("subtasks").and_then(Value::as_array) {
            for raw in raw_subtasks {
                subtasks.push(Subtask::from_raw_data(raw)?);
            }
        }

        for subtask in &subtasks {
            debug!("{} pending subtask {}", self.ident(), subtask.id);
        }

        Ok(FlowState {
            flow_token,
            subtasks,
        })
    }
}

/// Subtask protocol versions pinned by the web frontend; sent verbatim when
/// opening a flow.
fn subtask_versions() -> Value {
    json!({
        "action_list": 2,
        "alert_dialog": 1,
        "app_download_cta": 1,
        "check_logged_in_account": 1,
        "choice_selection": 3,
        "contacts_live_sync_permission_prompt": 0,
        "cta": 7,
        "email_verification": 2,
        "end_flow": 1,
        "enter_date": 1,
        "enter_email": 2,
        "enter_password": 5,
        "enter_phone": 2,
        "enter_recaptcha": 1,
        "enter_text": 5,
        "enter_username": 2,
        "generic_urt": 3,
        "in_app_notification": 1,
        "interest_picker": 3,
        "js_instrumentation": 1,
        "menu_dialog": 1,
        "notifications_permission_prompt": 2,
        "open_account": 2,
        "open_home_timeline": 1,
        "open_link": 1,
        "phone_verification": 4,
        "privacy_options": 1,
        "security_key": 3,
        "select_avatar": 4,
        "select_banner": 2,
        "settings_list": 7,
        "show_code": 1,
        "sign_up": 2,
        "sign_up_review": 4,
        "tweet_selection_urt": 1,
        "update_users": 1,
        "upload_media": 1,
        "user_recommendations_list": 4,
        "user_recommendations_urt": 1,
        "wait_spinner": 3,
        "web_modal": 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flow_state_lookups() {
        let state = FlowState {
            flow_token: "token".into(),
            subtasks: vec![
                Subtask::from_raw_data(&json!({"subtask_id": "LoginEnterPassword"})).unwrap(),
            ],
        };
        assert!(state.has("LoginEnterPassword"));
        assert!(state.find("LoginAcid").is_none());
    }

    #[test]
    fn identifier_input_shape() {
        let input = inputs::user_identifier("alice");
        assert_eq!(input["subtask_id"], "LoginEnterUserIdentifierSSO");
        assert_eq!(
            input["settings_list"]["setting_responses"][0]["response_data"]["text_data"]["result"],
            "alice"
        );
    }

    #[test]
    fn choose_method_stringifies_choices() {
        let input = inputs::choose_method(&[0]);
        assert_eq!(input["choice_selection"]["selected_choices"][0], "0");
    }
}
