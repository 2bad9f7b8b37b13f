//! CapSolver FunCaptcha adapter.
//!
//! Two-call vendor protocol: `createTask` registers the challenge and
//! returns a task id, `getTaskResult` is polled until the task leaves the
//! `processing` state. A non-zero `errorId` at either step is a vendor
//! failure carrying a code and description.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::{Instant, sleep};

use super::{CaptchaConfig, CaptchaError, CaptchaResult, CaptchaSolution, CaptchaSolver, FunCaptchaTask};

const CREATE_TASK_URL: &str = "https://api.capsolver.com/createTask";
const TASK_RESULT_URL: &str = "https://api.capsolver.com/getTaskResult";

/// CapSolver-backed FunCaptcha solver.
pub struct CapSolverFunCaptcha {
    api_key: String,
    config: CaptchaConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct VendorResponse {
    #[serde(rename = "errorId", default)]
    error_id: i64,
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
    #[serde(rename = "errorDescription", default)]
    error_description: Option<String>,
    #[serde(rename = "taskId", default)]
    task_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    solution: Option<Value>,
}

impl VendorResponse {
    fn vendor_error(&self) -> CaptchaError {
        CaptchaError::Vendor {
            code: self.error_code.clone().unwrap_or_else(|| "unknown".into()),
            description: self.error_description.clone().unwrap_or_default(),
        }
    }

    fn token(&self) -> Option<String> {
        self.solution
            .as_ref()?
            .get("token")?
            .as_str()
            .map(str::to_string)
    }
}

impl CapSolverFunCaptcha {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_config(api_key, CaptchaConfig::default())
    }

    pub fn with_config(api_key: impl Into<String>, config: CaptchaConfig) -> Self {
        Self {
            api_key: api_key.into(),
            config,
            http: reqwest::Client::new(),
        }
    }

    fn task_payload(&self, task: &FunCaptchaTask) -> Value {
        let mut payload = json!({
            "type": "FunCaptchaTaskProxyLess",
            "websiteURL": task.site_url,
            "websitePublicKey": task.site_key,
        });

        if let Some(ref proxy) = task.proxy {
            payload["type"] = json!("FunCaptchaTask");
            payload["proxyType"] = json!(proxy.scheme);
            payload["proxyAddress"] = json!(proxy.host);
            payload["proxyPort"] = json!(proxy.port);
            if let Some(ref username) = proxy.username {
                payload["proxyLogin"] = json!(username);
            }
            if let Some(ref password) = proxy.password {
                payload["proxyPassword"] = json!(password);
            }
        }

        json!({"clientKey": self.api_key, "task": payload})
    }

    async fn call(&self, url: &str, payload: &Value) -> Result<VendorResponse, CaptchaError> {
        let response = self
            .http
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|err| CaptchaError::Transport(err.to_string()))?;
        response
            .json::<VendorResponse>()
            .await
            .map_err(|err| CaptchaError::Transport(err.to_string()))
    }
}

#[async_trait]
impl CaptchaSolver for CapSolverFunCaptcha {
    fn name(&self) -> &'static str {
        "capsolver"
    }

    async fn solve(&self, task: &FunCaptchaTask) -> CaptchaResult {
        if self.api_key.is_empty() {
            return Err(CaptchaError::Configuration("empty api key".into()));
        }

        let created = self.call(CREATE_TASK_URL, &self.task_payload(task)).await?;
        if created.error_id != 0 {
            return Err(created.vendor_error());
        }

        // Some tasks resolve synchronously.
        if created.status.as_deref() == Some("ready")
            && let Some(token) = created.token()
        {
            return Ok(CaptchaSolution { token });
        }

        let task_id = created
            .task_id
            .ok_or_else(|| CaptchaError::Transport("createTask returned no task id".into()))?;
        let poll_payload = json!({"clientKey": self.api_key, "taskId": task_id});
        let deadline = Instant::now() + self.config.timeout;

        loop {
            sleep(self.config.poll_interval).await;
            if Instant::now() >= deadline {
                return Err(CaptchaError::Timeout(self.config.timeout));
            }

            let result = self.call(TASK_RESULT_URL, &poll_payload).await?;
            if result.error_id != 0 {
                return Err(result.vendor_error());
            }
            match result.status.as_deref() {
                Some("ready") => {
                    let token = result.token().ok_or_else(|| {
                        CaptchaError::Transport("ready task without solution token".into())
                    })?;
                    return Ok(CaptchaSolution { token });
                }
                Some("failed") => return Err(result.vendor_error()),
                _ => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ProxyEndpoint;

    #[test]
    fn proxyless_task_payload() {
        let solver = CapSolverFunCaptcha::new("key");
        let task = FunCaptchaTask::new("https://twitter.com/account/access", "0152B4EB");
        let payload = solver.task_payload(&task);
        assert_eq!(payload["task"]["type"], "FunCaptchaTaskProxyLess");
        assert_eq!(payload["clientKey"], "key");
        assert!(payload["task"].get("proxyAddress").is_none());
    }

    #[test]
    fn proxied_task_payload_carries_endpoint_parts() {
        let solver = CapSolverFunCaptcha::new("key");
        let proxy = ProxyEndpoint::parse("http://user:pw@10.0.0.1:3128").unwrap();
        let task = FunCaptchaTask::new("https://twitter.com/account/access", "0152B4EB")
            .with_proxy(proxy);
        let payload = solver.task_payload(&task);
        assert_eq!(payload["task"]["type"], "FunCaptchaTask");
        assert_eq!(payload["task"]["proxyAddress"], "10.0.0.1");
        assert_eq!(payload["task"]["proxyPort"], 3128);
        assert_eq!(payload["task"]["proxyLogin"], "user");
        assert_eq!(payload["task"]["proxyPassword"], "pw");
    }
}
