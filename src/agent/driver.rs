//! Desktop input backends and the command executor built on them.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::process::Command as Process;
use tracing::{debug, info, instrument};

use super::hotkeys::{plan, HostOs, InputStep};
use crate::domain::Action;
use crate::error::{RelayError, Result};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InputDriver: Send + Sync {
    /// Open a URL with the system handler
    async fn open_url(&self, url: &str) -> Result<()>;

    /// Press the keys together, modifiers first
    async fn send_keys(&self, keys: &[String]) -> Result<()>;
}

/// Drives the real desktop through the platform's command-line tools
pub struct SystemDriver {
    os: HostOs,
}

impl SystemDriver {
    pub fn new(os: HostOs) -> Self {
        Self { os }
    }

    async fn spawn(program: &str, args: &[&str]) -> Result<()> {
        debug!(program, ?args, "Spawning input helper");
        let status = Process::new(program).args(args).status().await?;
        if !status.success() {
            return Err(RelayError::Internal(format!("{program} exited with {status}")));
        }
        Ok(())
    }
}

/// AppleScript `keystroke` clause for a combo such as cmd+shift+r
fn applescript_keystroke(keys: &[String]) -> Result<String> {
    let (key, modifiers) = keys
        .split_last()
        .ok_or_else(|| RelayError::Validation("empty key combo".to_string()))?;

    let modifiers: Vec<&str> = modifiers
        .iter()
        .map(|m| match m.as_str() {
            "cmd" | "command" | "meta" | "super" => Ok("command down"),
            "shift" => Ok("shift down"),
            "alt" | "option" => Ok("option down"),
            "ctrl" | "control" => Ok("control down"),
            other => Err(RelayError::Validation(format!("unknown modifier: {other}"))),
        })
        .collect::<Result<_>>()?;

    let mut script = format!(r#"tell application "System Events" to keystroke "{key}""#);
    if !modifiers.is_empty() {
        script.push_str(&format!(" using {{{}}}", modifiers.join(", ")));
    }
    Ok(script)
}

#[async_trait]
impl InputDriver for SystemDriver {
    async fn open_url(&self, url: &str) -> Result<()> {
        match self.os {
            HostOs::MacOs => Self::spawn("open", &[url]).await,
            HostOs::Linux => Self::spawn("xdg-open", &[url]).await,
            HostOs::Windows => Self::spawn("cmd", &["/C", "start", "", url]).await,
        }
    }

    async fn send_keys(&self, keys: &[String]) -> Result<()> {
        match self.os {
            HostOs::MacOs => {
                let script = applescript_keystroke(keys)?;
                Self::spawn("osascript", &["-e", &script]).await
            }
            HostOs::Linux => Self::spawn("xdotool", &["key", &keys.join("+")]).await,
            HostOs::Windows => Err(RelayError::Internal(
                "keyboard input is not supported on windows".to_string(),
            )),
        }
    }
}

/// Logs what would be sent without touching the desktop
#[derive(Default)]
pub struct DryRunDriver;

#[async_trait]
impl InputDriver for DryRunDriver {
    async fn open_url(&self, url: &str) -> Result<()> {
        info!(url, "[dry-run] open url");
        Ok(())
    }

    async fn send_keys(&self, keys: &[String]) -> Result<()> {
        info!(keys = %keys.join("+"), "[dry-run] send keys");
        Ok(())
    }
}

/// Turns a command into input on the host
#[derive(Clone)]
pub struct CommandExecutor {
    driver: Arc<dyn InputDriver>,
    os: HostOs,
}

impl CommandExecutor {
    pub fn new(driver: Arc<dyn InputDriver>, os: HostOs) -> Self {
        Self { driver, os }
    }

    pub fn os(&self) -> HostOs {
        self.os
    }

    /// Perform the command, returning a result document for the report
    #[instrument(skip(self, payload))]
    pub async fn execute(&self, action: Action, payload: &Value) -> Result<Value> {
        match plan(action, payload, self.os)? {
            InputStep::Open(url) => {
                self.driver.open_url(&url).await?;
                Ok(json!({ "action": action, "opened": url }))
            }
            InputStep::Keys(keys) => {
                self.driver.send_keys(&keys).await?;
                Ok(json!({ "action": action, "keys": keys }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applescript_keystroke() {
        let keys = vec!["cmd".to_string(), "shift".to_string(), "r".to_string()];
        assert_eq!(
            applescript_keystroke(&keys).unwrap(),
            r#"tell application "System Events" to keystroke "r" using {command down, shift down}"#
        );
        assert!(applescript_keystroke(&[]).is_err());
        assert!(applescript_keystroke(&["hyper".to_string(), "r".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_recording_actions_press_shared_combo() {
        let mut driver = MockInputDriver::new();
        driver
            .expect_send_keys()
            .withf(|keys| keys == ["alt".to_string(), "r".to_string()])
            .times(2)
            .returning(|_| Ok(()));
        let executor = CommandExecutor::new(Arc::new(driver), HostOs::Linux);

        executor.execute(Action::RecordingStart, &json!({})).await.unwrap();
        let result = executor.execute(Action::RecordingStop, &json!({})).await.unwrap();
        assert_eq!(result["action"], "recording_stop");
    }

    #[tokio::test]
    async fn test_open_url_goes_through_driver() {
        let mut driver = MockInputDriver::new();
        driver
            .expect_open_url()
            .withf(|url| url == "https://meet.example/1")
            .times(1)
            .returning(|_| Ok(()));
        let executor = CommandExecutor::new(Arc::new(driver), HostOs::MacOs);

        let result = executor
            .execute(Action::OpenUrl, &json!({"url": "https://meet.example/1"}))
            .await
            .unwrap();
        assert_eq!(result["opened"], "https://meet.example/1");
    }

    #[tokio::test]
    async fn test_driver_failure_propagates() {
        let mut driver = MockInputDriver::new();
        driver
            .expect_send_keys()
            .returning(|_| Err(RelayError::Internal("xdotool missing".to_string())));
        let executor = CommandExecutor::new(Arc::new(driver), HostOs::Linux);

        let err = executor
            .execute(Action::RecordingPause, &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("xdotool missing"));
    }
}
