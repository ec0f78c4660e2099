//! Mapping from command actions to concrete desktop input.
//!
//! Recording start/stop share one combo and pause/resume share another in
//! the meeting client, so the mapping is many-to-one.

use serde_json::Value;

use crate::domain::Action;
use crate::error::{RelayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    MacOs,
    Linux,
    Windows,
}

impl HostOs {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            HostOs::MacOs
        } else if cfg!(target_os = "windows") {
            HostOs::Windows
        } else {
            HostOs::Linux
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HostOs::MacOs => "macos",
            HostOs::Linux => "linux",
            HostOs::Windows => "windows",
        }
    }
}

/// What the driver has to do for one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputStep {
    Open(String),
    Keys(Vec<String>),
}

fn combo(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

/// Hotkey bound to a recording action on the given OS
pub fn recording_combo(action: Action, os: HostOs) -> Option<Vec<String>> {
    let key = match action {
        Action::RecordingStart | Action::RecordingStop => "r",
        Action::RecordingPause | Action::RecordingResume => "p",
        _ => return None,
    };
    Some(match os {
        HostOs::MacOs => combo(&["cmd", "shift", key]),
        HostOs::Linux | HostOs::Windows => combo(&["alt", key]),
    })
}

/// Resolve an action and its payload into a single input step
pub fn plan(action: Action, payload: &Value, os: HostOs) -> Result<InputStep> {
    match action {
        Action::OpenUrl | Action::StartMeetingSession => {
            let url = ["url", "join_url"]
                .iter()
                .find_map(|field| payload.get(*field).and_then(Value::as_str))
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .ok_or_else(|| RelayError::Validation(format!("{action} requires a url")))?;
            Ok(InputStep::Open(url.to_string()))
        }
        Action::RawHotkey => {
            let keys: Vec<String> = payload
                .get("keys")
                .and_then(Value::as_array)
                .map(|keys| {
                    keys.iter()
                        .filter_map(Value::as_str)
                        .map(|k| k.trim().to_lowercase())
                        .filter(|k| !k.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            if keys.is_empty() {
                return Err(RelayError::Validation("raw_hotkey requires a keys array".to_string()));
            }
            Ok(InputStep::Keys(keys))
        }
        recording => recording_combo(recording, os)
            .map(InputStep::Keys)
            .ok_or_else(|| RelayError::Internal(format!("no hotkey bound to {recording}"))),
    }
}
