use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Action an agent performs on its host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    OpenUrl,
    StartMeetingSession,
    #[serde(alias = "recording-start")]
    RecordingStart,
    #[serde(alias = "recording-stop")]
    RecordingStop,
    #[serde(alias = "recording-pause")]
    RecordingPause,
    #[serde(alias = "recording-resume")]
    RecordingResume,
    RawHotkey,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::OpenUrl,
        Action::StartMeetingSession,
        Action::RecordingStart,
        Action::RecordingStop,
        Action::RecordingPause,
        Action::RecordingResume,
        Action::RawHotkey,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::OpenUrl => "open_url",
            Action::StartMeetingSession => "start_meeting_session",
            Action::RecordingStart => "recording_start",
            Action::RecordingStop => "recording_stop",
            Action::RecordingPause => "recording_pause",
            Action::RecordingResume => "recording_resume",
            Action::RawHotkey => "raw_hotkey",
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(
            self,
            Action::RecordingStart
                | Action::RecordingStop
                | Action::RecordingPause
                | Action::RecordingResume
        )
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_");
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == normalized)
            .ok_or_else(|| format!("unknown action: {s}"))
    }
}

/// What an operator wants the recording to end up as.
///
/// Start/stop share one hotkey and pause/resume share another, so when the
/// current recording state is unknown the server sends the alternatives that
/// together reach the wanted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingIntent {
    Start,
    Stop,
    Pause,
    Resume,
}

impl RecordingIntent {
    pub fn actions(&self) -> &'static [Action] {
        match self {
            RecordingIntent::Start => &[Action::RecordingStart, Action::RecordingResume],
            RecordingIntent::Stop => &[Action::RecordingStop],
            RecordingIntent::Pause => &[Action::RecordingPause],
            RecordingIntent::Resume => &[Action::RecordingResume, Action::RecordingStart],
        }
    }
}

/// Command lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Running => "running",
            CommandStatus::Done => "done",
            CommandStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Done | CommandStatus::Failed)
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CommandStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(CommandStatus::Pending),
            "running" => Ok(CommandStatus::Running),
            "done" => Ok(CommandStatus::Done),
            "failed" => Ok(CommandStatus::Failed),
            other => Err(format!("unknown command status: {other}")),
        }
    }
}

/// One unit of dispatchable work targeted at an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: i64,
    pub agent_id: i64,
    pub action: Action,
    pub payload: Value,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Terminal outcome written by `finalize`
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done { result: Option<Value> },
    Failed { result: Option<Value>, error: String },
}

impl Outcome {
    pub fn timeout() -> Self {
        Outcome::Failed {
            result: None,
            error: "timeout".to_string(),
        }
    }

    pub fn status(&self) -> CommandStatus {
        match self {
            Outcome::Done { .. } => CommandStatus::Done,
            Outcome::Failed { .. } => CommandStatus::Failed,
        }
    }
}
