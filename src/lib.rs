pub mod adapters;
pub mod agent;
pub mod api;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod sync;

pub use adapters::{ScheduleClient, SqliteStore};
pub use config::{AgentConfig, AppConfig};
pub use dispatch::{AgentRegistry, CommandQueue, DispatchService, TimeoutSweeper};
pub use domain::{Action, Agent, Command, CommandStatus, Meeting, MeetingStatus, SyncStats};
pub use error::{RelayError, Result};
pub use sync::{ExpiryScanner, MeetingSource, MeetingStore, Reconciler};
