//! Host agent
//!
//! Runs on the machine that joins meetings. It registers with the relay
//! server, long-polls for commands, drives the desktop through an
//! `InputDriver`, and reports each outcome back. A small local HTTP surface
//! accepts the same commands directly for operators on the LAN.

pub mod driver;
pub mod hotkeys;
pub mod key_file;
pub mod runner;
pub mod server;

pub use driver::{CommandExecutor, DryRunDriver, InputDriver, SystemDriver};
pub use hotkeys::{HostOs, InputStep};
pub use key_file::load_or_create_api_key;
pub use runner::AgentRunner;
pub use server::{create_agent_router, AgentServerState, HostInfo};
