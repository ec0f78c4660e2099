//! Agent command dispatch: registry, queue, long-poll protocol and timeout sweeper.

pub mod protocol;
pub mod queue;
pub mod registry;
pub mod service;
pub mod sweeper;

pub use queue::CommandQueue;
pub use registry::AgentRegistry;
pub use service::DispatchService;
pub use sweeper::TimeoutSweeper;
