pub mod agent;
pub mod command;
pub mod meeting;

pub use agent::*;
pub use command::*;
pub use meeting::*;
