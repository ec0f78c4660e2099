pub mod admin;
pub mod agent;
pub mod health;
pub mod links;

pub use admin::*;
pub use agent::*;
pub use health::*;
pub use links::*;
