pub mod api_server;
pub mod schedule_client;
pub mod sqlite;

pub use api_server::{serve, start_api_server};
pub use schedule_client::ScheduleClient;
pub use sqlite::SqliteStore;
