pub mod catalog;
pub mod configuration;
pub mod error_handling;
pub mod session_management;
pub mod storage;
pub mod study;
pub mod web_interface;

pub use session_management::session_manager::SessionManager;
pub use session_management::{SessionStatus, Stage, Statement};
pub use storage::DatabaseStorage;
