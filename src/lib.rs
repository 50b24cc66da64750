pub mod config;
pub mod coordinator;
pub mod errors;
pub mod init;
pub mod item;
pub mod logging;
pub mod pipeline;
pub mod scheduler;
pub mod store;
pub mod tracker;
