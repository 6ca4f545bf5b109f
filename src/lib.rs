pub mod api;
pub mod config;
pub mod error;
pub mod notify;
pub mod registry;
pub mod runs;
pub mod shutdown;
