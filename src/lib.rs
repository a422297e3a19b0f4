pub mod agent;
pub mod anvil_config;
pub mod classify;
pub mod config;
pub mod context;
pub mod errors;
pub mod logging;
pub mod orchestrator;
pub mod permissions;
pub mod plan;
pub mod repo;
pub mod stream;
pub mod ui;
pub mod util;
