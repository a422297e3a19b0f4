//! Tool-use permissions for running agents.
//!
//! Allow rules are loaded once per process from the workspace settings file
//! and the shared store, then consulted by the gateway for every request the
//! agent makes through the bridge.

pub mod bridge;
pub mod gateway;
pub mod prompt;
pub mod protocol;
pub mod rm;
pub mod rules;
pub mod settings;

pub use gateway::{GatewayConfig, GatewayHandle, PermissionGateway, Resolution};
pub use prompt::{PermissionChoice, PermissionPrompter, PromptRequest, TerminalPrompter};
pub use protocol::{GatewayMessage, PermissionRequest, PermissionResponse};
pub use rm::parse_rm_command;
pub use rules::{AllowRuleSet, BASH_TOOL, SharedAllowRules};
pub use settings::{PermissionFile, PermissionPersistence, shared_store_path};
