//! CLI command implementations.
//!
//! | Module        | Commands handled |
//! |---------------|------------------|
//! | `run`         | `Run`            |
//! | `config`      | `Config`         |
//! | `permissions` | `Permissions`    |

pub mod config;
pub mod permissions;
pub mod run;

pub use config::cmd_config;
pub use permissions::cmd_permissions;
pub use run::cmd_run;
