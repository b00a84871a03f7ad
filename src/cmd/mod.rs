//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|-----------------------------------------------------|
//! | `run`           | `Run`                                              |
//! | `status`        | `Status`                                           |
//! | `rollback`      | `Rollback`                                         |
//! | `port`          | `Port`                                             |
//! | `unlock`        | `Unlock`                                           |
//! | `config`        | `Config`                                           |

pub mod config;
pub mod port;
pub mod rollback;
pub mod run;
pub mod status;
pub mod unlock;

pub use config::cmd_config;
pub use port::cmd_port;
pub use rollback::cmd_rollback;
pub use run::cmd_run;
pub use status::cmd_status;
pub use unlock::cmd_unlock;
