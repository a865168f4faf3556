//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|-----------------------------------------------------|
//! | `run`           | `Run`                                              |
//! | `phase`         | `Status`, `Inspect`, `Rewind`, `Reset`             |
//! | `config`        | `Config`                                           |
//! | `session`       | shared: build an orchestrator from settings        |

pub mod config;
pub mod phase;
pub mod run;
pub mod session;

pub use config::{cmd_config, cmd_config_init};
pub use phase::{cmd_inspect, cmd_reset, cmd_rewind, cmd_status};
pub use run::cmd_run;
