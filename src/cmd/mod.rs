//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `replay` | `Replay`         |
//! | `serve`  | `Serve`          |
//! | `config` | `Config`         |

pub mod config;
pub mod replay;
pub mod serve;

pub use config::cmd_config;
pub use replay::cmd_replay;
pub use serve::cmd_serve;
