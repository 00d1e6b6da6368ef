pub mod config;
pub mod errors;
pub mod interrupt;
pub mod orchestrator;
pub mod planner;
pub mod progress;
pub mod recovery;
pub mod replay;
pub mod server;
pub mod session;
pub mod surface;
pub mod ui;
pub mod util;
pub mod variants;
pub mod verification;
