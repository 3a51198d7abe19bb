//! Provider-facing utilities:
//! - `config`: host pattern table and auth header strategies
//! - `util`: request headers and provider error bodies
pub mod config;
mod util;

pub use config::*;
pub use util::*;
