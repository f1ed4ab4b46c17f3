pub mod commands;
pub mod config;
pub mod error;
pub mod filter;
pub mod gate;
pub mod gateway;
pub mod orchestrator;
pub mod parser;
pub mod prompt;
pub mod registry;

pub use commands::*;
pub use config::*;
pub use error::*;
pub use filter::*;
pub use gate::*;
pub use gateway::*;
pub use orchestrator::*;
pub use parser::*;
pub use prompt::*;
pub use registry::*;
