pub mod config;
pub mod engine;
pub mod error;
pub mod types;

pub use config::*;
pub use engine::assess;
pub use error::*;
pub use types::*;
