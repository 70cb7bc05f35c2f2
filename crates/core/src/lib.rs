pub mod config;
pub mod constants;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::*;
