pub mod binding;
pub mod config;
pub mod errors;
pub mod exchange;
pub mod kernel;
pub mod traits;
pub mod types;
