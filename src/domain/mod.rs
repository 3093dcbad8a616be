pub mod buffer;
pub mod config;
pub mod environment;
pub mod policy;
pub mod runner;
pub mod trainer;
pub mod utils;
