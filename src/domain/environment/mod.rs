pub mod agent;
pub mod allocation_env;
pub mod event;
pub mod event_generator;
pub mod node;
pub mod observation;
pub mod reward;
