pub mod actor_critic;
pub mod backend;
pub mod distribution;
pub mod model;
