pub mod optimizer;
pub mod ppo_trainer;
