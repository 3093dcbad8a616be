//! Reward table of the allocation environment.
//!
//! Exactly one deployment term applies per step; a node failure adds its
//! own penalty, charged once per failure event regardless of the action.

pub const DEPLOYMENT_SUCCESS: f32 = 1.0;
pub const REJECTION: f32 = -0.5;
pub const DEPLOYMENT_FAILURE: f32 = -1.0;
pub const FAILURE_PENALTY_PER_SERVICE: f32 = -2.0;
pub const NEUTRAL: f32 = 0.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RewardBreakdown {
    /// Outcome of the placement decision (or neutral when none was due).
    pub deployment: f32,
    /// Penalty for services lost to a node failure.
    pub failure_penalty: f32,
}

impl RewardBreakdown {
    pub fn total(&self) -> f32 {
        self.deployment + self.failure_penalty
    }

    pub fn failure(lost_services: usize) -> f32 {
        FAILURE_PENALTY_PER_SERVICE * lost_services as f32
    }
}
