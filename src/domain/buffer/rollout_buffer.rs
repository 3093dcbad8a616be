use crate::error::{Error, Result};

/// One step of interaction, stored exactly as produced during the rollout.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub observation: Vec<f32>,
    pub action: usize,
    pub reward: f32,
    pub log_prob: f32,
    pub value: f32,
    pub done: bool,
}

/// GAE output, aligned index-by-index with the buffer's transitions.
#[derive(Debug, Clone, PartialEq)]
pub struct Advantages {
    pub advantages: Vec<f32>,
    /// Value regression targets: `advantages + values`.
    pub returns: Vec<f32>,
}

/// Fixed-horizon storage for one rollout window.
#[derive(Debug, Clone)]
pub struct RolloutBuffer {
    capacity: usize,
    transitions: Vec<Transition>,
}

impl RolloutBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, transitions: Vec::with_capacity(capacity) }
    }

    pub fn add(&mut self, observation: Vec<f32>, action: usize, reward: f32, log_prob: f32, value: f32, done: bool) -> Result<()> {
        if self.is_full() {
            return Err(Error::BufferFull(self.capacity));
        }
        self.transitions.push(Transition { observation, action, reward, log_prob, value, done });
        Ok(())
    }

    pub fn clear(&mut self) {
        self.transitions.clear();
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.transitions.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Backward-in-time generalized advantage estimation.
    ///
    /// `last_value` bootstraps the state following the final transition; it
    /// is masked out when that transition ended an episode.
    pub fn compute_advantages(&self, last_value: f32, gamma: f32, gae_lambda: f32) -> Result<Advantages> {
        if self.is_empty() {
            return Err(Error::EmptyBuffer);
        }

        let rewards: Vec<f32> = self.transitions.iter().map(|t| t.reward).collect();
        let values: Vec<f32> = self.transitions.iter().map(|t| t.value).collect();
        let dones: Vec<bool> = self.transitions.iter().map(|t| t.done).collect();

        Ok(compute_gae(&rewards, &values, &dones, last_value, gamma, gae_lambda))
    }
}

/// GAE over parallel reward/value/done sequences.
///
/// ```text
/// delta[t]     = r[t] + γ (1 - done[t]) v[t+1] - v[t]
/// advantage[t] = delta[t] + γ λ (1 - done[t]) advantage[t+1]
/// ```
/// with `v[T] = last_value`.
pub fn compute_gae(rewards: &[f32], values: &[f32], dones: &[bool], last_value: f32, gamma: f32, gae_lambda: f32) -> Advantages {
    let len = rewards.len();
    let mut advantages = vec![0.0; len];
    let mut next_advantage = 0.0;
    let mut next_value = last_value;

    for t in (0..len).rev() {
        let not_done = if dones[t] { 0.0 } else { 1.0 };
        let delta = rewards[t] + gamma * not_done * next_value - values[t];
        next_advantage = delta + gamma * gae_lambda * not_done * next_advantage;
        advantages[t] = next_advantage;
        next_value = values[t];
    }

    let returns = advantages.iter().zip(values).map(|(a, v)| a + v).collect();
    Advantages { advantages, returns }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_refuses_to_overfill() {
        let mut buffer = RolloutBuffer::new(2);
        buffer.add(vec![0.0], 0, 1.0, -0.5, 0.1, false).unwrap();
        buffer.add(vec![0.0], 1, 1.0, -0.5, 0.1, true).unwrap();
        assert!(buffer.is_full());
        assert!(matches!(buffer.add(vec![0.0], 0, 0.0, 0.0, 0.0, false), Err(Error::BufferFull(2))));

        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn empty_buffer_has_no_advantages() {
        let buffer = RolloutBuffer::new(4);
        assert!(matches!(buffer.compute_advantages(0.0, 0.99, 0.95), Err(Error::EmptyBuffer)));
    }

    #[test]
    fn lambda_one_gives_monte_carlo_returns() {
        let rewards = [1.0, 0.0, 2.0];
        let values = [0.5, 0.5, 0.5];
        let dones = [false, false, true];

        let out = compute_gae(&rewards, &values, &dones, 100.0, 0.5, 1.0);

        // Discounted returns ignore the bootstrap because the last step is terminal.
        let expected_returns = [1.0 + 0.5 * 0.0 + 0.25 * 2.0, 0.0 + 0.5 * 2.0, 2.0];
        for t in 0..3 {
            assert!((out.returns[t] - expected_returns[t]).abs() < 1e-6, "t={}: {} vs {}", t, out.returns[t], expected_returns[t]);
        }
    }
}
