use rand::{Rng, RngCore};

/// Categorical distribution over discrete actions, built from logits.
#[derive(Debug, Clone, PartialEq)]
pub struct Categorical {
    probs: Vec<f32>,
    log_probs: Vec<f32>,
}

impl Categorical {
    /// Numerically stable softmax / log-softmax of `logits`.
    pub fn from_logits(logits: &[f32]) -> Self {
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let log_sum_exp = max + logits.iter().map(|l| (l - max).exp()).sum::<f32>().ln();

        let log_probs: Vec<f32> = logits.iter().map(|l| l - log_sum_exp).collect();
        let probs = log_probs.iter().map(|lp| lp.exp()).collect();

        Self { probs, log_probs }
    }

    pub fn probs(&self) -> &[f32] {
        &self.probs
    }

    pub fn num_actions(&self) -> usize {
        self.probs.len()
    }

    /// Log-probability of `action`; `-inf` for actions outside the support.
    pub fn log_prob(&self, action: usize) -> f32 {
        self.log_probs.get(action).copied().unwrap_or(f32::NEG_INFINITY)
    }

    pub fn entropy(&self) -> f32 {
        -self.probs.iter().zip(&self.log_probs).map(|(p, lp)| p * lp).sum::<f32>()
    }

    /// Inverse-CDF sampling.
    pub fn sample(&self, rng: &mut dyn RngCore) -> usize {
        let u: f32 = rng.random();
        let mut cumulative = 0.0;
        for (action, p) in self.probs.iter().enumerate() {
            cumulative += p;
            if u < cumulative {
                return action;
            }
        }
        // Rounding left the cumulative sum slightly below one.
        self.probs.iter().rposition(|p| *p > 0.0).unwrap_or(0)
    }

    pub fn mode(&self) -> usize {
        self.probs
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, p)| if *p > best.1 { (i, *p) } else { best })
            .0
    }
}
