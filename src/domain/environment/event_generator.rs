use rand::SeedableRng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::Rng;

use crate::domain::config::EnvConfig;
use crate::domain::environment::agent::AgentRegistry;
use crate::domain::environment::event::{Event, EventKind};
use crate::domain::environment::node::Node;
use crate::error::{Error, Result};

/// Draws one world event per environment step.
///
/// The generator only reads the cluster state to pick targets; applying the
/// event is up to the environment. It owns its random source so that a
/// fixed seed yields a fixed event stream.
#[derive(Debug, Clone)]
pub struct EventGenerator {
    kinds: WeightedIndex<f64>,
    num_services: usize,
    max_agents: usize,
    demand_min: f32,
    demand_max: f32,
    rng: StdRng,
}

impl EventGenerator {
    pub fn new(config: &EnvConfig, seed: u64) -> Result<Self> {
        let kinds = WeightedIndex::new(config.event_probabilities.iter().copied())
            .map_err(|e| Error::InvalidConfig(format!("environment.eventProbabilities cannot be sampled: {}", e)))?;

        Ok(EventGenerator {
            kinds,
            num_services: config.num_services,
            max_agents: config.max_agents,
            demand_min: config.demand_min,
            demand_max: config.demand_max,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn next_event(&mut self, nodes: &[Node], agents: &AgentRegistry) -> Event {
        let kind = EventKind::from_index(self.kinds.sample(&mut self.rng)).unwrap_or(EventKind::NoEvent);

        match kind {
            EventKind::AgentArrival if agents.len() >= self.max_agents => {
                log::trace!("Agent limit of {} reached, arrival converted to no_event.", self.max_agents);
                Event::NoEvent
            }
            EventKind::AgentArrival => {
                let service = self.rng.random_range(0..self.num_services);
                Event::AgentArrival { service, demand: self.draw_demand() }
            }
            EventKind::AgentDeparture => {
                let deployed = agents.deployed_keys();
                Event::AgentDeparture { agent: deployed.choose(&mut self.rng).copied() }
            }
            EventKind::NodeFailure => {
                let active: Vec<usize> = nodes.iter().filter(|n| n.active).map(|n| n.index).collect();
                Event::NodeFailure { node: active.choose(&mut self.rng).copied() }
            }
            EventKind::NodeRecovery => {
                let inactive: Vec<usize> = nodes.iter().filter(|n| !n.active).map(|n| n.index).collect();
                Event::NodeRecovery { node: inactive.choose(&mut self.rng).copied() }
            }
            EventKind::NoEvent => Event::NoEvent,
        }
    }

    fn draw_demand(&mut self) -> f32 {
        if self.demand_max > self.demand_min {
            self.rng.random_range(self.demand_min..=self.demand_max)
        } else {
            self.demand_min
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::environment::agent::Agent;

    fn config_with(probabilities: [f64; EventKind::COUNT]) -> EnvConfig {
        EnvConfig { event_probabilities: probabilities, ..EnvConfig::default() }
    }

    fn nodes(n: usize) -> Vec<Node> {
        (0..n).map(|i| Node::new(i, 5.0)).collect()
    }

    #[test]
    fn same_seed_same_stream() {
        let config = EnvConfig::default();
        let nodes = nodes(3);
        let agents = AgentRegistry::new();
        let mut a = EventGenerator::new(&config, 7).unwrap();
        let mut b = EventGenerator::new(&config, 7).unwrap();

        for _ in 0..50 {
            assert_eq!(a.next_event(&nodes, &agents), b.next_event(&nodes, &agents));
        }
    }

    #[test]
    fn arrival_demand_stays_in_range() {
        let mut config = config_with([1.0, 0.0, 0.0, 0.0, 0.0]);
        config.demand_min = 1.0;
        config.demand_max = 3.0;
        config.node_capacity = 5.0;
        let mut generator = EventGenerator::new(&config, 1).unwrap();
        let nodes = nodes(3);
        let agents = AgentRegistry::new();

        for _ in 0..100 {
            match generator.next_event(&nodes, &agents) {
                Event::AgentArrival { service, demand } => {
                    assert!(service < config.num_services);
                    assert!((1.0..=3.0).contains(&demand), "demand {} out of range", demand);
                }
                other => panic!("expected arrival, got {:?}", other),
            }
        }
    }

    #[test]
    fn departure_without_deployed_agents_has_no_target() {
        let config = config_with([0.0, 1.0, 0.0, 0.0, 0.0]);
        let mut generator = EventGenerator::new(&config, 3).unwrap();
        let event = generator.next_event(&nodes(2), &AgentRegistry::new());
        assert_eq!(event, Event::AgentDeparture { agent: None });
    }

    #[test]
    fn departure_only_targets_deployed_agents() {
        let config = config_with([0.0, 1.0, 0.0, 0.0, 0.0]);
        let mut generator = EventGenerator::new(&config, 3).unwrap();
        let mut agents = AgentRegistry::new();
        agents.insert(Agent::new(0, 1.0));
        let mut deployed = Agent::new(1, 1.0);
        deployed.state = crate::domain::environment::agent::AgentState::Deployed;
        deployed.node = Some(0);
        let deployed_key = agents.insert(deployed);

        for _ in 0..20 {
            assert_eq!(generator.next_event(&nodes(2), &agents), Event::AgentDeparture { agent: Some(deployed_key) });
        }
    }

    #[test]
    fn failure_and_recovery_pick_matching_nodes() {
        let mut cluster = nodes(3);
        cluster[1].fail();

        let mut failures = EventGenerator::new(&config_with([0.0, 0.0, 1.0, 0.0, 0.0]), 11).unwrap();
        let mut recoveries = EventGenerator::new(&config_with([0.0, 0.0, 0.0, 1.0, 0.0]), 11).unwrap();
        let agents = AgentRegistry::new();

        for _ in 0..30 {
            match failures.next_event(&cluster, &agents) {
                Event::NodeFailure { node: Some(node) } => assert_ne!(node, 1),
                other => panic!("unexpected {:?}", other),
            }
            assert_eq!(recoveries.next_event(&cluster, &agents), Event::NodeRecovery { node: Some(1) });
        }
    }

    #[test]
    fn recovery_without_failed_nodes_has_no_target() {
        let mut generator = EventGenerator::new(&config_with([0.0, 0.0, 0.0, 1.0, 0.0]), 5).unwrap();
        assert_eq!(generator.next_event(&nodes(3), &AgentRegistry::new()), Event::NodeRecovery { node: None });
    }

    #[test]
    fn arrivals_stop_at_agent_limit() {
        let mut config = config_with([1.0, 0.0, 0.0, 0.0, 0.0]);
        config.max_agents = 1;
        let mut generator = EventGenerator::new(&config, 5).unwrap();
        let mut agents = AgentRegistry::new();
        agents.insert(Agent::new(0, 1.0));

        assert_eq!(generator.next_event(&nodes(3), &agents), Event::NoEvent);
    }
}
