use std::fmt;

use crate::domain::config::EnvConfig;
use crate::domain::environment::agent::{Agent, AgentKey, AgentRegistry, AgentState};
use crate::domain::environment::event::Event;
use crate::domain::environment::event_generator::EventGenerator;
use crate::domain::environment::node::{Deployment, Node, PlacementFailure};
use crate::domain::environment::observation;
use crate::domain::environment::reward::{self, RewardBreakdown};
use crate::error::Result;

/// What became of the placement decision in one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeploymentOutcome {
    Deployed { node: usize },
    /// Explicit reject, or a node index outside the cluster.
    Rejected,
    Failed { node: usize, reason: PlacementFailure },
    /// The step's event was not an arrival; the action was ignored.
    NotApplicable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    StepBudget,
    TooManyFailures,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepInfo {
    /// The event applied in this step.
    pub event: Event,
    pub outcome: DeploymentOutcome,
    pub reward: RewardBreakdown,
    pub failed_node: Option<usize>,
    pub recovered_node: Option<usize>,
    pub departed: Option<Agent>,
    /// Agents lost because their node failed.
    pub evicted: Vec<Agent>,
    pub step: usize,
    pub termination: Option<TerminationReason>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub observation: Vec<f32>,
    pub reward: f32,
    pub done: bool,
    pub info: StepInfo,
}

/// Event-driven service allocation environment.
///
/// Each observation shows the *pending* event; the next `step` applies that
/// event, resolves the action against it, scores the outcome and draws the
/// following event.
#[derive(Debug, Clone)]
pub struct AllocationEnv {
    config: EnvConfig,
    nodes: Vec<Node>,
    agents: AgentRegistry,
    generator: EventGenerator,
    pending_event: Event,
    steps: usize,
    done: bool,
}

impl AllocationEnv {
    pub fn new(config: EnvConfig, seed: u64) -> Result<Self> {
        let generator = EventGenerator::new(&config, seed)?;
        let nodes = Self::fresh_nodes(&config);

        let mut env = AllocationEnv { config, nodes, agents: AgentRegistry::new(), generator, pending_event: Event::NoEvent, steps: 0, done: false };
        env.reset();
        Ok(env)
    }

    fn fresh_nodes(config: &EnvConfig) -> Vec<Node> {
        (0..config.num_nodes).map(|i| Node::new(i, config.node_capacity)).collect()
    }

    /// Starts a new episode and returns its first observation.
    pub fn reset(&mut self) -> Vec<f32> {
        self.nodes = Self::fresh_nodes(&self.config);
        self.agents.clear();
        self.steps = 0;
        self.done = false;
        self.pending_event = self.generator.next_event(&self.nodes, &self.agents);
        self.observation()
    }

    /// Like [`AllocationEnv::reset`], but restarts the event stream from `seed`.
    pub fn reset_with_seed(&mut self, seed: u64) -> Vec<f32> {
        self.generator.reseed(seed);
        self.reset()
    }

    /// Replaces the pending event, then steps.
    pub fn step_with_event(&mut self, event: Event, action: usize) -> StepResult {
        if !self.done {
            self.pending_event = event;
        }
        self.step(action)
    }

    pub fn step(&mut self, action: usize) -> StepResult {
        if self.done {
            log::warn!("step() called on a finished episode; call reset() first.");
            return self.terminal_result();
        }

        let mut event = std::mem::replace(&mut self.pending_event, Event::NoEvent);
        if matches!(event, Event::AgentArrival { .. }) && self.agents.len() >= self.config.max_agents {
            log::debug!("Agent limit of {} reached, arrival converted to no_event.", self.config.max_agents);
            event = Event::NoEvent;
        }
        let mut info = StepInfo {
            event: event.clone(),
            outcome: DeploymentOutcome::NotApplicable,
            reward: RewardBreakdown::default(),
            failed_node: None,
            recovered_node: None,
            departed: None,
            evicted: Vec::new(),
            step: self.steps,
            termination: None,
        };

        match event {
            Event::AgentArrival { service, demand } => {
                let key = self.agents.insert(Agent::new(service, demand));
                info.outcome = self.resolve_arrival(key, action);
                info.reward.deployment = match info.outcome {
                    DeploymentOutcome::Deployed { .. } => reward::DEPLOYMENT_SUCCESS,
                    DeploymentOutcome::Rejected => reward::REJECTION,
                    DeploymentOutcome::Failed { .. } => reward::DEPLOYMENT_FAILURE,
                    DeploymentOutcome::NotApplicable => reward::NEUTRAL,
                };
            }
            Event::AgentDeparture { agent: Some(key) } => {
                info.departed = self.depart(key);
            }
            Event::NodeFailure { node: Some(index) } => {
                if let Some(evicted) = self.fail_node(index) {
                    info.reward.failure_penalty = RewardBreakdown::failure(evicted.len());
                    info.failed_node = Some(index);
                    info.evicted = evicted;
                }
            }
            Event::NodeRecovery { node: Some(index) } => {
                if let Some(node) = self.nodes.get_mut(index).filter(|n| !n.active) {
                    node.recover();
                    info.recovered_node = Some(index);
                    log::debug!("Node {} recovered.", index);
                }
            }
            _ => {}
        }

        self.steps += 1;
        info.termination = self.check_termination();
        self.done = info.termination.is_some();

        if !self.done {
            self.pending_event = self.generator.next_event(&self.nodes, &self.agents);
        }

        log::trace!("Step {}: {} -> {:?}, reward {:.2}", info.step, info.event, info.outcome, info.reward.total());

        StepResult { observation: self.observation(), reward: info.reward.total(), done: self.done, info }
    }

    fn resolve_arrival(&mut self, key: AgentKey, action: usize) -> DeploymentOutcome {
        if action >= self.config.num_nodes {
            if action > self.config.reject_action() {
                log::debug!("Action {} is outside the action space; treating it as a reject.", action);
            }
            self.drop_agent(key, AgentState::Rejected);
            return DeploymentOutcome::Rejected;
        }

        let Some(agent) = self.agents.get(key) else {
            return DeploymentOutcome::NotApplicable;
        };
        let deployment = Deployment { agent: key, service: agent.service, demand: agent.demand };

        match self.nodes[action].place(deployment) {
            Ok(()) => {
                if let Some(agent) = self.agents.get_mut(key) {
                    agent.node = Some(action);
                    agent.state = AgentState::Deployed;
                }
                DeploymentOutcome::Deployed { node: action }
            }
            Err(reason) => {
                log::debug!("Deployment of demand {:.2} on node {} failed: {:?}", deployment.demand, action, reason);
                self.drop_agent(key, AgentState::Rejected);
                DeploymentOutcome::Failed { node: action, reason }
            }
        }
    }

    fn drop_agent(&mut self, key: AgentKey, state: AgentState) -> Option<Agent> {
        let mut agent = self.agents.remove(key)?;
        agent.state = state;
        agent.node = None;
        Some(agent)
    }

    fn depart(&mut self, key: AgentKey) -> Option<Agent> {
        let node = self.agents.get(key).filter(|a| a.is_deployed())?.node;
        if let Some(node) = node.and_then(|index| self.nodes.get_mut(index)) {
            node.release(key);
        }
        self.drop_agent(key, AgentState::Departed)
    }

    /// Returns `None` when the node does not exist or is already down.
    fn fail_node(&mut self, index: usize) -> Option<Vec<Agent>> {
        let node = self.nodes.get_mut(index).filter(|n| n.active)?;
        let evicted: Vec<Agent> = node.fail().into_iter().filter_map(|d| self.drop_agent(d.agent, AgentState::Departed)).collect();

        log::debug!("Node {} failed, {} services lost.", index, evicted.len());
        Some(evicted)
    }

    fn check_termination(&self) -> Option<TerminationReason> {
        if let Some(limit) = self.config.max_concurrent_failures {
            if self.num_failed_nodes() >= limit {
                return Some(TerminationReason::TooManyFailures);
            }
        }
        if self.steps >= self.config.max_episode_steps {
            return Some(TerminationReason::StepBudget);
        }
        None
    }

    fn terminal_result(&self) -> StepResult {
        let info = StepInfo {
            event: Event::NoEvent,
            outcome: DeploymentOutcome::NotApplicable,
            reward: RewardBreakdown::default(),
            failed_node: None,
            recovered_node: None,
            departed: None,
            evicted: Vec::new(),
            step: self.steps,
            termination: self.check_termination(),
        };
        StepResult { observation: self.observation(), reward: reward::NEUTRAL, done: true, info }
    }

    pub fn observation(&self) -> Vec<f32> {
        observation::encode(self.pending_event.kind(), &self.nodes, self.agents.len(), self.config.max_agents)
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn pending_event(&self) -> &Event {
        &self.pending_event
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn num_failed_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| !n.active).count()
    }

    pub fn observation_dim(&self) -> usize {
        observation::dim(self.config.num_nodes)
    }

    pub fn num_actions(&self) -> usize {
        self.config.num_actions()
    }
}

impl fmt::Display for AllocationEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Step: {}", self.steps)?;
        writeln!(f, "Pending event: {}", self.pending_event)?;
        writeln!(f, "Tracked agents: {}/{}", self.agents.len(), self.config.max_agents)?;
        for node in &self.nodes {
            writeln!(
                f,
                "  node {} [{}] occupancy {:.2}/{:.2} services {:?}",
                node.index,
                if node.active { "up" } else { "down" },
                node.occupancy(),
                node.capacity,
                node.services()
            )?;
        }
        write!(f, "{}", "-".repeat(50))
    }
}
