use slotmap::{SlotMap, new_key_type};

new_key_type! {
    pub struct AgentKey;
}

/// Lifecycle of an agent requesting a service deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Arrived, waiting for the placement decision of the current step.
    Pending,
    /// Placed on a node and counted in its occupancy.
    Deployed,
    /// Explicitly rejected or failed placement.
    Rejected,
    /// Left the system, either on its own or because its node failed.
    Departed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub service: usize,
    /// Throughput demand placed on the hosting node.
    pub demand: f32,
    pub node: Option<usize>,
    pub state: AgentState,
}

impl Agent {
    pub fn new(service: usize, demand: f32) -> Self {
        Self { service, demand, node: None, state: AgentState::Pending }
    }

    pub fn is_deployed(&self) -> bool {
        self.state == AgentState::Deployed
    }
}

/// Tracks all agents that currently hold a deployment (or await one).
///
/// Rejected and departed agents are removed; `remove` hands the final
/// record back to the caller.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: SlotMap<AgentKey, Agent>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self { agents: SlotMap::with_key() }
    }

    pub fn insert(&mut self, agent: Agent) -> AgentKey {
        self.agents.insert(agent)
    }

    pub fn get(&self, key: AgentKey) -> Option<&Agent> {
        self.agents.get(key)
    }

    pub fn get_mut(&mut self, key: AgentKey) -> Option<&mut Agent> {
        self.agents.get_mut(key)
    }

    pub fn remove(&mut self, key: AgentKey) -> Option<Agent> {
        self.agents.remove(key)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn clear(&mut self) {
        self.agents.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (AgentKey, &Agent)> {
        self.agents.iter()
    }

    /// Keys of deployed agents in a stable (slot) order.
    pub fn deployed_keys(&self) -> Vec<AgentKey> {
        self.agents.iter().filter(|(_, agent)| agent.is_deployed()).map(|(key, _)| key).collect()
    }

    pub fn deployed_on(&self, node: usize) -> Vec<AgentKey> {
        self.agents.iter().filter(|(_, agent)| agent.is_deployed() && agent.node == Some(node)).map(|(key, _)| key).collect()
    }
}
