use std::collections::BTreeSet;

use crate::domain::environment::agent::AgentKey;

/// Slack allowed when comparing summed demands against capacity.
const CAPACITY_EPSILON: f32 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deployment {
    pub agent: AgentKey,
    pub service: usize,
    pub demand: f32,
}

/// Why a node refused a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementFailure {
    NodeInactive,
    CapacityExceeded,
}

/// A compute node. Nodes are never destroyed, only toggled active/inactive.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub index: usize,
    pub active: bool,
    pub capacity: f32,
    deployments: Vec<Deployment>,
}

impl Node {
    pub fn new(index: usize, capacity: f32) -> Self {
        Self { index, active: true, capacity, deployments: Vec::new() }
    }

    /// Aggregate demand of everything deployed here.
    pub fn occupancy(&self) -> f32 {
        self.deployments.iter().map(|d| d.demand).sum()
    }

    /// Occupancy relative to capacity, in [0, 1] while the invariant holds.
    pub fn utilization(&self) -> f32 {
        self.occupancy() / self.capacity
    }

    pub fn num_deployments(&self) -> usize {
        self.deployments.len()
    }

    pub fn deployments(&self) -> &[Deployment] {
        &self.deployments
    }

    /// Distinct service types currently hosted.
    pub fn services(&self) -> BTreeSet<usize> {
        self.deployments.iter().map(|d| d.service).collect()
    }

    pub fn check_placement(&self, demand: f32) -> Result<(), PlacementFailure> {
        if !self.active {
            return Err(PlacementFailure::NodeInactive);
        }
        if self.occupancy() + demand > self.capacity + CAPACITY_EPSILON {
            return Err(PlacementFailure::CapacityExceeded);
        }
        Ok(())
    }

    /// Commits a deployment. Nothing is changed when the placement is illegal.
    pub fn place(&mut self, deployment: Deployment) -> Result<(), PlacementFailure> {
        self.check_placement(deployment.demand)?;
        self.deployments.push(deployment);
        Ok(())
    }

    pub fn release(&mut self, agent: AgentKey) -> Option<Deployment> {
        let position = self.deployments.iter().position(|d| d.agent == agent)?;
        Some(self.deployments.swap_remove(position))
    }

    /// Marks the node failed and evicts everything deployed on it.
    pub fn fail(&mut self) -> Vec<Deployment> {
        self.active = false;
        std::mem::take(&mut self.deployments)
    }

    pub fn recover(&mut self) {
        self.active = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn keys(n: usize) -> Vec<AgentKey> {
        let mut map: SlotMap<AgentKey, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    #[test]
    fn placement_respects_capacity() {
        let keys = keys(3);
        let mut node = Node::new(0, 10.0);

        assert!(node.place(Deployment { agent: keys[0], service: 0, demand: 9.0 }).is_ok());
        assert_eq!(node.place(Deployment { agent: keys[1], service: 1, demand: 5.0 }), Err(PlacementFailure::CapacityExceeded));
        assert!((node.occupancy() - 9.0).abs() < 1e-6);
        assert!(node.place(Deployment { agent: keys[2], service: 1, demand: 1.0 }).is_ok());
        assert!((node.utilization() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn failed_node_refuses_and_evicts() {
        let keys = keys(2);
        let mut node = Node::new(1, 10.0);
        node.place(Deployment { agent: keys[0], service: 0, demand: 2.0 }).unwrap();
        node.place(Deployment { agent: keys[1], service: 3, demand: 2.0 }).unwrap();
        assert_eq!(node.services().len(), 2);

        let evicted = node.fail();

        assert_eq!(evicted.len(), 2);
        assert_eq!(node.occupancy(), 0.0);
        assert_eq!(node.check_placement(1.0), Err(PlacementFailure::NodeInactive));

        node.recover();
        assert!(node.check_placement(1.0).is_ok());
    }
}
