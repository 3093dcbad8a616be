use crate::domain::environment::event::EventKind;
use crate::domain::environment::node::Node;

/// Builds the flat observation vector.
///
/// Layout (fixed):
/// - one-hot pending event kind (5)
/// - per-node active flag (N)
/// - per-node occupancy / capacity (N)
/// - tracked agents / max agents (1)
pub fn encode(event: EventKind, nodes: &[Node], num_agents: usize, max_agents: usize) -> Vec<f32> {
    let mut obs = Vec::with_capacity(dim(nodes.len()));

    let mut one_hot = [0.0; EventKind::COUNT];
    one_hot[event.index()] = 1.0;
    obs.extend_from_slice(&one_hot);

    obs.extend(nodes.iter().map(|n| if n.active { 1.0 } else { 0.0 }));
    obs.extend(nodes.iter().map(|n| n.utilization()));
    obs.push(num_agents as f32 / max_agents as f32);

    obs
}

pub fn dim(num_nodes: usize) -> usize {
    EventKind::COUNT + 2 * num_nodes + 1
}

/// Offset of the first per-node occupancy slot.
pub fn occupancy_offset(num_nodes: usize) -> usize {
    EventKind::COUNT + num_nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_documentation() {
        let mut nodes: Vec<Node> = (0..3).map(|i| Node::new(i, 10.0)).collect();
        nodes[2].fail();

        let obs = encode(EventKind::NodeFailure, &nodes, 5, 10);

        assert_eq!(obs.len(), dim(3));
        assert_eq!(&obs[..5], &[0.0, 0.0, 1.0, 0.0, 0.0]);
        assert_eq!(&obs[5..8], &[1.0, 1.0, 0.0]);
        assert_eq!(&obs[occupancy_offset(3)..occupancy_offset(3) + 3], &[0.0, 0.0, 0.0]);
        assert_eq!(obs[11], 0.5);
    }
}
