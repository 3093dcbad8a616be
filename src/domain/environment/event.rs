use std::fmt;

use crate::domain::environment::agent::AgentKey;

/// The five kinds of world events, in the order used for observation
/// one-hot slots and for the event probability table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AgentArrival,
    AgentDeparture,
    NodeFailure,
    NodeRecovery,
    NoEvent,
}

impl EventKind {
    pub const COUNT: usize = 5;

    pub const ALL: [EventKind; EventKind::COUNT] =
        [EventKind::AgentArrival, EventKind::AgentDeparture, EventKind::NodeFailure, EventKind::NodeRecovery, EventKind::NoEvent];

    pub fn index(&self) -> usize {
        match self {
            EventKind::AgentArrival => 0,
            EventKind::AgentDeparture => 1,
            EventKind::NodeFailure => 2,
            EventKind::NodeRecovery => 3,
            EventKind::NoEvent => 4,
        }
    }

    pub fn from_index(index: usize) -> Option<EventKind> {
        EventKind::ALL.get(index).copied()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::AgentArrival => "agent_arrival",
            EventKind::AgentDeparture => "agent_departure",
            EventKind::NodeFailure => "node_failure",
            EventKind::NodeRecovery => "node_recovery",
            EventKind::NoEvent => "no_event",
        };
        write!(f, "{}", name)
    }
}

/// A world event with the minimal payload needed to apply it.
///
/// Target selection happens when the event is drawn. A `None` target means
/// the draw found no candidate (e.g. a departure with nobody deployed); the
/// event keeps its kind but has no structural effect.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    AgentArrival { service: usize, demand: f32 },
    AgentDeparture { agent: Option<AgentKey> },
    NodeFailure { node: Option<usize> },
    NodeRecovery { node: Option<usize> },
    NoEvent,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::AgentArrival { .. } => EventKind::AgentArrival,
            Event::AgentDeparture { .. } => EventKind::AgentDeparture,
            Event::NodeFailure { .. } => EventKind::NodeFailure,
            Event::NodeRecovery { .. } => EventKind::NodeRecovery,
            Event::NoEvent => EventKind::NoEvent,
        }
    }

    pub fn is_arrival(&self) -> bool {
        matches!(self, Event::AgentArrival { .. })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::AgentArrival { service, demand } => write!(f, "agent_arrival(service={}, demand={:.2})", service, demand),
            Event::AgentDeparture { agent: Some(agent) } => write!(f, "agent_departure({:?})", agent),
            Event::NodeFailure { node: Some(node) } => write!(f, "node_failure(node={})", node),
            Event::NodeRecovery { node: Some(node) } => write!(f, "node_recovery(node={})", node),
            other => write!(f, "{}", other.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_index_round_trips() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_index(kind.index()), Some(kind));
        }
        assert_eq!(EventKind::from_index(EventKind::COUNT), None);
    }
}
