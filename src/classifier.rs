use crate::pcf::{QueueSnapshot, UseQueuePolicy};
use serde::Serialize;
use std::fmt;

/// Cluster workload priority advertised by an inactive queue.
pub const INACTIVE_PRIORITY: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum QueueActivityState {
    Active,
    Inactive,
    BecomingActive,
    BecomingInactive,
}

impl QueueActivityState {
    /// Classifies a queue from its consumer count and advertised priority.
    pub fn classify(open_input_count: i32, priority: i32) -> Self {
        match (open_input_count > 0, priority > INACTIVE_PRIORITY) {
            (true, true) => QueueActivityState::Active,
            (false, false) => QueueActivityState::Inactive,
            (true, false) => QueueActivityState::BecomingActive,
            (false, true) => QueueActivityState::BecomingInactive,
        }
    }

    /// Whether the queue has consumers, regardless of what it advertises.
    pub fn is_effectively_active(self) -> bool {
        matches!(
            self,
            QueueActivityState::Active | QueueActivityState::BecomingActive
        )
    }

    pub fn is_transition(self) -> bool {
        matches!(
            self,
            QueueActivityState::BecomingActive | QueueActivityState::BecomingInactive
        )
    }
}

impl fmt::Display for QueueActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QueueActivityState::Active => "ACTIVE",
            QueueActivityState::Inactive => "INACTIVE",
            QueueActivityState::BecomingActive => "BECOMING_ACTIVE",
            QueueActivityState::BecomingInactive => "BECOMING_INACTIVE",
        };
        f.write_str(label)
    }
}

/// Target attribute values for a queue; `None` leaves an attribute unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigurationDelta {
    pub priority: Option<i32>,
    pub use_queue: Option<UseQueuePolicy>,
}

impl ConfigurationDelta {
    pub fn is_empty(&self) -> bool {
        self.priority.is_none() && self.use_queue.is_none()
    }
}

impl fmt::Display for ConfigurationDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(priority) = self.priority {
            parts.push(format!("CLWLPRTY({})", priority));
        }
        if let Some(policy) = self.use_queue {
            parts.push(format!("CLWLUSEQ({})", policy));
        }
        if parts.is_empty() {
            f.write_str("no change")
        } else {
            f.write_str(&parts.join(" "))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierPolicy {
    pub active_priority: i32,
    pub switch_use_queue: bool,
    /// Policy restored while the queue has consumers.
    pub preferred_use_queue: UseQueuePolicy,
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self {
            active_priority: 1,
            switch_use_queue: false,
            preferred_use_queue: UseQueuePolicy::Local,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub state: QueueActivityState,
    pub delta: ConfigurationDelta,
}

/// Works out the state of a queue and the changes needed to advertise it
/// correctly.
pub fn plan(snapshot: &QueueSnapshot, policy: &ClassifierPolicy) -> Classification {
    let state = QueueActivityState::classify(snapshot.open_input_count, snapshot.priority);

    let priority = match state {
        QueueActivityState::BecomingActive => Some(policy.active_priority),
        QueueActivityState::BecomingInactive => Some(INACTIVE_PRIORITY),
        QueueActivityState::Active | QueueActivityState::Inactive => None,
    };

    // A previous pass may have left the policy switched, so this is checked
    // on every poll and not only on transitions.
    let use_queue = if policy.switch_use_queue {
        let target = if state.is_effectively_active() {
            policy.preferred_use_queue
        } else {
            UseQueuePolicy::Any
        };
        (snapshot.use_queue != Some(target)).then_some(target)
    } else {
        None
    };

    Classification {
        state,
        delta: ConfigurationDelta {
            priority,
            use_queue,
        },
    }
}
