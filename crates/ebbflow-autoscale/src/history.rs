//! Bounded log of scaling actions taken by the control loop.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::recommend::Recommendation;

/// Entries kept before the oldest are dropped.
pub const HISTORY_CAPACITY: usize = 10_000;

/// One applied recommendation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScaleEvent {
    /// Unix timestamp (seconds) of the tick that produced it.
    pub at: u64,
    #[serde(flatten)]
    pub recommendation: Recommendation,
}

#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct ScaleHistory {
    events: VecDeque<ScaleEvent>,
    #[serde(skip)]
    capacity: usize,
}

impl Default for ScaleHistory {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

impl ScaleHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity,
        }
    }

    /// Append `recommendation`, evicting the oldest entry when full.
    pub fn record(&mut self, recommendation: Recommendation) {
        if self.capacity == 0 {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(ScaleEvent {
            at: epoch_secs(),
            recommendation,
        });
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last(&self) -> Option<&ScaleEvent> {
        self.events.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScaleEvent> {
        self.events.iter()
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
