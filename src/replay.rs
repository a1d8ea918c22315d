//! Experience replay memory.

use ndarray::Array1;
use rand::seq::index;
use rand::Rng;
use std::collections::VecDeque;

/// One environment step: (s, a, r, s', done).
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: Array1<f64>,
    pub action: usize,
    pub reward: f64,
    pub next_state: Array1<f64>,
    pub done: bool,
}

impl Transition {
    pub fn new(state: Array1<f64>, action: usize, reward: f64, next_state: Array1<f64>, done: bool) -> Self {
        Self {
            state,
            action,
            reward,
            next_state,
            done,
        }
    }
}

/// Transitions in insertion order; the oldest is evicted once a capacity
/// is set and reached. Never deduplicated.
#[derive(Debug, Clone, Default)]
pub struct ReplayMemory {
    buffer: VecDeque<Transition>,
    capacity: Option<usize>,
}

impl ReplayMemory {
    /// Unbounded memory.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.min(1 << 16)),
            capacity: Some(capacity.max(1)),
        }
    }

    pub fn push(&mut self, transition: Transition) {
        if let Some(capacity) = self.capacity {
            while self.buffer.len() >= capacity {
                self.buffer.pop_front();
            }
        }
        self.buffer.push_back(transition);
    }

    /// `batch_size` distinct transitions drawn uniformly without
    /// replacement; fewer if the memory is smaller.
    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Vec<&Transition> {
        let amount = batch_size.min(self.buffer.len());
        index::sample(rng, self.buffer.len(), amount)
            .into_iter()
            .map(|i| &self.buffer[i])
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.buffer.iter()
    }
}
