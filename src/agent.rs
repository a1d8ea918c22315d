//! Deep Q-Network agent.
//!
//! Owns the online and target approximators, the replay memory and the
//! exploration rate. Action selection is always restricted to the
//! environment's available set; the agent never proposes a song that is
//! already in the playlist.
//!
//! ## Learning update
//!
//! For a sampled transition `(s, a, r, s', done)` the online network is
//! pulled toward
//!
//! ```text
//! target[a] = r                                   if done
//! target[a] = r + gamma * max_a' Q_target(s')[a'] otherwise
//! ```
//!
//! with every other action's target equal to the online prediction. After
//! each update `epsilon = max(epsilon_min, epsilon * epsilon_decay)`.
//! The target network is only refreshed by [`DqnAgent::update_target_model`],
//! which the training driver schedules.

use crate::actions::ActionSet;
use crate::error::{PlaylistError, Result};
use crate::network::{MlpQNetwork, QFunction};
use crate::replay::{ReplayMemory, Transition};
use log::{debug, trace};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub gamma: f64,
    pub epsilon_start: f64,
    pub epsilon_min: f64,
    pub epsilon_decay: f64,
    pub learning_rate: f64,
    pub hidden_layers: Vec<usize>,
    /// Unbounded when absent.
    pub memory_capacity: Option<usize>,
    pub seed: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            epsilon_start: 1.0,
            epsilon_min: 0.01,
            epsilon_decay: 0.995,
            learning_rate: 0.001,
            hidden_layers: vec![256, 128, 64],
            memory_capacity: Some(100_000),
            seed: None,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(PlaylistError::InvalidConfig(msg.to_string()));

        if !(0.0..=1.0).contains(&self.gamma) {
            return fail("gamma must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.epsilon_start) || !(0.0..=1.0).contains(&self.epsilon_min) {
            return fail("epsilon values must be within [0, 1]");
        }
        if self.epsilon_min > self.epsilon_start {
            return fail("epsilon_min must not exceed epsilon_start");
        }
        if !(self.epsilon_decay > 0.0 && self.epsilon_decay <= 1.0) {
            return fail("epsilon_decay must be within (0, 1]");
        }
        Ok(())
    }
}

pub struct DqnAgent<Q: QFunction = MlpQNetwork> {
    online: Q,
    target: Q,
    memory: ReplayMemory,
    config: AgentConfig,
    epsilon: f64,
    rng: StdRng,
    loss_history: Vec<f64>,
}

impl DqnAgent<MlpQNetwork> {
    /// Agent with freshly initialised MLP networks (target synced to online).
    pub fn new(state_size: usize, action_size: usize, config: AgentConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = rng_from(config.seed);
        let online = MlpQNetwork::new(
            state_size,
            action_size,
            &config.hidden_layers,
            config.learning_rate,
            &mut rng,
        )?;
        let target = online.clone();
        Self::from_parts(online, target, config, rng)
    }
}

impl<Q: QFunction> DqnAgent<Q> {
    /// Agent over caller-supplied approximators of identical shape.
    pub fn with_networks(online: Q, target: Q, config: AgentConfig) -> Result<Self> {
        config.validate()?;
        let rng = rng_from(config.seed);
        Self::from_parts(online, target, config, rng)
    }

    fn from_parts(online: Q, mut target: Q, config: AgentConfig, rng: StdRng) -> Result<Self> {
        if online.state_size() != target.state_size() || online.action_size() != target.action_size() {
            return Err(PlaylistError::ShapeMismatch {
                expected: format!("{} -> {}", online.state_size(), online.action_size()),
                found: format!("{} -> {}", target.state_size(), target.action_size()),
            });
        }
        target.copy_from(&online)?;

        let memory = config
            .memory_capacity
            .map_or_else(ReplayMemory::new, ReplayMemory::with_capacity);

        debug!(
            "DQN agent: {} -> {} actions, gamma {}, epsilon {} -> {} (decay {})",
            online.state_size(),
            online.action_size(),
            config.gamma,
            config.epsilon_start,
            config.epsilon_min,
            config.epsilon_decay
        );

        Ok(Self {
            online,
            target,
            memory,
            epsilon: config.epsilon_start,
            config,
            rng,
            loss_history: Vec::new(),
        })
    }

    /// Epsilon-greedy choice among `available`.
    ///
    /// # Errors
    ///
    /// [`PlaylistError::NoAvailableActions`] for an empty set, or an
    /// approximator failure on the greedy branch.
    pub fn act(&mut self, state: &Array1<f64>, available: &ActionSet) -> Result<usize> {
        if available.is_empty() {
            return Err(PlaylistError::NoAvailableActions);
        }
        if self.rng.gen::<f64>() < self.epsilon {
            return available.choose(&mut self.rng).ok_or(PlaylistError::NoAvailableActions);
        }
        self.act_greedy(state, available)
    }

    /// Highest-valued available action; ties go to the lower index.
    pub fn act_greedy(&self, state: &Array1<f64>, available: &ActionSet) -> Result<usize> {
        let values = self.online.predict(state.view().insert_axis(Axis(0)))?;
        let row = values.row(0);

        let mut best: Option<(usize, f64)> = None;
        for action in available.iter() {
            let Some(&value) = row.get(action) else {
                return Err(PlaylistError::ShapeMismatch {
                    expected: format!("at least {} action values", action + 1),
                    found: format!("{}", row.len()),
                });
            };
            let better = match best {
                None => true,
                Some((best_action, best_value)) => value > best_value || (value == best_value && action < best_action),
            };
            if better {
                best = Some((action, value));
            }
        }

        best.map(|(action, _)| action).ok_or(PlaylistError::NoAvailableActions)
    }

    pub fn remember(&mut self, transition: Transition) {
        self.memory.push(transition);
    }

    /// One learning update on a uniformly sampled minibatch.
    ///
    /// Returns `Ok(None)` without touching anything when the memory holds
    /// fewer than `batch_size` transitions.
    pub fn replay(&mut self, batch_size: usize) -> Result<Option<f64>> {
        if batch_size == 0 || self.memory.len() < batch_size {
            return Ok(None);
        }

        let state_size = self.online.state_size();
        let action_size = self.online.action_size();
        let batch = self.memory.sample(batch_size, &mut self.rng);

        let mut states = Array2::<f64>::zeros((batch.len(), state_size));
        let mut next_states = Array2::<f64>::zeros((batch.len(), state_size));
        for (i, transition) in batch.iter().enumerate() {
            if transition.state.len() != state_size || transition.next_state.len() != state_size {
                return Err(PlaylistError::ShapeMismatch {
                    expected: format!("state of length {state_size}"),
                    found: format!("{} / {}", transition.state.len(), transition.next_state.len()),
                });
            }
            if transition.action >= action_size {
                return Err(PlaylistError::ShapeMismatch {
                    expected: format!("action < {action_size}"),
                    found: transition.action.to_string(),
                });
            }
            states.row_mut(i).assign(&transition.state);
            next_states.row_mut(i).assign(&transition.next_state);
        }

        let mut targets = self.online.predict(states.view())?;
        let next_values = self.target.predict(next_states.view())?;

        for (i, transition) in batch.iter().enumerate() {
            let td_target = if transition.done {
                transition.reward
            } else {
                let best_next = next_values
                    .row(i)
                    .iter()
                    .copied()
                    .fold(f64::NEG_INFINITY, f64::max);
                transition.reward + self.config.gamma * best_next
            };
            targets[[i, transition.action]] = td_target;
        }

        let loss = self.online.fit(states.view(), targets.view())?;
        self.loss_history.push(loss);
        self.epsilon = (self.epsilon * self.config.epsilon_decay).max(self.config.epsilon_min);

        trace!("Replay on {} transitions: loss {loss:.5}, epsilon {:.4}", batch.len(), self.epsilon);
        Ok(Some(loss))
    }

    /// Copy online parameters into the target network verbatim.
    pub fn update_target_model(&mut self) -> Result<()> {
        self.target.copy_from(&self.online)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.online.save(path)
    }

    /// Load online parameters and sync the target. On failure the agent
    /// keeps its previous parameters.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        self.online.load(path)?;
        self.target.copy_from(&self.online)
    }

    #[must_use]
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Clamped to `[0, 1]`.
    pub fn set_epsilon(&mut self, epsilon: f64) {
        self.epsilon = epsilon.clamp(0.0, 1.0);
    }

    #[must_use]
    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    #[must_use]
    pub fn loss_history(&self) -> &[f64] {
        &self.loss_history
    }

    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    #[must_use]
    pub fn online(&self) -> &Q {
        &self.online
    }

    #[must_use]
    pub fn target(&self) -> &Q {
        &self.target
    }
}

fn rng_from(seed: Option<u64>) -> StdRng {
    seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, ArrayView2};

    /// Fixed per-action values; records the last fit targets.
    #[derive(Debug, Clone)]
    struct TableQ {
        values: Array1<f64>,
        last_targets: Option<Array2<f64>>,
    }

    impl QFunction for TableQ {
        fn state_size(&self) -> usize {
            2
        }

        fn action_size(&self) -> usize {
            self.values.len()
        }

        fn predict(&self, states: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
            let rows = states.nrows();
            Ok(Array2::from_shape_fn((rows, self.values.len()), |(_, a)| self.values[a]))
        }

        fn fit(&mut self, _states: ArrayView2<'_, f64>, targets: ArrayView2<'_, f64>) -> Result<f64> {
            self.last_targets = Some(targets.to_owned());
            Ok(0.5)
        }

        fn copy_from(&mut self, other: &Self) -> Result<()> {
            self.values = other.values.clone();
            Ok(())
        }

        fn save(&self, path: &Path) -> Result<()> {
            Err(PlaylistError::Persistence {
                path: path.to_path_buf(),
                reason: "read-only".to_string(),
            })
        }

        fn load(&mut self, path: &Path) -> Result<()> {
            self.save(path)
        }
    }

    fn table(values: Array1<f64>) -> TableQ {
        TableQ { values, last_targets: None }
    }

    fn config(seed: u64) -> AgentConfig {
        AgentConfig {
            hidden_layers: vec![8],
            seed: Some(seed),
            ..Default::default()
        }
    }

    fn transition(action: usize, reward: f64, done: bool) -> Transition {
        Transition::new(array![0.1, 0.2], action, reward, array![0.3, 0.4], done)
    }

    #[test]
    fn test_act_only_returns_available_actions() {
        let mut agent = DqnAgent::new(2, 6, config(1)).unwrap();
        let mut available = ActionSet::full(6);
        available.remove(0);
        available.remove(3);
        let state = array![0.5, -0.5];

        for epsilon in [0.0, 0.5, 1.0] {
            agent.set_epsilon(epsilon);
            for _ in 0..100 {
                assert!(available.contains(agent.act(&state, &available).unwrap()));
            }
        }
    }

    #[test]
    fn test_greedy_masks_unavailable_best_action() {
        let online = table(array![0.0, 9.0, 3.0, 3.0]);
        let target = table(array![0.0, 0.0, 0.0, 0.0]);
        let mut agent = DqnAgent::with_networks(online, target, config(2)).unwrap();
        agent.set_epsilon(0.0);

        let mut available = ActionSet::full(4);
        assert_eq!(agent.act(&array![0.0, 0.0], &available).unwrap(), 1);

        available.remove(1);
        // 2 and 3 tie; lower index wins
        for _ in 0..10 {
            assert_eq!(agent.act(&array![0.0, 0.0], &available).unwrap(), 2);
        }
    }

    #[test]
    fn test_act_on_empty_set_is_error() {
        let mut agent = DqnAgent::new(2, 3, config(3)).unwrap();
        let result = agent.act(&array![0.0, 0.0], &ActionSet::empty(3));
        assert!(matches!(result, Err(PlaylistError::NoAvailableActions)));
    }

    #[test]
    fn test_replay_is_noop_below_batch_size() {
        let mut agent = DqnAgent::new(2, 3, config(4)).unwrap();
        agent.remember(transition(0, 1.0, false));

        assert_eq!(agent.replay(2).unwrap(), None);
        assert_eq!(agent.epsilon(), 1.0);
        assert!(agent.loss_history().is_empty());
    }

    #[test]
    fn test_epsilon_decay_after_n_replays() {
        let mut agent = DqnAgent::new(2, 3, config(5)).unwrap();
        for i in 0..4 {
            agent.remember(transition(i % 3, 1.0, i == 3));
        }

        let n = 50;
        for _ in 0..n {
            assert!(agent.replay(4).unwrap().is_some());
        }
        let expected = (1.0_f64 * 0.995_f64.powi(n)).max(0.01);
        assert!((agent.epsilon() - expected).abs() < 1e-9);
        assert_eq!(agent.loss_history().len(), 50);
    }

    #[test]
    fn test_epsilon_floors_at_minimum() {
        let cfg = AgentConfig {
            epsilon_decay: 0.5,
            epsilon_min: 0.1,
            ..config(6)
        };
        let mut agent = DqnAgent::new(2, 3, cfg).unwrap();
        agent.remember(transition(1, 0.0, true));
        for _ in 0..20 {
            agent.replay(1).unwrap();
        }
        assert_eq!(agent.epsilon(), 0.1);
    }

    #[test]
    fn test_td_targets() {
        let online = table(array![1.0, 2.0, 3.0]);
        let target = table(array![0.0, 0.0, 0.0]);
        let mut agent = DqnAgent::with_networks(online, target, config(7)).unwrap();

        // with_networks syncs target to online: max next value is 3.0
        agent.remember(transition(0, 2.0, false));
        agent.replay(1).unwrap();
        let targets = agent.online().last_targets.clone().unwrap();
        assert!((targets[[0, 0]] - (2.0 + 0.99 * 3.0)).abs() < 1e-12);
        assert_eq!(targets[[0, 1]], 2.0);
        assert_eq!(targets[[0, 2]], 3.0);
    }

    #[test]
    fn test_terminal_td_target_is_reward() {
        let mut agent =
            DqnAgent::with_networks(table(array![5.0, 5.0]), table(array![5.0, 5.0]), config(8)).unwrap();
        agent.remember(transition(1, -10.0, true));
        agent.replay(1).unwrap();

        let targets = agent.online().last_targets.clone().unwrap();
        assert_eq!(targets[[0, 1]], -10.0);
    }

    #[test]
    fn test_target_sync_gives_identical_outputs() {
        let mut agent = DqnAgent::new(2, 3, config(9)).unwrap();
        for i in 0..8_usize {
            agent.remember(transition(i % 3, i as f64, false));
        }
        for _ in 0..5 {
            agent.replay(8).unwrap();
        }

        let state = array![[0.7, -0.1]];
        assert_ne!(
            agent.online().predict(state.view()).unwrap(),
            agent.target().predict(state.view()).unwrap()
        );
        agent.update_target_model().unwrap();
        assert_eq!(
            agent.online().predict(state.view()).unwrap(),
            agent.target().predict(state.view()).unwrap()
        );
    }

    #[test]
    fn test_replay_rejects_malformed_transition() {
        let mut agent = DqnAgent::new(2, 3, config(10)).unwrap();
        agent.remember(Transition::new(array![1.0], 0, 0.0, array![1.0], false));
        let err = agent.replay(1).unwrap_err();
        assert!(err.is_approximator_failure());
    }

    #[test]
    fn test_save_load_syncs_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dqn.json");

        let trained = DqnAgent::new(2, 3, config(11)).unwrap();
        trained.save(&path).unwrap();

        let mut fresh = DqnAgent::new(2, 3, config(12)).unwrap();
        fresh.load(&path).unwrap();
        let state = array![[0.2, 0.9]];
        let expected = trained.online().predict(state.view()).unwrap();
        assert_eq!(fresh.online().predict(state.view()).unwrap(), expected);
        assert_eq!(fresh.target().predict(state.view()).unwrap(), expected);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cfg = AgentConfig {
            epsilon_min: 0.5,
            epsilon_start: 0.1,
            ..Default::default()
        };
        assert!(matches!(DqnAgent::new(2, 2, cfg), Err(PlaylistError::InvalidConfig(_))));
    }
}
