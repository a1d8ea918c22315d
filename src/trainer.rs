//! Episode loop driving an agent against a playlist environment.
//!
//! Each episode resets the environment, then repeats act → step → remember
//! → replay until the episode is done or the step cap is hit. A failure
//! inside an episode (approximator error, empty action set) aborts only
//! that episode; the run moves on to the next one. The target network is
//! synced every `target_update_interval` episodes, never on episode 0.

use crate::agent::DqnAgent;
use crate::environment::PlaylistEnvironment;
use crate::error::{PlaylistError, Result};
use crate::features::SongProfile;
use crate::network::QFunction;
use crate::replay::Transition;
use crate::reward::statistics::PlaylistMetrics;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub episodes: usize,
    pub batch_size: usize,
    pub target_update_interval: usize,
    /// Stop an episode after this many steps even if not done.
    pub max_steps_per_episode: Option<usize>,
    /// Log a summary every N episodes (0 disables).
    pub log_every: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            episodes: 500,
            batch_size: 32,
            target_update_interval: 10,
            max_steps_per_episode: Some(20),
            log_every: 10,
        }
    }
}

/// Outcome of one episode.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeSummary {
    pub episode: usize,
    pub steps: usize,
    pub total_reward: f64,
    /// Exploration rate at the end of the episode.
    pub epsilon: f64,
    pub memory_len: usize,
    /// Catalog indices in playlist order.
    pub playlist: Vec<usize>,
    pub metrics: PlaylistMetrics,
    pub mean_loss: Option<f64>,
    /// Error message when the episode was cut short by a failure.
    pub aborted: Option<String>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingReport {
    pub episodes: Vec<EpisodeSummary>,
    pub elapsed: Duration,
}

impl TrainingReport {
    pub fn completed(&self) -> usize {
        self.episodes.iter().filter(|e| e.aborted.is_none()).count()
    }

    pub fn aborted(&self) -> usize {
        self.episodes.len() - self.completed()
    }

    pub fn mean_reward(&self) -> f64 {
        if self.episodes.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.episodes.len() as f64;
        self.episodes.iter().map(|e| e.total_reward).sum::<f64>() / n
    }

    pub fn best_episode(&self) -> Option<&EpisodeSummary> {
        self.episodes
            .iter()
            .max_by(|a, b| a.total_reward.total_cmp(&b.total_reward))
    }
}

#[derive(Default)]
struct EpisodeProgress {
    steps: usize,
    total_reward: f64,
    losses: Vec<f64>,
}

pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(PlaylistError::InvalidConfig("batch_size must be positive".to_string()));
        }
        if config.target_update_interval == 0 {
            return Err(PlaylistError::InvalidConfig(
                "target_update_interval must be positive".to_string(),
            ));
        }
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn run<Q: QFunction>(&self, env: &mut PlaylistEnvironment, agent: &mut DqnAgent<Q>) -> TrainingReport {
        self.run_with(env, agent, |_| {})
    }

    /// Train for the configured number of episodes, calling `observer`
    /// after each one.
    pub fn run_with<Q, F>(&self, env: &mut PlaylistEnvironment, agent: &mut DqnAgent<Q>, mut observer: F) -> TrainingReport
    where
        Q: QFunction,
        F: FnMut(&EpisodeSummary),
    {
        let started = Instant::now();
        let mut report = TrainingReport::default();
        info!(
            "Training for {} episodes (batch {}, target sync every {})",
            self.config.episodes, self.config.batch_size, self.config.target_update_interval
        );

        for episode in 0..self.config.episodes {
            let summary = self.run_episode(episode, env, agent);

            if episode > 0 && episode % self.config.target_update_interval == 0 {
                match agent.update_target_model() {
                    Ok(()) => debug!("Target network synced at episode {episode}"),
                    Err(e) => error!("Target network sync failed at episode {episode}: {e}"),
                }
            }

            if self.config.log_every > 0 && episode % self.config.log_every == 0 {
                info!(
                    "Episode {}/{} | steps {} | reward {:.2} | epsilon {:.4} | memory {} | similarity {:.3} | diversity {:.3}",
                    episode + 1,
                    self.config.episodes,
                    summary.steps,
                    summary.total_reward,
                    summary.epsilon,
                    summary.memory_len,
                    summary.metrics.similarity,
                    summary.metrics.diversity
                );
            }

            observer(&summary);
            report.episodes.push(summary);
        }

        report.elapsed = started.elapsed();
        info!(
            "Training finished in {:.1}s: {} completed, {} aborted, mean reward {:.2}",
            report.elapsed.as_secs_f64(),
            report.completed(),
            report.aborted(),
            report.mean_reward()
        );
        report
    }

    /// Play one episode. Never fails; failures are recorded in the summary.
    pub fn run_episode<Q: QFunction>(
        &self,
        episode: usize,
        env: &mut PlaylistEnvironment,
        agent: &mut DqnAgent<Q>,
    ) -> EpisodeSummary {
        let started = Instant::now();
        let mut progress = EpisodeProgress::default();

        let aborted = match self.play(env, agent, &mut progress) {
            Ok(()) => None,
            Err(e) => {
                error!("Episode {episode} aborted after {} steps: {e}", progress.steps);
                Some(e.to_string())
            }
        };

        let profiles: Vec<&SongProfile> = env.playlist().iter().map(|&i| &env.profiles()[i]).collect();
        #[allow(clippy::cast_precision_loss)]
        let mean_loss = (!progress.losses.is_empty())
            .then(|| progress.losses.iter().sum::<f64>() / progress.losses.len() as f64);

        EpisodeSummary {
            episode,
            steps: progress.steps,
            total_reward: progress.total_reward,
            epsilon: agent.epsilon(),
            memory_len: agent.memory_len(),
            playlist: env.playlist().to_vec(),
            metrics: PlaylistMetrics::compute(&profiles),
            mean_loss,
            aborted,
            elapsed: started.elapsed(),
        }
    }

    fn play<Q: QFunction>(
        &self,
        env: &mut PlaylistEnvironment,
        agent: &mut DqnAgent<Q>,
        progress: &mut EpisodeProgress,
    ) -> Result<()> {
        let batch_size = self.config.batch_size;
        let mut state = env.reset()?;

        while !env.is_done() {
            if self.config.max_steps_per_episode.is_some_and(|cap| progress.steps >= cap) {
                break;
            }

            let action = agent.act(&state, env.available())?;
            let step = env.step(action);
            agent.remember(Transition::new(state, action, step.reward, step.state.clone(), step.done));

            progress.steps += 1;
            progress.total_reward += step.reward;
            state = step.state;

            if agent.memory_len() > batch_size {
                if let Some(loss) = agent.replay(batch_size)? {
                    progress.losses.push(loss);
                }
            }
        }
        Ok(())
    }
}
