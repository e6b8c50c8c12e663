use maestro_core::{MaestroError, MaestroResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How a non-improving neighbour is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptancePolicy {
    /// Only strictly better candidates are accepted.
    Strict,
    /// Worse candidates are accepted with probability `exp(-delta / T)`.
    Boltzmann,
    /// Boltzmann acceptance at an effective temperature raised by the
    /// convergence estimate (`stagnation / reheat_after`), so a stalled
    /// search explores more before the next reheat.
    Adaptive,
}

/// Tunables for [`Annealer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnealingConfig {
    #[serde(default = "default_initial_temperature")]
    pub initial_temperature: f64,
    #[serde(default = "default_min_temperature")]
    pub min_temperature: f64,
    /// Geometric cooling factor applied every iteration, in (0, 1).
    #[serde(default = "default_cooling_rate")]
    pub cooling_rate: f64,
    /// The search stops once the current energy reaches this value.
    #[serde(default)]
    pub target_energy: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
    /// Non-improving iterations tolerated before reheating.
    #[serde(default = "default_reheat_after")]
    pub reheat_after: u64,
    #[serde(default = "default_reheat_factor")]
    pub reheat_factor: f64,
    /// Reheating never pushes the temperature above this cap.
    #[serde(default = "default_max_temperature")]
    pub max_temperature: f64,
    #[serde(default = "default_policy")]
    pub policy: AcceptancePolicy,
}

fn default_initial_temperature() -> f64 {
    100.0
}
fn default_min_temperature() -> f64 {
    0.01
}
fn default_cooling_rate() -> f64 {
    0.95
}
fn default_max_iterations() -> u64 {
    10_000
}
fn default_reheat_after() -> u64 {
    50
}
fn default_reheat_factor() -> f64 {
    2.0
}
fn default_max_temperature() -> f64 {
    200.0
}
fn default_policy() -> AcceptancePolicy {
    AcceptancePolicy::Boltzmann
}

impl Default for AnnealingConfig {
    fn default() -> Self {
        Self {
            initial_temperature: default_initial_temperature(),
            min_temperature: default_min_temperature(),
            cooling_rate: default_cooling_rate(),
            target_energy: 0.0,
            max_iterations: default_max_iterations(),
            reheat_after: default_reheat_after(),
            reheat_factor: default_reheat_factor(),
            max_temperature: default_max_temperature(),
            policy: default_policy(),
        }
    }
}

impl AnnealingConfig {
    pub fn validate(&self) -> MaestroResult<()> {
        if !(self.cooling_rate > 0.0 && self.cooling_rate < 1.0) {
            return Err(MaestroError::Config(format!(
                "cooling_rate must be in (0, 1), got {}",
                self.cooling_rate
            )));
        }
        if self.min_temperature <= 0.0 || self.initial_temperature <= self.min_temperature {
            return Err(MaestroError::Config(
                "temperatures must satisfy 0 < min_temperature < initial_temperature".into(),
            ));
        }
        if self.max_temperature < self.initial_temperature {
            return Err(MaestroError::Config(
                "max_temperature must be >= initial_temperature".into(),
            ));
        }
        if self.reheat_after == 0 || self.reheat_factor <= 1.0 {
            return Err(MaestroError::Config(
                "reheat_after must be > 0 and reheat_factor > 1".into(),
            ));
        }
        Ok(())
    }
}

/// Progress counters of one optimization run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnealingState {
    pub temperature: f64,
    pub current_energy: f64,
    pub best_energy: f64,
    pub iteration: u64,
    /// Consecutive iterations without a new best.
    pub stagnation: u64,
    pub reheats: u32,
    pub accepted: u64,
    pub rejected: u64,
}

/// Result of [`Annealer::optimize`].
#[derive(Debug, Clone)]
pub struct AnnealingOutcome<T> {
    pub best: T,
    pub best_energy: f64,
    pub state: AnnealingState,
    /// Whether the target energy was reached.
    pub converged: bool,
}

/// Generic simulated-annealing optimizer. Lower energy is better.
#[derive(Debug, Clone)]
pub struct Annealer {
    config: AnnealingConfig,
}

impl Annealer {
    pub fn new(config: AnnealingConfig) -> MaestroResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AnnealingConfig {
        &self.config
    }

    /// Run the optimization loop.
    ///
    /// Iterates while the temperature is above the minimum, the current
    /// energy is above the target and the iteration budget remains.
    /// `mutate` receives the current candidate and temperature.
    pub fn optimize<T, E, M, R>(
        &self,
        initial: T,
        mut evaluate: E,
        mut mutate: M,
        rng: &mut R,
    ) -> AnnealingOutcome<T>
    where
        T: Clone,
        E: FnMut(&T) -> f64,
        M: FnMut(&T, f64, &mut R) -> T,
        R: Rng + ?Sized,
    {
        let cfg = &self.config;
        let initial_energy = evaluate(&initial);
        let mut current = initial.clone();
        let mut best = initial;
        let mut state = AnnealingState {
            temperature: cfg.initial_temperature,
            current_energy: initial_energy,
            best_energy: initial_energy,
            ..AnnealingState::default()
        };

        while state.temperature > cfg.min_temperature
            && state.current_energy > cfg.target_energy
            && state.iteration < cfg.max_iterations
        {
            state.iteration += 1;

            let candidate = mutate(&current, state.temperature, rng);
            let energy = evaluate(&candidate);
            let delta = energy - state.current_energy;

            if self.accept(delta, &state, rng) {
                current = candidate;
                state.current_energy = energy;
                state.accepted += 1;
            } else {
                state.rejected += 1;
            }

            if state.current_energy < state.best_energy {
                best = current.clone();
                state.best_energy = state.current_energy;
                state.stagnation = 0;
            } else {
                state.stagnation += 1;
            }

            if state.stagnation >= cfg.reheat_after {
                let reheated = (state.temperature * cfg.reheat_factor).min(cfg.max_temperature);
                debug!(
                    iteration = state.iteration,
                    from = state.temperature,
                    to = reheated,
                    "Annealing reheat"
                );
                state.temperature = reheated;
                state.stagnation = 0;
                state.reheats += 1;
            } else {
                state.temperature *= cfg.cooling_rate;
            }
        }

        let converged = state.best_energy <= cfg.target_energy;
        debug!(
            iterations = state.iteration,
            best_energy = state.best_energy,
            reheats = state.reheats,
            converged,
            "Annealing finished"
        );

        AnnealingOutcome {
            best,
            best_energy: state.best_energy,
            state,
            converged,
        }
    }

    /// Acceptance probability for a move of size `delta` (always 1 for
    /// improvements).
    pub fn acceptance_probability(&self, delta: f64, state: &AnnealingState) -> f64 {
        if delta < 0.0 {
            return 1.0;
        }
        match self.config.policy {
            AcceptancePolicy::Strict => 0.0,
            AcceptancePolicy::Boltzmann => (-delta / state.temperature).exp(),
            AcceptancePolicy::Adaptive => {
                let convergence =
                    (state.stagnation as f64 / self.config.reheat_after as f64).min(1.0);
                let effective = state.temperature * (1.0 + convergence);
                (-delta / effective).exp()
            }
        }
    }

    fn accept<R: Rng + ?Sized>(&self, delta: f64, state: &AnnealingState, rng: &mut R) -> bool {
        let p = self.acceptance_probability(delta, state);
        p >= 1.0 || (p > 0.0 && rng.gen::<f64>() < p)
    }
}
