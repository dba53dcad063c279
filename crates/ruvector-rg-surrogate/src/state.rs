//! Coupling states and simulation trajectories.
//!
//! These are produced by an external RG-flow simulator and consumed
//! read-only by the surrogate. Nothing here validates physical correctness.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SurrogateError};

/// Depth marker carried by predicted fixed points.
pub const FIXED_POINT_LEVEL: i32 = -1;

/// A point in coupling space at a given RG scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CouplingState {
    /// First coupling coordinate
    pub lambda: f64,
    /// Second coupling coordinate
    pub gamma: f64,
    /// Third coupling coordinate
    pub mu: f64,
    /// RG scale k
    pub scale: f64,
    /// Depth in the trajectory
    #[serde(default)]
    pub level: i32,
}

impl CouplingState {
    /// Create a state at depth 0.
    pub fn new(lambda: f64, gamma: f64, mu: f64, scale: f64) -> Self {
        Self {
            lambda,
            gamma,
            mu,
            scale,
            level: 0,
        }
    }

    /// Same state with a different depth marker.
    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    /// The three coupling coordinates.
    #[inline]
    pub fn couplings(&self) -> [f64; 3] {
        [self.lambda, self.gamma, self.mu]
    }

    /// Node feature vector `[lambda, gamma, mu, scale]`.
    #[inline]
    pub fn to_features(&self) -> [f64; 4] {
        [self.lambda, self.gamma, self.mu, self.scale]
    }

    /// Euclidean distance in coupling space (scale ignored).
    pub fn distance_to(&self, other: &CouplingState) -> f64 {
        self.couplings()
            .iter()
            .zip(other.couplings().iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

impl Default for CouplingState {
    fn default() -> Self {
        Self::new(10.0, 10.0, 10.0, 1.0)
    }
}

/// Ordered sequence of coupling states from one simulation run.
///
/// Always holds at least one state. Precomputed rate-of-change triples are
/// keyed by the index of the transition's destination state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TrajectoryRepr", into = "TrajectoryRepr")]
pub struct Trajectory {
    states: Vec<CouplingState>,
    rates: BTreeMap<usize, [f64; 3]>,
}

/// Unchecked wire form. Rates travel as `(step, [d_lambda, d_gamma, d_mu])`
/// pairs so they survive tagged-enum buffering, where map keys are strings.
#[derive(Serialize, Deserialize)]
struct TrajectoryRepr {
    states: Vec<CouplingState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    rates: Vec<(usize, [f64; 3])>,
}

impl From<Trajectory> for TrajectoryRepr {
    fn from(trajectory: Trajectory) -> Self {
        Self {
            states: trajectory.states,
            rates: trajectory.rates.into_iter().collect(),
        }
    }
}

impl TryFrom<TrajectoryRepr> for Trajectory {
    type Error = SurrogateError;

    fn try_from(repr: TrajectoryRepr) -> Result<Self> {
        let mut trajectory = Self::from_states(repr.states)?;
        for (step, rates) in repr.rates {
            if step == 0 || step >= trajectory.len() {
                return Err(SurrogateError::InvalidInput(format!(
                    "rates for step {step} outside trajectory of {} states",
                    trajectory.len()
                )));
            }
            trajectory.rates.insert(step, rates);
        }
        Ok(trajectory)
    }
}

impl Trajectory {
    /// Start a trajectory from its initial state (re-tagged to level 0).
    pub fn new(initial: CouplingState) -> Self {
        Self {
            states: vec![initial.with_level(0)],
            rates: BTreeMap::new(),
        }
    }

    /// Build a trajectory from a full state sequence.
    ///
    /// Levels are re-tagged with each state's position.
    pub fn from_states(states: Vec<CouplingState>) -> Result<Self> {
        if states.is_empty() {
            return Err(SurrogateError::InvalidInput(
                "trajectory needs at least one state".into(),
            ));
        }
        let states = states
            .into_iter()
            .enumerate()
            .map(|(i, s)| s.with_level(i as i32))
            .collect();
        Ok(Self {
            states,
            rates: BTreeMap::new(),
        })
    }

    /// Append a step, optionally with its precomputed rate-of-change triple.
    pub fn push(&mut self, state: CouplingState, rates: Option<[f64; 3]>) {
        let level = self.states.len();
        self.states.push(state.with_level(level as i32));
        if let Some(rates) = rates {
            self.rates.insert(level, rates);
        }
    }

    /// All states in order.
    pub fn states(&self) -> &[CouplingState] {
        &self.states
    }

    /// Precomputed rates for the transition ending at `step`, if supplied.
    pub fn rates_at(&self, step: usize) -> Option<[f64; 3]> {
        self.rates.get(&step).copied()
    }

    /// Number of states.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Always false; kept for API symmetry with collections.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// First state of the run.
    pub fn initial(&self) -> &CouplingState {
        &self.states[0]
    }

    /// Most recent state.
    pub fn current(&self) -> &CouplingState {
        &self.states[self.states.len() - 1]
    }

    /// Whether the last step moved every coupling by less than `tolerance`.
    pub fn check_fixed_point(&self, tolerance: f64) -> Option<CouplingState> {
        let [.., previous, current] = self.states.as_slice() else {
            return None;
        };
        let max_delta = current
            .couplings()
            .iter()
            .zip(previous.couplings().iter())
            .map(|(c, p)| (c - p).abs())
            .fold(0.0_f64, f64::max);
        (max_delta < tolerance).then_some(*current)
    }
}

impl Default for Trajectory {
    fn default() -> Self {
        Self::new(CouplingState::default())
    }
}

impl From<CouplingState> for Trajectory {
    fn from(initial: CouplingState) -> Self {
        Self::new(initial)
    }
}
