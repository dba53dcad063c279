//! End-to-end surrogate: encoder → decoder plus the task-level predictions.
//!
//! The model owns an immutable weight set. Every prediction is a pure
//! function of the weights and the input, so a model can be shared freely
//! across threads.

use std::fmt;

use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::SurrogateConfig;
use crate::decoder::{HeadPrediction, ResonanceDecoder};
use crate::encoder::{EncoderMetadata, HolographicEncoder};
use crate::error::{Result, SurrogateError};
use crate::graph::SurrogateInput;
use crate::linear::ParameterShapes;
use crate::state::{CouplingState, Trajectory, FIXED_POINT_LEVEL};

/// Fixed-point probability above which a candidate is reported.
pub const FIXED_POINT_THRESHOLD: f32 = 0.5;

/// Full forward-pass output for one input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted couplings `[lambda, gamma, mu]`
    pub couplings: [f32; 3],
    /// Fixed-point probability in `[0, 1]`
    pub is_fixed_point: f32,
    /// Predicted action value
    pub action: f32,
    /// Shapes of the graph that was encoded
    pub metadata: EncoderMetadata,
}

impl Prediction {
    fn new(heads: HeadPrediction, metadata: EncoderMetadata) -> Self {
        Self {
            couplings: heads.couplings,
            is_fixed_point: heads.is_fixed_point,
            action: heads.action,
            metadata,
        }
    }
}

/// Result of a fixed-point query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedPointPrediction {
    /// Candidate fixed point (`scale = 0`, `level = -1`) when confidence exceeds 0.5
    pub candidate: Option<CouplingState>,
    /// Fixed-point probability
    pub confidence: f32,
}

/// Graph-attention transformer surrogate for RG-flow trajectories.
#[derive(Debug, Clone)]
pub struct SurrogateModel {
    config: SurrogateConfig,
    encoder: HolographicEncoder,
    decoder: ResonanceDecoder,
}

impl SurrogateModel {
    /// Build a model with weights drawn from `rng`.
    ///
    /// # Errors
    /// `SurrogateError::Config` if the configuration is invalid; nothing is
    /// allocated in that case.
    pub fn new<R: Rng + ?Sized>(config: SurrogateConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let encoder = HolographicEncoder::new(&config, rng)?;
        let decoder = ResonanceDecoder::new(&config, rng)?;
        let model = Self {
            config,
            encoder,
            decoder,
        };

        tracing::info!(
            hidden_width = model.config.hidden_width,
            encoder_layers = model.config.encoder_layers,
            decoder_layers = model.config.decoder_layers,
            parameters = model.num_parameters(),
            "surrogate model initialized"
        );

        Ok(model)
    }

    /// Build a model from a `u64` seed; equal seeds give identical weights.
    pub fn seeded(config: SurrogateConfig, seed: u64) -> Result<Self> {
        Self::new(config, &mut StdRng::seed_from_u64(seed))
    }

    /// Assemble a model from separately built parts.
    ///
    /// # Errors
    /// `SurrogateError::Config` if the configuration is invalid or if any
    /// width, layer count or head count of the parts disagrees with it.
    pub fn from_parts(
        config: SurrogateConfig,
        encoder: HolographicEncoder,
        decoder: ResonanceDecoder,
    ) -> Result<Self> {
        config.validate()?;
        let mismatches = part_mismatches(&config, &encoder, &decoder);
        if !mismatches.is_empty() {
            return Err(SurrogateError::Config(format!(
                "parts disagree with configuration: {}",
                mismatches.join(", ")
            )));
        }
        Ok(Self {
            config,
            encoder,
            decoder,
        })
    }

    /// Model configuration
    pub fn config(&self) -> &SurrogateConfig {
        &self.config
    }

    /// Encoder half
    pub fn encoder(&self) -> &HolographicEncoder {
        &self.encoder
    }

    /// Decoder half
    pub fn decoder(&self) -> &ResonanceDecoder {
        &self.decoder
    }

    /// Full forward pass.
    pub fn forward(&self, input: impl Into<SurrogateInput>) -> Result<Prediction> {
        self.predict_input(&input.into())
    }

    /// Forward pass that also returns the `(N, D)` encoder output.
    pub fn forward_with_encoding(
        &self,
        input: impl Into<SurrogateInput>,
    ) -> Result<(Prediction, Array2<f32>)> {
        let (encoded, metadata) = self.encoder.encode(&input.into())?;
        let heads = self.decoder.decode(encoded.view())?;
        Ok((Prediction::new(heads, metadata), encoded))
    }

    /// Predict the coupling state at `target_scale`.
    ///
    /// The returned state's level is the input trajectory length.
    pub fn predict_final_state(
        &self,
        input: impl Into<SurrogateInput>,
        target_scale: f64,
    ) -> Result<CouplingState> {
        let input: SurrogateInput = input.into();
        let prediction = self.predict_input(&input)?;
        Ok(state_from_couplings(prediction.couplings, target_scale).with_level(input.len() as i32))
    }

    /// Predict whether the flow ends at a fixed point.
    pub fn predict_fixed_point(
        &self,
        input: impl Into<SurrogateInput>,
    ) -> Result<FixedPointPrediction> {
        let prediction = self.forward(input)?;
        let confidence = prediction.is_fixed_point;
        let candidate = (confidence > FIXED_POINT_THRESHOLD).then(|| {
            state_from_couplings(prediction.couplings, 0.0).with_level(FIXED_POINT_LEVEL)
        });
        Ok(FixedPointPrediction {
            candidate,
            confidence,
        })
    }

    /// Roll a trajectory forward through `target_scales`.
    ///
    /// Each target strictly below the current trailing scale appends one
    /// predicted state; other targets are skipped. Graph inputs carry no
    /// trajectory and are rejected.
    pub fn predict_trajectory(
        &self,
        input: impl Into<SurrogateInput>,
        target_scales: &[f64],
    ) -> Result<Trajectory> {
        let input: SurrogateInput = input.into();
        let mut trajectory = input.to_trajectory().ok_or_else(|| {
            SurrogateError::InvalidInput(
                "trajectory rollout needs a state or trajectory input".into(),
            )
        })?;

        for &target in target_scales {
            if target < trajectory.current().scale {
                let next = self.predict_final_state(&trajectory, target)?;
                trajectory.push(next, None);
            }
        }

        Ok(trajectory)
    }

    /// Predict the action value.
    pub fn predict_action(&self, input: impl Into<SurrogateInput>) -> Result<f32> {
        Ok(self.forward(input)?.action)
    }

    /// Predict many inputs in parallel. Output order matches input order;
    /// any failing item fails the whole call.
    pub fn predict_batch(&self, inputs: &[SurrogateInput]) -> Result<Vec<Prediction>> {
        inputs
            .par_iter()
            .enumerate()
            .map(|(index, input)| {
                tracing::trace!(index, nodes = input.len(), "predicting batch item");
                self.predict_input(input)
            })
            .collect()
    }

    /// Shape of every weight tensor keyed by dotted path.
    pub fn parameter_shapes(&self) -> ParameterShapes {
        let mut shapes = ParameterShapes::new();
        self.encoder.collect_shapes("encoder", &mut shapes);
        self.decoder.collect_shapes("decoder", &mut shapes);
        shapes
    }

    /// Total number of scalar weights.
    pub fn num_parameters(&self) -> usize {
        self.parameter_shapes()
            .values()
            .map(|shape| shape.iter().product::<usize>())
            .sum()
    }

    fn predict_input(&self, input: &SurrogateInput) -> Result<Prediction> {
        let (encoded, metadata) = self.encoder.encode(input)?;
        let heads = self
            .decoder
            .forward(encoded.view().insert_axis(Axis(0)), None)?
            .squeeze()
            .ok_or_else(|| SurrogateError::InvalidInput("decoder produced no prediction".into()))?;
        Ok(Prediction::new(heads, metadata))
    }
}

impl fmt::Display for SurrogateModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SurrogateModel(hidden={}, encoder={}x{}h, decoder={}x{}h, ff={}, params={})",
            self.encoder.hidden_width(),
            self.encoder.num_layers(),
            self.encoder.num_heads().unwrap_or(0),
            self.decoder.num_layers(),
            self.decoder.num_heads().unwrap_or(0),
            self.decoder.feed_forward_width().unwrap_or(0),
            self.num_parameters()
        )
    }
}

/// Configuration fields the parts disagree with, as `"field expected vs actual"`.
///
/// Head counts and the feed-forward width are only checked when the part
/// has at least one layer to carry them.
fn part_mismatches(
    config: &SurrogateConfig,
    encoder: &HolographicEncoder,
    decoder: &ResonanceDecoder,
) -> Vec<String> {
    let checks = [
        ("hidden_width", config.hidden_width, Some(encoder.hidden_width())),
        ("hidden_width", config.hidden_width, Some(decoder.hidden_width())),
        ("node_feature_width", config.node_feature_width, Some(encoder.node_feature_width())),
        ("edge_feature_width", config.edge_feature_width, Some(encoder.edge_feature_width())),
        ("max_positions", config.max_positions, Some(encoder.max_positions())),
        ("encoder_layers", config.encoder_layers, Some(encoder.num_layers())),
        ("encoder_heads", config.encoder_heads, encoder.num_heads()),
        ("decoder_layers", config.decoder_layers, Some(decoder.num_layers())),
        ("decoder_heads", config.decoder_heads, decoder.num_heads()),
        ("feed_forward_width", config.feed_forward_width, decoder.feed_forward_width()),
    ];

    checks
        .into_iter()
        .filter_map(|(field, expected, actual)| match actual {
            Some(actual) if actual != expected => Some(format!("{field} {expected} vs {actual}")),
            _ => None,
        })
        .collect()
}

fn state_from_couplings(couplings: [f32; 3], scale: f64) -> CouplingState {
    let [lambda, gamma, mu] = couplings.map(f64::from);
    CouplingState::new(lambda, gamma, mu, scale)
}
