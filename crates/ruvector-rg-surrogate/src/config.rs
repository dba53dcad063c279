//! Configuration types for the RG-flow surrogate.

use crate::error::{Result, SurrogateError};
use serde::{Deserialize, Serialize};

/// Surrogate model configuration.
///
/// All shapes are fixed at construction. The configuration is validated
/// eagerly, before any weight tensor is allocated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurrogateConfig {
    /// Raw node feature width (coupling coordinates + scale)
    pub node_feature_width: usize,

    /// Raw edge feature width (rate-of-change triple)
    pub edge_feature_width: usize,

    /// Hidden width (D) shared by encoder and decoder
    pub hidden_width: usize,

    /// Number of graph attention layers in the encoder
    pub encoder_layers: usize,

    /// Attention heads per graph attention layer
    pub encoder_heads: usize,

    /// Number of decoder layers
    pub decoder_layers: usize,

    /// Attention heads in decoder self/cross attention
    pub decoder_heads: usize,

    /// Feed-forward intermediate width in the decoder
    pub feed_forward_width: usize,

    /// Rows in the positional encoding table
    pub max_positions: usize,
}

impl Default for SurrogateConfig {
    fn default() -> Self {
        Self {
            node_feature_width: 4,
            edge_feature_width: 3,
            hidden_width: 128,
            encoder_layers: 3,
            encoder_heads: 4,
            decoder_layers: 3,
            decoder_heads: 8,
            feed_forward_width: 512,
            max_positions: 1000,
        }
    }
}

impl SurrogateConfig {
    /// Small configuration for tests and quick experiments.
    ///
    /// - Hidden width: 32
    /// - Encoder: 2 layers, 4 heads
    /// - Decoder: 2 layers, 4 heads
    /// - Feed-forward width: 64
    pub fn micro() -> Self {
        Self {
            hidden_width: 32,
            encoder_layers: 2,
            encoder_heads: 4,
            decoder_layers: 2,
            decoder_heads: 4,
            feed_forward_width: 64,
            ..Self::default()
        }
    }

    /// Width of the edge embedding (half the hidden width, at least 1)
    #[inline]
    pub fn edge_embed_width(&self) -> usize {
        (self.hidden_width / 2).max(1)
    }

    /// Per-head width in the decoder attention blocks
    #[inline]
    pub fn decoder_head_dim(&self) -> usize {
        self.hidden_width / self.decoder_heads
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.node_feature_width == 0 {
            return Err(SurrogateError::Config(
                "node_feature_width must be positive".into(),
            ));
        }

        if self.edge_feature_width == 0 {
            return Err(SurrogateError::Config(
                "edge_feature_width must be positive".into(),
            ));
        }

        if self.hidden_width == 0 {
            return Err(SurrogateError::Config("hidden_width must be positive".into()));
        }

        if self.encoder_heads == 0 || self.decoder_heads == 0 {
            return Err(SurrogateError::Config("head count must be positive".into()));
        }

        if self.hidden_width % self.encoder_heads != 0 {
            return Err(SurrogateError::Config(format!(
                "hidden_width ({}) must be divisible by encoder_heads ({})",
                self.hidden_width, self.encoder_heads
            )));
        }

        if self.hidden_width % self.decoder_heads != 0 {
            return Err(SurrogateError::Config(format!(
                "hidden_width ({}) must be divisible by decoder_heads ({})",
                self.hidden_width, self.decoder_heads
            )));
        }

        if self.feed_forward_width == 0 {
            return Err(SurrogateError::Config(
                "feed_forward_width must be positive".into(),
            ));
        }

        if self.max_positions == 0 {
            return Err(SurrogateError::Config("max_positions must be positive".into()));
        }

        Ok(())
    }

    /// Load and validate from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SurrogateError::Config(format!("JSON parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = SurrogateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.edge_embed_width(), 64);
        assert_eq!(config.decoder_head_dim(), 16);
    }

    #[test]
    fn test_micro_config_valid() {
        assert!(SurrogateConfig::micro().validate().is_ok());
    }

    #[test]
    fn test_invalid_heads() {
        let mut config = SurrogateConfig::default();
        config.encoder_heads = 3;
        let err = config.validate().unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("encoder_heads"));

        let mut config = SurrogateConfig::default();
        config.decoder_heads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_partial() {
        let config = SurrogateConfig::from_json(r#"{"hidden_width": 64, "decoder_heads": 4}"#)
            .unwrap();
        assert_eq!(config.hidden_width, 64);
        assert_eq!(config.encoder_layers, 3);

        let err = SurrogateConfig::from_json(r#"{"hidden_width": 30}"#).unwrap_err();
        assert!(err.is_config_error());

        assert!(SurrogateConfig::from_json("{").is_err());
    }
}
