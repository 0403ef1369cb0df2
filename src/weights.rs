//! Kernel parameter containers: the weight tensor and bias vector of a
//! transposed-convolution layer.
//!
//! Weight layout is a fixed contract with whatever exported the values:
//!
//!   1D: `[filt_width][n_chan][n_filt]`
//!   2D: `[filt_height][filt_width][n_chan][n_filt]`
//!
//! flattened row-major. Any transposition of this layout silently corrupts
//! results, so the only way to build a container is [`Kernel1d::from_parts`]
//! / [`Kernel2d::from_parts`], which check the buffer sizes against the
//! layer configuration and fail loudly on mismatch.

use anyhow::{ensure, Result};

use crate::config::{Transpose1d, Transpose2d};

/// Weights and bias of a 1D transposed-convolution layer.
#[derive(Debug, Clone)]
pub struct Kernel1d<F> {
    weights: Vec<F>,
    bias: Vec<F>,
}

impl<F> Kernel1d<F> {
    /// Take ownership of flat weight/bias buffers, checking their sizes
    /// against the configuration. A mismatch is fatal at load time.
    pub fn from_parts(weights: Vec<F>, bias: Vec<F>, cfg: &Transpose1d) -> Result<Self> {
        let expected = cfg.filt_width * cfg.n_chan * cfg.n_filt;
        ensure!(
            weights.len() == expected,
            "weight buffer holds {} values, layer expects {} \
             (filt_width {} × n_chan {} × n_filt {})",
            weights.len(),
            expected,
            cfg.filt_width,
            cfg.n_chan,
            cfg.n_filt
        );
        ensure!(
            bias.len() == cfg.n_filt,
            "bias buffer holds {} values, layer expects n_filt = {}",
            bias.len(),
            cfg.n_filt
        );
        Ok(Self { weights, bias })
    }

    pub fn weights(&self) -> &[F] {
        &self.weights
    }

    pub fn bias(&self) -> &[F] {
        &self.bias
    }
}

/// Weights and bias of a 2D transposed-convolution layer.
#[derive(Debug, Clone)]
pub struct Kernel2d<F> {
    weights: Vec<F>,
    bias: Vec<F>,
}

impl<F> Kernel2d<F> {
    /// Take ownership of flat weight/bias buffers, checking their sizes
    /// against the configuration. A mismatch is fatal at load time.
    pub fn from_parts(weights: Vec<F>, bias: Vec<F>, cfg: &Transpose2d) -> Result<Self> {
        let expected = cfg.filt_height * cfg.filt_width * cfg.n_chan * cfg.n_filt;
        ensure!(
            weights.len() == expected,
            "weight buffer holds {} values, layer expects {} \
             (filt_height {} × filt_width {} × n_chan {} × n_filt {})",
            weights.len(),
            expected,
            cfg.filt_height,
            cfg.filt_width,
            cfg.n_chan,
            cfg.n_filt
        );
        ensure!(
            bias.len() == cfg.n_filt,
            "bias buffer holds {} values, layer expects n_filt = {}",
            bias.len(),
            cfg.n_filt
        );
        Ok(Self { weights, bias })
    }

    pub fn weights(&self) -> &[F] {
        &self.weights
    }

    pub fn bias(&self) -> &[F] {
        &self.bias
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Transpose1d, Transpose2d};

    #[test]
    fn accepts_matching_buffers() {
        let cfg = Transpose1d::new(4, 2, 3, 5, 2);
        let kernel =
            Kernel1d::from_parts(vec![0.0f32; 5 * 2 * 3], vec![0.0f32; 3], &cfg).unwrap();
        assert_eq!(kernel.weights().len(), 30);
        assert_eq!(kernel.bias().len(), 3);
    }

    #[test]
    fn rejects_short_weight_buffer() {
        let cfg = Transpose1d::new(4, 2, 3, 5, 2);
        let err = Kernel1d::from_parts(vec![0.0f32; 29], vec![0.0f32; 3], &cfg)
            .unwrap_err()
            .to_string();
        assert!(err.contains("29"), "unexpected message: {err}");
    }

    #[test]
    fn rejects_wrong_bias_length() {
        let cfg = Transpose2d::new(2, 2, 1, 4, 3, 3, 2, 2);
        assert!(Kernel2d::from_parts(vec![0.0f32; 3 * 3 * 4], vec![0.0f32; 5], &cfg).is_err());
    }
}
