//! Layer configuration for transposed convolutions.
//!
//! A configuration is built once, validated once, and treated as immutable
//! for the lifetime of a pass. All derived quantities (transposed filter
//! extents, output sizes) come from accessor methods so they can never
//! drift from the fields they are computed from.
//!
//! Geometry, per axis: an input of extent `in` upsampled by `stride` with a
//! kernel of extent `filt` conceptually produces `(in − 1)·stride + filt`
//! columns. The emitted output is the window `[pad, pad + out)` of that
//! extent; `crop` columns fall off the far edge. The three cropping fields
//! must tile the conceptual extent exactly, and the window must stay within
//! the `in·stride` columns a single forward pass can generate.

use anyhow::{ensure, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Execution strategy for a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Random-access input, one dense multiply per output position.
    #[default]
    Batch,
    /// Sequential single pass over the input with bounded window buffers.
    Streaming,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Batch => "batch",
            Self::Streaming => "streaming",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_reuse() -> usize {
    1
}

/// Configuration for a 1D transposed convolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transpose1d {
    /// Input extent in pixels.
    pub in_width: usize,
    /// Channels per input pixel.
    pub n_chan: usize,
    /// Filters (channels per output position).
    pub n_filt: usize,
    /// Kernel extent.
    pub filt_width: usize,
    /// Upsampling stride.
    pub stride_width: usize,
    /// Columns cropped from the left of the conceptual output.
    pub pad_left: usize,
    /// Columns cropped from the right of the conceptual output.
    pub crop_right: usize,
    /// Emitted output extent.
    pub out_width: usize,
    /// Multiply-accumulate sharing factor (throughput/area knob; never
    /// changes results).
    #[serde(default = "default_reuse")]
    pub reuse_factor: usize,
    /// Execution strategy.
    #[serde(default)]
    pub strategy: Strategy,
}

impl Transpose1d {
    /// Create a configuration with the default crop: the output covers all
    /// `in_width·stride_width` generable columns, so `pad_left = 0` and the
    /// kernel tail (`filt_width − stride_width` columns, when positive) is
    /// cropped on the right.
    pub fn new(
        in_width: usize,
        n_chan: usize,
        n_filt: usize,
        filt_width: usize,
        stride_width: usize,
    ) -> Self {
        let crop_right = filt_width.saturating_sub(stride_width);
        let out_width =
            in_width.saturating_sub(1) * stride_width + filt_width - crop_right;
        Self {
            in_width,
            n_chan,
            n_filt,
            filt_width,
            stride_width,
            pad_left: 0,
            crop_right,
            out_width,
            reuse_factor: 1,
            strategy: Strategy::Batch,
        }
    }

    /// Set an explicit output window; the right crop becomes whatever
    /// remains of the conceptual extent.
    #[must_use]
    pub fn with_output(mut self, out_width: usize, pad_left: usize) -> Self {
        self.pad_left = pad_left;
        self.out_width = out_width;
        self.crop_right = self.full_width().saturating_sub(pad_left + out_width);
        self
    }

    /// Set explicit crops; the output extent becomes whatever remains.
    #[must_use]
    pub fn with_crop(mut self, pad_left: usize, crop_right: usize) -> Self {
        self.pad_left = pad_left;
        self.crop_right = crop_right;
        self.out_width = self.full_width().saturating_sub(pad_left + crop_right);
        self
    }

    #[must_use]
    pub fn with_reuse_factor(mut self, reuse_factor: usize) -> Self {
        self.reuse_factor = reuse_factor;
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Un-cropped transposed output extent: `(in_width − 1)·stride + filt`.
    #[must_use]
    pub fn full_width(&self) -> usize {
        self.in_width.saturating_sub(1) * self.stride_width + self.filt_width
    }

    /// Transposed filter extent: `ceil(filt_width / stride_width)`, the
    /// number of input columns that can overlap one output position.
    #[must_use]
    pub fn trfilt_width(&self) -> usize {
        self.filt_width.div_ceil(self.stride_width)
    }

    /// Length of the per-position input window.
    #[must_use]
    pub fn window_len(&self) -> usize {
        self.trfilt_width() * self.n_chan
    }

    /// Validate the configuration. Every driver entry point calls this
    /// before touching any data.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.in_width >= 1, "in_width must be positive");
        ensure!(self.n_chan >= 1, "n_chan must be positive");
        ensure!(self.n_filt >= 1, "n_filt must be positive");
        ensure!(self.filt_width >= 1, "filt_width must be positive");
        ensure!(self.stride_width >= 1, "stride_width must be positive");
        ensure!(self.reuse_factor >= 1, "reuse_factor must be positive");
        ensure!(self.out_width >= 1, "out_width must be positive");
        let full = self.full_width();
        ensure!(
            self.pad_left + self.out_width + self.crop_right == full,
            "pad_left ({}) + out_width ({}) + crop_right ({}) must tile the \
             transposed extent {} exactly",
            self.pad_left,
            self.out_width,
            self.crop_right,
            full
        );
        ensure!(
            self.pad_left + self.out_width <= self.in_width * self.stride_width,
            "output window [{}, {}) extends past column {}, the last a single \
             forward pass over {} inputs at stride {} can generate",
            self.pad_left,
            self.pad_left + self.out_width,
            self.in_width * self.stride_width,
            self.in_width,
            self.stride_width
        );
        Ok(())
    }
}

/// Configuration for a 2D transposed convolution.
///
/// Axes are configured independently; height never has to mirror width.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transpose2d {
    pub in_height: usize,
    pub in_width: usize,
    pub n_chan: usize,
    pub n_filt: usize,
    pub filt_height: usize,
    pub filt_width: usize,
    pub stride_height: usize,
    pub stride_width: usize,
    /// Rows cropped from the top of the conceptual output.
    pub pad_top: usize,
    /// Columns cropped from the left of the conceptual output.
    pub pad_left: usize,
    /// Rows cropped from the bottom of the conceptual output.
    pub crop_bottom: usize,
    /// Columns cropped from the right of the conceptual output.
    pub crop_right: usize,
    pub out_height: usize,
    pub out_width: usize,
    #[serde(default = "default_reuse")]
    pub reuse_factor: usize,
    #[serde(default)]
    pub strategy: Strategy,
}

impl Transpose2d {
    /// Create a configuration with the default crop on both axes (see
    /// [`Transpose1d::new`]).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_height: usize,
        in_width: usize,
        n_chan: usize,
        n_filt: usize,
        filt_height: usize,
        filt_width: usize,
        stride_height: usize,
        stride_width: usize,
    ) -> Self {
        let crop_bottom = filt_height.saturating_sub(stride_height);
        let crop_right = filt_width.saturating_sub(stride_width);
        let out_height =
            in_height.saturating_sub(1) * stride_height + filt_height - crop_bottom;
        let out_width =
            in_width.saturating_sub(1) * stride_width + filt_width - crop_right;
        Self {
            in_height,
            in_width,
            n_chan,
            n_filt,
            filt_height,
            filt_width,
            stride_height,
            stride_width,
            pad_top: 0,
            pad_left: 0,
            crop_bottom,
            crop_right,
            out_height,
            out_width,
            reuse_factor: 1,
            strategy: Strategy::Batch,
        }
    }

    /// Set an explicit output window; the far-edge crops become whatever
    /// remains of the conceptual extent on each axis.
    #[must_use]
    pub fn with_output(
        mut self,
        out_height: usize,
        out_width: usize,
        pad_top: usize,
        pad_left: usize,
    ) -> Self {
        self.pad_top = pad_top;
        self.pad_left = pad_left;
        self.out_height = out_height;
        self.out_width = out_width;
        self.crop_bottom = self.full_height().saturating_sub(pad_top + out_height);
        self.crop_right = self.full_width().saturating_sub(pad_left + out_width);
        self
    }

    /// Set explicit crops; the output extents become whatever remains.
    #[must_use]
    pub fn with_crop(
        mut self,
        pad_top: usize,
        pad_left: usize,
        crop_bottom: usize,
        crop_right: usize,
    ) -> Self {
        self.pad_top = pad_top;
        self.pad_left = pad_left;
        self.crop_bottom = crop_bottom;
        self.crop_right = crop_right;
        self.out_height = self.full_height().saturating_sub(pad_top + crop_bottom);
        self.out_width = self.full_width().saturating_sub(pad_left + crop_right);
        self
    }

    #[must_use]
    pub fn with_reuse_factor(mut self, reuse_factor: usize) -> Self {
        self.reuse_factor = reuse_factor;
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn full_height(&self) -> usize {
        self.in_height.saturating_sub(1) * self.stride_height + self.filt_height
    }

    #[must_use]
    pub fn full_width(&self) -> usize {
        self.in_width.saturating_sub(1) * self.stride_width + self.filt_width
    }

    #[must_use]
    pub fn trfilt_height(&self) -> usize {
        self.filt_height.div_ceil(self.stride_height)
    }

    #[must_use]
    pub fn trfilt_width(&self) -> usize {
        self.filt_width.div_ceil(self.stride_width)
    }

    /// Length of the per-position input window.
    #[must_use]
    pub fn window_len(&self) -> usize {
        self.trfilt_height() * self.trfilt_width() * self.n_chan
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.in_height >= 1, "in_height must be positive");
        ensure!(self.in_width >= 1, "in_width must be positive");
        ensure!(self.n_chan >= 1, "n_chan must be positive");
        ensure!(self.n_filt >= 1, "n_filt must be positive");
        ensure!(self.filt_height >= 1, "filt_height must be positive");
        ensure!(self.filt_width >= 1, "filt_width must be positive");
        ensure!(self.stride_height >= 1, "stride_height must be positive");
        ensure!(self.stride_width >= 1, "stride_width must be positive");
        ensure!(self.reuse_factor >= 1, "reuse_factor must be positive");
        ensure!(self.out_height >= 1, "out_height must be positive");
        ensure!(self.out_width >= 1, "out_width must be positive");
        ensure!(
            self.pad_top + self.out_height + self.crop_bottom == self.full_height(),
            "pad_top ({}) + out_height ({}) + crop_bottom ({}) must tile the \
             transposed extent {} exactly",
            self.pad_top,
            self.out_height,
            self.crop_bottom,
            self.full_height()
        );
        ensure!(
            self.pad_left + self.out_width + self.crop_right == self.full_width(),
            "pad_left ({}) + out_width ({}) + crop_right ({}) must tile the \
             transposed extent {} exactly",
            self.pad_left,
            self.out_width,
            self.crop_right,
            self.full_width()
        );
        ensure!(
            self.pad_top + self.out_height <= self.in_height * self.stride_height,
            "output rows [{}, {}) extend past row {}, the last a single \
             forward pass over {} input rows at stride {} can generate",
            self.pad_top,
            self.pad_top + self.out_height,
            self.in_height * self.stride_height,
            self.in_height,
            self.stride_height
        );
        ensure!(
            self.pad_left + self.out_width <= self.in_width * self.stride_width,
            "output columns [{}, {}) extend past column {}, the last a single \
             forward pass over {} input columns at stride {} can generate",
            self.pad_left,
            self.pad_left + self.out_width,
            self.in_width * self.stride_width,
            self.in_width,
            self.stride_width
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_crop_covers_generable_columns() {
        let cfg = Transpose1d::new(8, 3, 4, 5, 2);
        assert_eq!(cfg.crop_right, 3);
        assert_eq!(cfg.out_width, 16);
        assert_eq!(cfg.pad_left, 0);
        assert_eq!(cfg.trfilt_width(), 3);
        cfg.validate().unwrap();
    }

    #[test]
    fn kernel_no_wider_than_stride_needs_no_crop() {
        let cfg = Transpose1d::new(4, 1, 1, 2, 3);
        assert_eq!(cfg.crop_right, 0);
        assert_eq!(cfg.out_width, 11);
        cfg.validate().unwrap();
    }

    #[test]
    fn with_output_and_with_crop_agree() {
        let a = Transpose1d::new(2, 1, 1, 3, 2).with_output(3, 1);
        let b = Transpose1d::new(2, 1, 1, 3, 2).with_crop(1, 1);
        assert_eq!(a, b);
        assert_eq!(a.out_width, 3);
        a.validate().unwrap();
    }

    #[test]
    fn rejects_zero_stride() {
        let mut cfg = Transpose1d::new(4, 1, 1, 3, 2);
        cfg.stride_width = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_window_past_generable_extent() {
        // stride 1, kernel 3: the last filt−stride = 2 conceptual columns
        // can never come out of a forward pass.
        let cfg = Transpose1d::new(6, 1, 1, 3, 1).with_crop(1, 1);
        assert!(cfg.validate().is_err());
        let ok = Transpose1d::new(6, 1, 1, 3, 1).with_crop(1, 2);
        ok.validate().unwrap();
        assert_eq!(ok.out_width, 5);
    }

    #[test]
    fn rejects_mismatched_tiling() {
        let mut cfg = Transpose1d::new(4, 1, 1, 3, 2);
        cfg.out_width += 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn axes_are_independent_in_2d() {
        let cfg = Transpose2d::new(3, 5, 2, 4, 5, 3, 3, 2).with_crop(2, 1, 2, 1);
        assert_eq!(cfg.out_height, 7);
        assert_eq!(cfg.out_width, 9);
        assert_eq!(cfg.trfilt_height(), 2);
        assert_eq!(cfg.trfilt_width(), 2);
        cfg.validate().unwrap();
    }

    #[test]
    fn strategy_roundtrips_through_serde() {
        let cfg = Transpose1d::new(4, 1, 2, 3, 2).with_strategy(Strategy::Streaming);
        let text = serde_json::to_string(&cfg).unwrap();
        let back: Transpose1d = serde_json::from_str(&text).unwrap();
        assert_eq!(cfg, back);
    }
}
