//! Batch drivers: transposed convolution over a fully resident input.
//!
//! Output positions are mutually independent — every position reads only
//! the read-only input and kernel, so any evaluation order produces the
//! same result. Two 1D orders are offered:
//!
//! * [`conv_1d`] walks output positions and rebuilds both windows per
//!   position.
//! * [`conv_1d_phases`] walks the `stride_width` kernel alignments,
//!   reusing one weight window across a whole strided subsequence of
//!   outputs — far less weight churn, identical values.

use anyhow::{ensure, Result};
use log::debug;
use ndarray::LinalgScalar;

use crate::config::{Transpose1d, Transpose2d};
use crate::conv::dense::DenseEngine;
use crate::conv::plan::tap_plan;
use crate::conv::window::{
    gather_input_1d, gather_input_2d, gather_input_tail_1d, weight_window_1d,
    weight_window_2d,
};
use crate::weights::{Kernel1d, Kernel2d};

/// 1D transposed convolution, one dense multiply per output position.
///
/// `data` is `in_width × n_chan`, the result `out_width × n_filt`, both
/// channel-interleaved.
pub fn conv_1d<F: LinalgScalar, E: DenseEngine<F>>(
    cfg: &Transpose1d,
    kernel: &Kernel1d<F>,
    data: &[F],
    engine: &E,
) -> Result<Vec<F>> {
    cfg.validate()?;
    ensure!(
        data.len() == cfg.in_width * cfg.n_chan,
        "input buffer holds {} values, layer expects {} (in_width {} × n_chan {})",
        data.len(),
        cfg.in_width * cfg.n_chan,
        cfg.in_width,
        cfg.n_chan
    );

    let nf = cfg.n_filt;
    let mut weight_win = vec![F::zero(); nf * cfg.window_len()];
    let mut input_win = vec![F::zero(); cfg.window_len()];
    let mut res = vec![F::zero(); nf];
    let mut out = vec![F::zero(); cfg.out_width * nf];

    for pos in cfg.pad_left..cfg.pad_left + cfg.out_width {
        let plan = tap_plan(pos, cfg.filt_width, cfg.stride_width, cfg.in_width);
        weight_window_1d(cfg, kernel, plan.phase, plan.width, &mut weight_win);
        gather_input_1d(cfg, data, plan.start, plan.width, &mut input_win);
        engine.forward(&input_win, &weight_win, kernel.bias(), &mut res);

        let dst = (pos - cfg.pad_left) * nf;
        out[dst..dst + nf].copy_from_slice(&res);
    }

    debug!(
        "conv_1d: {} positions × {} filters ({} taps/window)",
        cfg.out_width,
        nf,
        cfg.trfilt_width()
    );
    Ok(out)
}

/// 1D transposed convolution iterated by kernel alignment.
///
/// For each of the `stride_width` alignments the weight window is built
/// once (taps past the kernel zeroed) and swept across the input; the raw
/// position `col·stride + alignment` is written when it falls inside the
/// output window. Functionally identical to [`conv_1d`].
pub fn conv_1d_phases<F: LinalgScalar, E: DenseEngine<F>>(
    cfg: &Transpose1d,
    kernel: &Kernel1d<F>,
    data: &[F],
    engine: &E,
) -> Result<Vec<F>> {
    cfg.validate()?;
    ensure!(
        data.len() == cfg.in_width * cfg.n_chan,
        "input buffer holds {} values, layer expects {} (in_width {} × n_chan {})",
        data.len(),
        cfg.in_width * cfg.n_chan,
        cfg.in_width,
        cfg.n_chan
    );

    let nf = cfg.n_filt;
    let trfilt = cfg.trfilt_width();
    let mut weight_win = vec![F::zero(); nf * cfg.window_len()];
    let mut input_win = vec![F::zero(); cfg.window_len()];
    let mut res = vec![F::zero(); nf];
    let mut out = vec![F::zero(); cfg.out_width * nf];

    for sub in 0..cfg.stride_width {
        let weight_start = cfg.stride_width * (trfilt - 1) + sub;
        weight_window_1d(cfg, kernel, weight_start, trfilt, &mut weight_win);

        for col in 0..cfg.in_width {
            let raw = col * cfg.stride_width + sub;
            if raw < cfg.pad_left || raw >= cfg.pad_left + cfg.out_width {
                continue;
            }
            gather_input_tail_1d(cfg, data, col, &mut input_win);
            engine.forward(&input_win, &weight_win, kernel.bias(), &mut res);

            let dst = (raw - cfg.pad_left) * nf;
            out[dst..dst + nf].copy_from_slice(&res);
        }
    }

    debug!(
        "conv_1d_phases: {} alignments over {} columns",
        cfg.stride_width, cfg.in_width
    );
    Ok(out)
}

/// 2D transposed convolution, one dense multiply per output position; both
/// axes are planned independently.
///
/// `data` is `in_height × in_width × n_chan`, the result
/// `out_height × out_width × n_filt`, raster order.
pub fn conv_2d<F: LinalgScalar, E: DenseEngine<F>>(
    cfg: &Transpose2d,
    kernel: &Kernel2d<F>,
    data: &[F],
    engine: &E,
) -> Result<Vec<F>> {
    cfg.validate()?;
    ensure!(
        data.len() == cfg.in_height * cfg.in_width * cfg.n_chan,
        "input buffer holds {} values, layer expects {} (in_height {} × in_width {} × n_chan {})",
        data.len(),
        cfg.in_height * cfg.in_width * cfg.n_chan,
        cfg.in_height,
        cfg.in_width,
        cfg.n_chan
    );

    let nf = cfg.n_filt;
    let mut weight_win = vec![F::zero(); nf * cfg.window_len()];
    let mut input_win = vec![F::zero(); cfg.window_len()];
    let mut res = vec![F::zero(); nf];
    let mut out = vec![F::zero(); cfg.out_height * cfg.out_width * nf];

    for pos_y in cfg.pad_top..cfg.pad_top + cfg.out_height {
        let plan_y = tap_plan(pos_y, cfg.filt_height, cfg.stride_height, cfg.in_height);
        for pos_x in cfg.pad_left..cfg.pad_left + cfg.out_width {
            let plan_x = tap_plan(pos_x, cfg.filt_width, cfg.stride_width, cfg.in_width);

            weight_window_2d(
                cfg,
                kernel,
                plan_y.phase,
                plan_x.phase,
                plan_y.width,
                plan_x.width,
                &mut weight_win,
            );
            gather_input_2d(
                cfg,
                data,
                plan_y.start,
                plan_x.start,
                plan_y.width,
                plan_x.width,
                &mut input_win,
            );
            engine.forward(&input_win, &weight_win, kernel.bias(), &mut res);

            let dst = ((pos_y - cfg.pad_top) * cfg.out_width + (pos_x - cfg.pad_left)) * nf;
            out[dst..dst + nf].copy_from_slice(&res);
        }
    }

    debug!(
        "conv_2d: {}×{} positions × {} filters ({}×{} taps/window)",
        cfg.out_height,
        cfg.out_width,
        nf,
        cfg.trfilt_height(),
        cfg.trfilt_width()
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conv::dense::GemmEngine;
    use crate::conv::testutil::{
        random_kernel_1d, random_kernel_2d, random_pixels, reference_1d, reference_2d,
        valid_configs_1d, valid_configs_2d,
    };

    #[test]
    fn matches_worked_upsample_by_two() {
        // in [x0, x1], kernel [w0, w1, w2], stride 2, one column cropped on
        // each side: expected [x0·w1 + b, x0·w2 + x1·w0 + b, x1·w1 + b].
        let cfg = Transpose1d::new(2, 1, 1, 3, 2).with_crop(1, 1);
        let (x0, x1) = (3.0f32, -5.0);
        let (w0, w1, w2) = (2.0f32, 7.0, 11.0);
        let b = 0.5f32;
        let kernel = Kernel1d::from_parts(vec![w0, w1, w2], vec![b], &cfg).unwrap();

        let out = conv_1d(&cfg, &kernel, &[x0, x1], &GemmEngine).unwrap();
        assert_eq!(out, vec![x0 * w1 + b, x0 * w2 + x1 * w0 + b, x1 * w1 + b]);
    }

    #[test]
    fn matches_reference_across_configs() {
        for (seed, cfg) in valid_configs_1d().into_iter().enumerate() {
            let kernel = random_kernel_1d(&cfg, seed as u64);
            let data = random_pixels(cfg.in_width * cfg.n_chan, seed as u64 + 1000);
            let out = conv_1d(&cfg, &kernel, &data, &GemmEngine).unwrap();
            assert_eq!(out, reference_1d(&cfg, &kernel, &data), "{cfg:?}");
        }
    }

    #[test]
    fn phase_order_matches_position_order() {
        for (seed, cfg) in valid_configs_1d().into_iter().enumerate() {
            let kernel = random_kernel_1d(&cfg, seed as u64 + 7);
            let data = random_pixels(cfg.in_width * cfg.n_chan, seed as u64 + 77);
            let by_position = conv_1d(&cfg, &kernel, &data, &GemmEngine).unwrap();
            let by_phase = conv_1d_phases(&cfg, &kernel, &data, &GemmEngine).unwrap();
            assert_eq!(by_position, by_phase, "{cfg:?}");
        }
    }

    #[test]
    fn stride_one_degenerates_to_plain_convolution() {
        // With stride 1 the operator is an ordinary convolution of the
        // input with the kernel.
        let cfg = Transpose1d::new(6, 1, 1, 3, 1).with_crop(2, 2);
        let kernel = random_kernel_1d(&cfg, 3);
        let data = random_pixels(6, 4);

        let out = conv_1d(&cfg, &kernel, &data, &GemmEngine).unwrap();

        let w = kernel.weights();
        for (o, &got) in out.iter().enumerate() {
            let pos = o + cfg.pad_left;
            let mut want = kernel.bias()[0];
            for (i, &x) in data.iter().enumerate() {
                if pos >= i && pos - i < cfg.filt_width {
                    want += x * w[pos - i];
                }
            }
            assert_eq!(got, want, "position {pos}");
        }
    }

    #[test]
    fn edge_positions_ignore_stale_window_contents() {
        // Position 0 of this layer only has one valid tap pair; the other
        // two window slots must come out as exact zeros even when the
        // scratch buffers start out poisoned, so the dense result depends
        // on valid slots alone.
        let cfg = Transpose1d::new(3, 2, 2, 5, 2);
        let kernel = random_kernel_1d(&cfg, 11);
        let data = random_pixels(cfg.in_width * cfg.n_chan, 12);
        let (nc, nf) = (cfg.n_chan, cfg.n_filt);

        let plan = tap_plan(0, cfg.filt_width, cfg.stride_width, cfg.in_width);
        assert!(plan.width < cfg.trfilt_width());

        let mut weight_win = vec![1.0e9f32; nf * cfg.window_len()];
        let mut input_win = vec![1.0e9f32; cfg.window_len()];
        weight_window_1d(&cfg, &kernel, plan.phase, plan.width, &mut weight_win);
        gather_input_1d(&cfg, &data, plan.start, plan.width, &mut input_win);

        let mut res = vec![0.0f32; nf];
        GemmEngine.forward(&input_win, &weight_win, kernel.bias(), &mut res);

        for f in 0..nf {
            let mut want = kernel.bias()[f];
            for step in 0..plan.width {
                let tap = plan.phase - step * cfg.stride_width;
                for c in 0..nc {
                    want += data[(plan.start + step) * nc + c]
                        * kernel.weights()[tap * nc * nf + c * nf + f];
                }
            }
            assert_eq!(res[f], want, "filter {f}");
        }
    }

    #[test]
    fn matches_reference_across_configs_2d() {
        for (seed, cfg) in valid_configs_2d().into_iter().enumerate() {
            let kernel = random_kernel_2d(&cfg, seed as u64);
            let data =
                random_pixels(cfg.in_height * cfg.in_width * cfg.n_chan, seed as u64 + 500);
            let out = conv_2d(&cfg, &kernel, &data, &GemmEngine).unwrap();
            assert_eq!(out, reference_2d(&cfg, &kernel, &data), "{cfg:?}");
        }
    }

    #[test]
    fn rejects_wrong_input_length() {
        let cfg = Transpose1d::new(4, 2, 1, 3, 2);
        let kernel = random_kernel_1d(&cfg, 0);
        assert!(conv_1d(&cfg, &kernel, &[0.0; 7], &GemmEngine).is_err());
    }
}
