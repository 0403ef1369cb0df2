//! Window assembly: the fixed-size weight and input windows handed to the
//! dense engine, plus the shift machinery that rebuilds input windows from
//! a sequential stream.
//!
//! Every window has exactly its declared length; slots whose tap or column
//! falls outside the kernel or the input contribute zero on both the
//! weight and the input side.
//!
//! Layouts:
//!   input window   `[step_y][step_x][chan]`        (1D drops the y axis)
//!   weight window  `[filt][step_y][step_x][chan]`  (filter-major rows,
//!                                                   ready for the dense
//!                                                   engine)

use ndarray::LinalgScalar;

use crate::config::{Transpose1d, Transpose2d};
use crate::weights::{Kernel1d, Kernel2d};

// ── Weight windows ───────────────────────────────────────────────────────

/// Fill the weight window for one output alignment. Slot `step` carries tap
/// `weight_start − step·stride`; slots past `max_steps` or whose tap falls
/// outside `[0, filt_width)` are zeroed.
pub fn weight_window_1d<F: LinalgScalar>(
    cfg: &Transpose1d,
    kernel: &Kernel1d<F>,
    weight_start: usize,
    max_steps: usize,
    out: &mut [F],
) {
    let trfilt = cfg.trfilt_width();
    let (nc, nf) = (cfg.n_chan, cfg.n_filt);
    debug_assert_eq!(out.len(), nf * trfilt * nc);

    let weights = kernel.weights();
    for step in 0..trfilt {
        let tap = weight_start as isize - (step * cfg.stride_width) as isize;
        let valid = step < max_steps && tap >= 0 && (tap as usize) < cfg.filt_width;
        for f in 0..nf {
            let row = f * trfilt * nc + step * nc;
            if valid {
                let src = (tap as usize) * nc * nf + f;
                for c in 0..nc {
                    out[row + c] = weights[src + c * nf];
                }
            } else {
                out[row..row + nc].fill(F::zero());
            }
        }
    }
}

/// 2D weight window for one output alignment. A slot is zeroed when either
/// axis is out of range; validity never leaks across axes.
pub fn weight_window_2d<F: LinalgScalar>(
    cfg: &Transpose2d,
    kernel: &Kernel2d<F>,
    weight_y_start: usize,
    weight_x_start: usize,
    max_y_steps: usize,
    max_x_steps: usize,
    out: &mut [F],
) {
    let (th, tw) = (cfg.trfilt_height(), cfg.trfilt_width());
    let (nc, nf) = (cfg.n_chan, cfg.n_filt);
    debug_assert_eq!(out.len(), nf * th * tw * nc);

    let weights = kernel.weights();
    for ys in 0..th {
        let tap_y = weight_y_start as isize - (ys * cfg.stride_height) as isize;
        let y_ok = ys < max_y_steps && tap_y >= 0 && (tap_y as usize) < cfg.filt_height;
        for xs in 0..tw {
            let tap_x = weight_x_start as isize - (xs * cfg.stride_width) as isize;
            let x_ok = xs < max_x_steps && tap_x >= 0 && (tap_x as usize) < cfg.filt_width;
            for f in 0..nf {
                let row = f * th * tw * nc + ys * tw * nc + xs * nc;
                if y_ok && x_ok {
                    let src =
                        ((tap_y as usize * cfg.filt_width + tap_x as usize) * nc) * nf + f;
                    for c in 0..nc {
                        out[row + c] = weights[src + c * nf];
                    }
                } else {
                    out[row..row + nc].fill(F::zero());
                }
            }
        }
    }
}

// ── Random-access input gather ───────────────────────────────────────────

/// Gather the input window for one output position from a resident buffer.
/// Slot `step` reads column `start + step`; slots past `valid` are zeroed.
pub fn gather_input_1d<F: LinalgScalar>(
    cfg: &Transpose1d,
    data: &[F],
    start: usize,
    valid: usize,
    out: &mut [F],
) {
    let nc = cfg.n_chan;
    debug_assert_eq!(out.len(), cfg.window_len());
    for step in 0..cfg.trfilt_width() {
        let dst = step * nc;
        if step < valid {
            let src = (start + step) * nc;
            out[dst..dst + nc].copy_from_slice(&data[src..src + nc]);
        } else {
            out[dst..dst + nc].fill(F::zero());
        }
    }
}

/// 2D gather: slot `(ys, xs)` reads pixel `(start_y + ys, start_x + xs)`;
/// a slot is zeroed when either axis runs past its valid count.
#[allow(clippy::too_many_arguments)]
pub fn gather_input_2d<F: LinalgScalar>(
    cfg: &Transpose2d,
    data: &[F],
    start_y: usize,
    start_x: usize,
    valid_y: usize,
    valid_x: usize,
    out: &mut [F],
) {
    let (tw, nc) = (cfg.trfilt_width(), cfg.n_chan);
    debug_assert_eq!(out.len(), cfg.window_len());
    for ys in 0..cfg.trfilt_height() {
        for xs in 0..tw {
            let dst = (ys * tw + xs) * nc;
            if ys < valid_y && xs < valid_x {
                let src = ((start_y + ys) * cfg.in_width + start_x + xs) * nc;
                out[dst..dst + nc].copy_from_slice(&data[src..src + nc]);
            } else {
                out[dst..dst + nc].fill(F::zero());
            }
        }
    }
}

/// Gather the trailing window ending at column `last`: slot `step` reads
/// column `last − (trfilt − 1 − step)`, zero when that underflows the
/// input. This is the window a sequential pass holds right after consuming
/// column `last`.
pub fn gather_input_tail_1d<F: LinalgScalar>(
    cfg: &Transpose1d,
    data: &[F],
    last: usize,
    out: &mut [F],
) {
    let (trfilt, nc) = (cfg.trfilt_width(), cfg.n_chan);
    debug_assert_eq!(out.len(), cfg.window_len());
    for step in 0..trfilt {
        let dst = step * nc;
        let col = last as isize - (trfilt - 1 - step) as isize;
        if col >= 0 {
            let src = (col as usize) * nc;
            out[dst..dst + nc].copy_from_slice(&data[src..src + nc]);
        } else {
            out[dst..dst + nc].fill(F::zero());
        }
    }
}

// ── Sequential (shift) reconstruction ────────────────────────────────────

/// Shift every channel group of a 1D window one slot to the left and place
/// the newest pixel in the last slot.
pub fn shift_window_1d<F: Copy>(n_chan: usize, window: &mut [F], pixel: &[F]) {
    debug_assert_eq!(pixel.len(), n_chan);
    let last = window.len() - n_chan;
    window.copy_within(n_chan.., 0);
    window[last..].copy_from_slice(pixel);
}

/// Shift every row of a 2D window one column to the left and place the
/// newest column (one pixel per retained row, oldest row first) in the
/// right-most slots.
pub fn shift_window_2d<F: Copy>(
    trfilt_height: usize,
    trfilt_width: usize,
    n_chan: usize,
    window: &mut [F],
    column: &[F],
) {
    debug_assert_eq!(window.len(), trfilt_height * trfilt_width * n_chan);
    debug_assert_eq!(column.len(), trfilt_height * n_chan);
    let row_len = trfilt_width * n_chan;
    for ih in 0..trfilt_height {
        let row = &mut window[ih * row_len..(ih + 1) * row_len];
        row.copy_within(n_chan.., 0);
        row[row_len - n_chan..].copy_from_slice(&column[ih * n_chan..(ih + 1) * n_chan]);
    }
}

/// Fixed-depth shift register: `shift` pushes one value and returns the
/// value pushed `capacity` shifts earlier (zero until then). Backs the
/// per-row history of the 2D streaming driver.
#[derive(Debug, Clone)]
pub struct ShiftReg<F> {
    buf: Vec<F>,
    head: usize,
}

impl<F: LinalgScalar> ShiftReg<F> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "shift register needs a positive depth");
        Self {
            buf: vec![F::zero(); capacity],
            head: 0,
        }
    }

    /// Push `incoming`, return the element falling out of the far end.
    pub fn shift(&mut self, incoming: F) -> F {
        let popped = self.buf[self.head];
        self.buf[self.head] = incoming;
        self.head = (self.head + 1) % self.buf.len();
        popped
    }

    /// Return to the quiescent all-zero state.
    pub fn clear(&mut self) {
        self.buf.fill(F::zero());
        self.head = 0;
    }
}
