//! Binary container format for serialized layer parameters.
//!
//! Format (all multi-byte values are big-endian):
//! ```text
//! [magic:       4 bytes]  0x44 0x4B 0x57 0x00  ("DKW\0")
//! [version:     1 byte ]  0x01
//! [rank:        1 byte ]  1 or 2 spatial dimensions
//! [filt_height: 4 bytes]  1 for rank-1 kernels
//! [filt_width:  4 bytes]
//! [n_chan:      4 bytes]
//! [n_filt:      4 bytes]
//! [weights:     filt_height·filt_width·n_chan·n_filt f32 values]
//! [bias:        n_filt f32 values]
//! ```
//!
//! The weight payload uses the flat layout documented in [`crate::weights`].

use std::io::{Cursor, Read, Write};

use anyhow::{bail, ensure, Context, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::config::{Transpose1d, Transpose2d};
use crate::weights::{Kernel1d, Kernel2d};

const MAGIC: [u8; 4] = [0x44, 0x4B, 0x57, 0x00]; // "DKW\0"
const VERSION: u8 = 1;

/// Serialized weights and bias of one layer, together with the shape
/// header needed to validate them against a configuration.
#[derive(Debug, Clone)]
pub struct KernelBlob {
    pub rank: u8,
    pub filt_height: u32,
    pub filt_width: u32,
    pub n_chan: u32,
    pub n_filt: u32,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

impl KernelBlob {
    /// Wrap a 1D kernel for serialization.
    pub fn from_kernel_1d(kernel: &Kernel1d<f32>, cfg: &Transpose1d) -> Self {
        Self {
            rank: 1,
            filt_height: 1,
            filt_width: cfg.filt_width as u32,
            n_chan: cfg.n_chan as u32,
            n_filt: cfg.n_filt as u32,
            weights: kernel.weights().to_vec(),
            bias: kernel.bias().to_vec(),
        }
    }

    /// Wrap a 2D kernel for serialization.
    pub fn from_kernel_2d(kernel: &Kernel2d<f32>, cfg: &Transpose2d) -> Self {
        Self {
            rank: 2,
            filt_height: cfg.filt_height as u32,
            filt_width: cfg.filt_width as u32,
            n_chan: cfg.n_chan as u32,
            n_filt: cfg.n_filt as u32,
            weights: kernel.weights().to_vec(),
            bias: kernel.bias().to_vec(),
        }
    }

    /// Unwrap into a 1D kernel, checking the header against the
    /// configuration. A shape mismatch is fatal.
    pub fn into_kernel_1d(self, cfg: &Transpose1d) -> Result<Kernel1d<f32>> {
        ensure!(self.rank == 1, "blob holds a rank-{} kernel, expected rank 1", self.rank);
        ensure!(
            self.filt_width as usize == cfg.filt_width
                && self.n_chan as usize == cfg.n_chan
                && self.n_filt as usize == cfg.n_filt,
            "blob shape {}×{}×{} does not match configured {}×{}×{}",
            self.filt_width,
            self.n_chan,
            self.n_filt,
            cfg.filt_width,
            cfg.n_chan,
            cfg.n_filt
        );
        Kernel1d::from_parts(self.weights, self.bias, cfg)
    }

    /// Unwrap into a 2D kernel, checking the header against the
    /// configuration. A shape mismatch is fatal.
    pub fn into_kernel_2d(self, cfg: &Transpose2d) -> Result<Kernel2d<f32>> {
        ensure!(self.rank == 2, "blob holds a rank-{} kernel, expected rank 2", self.rank);
        ensure!(
            self.filt_height as usize == cfg.filt_height
                && self.filt_width as usize == cfg.filt_width
                && self.n_chan as usize == cfg.n_chan
                && self.n_filt as usize == cfg.n_filt,
            "blob shape {}×{}×{}×{} does not match configured {}×{}×{}×{}",
            self.filt_height,
            self.filt_width,
            self.n_chan,
            self.n_filt,
            cfg.filt_height,
            cfg.filt_width,
            cfg.n_chan,
            cfg.n_filt
        );
        Kernel2d::from_parts(self.weights, self.bias, cfg)
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_all(&MAGIC)?;
        buf.write_u8(VERSION)?;
        buf.write_u8(self.rank)?;
        buf.write_u32::<BigEndian>(self.filt_height)?;
        buf.write_u32::<BigEndian>(self.filt_width)?;
        buf.write_u32::<BigEndian>(self.n_chan)?;
        buf.write_u32::<BigEndian>(self.n_filt)?;
        for &w in &self.weights {
            buf.write_f32::<BigEndian>(w)?;
        }
        for &b in &self.bias {
            buf.write_f32::<BigEndian>(b)?;
        }
        Ok(buf)
    }

    /// Deserialize from bytes, validating magic, version and payload size.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(data);

        let mut magic = [0u8; 4];
        cur.read_exact(&mut magic).context("failed to read blob magic")?;
        ensure!(magic == MAGIC, "invalid blob magic: expected DKW\\0");

        let version = cur.read_u8().context("failed to read blob version")?;
        ensure!(
            version == VERSION,
            "unsupported blob version {version}, expected {VERSION}"
        );

        let rank = cur.read_u8().context("failed to read kernel rank")?;
        if rank != 1 && rank != 2 {
            bail!("unsupported kernel rank: {rank}");
        }

        let filt_height = cur.read_u32::<BigEndian>().context("failed to read filt_height")?;
        let filt_width = cur.read_u32::<BigEndian>().context("failed to read filt_width")?;
        let n_chan = cur.read_u32::<BigEndian>().context("failed to read n_chan")?;
        let n_filt = cur.read_u32::<BigEndian>().context("failed to read n_filt")?;
        if rank == 1 && filt_height != 1 {
            bail!("rank-1 blob declares filt_height {filt_height}");
        }

        let n_weights = filt_height as usize
            * filt_width as usize
            * n_chan as usize
            * n_filt as usize;
        let mut weights = Vec::with_capacity(n_weights);
        for i in 0..n_weights {
            weights.push(
                cur.read_f32::<BigEndian>()
                    .with_context(|| format!("failed to read weight {i}"))?,
            );
        }

        let mut bias = Vec::with_capacity(n_filt as usize);
        for i in 0..n_filt as usize {
            bias.push(
                cur.read_f32::<BigEndian>()
                    .with_context(|| format!("failed to read bias {i}"))?,
            );
        }

        ensure!(
            cur.position() == data.len() as u64,
            "blob has {} trailing bytes",
            data.len() as u64 - cur.position()
        );

        Ok(Self {
            rank,
            filt_height,
            filt_width,
            n_chan,
            n_filt,
            weights,
            bias,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_1d() {
        let cfg = Transpose1d::new(4, 2, 3, 3, 2);
        let weights: Vec<f32> = (0..3 * 2 * 3).map(|i| i as f32 * 0.5).collect();
        let bias = vec![1.0f32, -2.0, 0.25];
        let kernel = Kernel1d::from_parts(weights.clone(), bias.clone(), &cfg).unwrap();

        let bytes = KernelBlob::from_kernel_1d(&kernel, &cfg).to_bytes().unwrap();
        let back = KernelBlob::from_bytes(&bytes).unwrap().into_kernel_1d(&cfg).unwrap();
        assert_eq!(back.weights(), &weights[..]);
        assert_eq!(back.bias(), &bias[..]);
    }

    #[test]
    fn rejects_bad_magic() {
        let cfg = Transpose1d::new(2, 1, 1, 2, 2);
        let kernel = Kernel1d::from_parts(vec![0.0; 2], vec![0.0], &cfg).unwrap();
        let mut bytes = KernelBlob::from_kernel_1d(&kernel, &cfg).to_bytes().unwrap();
        bytes[0] ^= 0xFF;
        assert!(KernelBlob::from_bytes(&bytes).is_err());
    }

    #[test]
    fn rejects_truncated_payload() {
        let cfg = Transpose1d::new(2, 1, 1, 2, 2);
        let kernel = Kernel1d::from_parts(vec![0.0; 2], vec![0.0], &cfg).unwrap();
        let bytes = KernelBlob::from_kernel_1d(&kernel, &cfg).to_bytes().unwrap();
        assert!(KernelBlob::from_bytes(&bytes[..bytes.len() - 2]).is_err());
    }

    #[test]
    fn rejects_shape_mismatch_against_config() {
        let cfg = Transpose2d::new(2, 2, 1, 2, 3, 3, 2, 2);
        let kernel =
            Kernel2d::from_parts(vec![0.0; 3 * 3 * 2], vec![0.0; 2], &cfg).unwrap();
        let bytes = KernelBlob::from_kernel_2d(&kernel, &cfg).to_bytes().unwrap();

        let mut other = cfg.clone();
        other.filt_width = 5;
        let err = KernelBlob::from_bytes(&bytes)
            .unwrap()
            .into_kernel_2d(&other)
            .unwrap_err()
            .to_string();
        assert!(err.contains("does not match"), "unexpected message: {err}");
    }

    #[test]
    fn rank_mismatch_is_fatal() {
        let cfg1 = Transpose1d::new(2, 1, 1, 2, 2);
        let kernel = Kernel1d::from_parts(vec![0.0; 2], vec![0.0], &cfg1).unwrap();
        let bytes = KernelBlob::from_kernel_1d(&kernel, &cfg1).to_bytes().unwrap();

        let cfg2 = Transpose2d::new(2, 2, 1, 1, 1, 2, 1, 2);
        assert!(KernelBlob::from_bytes(&bytes).unwrap().into_kernel_2d(&cfg2).is_err());
    }
}
