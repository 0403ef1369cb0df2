use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use deconv::blob::KernelBlob;
use deconv::config::{Strategy, Transpose1d, Transpose2d};
use deconv::conv::batch::conv_1d_phases;
use deconv::conv::dense::GemmEngine;
use deconv::weights::{Kernel1d, Kernel2d};
use deconv::{conv_1d_transpose, conv_2d_transpose};

/// Transposed-convolution compute core — exercise and inspection CLI.
///
/// Runs synthetic upsampling passes, cross-checks the batch and streaming
/// drivers against each other, and round-trips kernel parameter blobs.
#[derive(Parser)]
#[command(name = "deconv", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Layer shape shared by the compute subcommands.
#[derive(clap::Args, Clone)]
struct Shape {
    /// Input width in pixels.
    #[arg(long, default_value_t = 16)]
    width: usize,

    /// Input height; omit for a 1D layer.
    #[arg(long)]
    height: Option<usize>,

    /// Channels per input pixel.
    #[arg(long, default_value_t = 2)]
    chan: usize,

    /// Filters (channels per output position).
    #[arg(long, default_value_t = 2)]
    filt: usize,

    /// Kernel extent (square in 2D).
    #[arg(long, default_value_t = 3)]
    kernel: usize,

    /// Upsampling stride (square in 2D).
    #[arg(long, default_value_t = 2)]
    stride: usize,

    /// RNG seed for the synthetic kernel and input.
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one synthetic pass and print output statistics.
    Run {
        #[command(flatten)]
        shape: Shape,

        /// Execution strategy.
        #[arg(long, default_value = "batch", value_enum)]
        strategy: Strategy,

        /// Multiply-accumulate sharing factor.
        #[arg(long, default_value_t = 1)]
        reuse: usize,

        /// JSON file holding a full layer configuration; overrides the
        /// shape, strategy and reuse flags.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run every driver on the same synthetic pass and compare results.
    Verify {
        #[command(flatten)]
        shape: Shape,
    },

    /// Write a synthetic kernel parameter blob.
    Export {
        #[command(flatten)]
        shape: Shape,

        /// Output file path.
        #[arg(short, long, default_value = "./kernel.dkw")]
        output: PathBuf,
    },

    /// Print the header of a kernel parameter blob.
    Inspect {
        /// Blob file path.
        path: PathBuf,
    },
}

fn random_values(len: usize, rng: &mut StdRng) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

fn print_stats(label: &str, values: &[f32], elapsed: std::time::Duration) {
    let min = values.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    println!("{label}");
    println!("  outputs:  {:>10}", values.len());
    println!("  min:      {min:>10.4}");
    println!("  max:      {max:>10.4}");
    println!("  mean:     {mean:>10.4}");
    println!("  elapsed:  {:>10.3} ms", elapsed.as_secs_f64() * 1e3);
}

fn run_1d(cfg: &Transpose1d, seed: u64) -> Result<()> {
    cfg.validate()?;
    let mut rng = StdRng::seed_from_u64(seed);
    let kernel = Kernel1d::from_parts(
        random_values(cfg.filt_width * cfg.n_chan * cfg.n_filt, &mut rng),
        random_values(cfg.n_filt, &mut rng),
        cfg,
    )?;
    let data = random_values(cfg.in_width * cfg.n_chan, &mut rng);

    let t0 = Instant::now();
    let out = conv_1d_transpose(cfg, &kernel, &data)?;
    print_stats(
        &format!("1D {} pass, {} → {} pixels", cfg.strategy, cfg.in_width, cfg.out_width),
        &out,
        t0.elapsed(),
    );
    Ok(())
}

fn run_2d(cfg: &Transpose2d, seed: u64) -> Result<()> {
    cfg.validate()?;
    let mut rng = StdRng::seed_from_u64(seed);
    let kernel = Kernel2d::from_parts(
        random_values(cfg.filt_height * cfg.filt_width * cfg.n_chan * cfg.n_filt, &mut rng),
        random_values(cfg.n_filt, &mut rng),
        cfg,
    )?;
    let data = random_values(cfg.in_height * cfg.in_width * cfg.n_chan, &mut rng);

    let t0 = Instant::now();
    let out = conv_2d_transpose(cfg, &kernel, &data)?;
    print_stats(
        &format!(
            "2D {} pass, {}×{} → {}×{} pixels",
            cfg.strategy, cfg.in_height, cfg.in_width, cfg.out_height, cfg.out_width
        ),
        &out,
        t0.elapsed(),
    );
    Ok(())
}

fn run_pass(
    shape: &Shape,
    strategy: Strategy,
    reuse: usize,
    config: Option<&Path>,
) -> Result<()> {
    if let Some(path) = config {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        // 2D configurations carry the height fields; try them first
        if let Ok(cfg) = serde_json::from_str::<Transpose2d>(&text) {
            return run_2d(&cfg, shape.seed);
        }
        let cfg: Transpose1d = serde_json::from_str(&text)
            .with_context(|| format!("{} holds no valid layer configuration", path.display()))?;
        return run_1d(&cfg, shape.seed);
    }

    match shape.height {
        None => {
            let cfg =
                Transpose1d::new(shape.width, shape.chan, shape.filt, shape.kernel, shape.stride)
                    .with_strategy(strategy)
                    .with_reuse_factor(reuse);
            run_1d(&cfg, shape.seed)
        }
        Some(height) => {
            let cfg = Transpose2d::new(
                height,
                shape.width,
                shape.chan,
                shape.filt,
                shape.kernel,
                shape.kernel,
                shape.stride,
                shape.stride,
            )
            .with_strategy(strategy)
            .with_reuse_factor(reuse);
            run_2d(&cfg, shape.seed)
        }
    }
}

fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
}

fn verify(shape: &Shape) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(shape.seed);
    match shape.height {
        None => {
            let cfg = Transpose1d::new(shape.width, shape.chan, shape.filt, shape.kernel, shape.stride);
            cfg.validate()?;
            let kernel = Kernel1d::from_parts(
                random_values(cfg.filt_width * cfg.n_chan * cfg.n_filt, &mut rng),
                random_values(cfg.n_filt, &mut rng),
                &cfg,
            )?;
            let data = random_values(cfg.in_width * cfg.n_chan, &mut rng);

            let batch = conv_1d_transpose(&cfg, &kernel, &data)?;
            let phases = conv_1d_phases(&cfg, &kernel, &data, &GemmEngine)?;
            let streamed = conv_1d_transpose(
                &cfg.clone().with_strategy(Strategy::Streaming),
                &kernel,
                &data,
            )?;

            let d_phase = max_abs_diff(&batch, &phases);
            let d_stream = max_abs_diff(&batch, &streamed);
            println!("1D cross-check over {} outputs", batch.len());
            println!("  batch vs phase-major: {d_phase:e}");
            println!("  batch vs streaming:   {d_stream:e}");
            anyhow::ensure!(
                d_phase <= 1e-5 && d_stream <= 1e-5,
                "drivers disagree beyond float accumulation noise"
            );
            println!("  OK");
        }
        Some(height) => {
            let cfg = Transpose2d::new(
                height,
                shape.width,
                shape.chan,
                shape.filt,
                shape.kernel,
                shape.kernel,
                shape.stride,
                shape.stride,
            );
            cfg.validate()?;
            let kernel = Kernel2d::from_parts(
                random_values(
                    cfg.filt_height * cfg.filt_width * cfg.n_chan * cfg.n_filt,
                    &mut rng,
                ),
                random_values(cfg.n_filt, &mut rng),
                &cfg,
            )?;
            let data = random_values(cfg.in_height * cfg.in_width * cfg.n_chan, &mut rng);

            let batch = conv_2d_transpose(&cfg, &kernel, &data)?;
            let streamed = conv_2d_transpose(
                &cfg.clone().with_strategy(Strategy::Streaming),
                &kernel,
                &data,
            )?;

            let d_stream = max_abs_diff(&batch, &streamed);
            println!("2D cross-check over {} outputs", batch.len());
            println!("  batch vs streaming: {d_stream:e}");
            anyhow::ensure!(
                d_stream <= 1e-5,
                "drivers disagree beyond float accumulation noise"
            );
            println!("  OK");
        }
    }
    Ok(())
}

fn export(shape: &Shape, output: &Path) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(shape.seed);
    let blob = match shape.height {
        None => {
            let cfg = Transpose1d::new(shape.width, shape.chan, shape.filt, shape.kernel, shape.stride);
            let kernel = Kernel1d::from_parts(
                random_values(cfg.filt_width * cfg.n_chan * cfg.n_filt, &mut rng),
                random_values(cfg.n_filt, &mut rng),
                &cfg,
            )?;
            KernelBlob::from_kernel_1d(&kernel, &cfg)
        }
        Some(height) => {
            let cfg = Transpose2d::new(
                height,
                shape.width,
                shape.chan,
                shape.filt,
                shape.kernel,
                shape.kernel,
                shape.stride,
                shape.stride,
            );
            let kernel = Kernel2d::from_parts(
                random_values(
                    cfg.filt_height * cfg.filt_width * cfg.n_chan * cfg.n_filt,
                    &mut rng,
                ),
                random_values(cfg.n_filt, &mut rng),
                &cfg,
            )?;
            KernelBlob::from_kernel_2d(&kernel, &cfg)
        }
    };
    let bytes = blob.to_bytes()?;
    std::fs::write(output, &bytes)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Wrote {} ({} bytes)", output.display(), bytes.len());
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let blob = KernelBlob::from_bytes(&bytes)?;
    println!("{}", path.display());
    println!("  rank:        {}", blob.rank);
    if blob.rank == 2 {
        println!("  filt_height: {}", blob.filt_height);
    }
    println!("  filt_width:  {}", blob.filt_width);
    println!("  n_chan:      {}", blob.n_chan);
    println!("  n_filt:      {}", blob.n_filt);
    println!("  weights:     {}", blob.weights.len());
    println!("  bias:        {}", blob.bias.len());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { shape, strategy, reuse, config } => {
            run_pass(&shape, strategy, reuse, config.as_deref())?;
        }
        Commands::Verify { shape } => verify(&shape)?,
        Commands::Export { shape, output } => export(&shape, &output)?,
        Commands::Inspect { path } => inspect(&path)?,
    }

    Ok(())
}
