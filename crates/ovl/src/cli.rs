//! CLI definitions and argument types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use ovl::{BlockLocation, OverlayConfig};

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for failure.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "ovl")]
#[command(about = "Thumb-2 RAM overlay placement - moves hot basic blocks into RAM")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (sets RUST_LOG=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output (only show warnings and errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the routines, blocks and loops found in assembler files
    Analyze {
        /// Assembler files
        #[arg(value_name = "FILES", required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        estimate: EstimateArgs,
    },
    /// Write the placement problem as GLPK MathProg data
    Export {
        /// Assembler files
        #[arg(value_name = "FILES", required = true)]
        files: Vec<PathBuf>,

        /// Output data file
        #[arg(short, long, default_value = "ilp.data")]
        output: PathBuf,

        #[command(flatten)]
        estimate: EstimateArgs,

        #[command(flatten)]
        placement: PlacementArgs,

        #[command(flatten)]
        size: SizeArgs,
    },
    /// Rewrite assembler files for a placement, writing <FILE>.out
    Transform {
        /// Assembler files
        #[arg(value_name = "FILES", required = true)]
        files: Vec<PathBuf>,

        /// Invoke glpsol to choose the blocks placed in RAM
        #[arg(long, requires = "model", conflicts_with = "placement_file")]
        solve: bool,

        /// MathProg model used with --solve
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Read the placement from an earlier solver output instead
        #[arg(long = "placement", value_name = "FILE")]
        placement_file: Option<PathBuf>,

        /// Register reserved for indirect branches
        #[arg(long, default_value = "r5")]
        register: String,

        #[command(flatten)]
        estimate: EstimateArgs,

        #[command(flatten)]
        placement: PlacementArgs,

        #[command(flatten)]
        size: SizeArgs,
    },
}

/// Execution count options.
#[derive(Args)]
pub struct EstimateArgs {
    /// File giving the number of times each basic block runs
    #[arg(short, long, value_name = "FILE")]
    pub iterations: Option<PathBuf>,

    /// Iterations assumed per loop
    #[arg(short, long, default_value = "10")]
    pub estimate: u64,
}

/// Placement problem options.
#[derive(Args)]
pub struct PlacementArgs {
    /// Place this block in RAM, given as file:line
    #[arg(long = "bb", value_name = "BB")]
    pub blocks: Vec<BlockLocation>,

    /// Only place the blocks given with --bb in RAM
    #[arg(long)]
    pub specified_only: bool,

    /// RAM bytes available for relocated code
    #[arg(long, default_value = "1000")]
    pub maxram: u32,

    /// Allowed growth of the total cycle count (2 allows doubling)
    #[arg(short = 't', long, default_value = "1.5")]
    pub maxtime: f64,
}

/// Instruction size oracle options.
#[derive(Args)]
pub struct SizeArgs {
    /// Cross toolchain prefix (found on PATH when not given)
    #[arg(long, value_name = "PREFIX")]
    pub toolchain: Option<String>,

    /// Instruction size cache (default: $HOME/.asmsize.json)
    #[arg(long, value_name = "FILE")]
    pub size_cache: Option<PathBuf>,
}

/// Build the overlay configuration from parsed arguments.
pub fn build_config(estimate: &EstimateArgs, placement: Option<&PlacementArgs>) -> OverlayConfig {
    let mut config = OverlayConfig::new().with_loop_estimate(estimate.estimate);
    if let Some(placement) = placement {
        config = config
            .with_spare_ram(placement.maxram)
            .with_max_cycle_factor(placement.maxtime)
            .with_specified_only(placement.specified_only);
        for block in &placement.blocks {
            config = config.with_forced(block.clone());
        }
    }
    config
}
