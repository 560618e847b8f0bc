//! Command implementations.

mod analyze;
mod export;
mod transform;

use std::path::PathBuf;

use ovl::{AssemblerOracle, CachedOracle, Pipeline, SizeCache};
use ovl_size::{DEFAULT_TOOLCHAIN_PREFIX, default_cache_path, find_toolchain};
use tracing::warn;

use crate::cli::{Cli, Commands, EstimateArgs, SizeArgs};
use crate::terminal;

/// Dispatch CLI command to the appropriate handler.
pub fn run_command(cli: &Cli) -> i32 {
    match &cli.command {
        Commands::Analyze { files, estimate } => analyze::cmd_analyze(files, estimate),
        Commands::Export {
            files,
            output,
            estimate,
            placement,
            size,
        } => export::cmd_export(files, output, estimate, placement, size),
        Commands::Transform {
            files,
            solve,
            model,
            placement_file,
            register,
            estimate,
            placement,
            size,
        } => transform::cmd_transform(&transform::TransformArgs {
            files,
            solve: *solve,
            model: model.as_deref(),
            placement_file: placement_file.as_deref(),
            register,
            estimate,
            placement,
            size,
        }),
    }
}

/// Load, build and weight the program: the steps every command shares.
fn prepare(pipeline: &mut Pipeline, files: &[PathBuf], estimate: &EstimateArgs) -> ovl::Result<()> {
    pipeline.load(files)?;
    pipeline.build()?;
    pipeline.estimate_iterations();
    if let Some(profile) = &estimate.iterations {
        let applied = pipeline.apply_profile(profile)?;
        if applied == 0 {
            terminal::warning("iteration profile matched no basic block");
        }
    }
    Ok(())
}

/// Assembler-backed size oracle fronted by the on-disk cache.
struct SizeOracleHandle {
    oracle: CachedOracle<AssemblerOracle>,
    cache_path: Option<PathBuf>,
}

impl SizeOracleHandle {
    fn open(args: &SizeArgs) -> ovl::Result<Self> {
        let prefix = args.toolchain.clone().or_else(find_toolchain).unwrap_or_else(|| {
            warn!(prefix = DEFAULT_TOOLCHAIN_PREFIX, "no ARM toolchain found on PATH");
            DEFAULT_TOOLCHAIN_PREFIX.to_string()
        });
        let cache_path = args.size_cache.clone().or_else(default_cache_path);
        let cache = cache_path
            .as_deref()
            .map_or_else(|| Ok(SizeCache::new()), SizeCache::open)?;
        Ok(Self {
            oracle: CachedOracle::new(cache, AssemblerOracle::new(prefix)),
            cache_path,
        })
    }

    /// Persist new cache entries.
    fn close(mut self) -> ovl::Result<()> {
        let (hits, misses) = self.oracle.stats();
        tracing::debug!(hits, misses, "size oracle cache");
        if let Some(path) = &self.cache_path {
            self.oracle.cache_mut().flush(path)?;
        }
        Ok(())
    }
}
