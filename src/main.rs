use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;

use ndvi_zones::service::{exit_code, EXIT_FAILURE};
use ndvi_zones::{
    BandZones, BoundedExecutor, FieldPolygon, GdalRaster, ProcessWorker, Ring, SplitStrategy, ZoneError,
    ZonePipeline, ZoningParams, ZoningWorker,
};

/// NDVI subfield zoning
#[derive(Parser)]
#[command(name = "ndvi-zones")]
#[command(about = "Split a field into NDVI zones with representative sampling points")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (only errors)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Pixel-based zoning: vectorize NDVI bands and merge small regions
    Zones {
        #[command(flatten)]
        common: CommonArgs,
        /// Upper bound on the number of zones
        #[arg(long)]
        max_subfields: Option<usize>,
        /// Trace one row chunk at a time instead of the whole raster
        #[arg(long)]
        chunked: bool,
        /// Smooth valid pixels with a 3x3 mean before classification
        #[arg(long)]
        smoothing: bool,
    },
    /// Grid-based zoning: classify regular grid cells by their average
    Grid {
        #[command(flatten)]
        common: CommonArgs,
        /// Target number of grid cells
        #[arg(long)]
        regions: Option<usize>,
        /// Lay the grid over the minimum rotated rectangle of the field
        #[arg(long)]
        rotated: bool,
    },
}

#[derive(clap::Args)]
struct CommonArgs {
    /// NDVI raster (any GDAL-readable format)
    raster: PathBuf,
    /// Field boundary as a JSON ring list, exterior first
    #[arg(short, long)]
    field: PathBuf,
    /// JSON parameter file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Number of NDVI bands
    #[arg(short, long)]
    bands: Option<usize>,
    /// Seed for representative point sampling
    #[arg(long)]
    seed: Option<u64>,
    /// Run in a separate process killed after this many seconds
    #[arg(long)]
    timeout: Option<f64>,
    /// Output JSON file (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Internal: compute and print the result as a worker process
    #[arg(long, hide = true)]
    in_worker: bool,
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.quiet {
        log::LevelFilter::Error
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Err(e) = run(args) {
        error!("Command failed: {:#}", e);

        let code = match e.downcast_ref::<ZoneError>() {
            Some(zone_error) => exit_code(zone_error),
            None => EXIT_FAILURE,
        };
        process::exit(code);
    }
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Commands::Zones {
            common,
            max_subfields,
            chunked,
            smoothing,
        } => {
            let mut params = load_params(&common)?;
            params.strategy = SplitStrategy::PixelBased;
            if let Some(max_subfields) = max_subfields {
                params.max_subfields = max_subfields;
            }
            if chunked {
                params.vectorization = ndvi_zones::Vectorization::Chunked;
            }
            params.smoothing |= smoothing;
            cmd_determine(&common, params)
        }
        Commands::Grid {
            common,
            regions,
            rotated,
        } => {
            let mut params = load_params(&common)?;
            params.strategy = SplitStrategy::GridBased;
            if let Some(regions) = regions {
                params.grid_regions = regions;
            }
            params.rotated_frame |= rotated;
            cmd_determine(&common, params)
        }
    }
}

fn load_params(common: &CommonArgs) -> Result<ZoningParams> {
    let mut params = match &common.config {
        Some(path) => ZoningParams::from_json_file(path)
            .with_context(|| format!("Failed to load parameters from {}", path.display()))?,
        None => ZoningParams::default(),
    };
    if let Some(bands) = common.bands {
        params.bands = bands;
    }
    if let Some(timeout) = common.timeout {
        params.timeout_secs = timeout;
    }
    params.validate()?;
    Ok(params)
}

fn cmd_determine(common: &CommonArgs, params: ZoningParams) -> Result<()> {
    if common.in_worker {
        let bands = determine(common, params)?;
        let stdout = std::io::stdout();
        let mut writer = BufWriter::new(stdout.lock());
        serde_json::to_writer(&mut writer, &bands)?;
        writer.flush()?;
        return Ok(());
    }

    let bands = match common.timeout {
        Some(_) => determine_in_worker(common, &params)?,
        None => determine(common, params)?,
    };

    let zone_count: usize = bands.iter().map(|b| b.zones.len()).sum();
    info!("{} zones in {} bands", zone_count, bands.len());

    match &common.output {
        Some(path) => {
            let writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(writer, &bands)?;
            info!("Zones written to {}", path.display());
        }
        None => {
            let stdout = std::io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            serde_json::to_writer_pretty(&mut writer, &bands)?;
            writeln!(writer)?;
        }
    }
    Ok(())
}

fn determine(common: &CommonArgs, params: ZoningParams) -> Result<Vec<BandZones>> {
    let field = read_field(&common.field)?;
    let raster = GdalRaster::open(&common.raster)?;
    let pipeline = ZonePipeline::new(params)?;
    let bands = match common.seed {
        Some(seed) => pipeline.determine_with_rng(&field, &raster, &mut StdRng::seed_from_u64(seed))?,
        None => pipeline.determine(&field, &raster)?,
    };
    Ok(bands)
}

/// Run the same computation in a child process killed at the timeout
fn determine_in_worker(common: &CommonArgs, params: &ZoningParams) -> Result<Vec<BandZones>> {
    let field = read_field(&common.field)?;
    let exe = std::env::current_exe().context("Failed to locate the current executable")?;
    let executor = BoundedExecutor::new(params.timeout()).with_poll_interval(params.poll_interval());

    info!("Running zoning in a worker process (timeout {:?})", executor.timeout());
    let bands = ProcessWorker::new(exe)
        .with_seed(common.seed)
        .determine(&executor, params, &common.raster, &field)?;
    Ok(bands)
}

fn read_field(path: &Path) -> Result<FieldPolygon> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read field boundary {}", path.display()))?;
    let rings: Vec<Ring> = serde_json::from_str(&content)?;
    Ok(FieldPolygon::from_rings(rings)?)
}
