//! Command-line surface: compile a DTM raster into a Cesium terrain tileset.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, LevelFilter};

use terratile::geo::Srs;
use terratile::pipeline::{run_pipeline, PipelineOptions, TilePipeline};
use terratile::raster::{GeoTiffDataset, ResampleAlg};
use terratile::serialize::{write_layer_json, LayerDescription, TileSerializer};
use terratile::tile::TILE_SIZE;
use terratile::tiler::{HeightmapTiler, MeshTiler, TilerOptions};
use terratile::{Grid, TerrainError};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Profile {
    Geodetic,
    Mercator,
}

#[derive(Parser, Debug)]
#[command(
    name = "terratile",
    version,
    about = "Convert a GeoTIFF terrain model into Cesium terrain tiles"
)]
struct Args {
    /// The source raster (GeoTIFF).
    input_file: PathBuf,

    /// Output directory.
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Tiling grid profile.
    #[arg(short, long, value_enum, default_value = "geodetic")]
    profile: Profile,

    /// Output tile format: `terrain` (heightmap) or `mesh` (quantized mesh).
    #[arg(short, long, default_value = "terrain")]
    format: String,

    /// Deepest zoom level to produce (defaults to the native resolution).
    #[arg(short, long)]
    start_zoom: Option<u8>,

    /// Shallowest zoom level to produce.
    #[arg(short, long, default_value_t = 0)]
    end_zoom: u8,

    /// Number of worker threads (defaults to the CPU count).
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Warp resampling algorithm.
    #[arg(long, default_value = "average")]
    resampling: String,

    /// Skip tiles that already exist in the output directory.
    #[arg(short, long)]
    resume: bool,

    /// Write the oct-encoded vertex-normals extension (mesh format only).
    #[arg(long)]
    vertex_normals: bool,

    /// Scales the geometric error driving mesh simplification.
    #[arg(long, default_value_t = 1.0)]
    mesh_quality_factor: f64,

    /// Also write a layer.json sidecar describing the tileset.
    #[arg(long)]
    layer_json: bool,

    /// Only log errors.
    #[arg(short, long)]
    quiet: bool,

    /// Log debug detail.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.quiet {
        LevelFilter::Error
    } else if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env().filter_level(level).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            // 1 = input error, 2 = IO error.
            let io_error = e.chain().any(|cause| {
                cause.downcast_ref::<std::io::Error>().is_some()
                    || matches!(cause.downcast_ref::<TerrainError>(), Some(TerrainError::Io(_)))
            });
            ExitCode::from(if io_error { 2 } else { 1 })
        }
    }
}

fn run(args: Args) -> Result<()> {
    if !args.input_file.is_file() {
        bail!("input file {} not found", args.input_file.display());
    }

    let dataset = Arc::new(
        GeoTiffDataset::open(&args.input_file)
            .with_context(|| format!("opening {}", args.input_file.display()))?,
    );

    let grid = match args.profile {
        Profile::Geodetic => Grid::global_geodetic(TILE_SIZE, true)?,
        Profile::Mercator => Grid::global_mercator(TILE_SIZE)?,
    };

    let resample: ResampleAlg = args
        .resampling
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let options = TilerOptions { resample, ..TilerOptions::default() };

    let (pipeline, format_name) = match args.format.to_ascii_lowercase().as_str() {
        "terrain" => (
            TilePipeline::Heightmap(HeightmapTiler::new(dataset, grid.clone(), options)?),
            "heightmap-1.0",
        ),
        "mesh" => (
            TilePipeline::Mesh {
                tiler: MeshTiler::new(
                    dataset,
                    grid.clone(),
                    options,
                    args.mesh_quality_factor,
                )?,
                vertex_normals: args.vertex_normals,
            },
            "quantized-mesh-1.0",
        ),
        other => bail!("unsupported output format '{other}' (expected terrain or mesh)"),
    };

    let tiler = pipeline.tiler();
    if let Some(start) = args.start_zoom {
        if start < args.end_zoom {
            bail!("start zoom {start} is less than end zoom {}", args.end_zoom);
        }
    }
    info!(
        "dataset covers {:?}, native max zoom {}",
        tiler.bounds(),
        tiler.max_zoom()
    );

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;
    let serializer = TileSerializer::new(&args.output_dir, args.resume);

    let pipeline_options = PipelineOptions {
        start_zoom: args.start_zoom,
        end_zoom: args.end_zoom,
        threads: args.jobs.unwrap_or_else(|| {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        }),
    };

    let cancel = AtomicBool::new(false);
    let stats = run_pipeline(&pipeline, &serializer, &pipeline_options, &cancel)?;
    info!(
        "done: {} written, {} skipped, {} failed of {} tiles",
        stats.written, stats.skipped, stats.failed, stats.total
    );

    if args.layer_json {
        let tiler = pipeline.tiler();
        let start_zoom = args.start_zoom.unwrap_or(tiler.max_zoom()).min(tiler.max_zoom());
        let srs = match args.profile {
            Profile::Geodetic => Srs::WGS84,
            Profile::Mercator => Srs::WEB_MERCATOR,
        };
        let name = args
            .input_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        write_layer_json(
            &args.output_dir,
            &LayerDescription {
                name: &name,
                format: format_name,
                srs,
                bounds: *tiler.bounds(),
                start_zoom,
                end_zoom: args.end_zoom,
            },
            |zoom| tiler.tile_bounds_for_zoom(zoom),
        )?;
        info!("wrote {}", args.output_dir.join("layer.json").display());
    }

    if stats.failed > 0 {
        bail!("{} tile(s) failed with IO errors", stats.failed);
    }
    Ok(())
}
