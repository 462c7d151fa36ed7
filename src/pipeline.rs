//! The parallel tile-production pipeline.
//!
//! Workers share an atomic cursor over the grid iteration: each worker
//! advances its private iterator to the cursor position and atomically
//! post-increments it, so every tile coordinate is processed exactly once
//! in a total order consistent with the single-threaded sweep.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use log::{error, info};

use crate::error::{TerrainError, TerrainResult};
use crate::grid::{GridIterator, TileCoordinate};
use crate::raster::TileReader;
use crate::serialize::{SerializeOutcome, TileSerializer};
use crate::tile::encode_quantized_mesh;
use crate::tiler::{HeightmapTiler, MeshTiler, Tiler};

/// The two tile production paths.
pub enum TilePipeline {
    Heightmap(HeightmapTiler),
    Mesh { tiler: MeshTiler, vertex_normals: bool },
}

impl TilePipeline {
    pub fn tiler(&self) -> &Tiler {
        match self {
            TilePipeline::Heightmap(t) => t.tiler(),
            TilePipeline::Mesh { tiler, .. } => tiler.tiler(),
        }
    }

    /// Produce, encode, and persist one tile.
    fn process(
        &self,
        reader: &mut TileReader,
        coord: TileCoordinate,
        serializer: &TileSerializer,
    ) -> TerrainResult<SerializeOutcome> {
        if serializer.would_skip(&coord) {
            return Ok(SerializeOutcome::Skipped);
        }
        match self {
            TilePipeline::Heightmap(tiler) => {
                let tile = tiler.create_tile(reader, coord)?;
                serializer.serialize(&coord, &tile.encode())
            }
            TilePipeline::Mesh { tiler, vertex_normals } => {
                let tile = tiler.create_tile(reader, coord)?;
                let grid = tiler.tiler().grid();
                let payload = encode_quantized_mesh(
                    &tile,
                    &grid.tile_bounds(&coord),
                    grid.srs(),
                    *vertex_normals,
                )?;
                serializer.serialize(&coord, &payload)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Deepest zoom to produce; defaults to the tiler's maximum zoom and is
    /// clamped to it.
    pub start_zoom: Option<u8>,
    /// Shallowest zoom to produce.
    pub end_zoom: u8,
    pub threads: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        let threads = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self { start_zoom: None, end_zoom: 0, threads }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineStats {
    pub total: u64,
    pub written: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Run the pipeline to completion (or cancellation). Tile-level IO errors
/// fail that tile and are counted; any other error cancels the run.
pub fn run_pipeline(
    pipeline: &TilePipeline,
    serializer: &TileSerializer,
    options: &PipelineOptions,
    cancel: &AtomicBool,
) -> TerrainResult<PipelineStats> {
    let tiler = pipeline.tiler();
    let max_zoom = tiler.max_zoom();
    let start_zoom = options.start_zoom.unwrap_or(max_zoom).min(max_zoom);
    let end_zoom = options.end_zoom;
    let grid = tiler.grid();
    let bounds = *tiler.bounds();

    let total = GridIterator::new(grid, bounds, start_zoom, end_zoom)?.total_tiles();
    let threads = options.threads.max(1);
    info!(
        "producing {total} tile(s) over zooms {end_zoom}..={start_zoom} with {threads} worker(s)"
    );

    let cursor = AtomicU64::new(0);
    let written = AtomicU64::new(0);
    let skipped = AtomicU64::new(0);
    let failed = AtomicU64::new(0);
    let done = AtomicU64::new(0);

    let outcome: TerrainResult<()> = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(threads);
        for _ in 0..threads {
            let (cursor, written, skipped, failed, done) =
                (&cursor, &written, &skipped, &failed, &done);
            handles.push(scope.spawn(move || -> TerrainResult<()> {
                let mut reader = tiler.make_reader()?;
                let mut iter = GridIterator::new(grid, bounds, start_zoom, end_zoom)?;
                let mut consumed = 0u64;

                loop {
                    if cancel.load(Ordering::Relaxed) {
                        return Ok(());
                    }
                    let target = cursor.fetch_add(1, Ordering::SeqCst);
                    if target >= total {
                        return Ok(());
                    }

                    while consumed < target {
                        if iter.next().is_none() {
                            return Ok(());
                        }
                        consumed += 1;
                    }
                    let coord = match iter.next() {
                        Some(c) => c,
                        None => return Ok(()),
                    };
                    consumed += 1;

                    match pipeline.process(&mut reader, coord, serializer) {
                        Ok(SerializeOutcome::Written) => {
                            written.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(SerializeOutcome::Skipped) => {
                            skipped.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(TerrainError::Io(e)) => {
                            // Fatal for this tile only; other workers continue.
                            error!("tile {coord}: IO error: {e}");
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            error!("tile {coord}: {e}");
                            cancel.store(true, Ordering::Relaxed);
                            return Err(e);
                        }
                    }

                    let produced = done.fetch_add(1, Ordering::Relaxed) + 1;
                    if produced % 256 == 0 || produced == total {
                        info!("{produced}/{total} tiles");
                    }
                }
            }));
        }

        let mut first_error = None;
        for handle in handles {
            if let Err(e) = handle.join().expect("tile worker panicked") {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    });
    outcome?;

    Ok(PipelineStats {
        total,
        written: written.into_inner(),
        skipped: skipped.into_inner(),
        failed: failed.into_inner(),
    })
}
