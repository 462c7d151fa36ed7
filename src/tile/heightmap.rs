//! The heightmap-1.0 terrain tile: a 65x65 grid of quantized heights plus
//! child flags and a water mask, gzipped on the wire.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::{ChildTiles, MASK_SIZE, TILE_SIZE};
use crate::error::{TerrainError, TerrainResult};
use crate::grid::TileCoordinate;

const TILE_CELL_COUNT: usize = (TILE_SIZE * TILE_SIZE) as usize;
const MASK_CELL_COUNT: usize = (MASK_SIZE * MASK_SIZE) as usize;

/// Heights are stored as 1/5 meter units above -1000 meters.
pub fn quantize_height(meters: f32) -> u16 {
    let quantized = (meters as f64 + 1000.0) * 5.0;
    quantized.clamp(0.0, u16::MAX as f64) as u16
}

#[derive(Debug, Clone)]
pub struct HeightmapTile {
    pub coord: TileCoordinate,
    pub heights: Vec<u16>,
    pub children: ChildTiles,
    /// One land/water byte, or a full `MASK_SIZE`^2 mask.
    mask: Vec<u8>,
}

impl HeightmapTile {
    /// Quantize a raster height window into a tile. Tiles start out as land
    /// with no children.
    pub fn from_raster_heights(coord: TileCoordinate, raster_heights: &[f32]) -> Self {
        debug_assert_eq!(raster_heights.len(), TILE_CELL_COUNT);
        let heights = raster_heights.iter().map(|&h| quantize_height(h)).collect();
        Self { coord, heights, children: ChildTiles::none(), mask: vec![0] }
    }

    pub fn set_is_water(&mut self) {
        self.mask = vec![1];
    }

    pub fn set_is_land(&mut self) {
        self.mask = vec![0];
    }

    pub fn is_water(&self) -> bool {
        self.mask.len() == 1 && self.mask[0] != 0
    }

    pub fn is_land(&self) -> bool {
        self.mask.len() == 1 && self.mask[0] == 0
    }

    pub fn has_water_mask(&self) -> bool {
        self.mask.len() == MASK_CELL_COUNT
    }

    pub fn set_water_mask(&mut self, mask: Vec<u8>) -> TerrainResult<()> {
        if mask.len() != MASK_CELL_COUNT {
            return Err(TerrainError::encode(format!(
                "water mask must have {MASK_CELL_COUNT} cells, got {}",
                mask.len()
            )));
        }
        self.mask = mask;
        Ok(())
    }

    pub fn mask(&self) -> &[u8] {
        &self.mask
    }

    /// The uncompressed wire form: little-endian heights, the child byte,
    /// then the mask.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TILE_CELL_COUNT * 2 + 1 + self.mask.len());
        for h in &self.heights {
            out.extend_from_slice(&h.to_le_bytes());
        }
        out.push(self.children.bits());
        out.extend_from_slice(&self.mask);
        out
    }

    /// Write the gzipped wire form.
    pub fn write<W: Write>(&self, writer: W) -> std::io::Result<()> {
        let mut encoder = GzEncoder::new(writer, Compression::default());
        encoder.write_all(&self.encode())?;
        encoder.finish()?;
        Ok(())
    }

    /// Decode the uncompressed wire form.
    pub fn decode(coord: TileCoordinate, data: &[u8]) -> TerrainResult<Self> {
        let heights_len = TILE_CELL_COUNT * 2;
        let mask_len = match data.len() {
            n if n == heights_len + 1 + 1 => 1,
            n if n == heights_len + 1 + MASK_CELL_COUNT => MASK_CELL_COUNT,
            n => {
                return Err(TerrainError::encode(format!(
                    "wrong byte count {n} for a heightmap tile"
                )))
            }
        };

        let mut heights = Vec::with_capacity(TILE_CELL_COUNT);
        for i in 0..TILE_CELL_COUNT {
            heights.push(u16::from_le_bytes([data[i * 2], data[i * 2 + 1]]));
        }
        let children = ChildTiles::from_bits(data[heights_len]);
        let mask = data[heights_len + 1..heights_len + 1 + mask_len].to_vec();

        Ok(Self { coord, heights, children, mask })
    }

    /// Decode a gzipped `.terrain` payload.
    pub fn read<R: Read>(coord: TileCoordinate, reader: R) -> TerrainResult<Self> {
        let mut decoder = GzDecoder::new(reader);
        let mut data = Vec::new();
        decoder.read_to_end(&mut data)?;
        Self::decode(coord, &data)
    }
}
