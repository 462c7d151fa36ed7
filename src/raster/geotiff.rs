//! Native GeoTIFF dataset reader.
//!
//! Parses classic and BigTIFF containers in either byte order, walking the
//! IFD chain so that reduced-resolution subfiles become the overview chain.
//! Georeferencing comes from the ModelPixelScale/ModelTiepoint (or
//! ModelTransformation) tags, the SRS from the GeoKey directory, and the
//! band nodata from the GDAL_NODATA ASCII tag.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use super::{GeoTransform, RasterDataset, RasterError};
use crate::geo::Srs;

const TAG_NEW_SUBFILE_TYPE: u16 = 254;
const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_COMPRESSION: u16 = 259;
const TAG_STRIP_OFFSETS: u16 = 273;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_ROWS_PER_STRIP: u16 = 278;
const TAG_STRIP_BYTE_COUNTS: u16 = 279;
const TAG_PREDICTOR: u16 = 317;
const TAG_TILE_WIDTH: u16 = 322;
const TAG_TILE_LENGTH: u16 = 323;
const TAG_TILE_OFFSETS: u16 = 324;
const TAG_TILE_BYTE_COUNTS: u16 = 325;
const TAG_SAMPLE_FORMAT: u16 = 339;
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_MODEL_TRANSFORMATION: u16 = 34264;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const COMPRESSION_NONE: u16 = 1;
const COMPRESSION_LZW: u16 = 5;
const COMPRESSION_DEFLATE: u16 = 8;
const COMPRESSION_DEFLATE_ALT: u16 = 32946;

const SAMPLE_FORMAT_UINT: u16 = 1;
const SAMPLE_FORMAT_INT: u16 = 2;
const SAMPLE_FORMAT_FLOAT: u16 = 3;

const PREDICTOR_NONE: u16 = 1;
const PREDICTOR_HORIZONTAL: u16 = 2;

const GEOKEY_GEOGRAPHIC_TYPE: u16 = 2048;
const GEOKEY_PROJECTED_CS_TYPE: u16 = 3072;
const GEOKEY_USER_DEFINED: u16 = 32767;

/// Decoded chunks cached per dataset; cleared wholesale when full.
const CHUNK_CACHE_CAP: usize = 256;

/// One IFD: the full-resolution image or a reduced-resolution overview.
#[derive(Debug, Clone)]
struct Level {
    width: u32,
    height: u32,
    bits_per_sample: u16,
    sample_format: u16,
    compression: u16,
    predictor: u16,
    samples_per_pixel: u16,
    /// Chunk layout. Striped images are modeled as full-width chunks of
    /// `rows_per_strip` rows.
    chunk_width: u32,
    chunk_height: u32,
    tiled: bool,
    chunk_offsets: Vec<u64>,
    chunk_byte_counts: Vec<u64>,
    chunks_across: u32,
    chunks_down: u32,
}

impl Level {
    /// Rows actually present in chunk row `cy` (the last strip may be short).
    fn chunk_rows(&self, cy: u32) -> u32 {
        if self.tiled {
            self.chunk_height
        } else {
            self.chunk_height.min(self.height - cy * self.chunk_height)
        }
    }
}

#[derive(Debug)]
pub struct GeoTiffDataset {
    file: Mutex<File>,
    big_endian: bool,
    levels: Vec<Level>,
    geo_transform: GeoTransform,
    srs: Option<Srs>,
    nodata: Option<f64>,
    cache: Mutex<HashMap<(usize, u32, u32), Vec<f32>>>,
}

impl GeoTiffDataset {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RasterError> {
        let mut file = File::open(path.as_ref())?;

        let mut header = [0u8; 16];
        file.seek(SeekFrom::Start(0))?;
        let got = file.read(&mut header)?;
        if got < 8 {
            return Err(RasterError::InvalidTiffHeader("header too short".into()));
        }

        let big_endian = match &header[0..2] {
            b"II" => false,
            b"MM" => true,
            _ => return Err(RasterError::InvalidTiffHeader("invalid byte order mark".into())),
        };
        let magic = read_u16(&header, 2, big_endian);
        let bigtiff = match magic {
            42 => false,
            43 => true,
            other => {
                return Err(RasterError::InvalidTiffHeader(format!(
                    "invalid magic number {other}"
                )))
            }
        };

        let first_ifd_offset = if bigtiff {
            read_u64(&header, 8, big_endian)
        } else {
            read_u32(&header, 4, big_endian) as u64
        };

        let mut levels = Vec::new();
        let mut geo_tags: Option<GeoTags> = None;
        let mut ifd_offset = first_ifd_offset;
        while ifd_offset != 0 && levels.len() < 20 {
            let parsed = parse_ifd(&mut file, ifd_offset, big_endian, bigtiff)?;
            if geo_tags.is_none() {
                geo_tags = Some(parsed.geo);
            }
            levels.push(parsed.level);
            ifd_offset = parsed.next_offset;
        }
        if levels.is_empty() {
            return Err(RasterError::InvalidIfd("file contains no IFDs".into()));
        }

        let geo = geo_tags.unwrap();
        let geo_transform = geo.geo_transform()?;
        let srs = geo.srs();
        let nodata = geo.nodata();

        Ok(Self {
            file: Mutex::new(file),
            big_endian,
            levels,
            geo_transform,
            srs,
            nodata,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn overview_count(&self) -> usize {
        self.levels.len() - 1
    }

    fn read_at(&self, offset: u64, length: u64) -> Result<Vec<u8>, RasterError> {
        let mut buf = vec![0u8; length as usize];
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Decode one chunk to f32, consulting the chunk cache first.
    fn read_chunk(&self, level_idx: usize, cx: u32, cy: u32) -> Result<Vec<f32>, RasterError> {
        let key = (level_idx, cx, cy);
        if let Some(hit) = self.cache.lock().unwrap().get(&key) {
            return Ok(hit.clone());
        }

        let level = &self.levels[level_idx];
        if cx >= level.chunks_across || cy >= level.chunks_down {
            return Err(RasterError::ReadFailed(format!(
                "chunk ({cx}, {cy}) out of range at level {level_idx}"
            )));
        }
        let chunk_idx = (cy * level.chunks_across + cx) as usize;
        if chunk_idx >= level.chunk_offsets.len() || chunk_idx >= level.chunk_byte_counts.len() {
            return Err(RasterError::ReadFailed(format!(
                "chunk ({cx}, {cy}) out of range at level {level_idx}"
            )));
        }

        let raw = self.read_at(level.chunk_offsets[chunk_idx], level.chunk_byte_counts[chunk_idx])?;
        let mut data = decompress(&raw, level.compression)?;

        let rows = level.chunk_rows(cy);
        let row_samples = level.chunk_width as usize * level.samples_per_pixel as usize;
        if level.predictor == PREDICTOR_HORIZONTAL {
            undo_horizontal_predictor(&mut data, level, row_samples, rows as usize, self.big_endian)?;
        } else if level.predictor != PREDICTOR_NONE {
            return Err(RasterError::InvalidIfd(format!(
                "unsupported predictor {}",
                level.predictor
            )));
        }

        let heights = decode_samples(
            &data,
            level.bits_per_sample,
            level.sample_format,
            level.samples_per_pixel,
            level.chunk_width as usize * rows as usize,
            self.big_endian,
        )?;

        let mut cache = self.cache.lock().unwrap();
        if cache.len() >= CHUNK_CACHE_CAP {
            cache.clear();
        }
        cache.insert(key, heights.clone());
        Ok(heights)
    }
}

impl RasterDataset for GeoTiffDataset {
    fn size(&self) -> (u32, u32) {
        (self.levels[0].width, self.levels[0].height)
    }

    fn geo_transform(&self) -> GeoTransform {
        self.geo_transform
    }

    fn srs(&self) -> Option<Srs> {
        self.srs
    }

    fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    fn overview_sizes(&self) -> Vec<(u32, u32)> {
        self.levels[1..].iter().map(|l| (l.width, l.height)).collect()
    }

    fn read_region(
        &self,
        level_idx: usize,
        x0: u32,
        y0: u32,
        width: u32,
        height: u32,
    ) -> Result<Vec<f32>, RasterError> {
        let level = self
            .levels
            .get(level_idx)
            .ok_or_else(|| RasterError::ReadFailed(format!("no level {level_idx}")))?;
        if x0 + width > level.width || y0 + height > level.height {
            return Err(RasterError::ReadFailed(format!(
                "region {x0},{y0} {width}x{height} outside level of {}x{}",
                level.width, level.height
            )));
        }

        let mut out = vec![0f32; width as usize * height as usize];
        let cw = level.chunk_width;
        let ch = level.chunk_height;

        let cx0 = x0 / cw;
        let cx1 = (x0 + width - 1) / cw;
        let cy0 = y0 / ch;
        let cy1 = (y0 + height - 1) / ch;

        for cy in cy0..=cy1 {
            for cx in cx0..=cx1 {
                let chunk = self.read_chunk(level_idx, cx, cy)?;
                let rows = level.chunk_rows(cy);

                // Intersection of the chunk with the requested region.
                let gx0 = (cx * cw).max(x0);
                let gx1 = ((cx + 1) * cw).min(x0 + width);
                let gy0 = (cy * ch).max(y0);
                let gy1 = (cy * ch + rows).min(y0 + height);

                for gy in gy0..gy1 {
                    let src_row = (gy - cy * ch) as usize;
                    let src_start = src_row * cw as usize + (gx0 - cx * cw) as usize;
                    let dst_start =
                        (gy - y0) as usize * width as usize + (gx0 - x0) as usize;
                    let n = (gx1 - gx0) as usize;
                    out[dst_start..dst_start + n]
                        .copy_from_slice(&chunk[src_start..src_start + n]);
                }
            }
        }

        Ok(out)
    }
}

/// Georeferencing tags collected from the first IFD.
#[derive(Default)]
struct GeoTags {
    pixel_scale: Option<Vec<f64>>,
    tiepoint: Option<Vec<f64>>,
    transformation: Option<Vec<f64>>,
    geo_keys: Option<Vec<u16>>,
    nodata_ascii: Option<String>,
}

impl GeoTags {
    fn geo_transform(&self) -> Result<GeoTransform, RasterError> {
        if let Some(m) = &self.transformation {
            if m.len() >= 8 {
                return Ok(GeoTransform([m[3], m[0], m[1], m[7], m[4], m[5]]));
            }
        }
        match (&self.pixel_scale, &self.tiepoint) {
            (Some(scale), Some(tie)) if scale.len() >= 2 && tie.len() >= 6 => {
                let (sx, sy) = (scale[0], scale[1]);
                let (i, j, x, y) = (tie[0], tie[1], tie[3], tie[4]);
                Ok(GeoTransform([x - i * sx, sx, 0.0, y + j * sy, 0.0, -sy]))
            }
            _ => Err(RasterError::MissingGeoreference(
                "no ModelTransformation and no ModelPixelScale + ModelTiepoint".into(),
            )),
        }
    }

    fn srs(&self) -> Option<Srs> {
        let keys = self.geo_keys.as_ref()?;
        if keys.len() < 4 {
            return None;
        }
        // Header: directory version, revision, minor revision, key count;
        // then 4-short entries (id, location, count, value).
        let count = keys[3] as usize;
        let mut geographic = None;
        let mut projected = None;
        for k in 0..count {
            let base = 4 + k * 4;
            if base + 3 >= keys.len() {
                break;
            }
            let (id, location, value) = (keys[base], keys[base + 1], keys[base + 3]);
            if location != 0 {
                continue;
            }
            match id {
                GEOKEY_GEOGRAPHIC_TYPE if value != GEOKEY_USER_DEFINED => {
                    geographic = Some(value as u32)
                }
                GEOKEY_PROJECTED_CS_TYPE if value != GEOKEY_USER_DEFINED => {
                    projected = Some(value as u32)
                }
                _ => {}
            }
        }
        projected.or(geographic).map(Srs::from_epsg)
    }

    fn nodata(&self) -> Option<f64> {
        self.nodata_ascii
            .as_ref()
            .and_then(|s| s.trim_matches(|c: char| c == '\0' || c.is_whitespace()).parse().ok())
    }
}

struct ParsedIfd {
    level: Level,
    geo: GeoTags,
    next_offset: u64,
}

fn parse_ifd(
    file: &mut File,
    offset: u64,
    big_endian: bool,
    bigtiff: bool,
) -> Result<ParsedIfd, RasterError> {
    let entry_size: u64 = if bigtiff { 20 } else { 12 };
    let count_size: u64 = if bigtiff { 8 } else { 2 };
    let next_size: u64 = if bigtiff { 8 } else { 4 };

    let count_bytes = read_exact_at(file, offset, count_size)?;
    let entry_count = if bigtiff {
        read_u64(&count_bytes, 0, big_endian)
    } else {
        read_u16(&count_bytes, 0, big_endian) as u64
    };
    if entry_count > 4096 {
        return Err(RasterError::InvalidIfd(format!("implausible entry count {entry_count}")));
    }

    let ifd_data = read_exact_at(file, offset + count_size, entry_count * entry_size + next_size)?;

    let mut width = 0u32;
    let mut height = 0u32;
    let mut bits_per_sample = 8u16;
    let mut sample_format = SAMPLE_FORMAT_UINT;
    let mut compression = COMPRESSION_NONE;
    let mut predictor = PREDICTOR_NONE;
    let mut samples_per_pixel = 1u16;
    let mut tile_width = 0u32;
    let mut tile_height = 0u32;
    let mut rows_per_strip = 0u32;
    let mut tile_offsets: Option<Vec<u64>> = None;
    let mut tile_byte_counts: Option<Vec<u64>> = None;
    let mut strip_offsets: Option<Vec<u64>> = None;
    let mut strip_byte_counts: Option<Vec<u64>> = None;
    let mut geo = GeoTags::default();

    for i in 0..entry_count {
        let eo = (i * entry_size) as usize;
        let tag = read_u16(&ifd_data, eo, big_endian);
        let field_type = read_u16(&ifd_data, eo + 2, big_endian);
        let count = if bigtiff {
            read_u64(&ifd_data, eo + 4, big_endian)
        } else {
            read_u32(&ifd_data, eo + 4, big_endian) as u64
        };
        let value_pos = eo + if bigtiff { 12 } else { 8 };
        let inline_cap: u64 = if bigtiff { 8 } else { 4 };

        // Where the tag payload lives: inline in the entry, or at an offset.
        let payload_size = type_size(field_type) as u64 * count;
        let payload: Vec<u8> = if payload_size <= inline_cap {
            ifd_data[value_pos..value_pos + payload_size as usize].to_vec()
        } else {
            let data_offset = if bigtiff {
                read_u64(&ifd_data, value_pos, big_endian)
            } else {
                read_u32(&ifd_data, value_pos, big_endian) as u64
            };
            read_exact_at(file, data_offset, payload_size)?
        };

        let scalar = |bytes: &[u8]| read_typed(bytes, 0, field_type, big_endian);

        match tag {
            TAG_NEW_SUBFILE_TYPE => {}
            TAG_IMAGE_WIDTH => width = scalar(&payload) as u32,
            TAG_IMAGE_LENGTH => height = scalar(&payload) as u32,
            TAG_BITS_PER_SAMPLE => bits_per_sample = scalar(&payload) as u16,
            TAG_COMPRESSION => compression = scalar(&payload) as u16,
            TAG_SAMPLE_FORMAT => sample_format = scalar(&payload) as u16,
            TAG_PREDICTOR => predictor = scalar(&payload) as u16,
            TAG_SAMPLES_PER_PIXEL => samples_per_pixel = scalar(&payload) as u16,
            TAG_TILE_WIDTH => tile_width = scalar(&payload) as u32,
            TAG_TILE_LENGTH => tile_height = scalar(&payload) as u32,
            TAG_ROWS_PER_STRIP => rows_per_strip = scalar(&payload) as u32,
            TAG_TILE_OFFSETS => {
                tile_offsets = Some(read_typed_array(&payload, field_type, count, big_endian))
            }
            TAG_TILE_BYTE_COUNTS => {
                tile_byte_counts = Some(read_typed_array(&payload, field_type, count, big_endian))
            }
            TAG_STRIP_OFFSETS => {
                strip_offsets = Some(read_typed_array(&payload, field_type, count, big_endian))
            }
            TAG_STRIP_BYTE_COUNTS => {
                strip_byte_counts = Some(read_typed_array(&payload, field_type, count, big_endian))
            }
            TAG_MODEL_PIXEL_SCALE => {
                geo.pixel_scale = Some(read_f64_array(&payload, count, big_endian))
            }
            TAG_MODEL_TIEPOINT => {
                geo.tiepoint = Some(read_f64_array(&payload, count, big_endian))
            }
            TAG_MODEL_TRANSFORMATION => {
                geo.transformation = Some(read_f64_array(&payload, count, big_endian))
            }
            TAG_GEO_KEY_DIRECTORY => {
                let shorts = (0..count as usize)
                    .map(|k| read_u16(&payload, k * 2, big_endian))
                    .collect();
                geo.geo_keys = Some(shorts);
            }
            TAG_GDAL_NODATA => {
                geo.nodata_ascii = Some(String::from_utf8_lossy(&payload).into_owned());
            }
            _ => {}
        }
    }

    if width == 0 || height == 0 {
        return Err(RasterError::InvalidIfd("IFD missing image dimensions".into()));
    }

    let (tiled, chunk_width, chunk_height, chunk_offsets, chunk_byte_counts) =
        match (tile_offsets, strip_offsets) {
            (Some(offsets), _) => {
                if tile_width == 0 || tile_height == 0 {
                    return Err(RasterError::InvalidIfd("tiled IFD missing tile size".into()));
                }
                let counts = tile_byte_counts
                    .ok_or_else(|| RasterError::InvalidIfd("missing TileByteCounts".into()))?;
                (true, tile_width, tile_height, offsets, counts)
            }
            (None, Some(offsets)) => {
                let counts = strip_byte_counts
                    .ok_or_else(|| RasterError::InvalidIfd("missing StripByteCounts".into()))?;
                let rps = if rows_per_strip == 0 { height } else { rows_per_strip };
                (false, width, rps, offsets, counts)
            }
            (None, None) => {
                return Err(RasterError::InvalidIfd("IFD has neither tiles nor strips".into()))
            }
        };

    let chunks_across = (width + chunk_width - 1) / chunk_width;
    let chunks_down = (height + chunk_height - 1) / chunk_height;

    let next_offset = if bigtiff {
        read_u64(&ifd_data, (entry_count * entry_size) as usize, big_endian)
    } else {
        read_u32(&ifd_data, (entry_count * entry_size) as usize, big_endian) as u64
    };

    Ok(ParsedIfd {
        level: Level {
            width,
            height,
            bits_per_sample,
            sample_format,
            compression,
            predictor,
            samples_per_pixel,
            chunk_width,
            chunk_height,
            tiled,
            chunk_offsets,
            chunk_byte_counts,
            chunks_across,
            chunks_down,
        },
        geo,
        next_offset,
    })
}

fn read_exact_at(file: &mut File, offset: u64, length: u64) -> Result<Vec<u8>, RasterError> {
    let mut buf = vec![0u8; length as usize];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut buf)?;
    Ok(buf)
}

fn decompress(data: &[u8], compression: u16) -> Result<Vec<u8>, RasterError> {
    match compression {
        COMPRESSION_NONE => Ok(data.to_vec()),
        COMPRESSION_DEFLATE | COMPRESSION_DEFLATE_ALT => {
            use flate2::read::ZlibDecoder;
            let mut decoder = ZlibDecoder::new(data);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| RasterError::DecompressionError(e.to_string()))?;
            Ok(out)
        }
        COMPRESSION_LZW => decompress_lzw(data),
        other => Err(RasterError::UnsupportedCompression(other)),
    }
}

fn decompress_lzw(data: &[u8]) -> Result<Vec<u8>, RasterError> {
    const CLEAR_CODE: u16 = 256;
    const EOI_CODE: u16 = 257;

    let mut output = Vec::new();
    let mut table: Vec<Vec<u8>> = (0u16..256).map(|i| vec![i as u8]).collect();
    table.push(Vec::new()); // CLEAR_CODE
    table.push(Vec::new()); // EOI_CODE

    let mut bits = LzwBitReader::new(data);
    let mut code_size = 9u8;
    let mut prev_code: Option<u16> = None;

    loop {
        let code = match bits.read_bits(code_size) {
            Some(c) => c,
            None => break,
        };

        if code == EOI_CODE {
            break;
        }
        if code == CLEAR_CODE {
            table.truncate(258);
            code_size = 9;
            prev_code = None;
            continue;
        }

        let entry = if (code as usize) < table.len() {
            table[code as usize].clone()
        } else if code as usize == table.len() {
            if let Some(pc) = prev_code {
                let mut e = table[pc as usize].clone();
                e.push(e[0]);
                e
            } else {
                return Err(RasterError::DecompressionError("LZW: invalid code sequence".into()));
            }
        } else {
            return Err(RasterError::DecompressionError(format!(
                "LZW: code {} out of range (table size {})",
                code,
                table.len()
            )));
        };

        output.extend_from_slice(&entry);

        if let Some(pc) = prev_code {
            if table.len() < 4096 {
                let mut new_entry = table[pc as usize].clone();
                new_entry.push(entry[0]);
                table.push(new_entry);

                // TIFF writers switch code width one code early.
                if table.len() + 1 == (1 << code_size) && code_size < 12 {
                    code_size += 1;
                }
            }
        }

        prev_code = Some(code);
    }

    Ok(output)
}

struct LzwBitReader<'a> {
    data: &'a [u8],
    byte_pos: usize,
    bit_pos: u8,
}

impl<'a> LzwBitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, byte_pos: 0, bit_pos: 0 }
    }

    fn read_bits(&mut self, count: u8) -> Option<u16> {
        let mut result: u32 = 0;
        let mut bits_read = 0u8;

        while bits_read < count {
            if self.byte_pos >= self.data.len() {
                return None;
            }

            let bits_available = 8 - self.bit_pos;
            let bits_needed = count - bits_read;
            let bits_to_read = bits_available.min(bits_needed);

            let mask = ((1u16 << bits_to_read) - 1) as u8;
            let shift = 8 - self.bit_pos - bits_to_read;
            let bits = (self.data[self.byte_pos] >> shift) & mask;

            result = (result << bits_to_read) | (bits as u32);
            bits_read += bits_to_read;
            self.bit_pos += bits_to_read;

            if self.bit_pos >= 8 {
                self.bit_pos = 0;
                self.byte_pos += 1;
            }
        }

        Some(result as u16)
    }
}

fn undo_horizontal_predictor(
    data: &mut [u8],
    level: &Level,
    row_samples: usize,
    rows: usize,
    big_endian: bool,
) -> Result<(), RasterError> {
    let bytes_per_sample = (level.bits_per_sample as usize + 7) / 8;
    if level.sample_format == SAMPLE_FORMAT_FLOAT {
        return Err(RasterError::InvalidIfd(
            "horizontal predictor on float samples is not supported".into(),
        ));
    }
    // Differencing runs over sample values in the file's byte order.
    let get = |d: &[u8], pos: usize, n: usize| -> u32 {
        let mut v = 0u32;
        for k in 0..n {
            let byte = d[pos + k] as u32;
            v = if big_endian { (v << 8) | byte } else { v | (byte << (8 * k)) };
        }
        v
    };
    let put = |d: &mut [u8], pos: usize, n: usize, v: u32| {
        for k in 0..n {
            let shift = if big_endian { 8 * (n - 1 - k) } else { 8 * k };
            d[pos + k] = ((v >> shift) & 0xFF) as u8;
        }
    };

    if bytes_per_sample > 4 {
        return Err(RasterError::InvalidIfd(format!(
            "horizontal predictor on {bytes_per_sample}-byte samples is not supported"
        )));
    }

    let row_bytes = row_samples * bytes_per_sample;
    let mask = if bytes_per_sample == 4 { u32::MAX } else { (1u32 << (8 * bytes_per_sample)) - 1 };
    for row in 0..rows {
        let start = row * row_bytes;
        if start + row_bytes > data.len() {
            break;
        }
        for i in 1..row_samples {
            let prev = get(data, start + (i - 1) * bytes_per_sample, bytes_per_sample);
            let cur = get(data, start + i * bytes_per_sample, bytes_per_sample);
            put(
                data,
                start + i * bytes_per_sample,
                bytes_per_sample,
                cur.wrapping_add(prev) & mask,
            );
        }
    }
    Ok(())
}

fn decode_samples(
    data: &[u8],
    bits_per_sample: u16,
    sample_format: u16,
    samples_per_pixel: u16,
    pixel_count: usize,
    big_endian: bool,
) -> Result<Vec<f32>, RasterError> {
    let stride = samples_per_pixel as usize;
    let bps = (bits_per_sample as usize + 7) / 8;
    let mut heights = Vec::with_capacity(pixel_count);

    let need = pixel_count * stride * bps;
    if data.len() < need {
        return Err(RasterError::InvalidIfd(format!(
            "chunk data too short: {} < {need}",
            data.len()
        )));
    }

    let at = |i: usize| i * stride * bps;
    match (bits_per_sample, sample_format) {
        (32, SAMPLE_FORMAT_FLOAT) => {
            for i in 0..pixel_count {
                let b: [u8; 4] = data[at(i)..at(i) + 4].try_into().unwrap();
                heights.push(if big_endian { f32::from_be_bytes(b) } else { f32::from_le_bytes(b) });
            }
        }
        (64, SAMPLE_FORMAT_FLOAT) => {
            for i in 0..pixel_count {
                let b: [u8; 8] = data[at(i)..at(i) + 8].try_into().unwrap();
                let v = if big_endian { f64::from_be_bytes(b) } else { f64::from_le_bytes(b) };
                heights.push(v as f32);
            }
        }
        (16, SAMPLE_FORMAT_UINT) => {
            for i in 0..pixel_count {
                let b: [u8; 2] = data[at(i)..at(i) + 2].try_into().unwrap();
                let v = if big_endian { u16::from_be_bytes(b) } else { u16::from_le_bytes(b) };
                heights.push(v as f32);
            }
        }
        (16, SAMPLE_FORMAT_INT) => {
            for i in 0..pixel_count {
                let b: [u8; 2] = data[at(i)..at(i) + 2].try_into().unwrap();
                let v = if big_endian { i16::from_be_bytes(b) } else { i16::from_le_bytes(b) };
                heights.push(v as f32);
            }
        }
        (32, SAMPLE_FORMAT_UINT) => {
            for i in 0..pixel_count {
                let b: [u8; 4] = data[at(i)..at(i) + 4].try_into().unwrap();
                let v = if big_endian { u32::from_be_bytes(b) } else { u32::from_le_bytes(b) };
                heights.push(v as f32);
            }
        }
        (32, SAMPLE_FORMAT_INT) => {
            for i in 0..pixel_count {
                let b: [u8; 4] = data[at(i)..at(i) + 4].try_into().unwrap();
                let v = if big_endian { i32::from_be_bytes(b) } else { i32::from_le_bytes(b) };
                heights.push(v as f32);
            }
        }
        (8, _) => {
            for i in 0..pixel_count {
                heights.push(data[at(i)] as f32);
            }
        }
        (bits, format) => return Err(RasterError::UnsupportedSampleFormat { bits, format }),
    }

    Ok(heights)
}

fn read_u16(data: &[u8], offset: usize, big_endian: bool) -> u16 {
    if offset + 2 > data.len() {
        return 0;
    }
    let b = [data[offset], data[offset + 1]];
    if big_endian {
        u16::from_be_bytes(b)
    } else {
        u16::from_le_bytes(b)
    }
}

fn read_u32(data: &[u8], offset: usize, big_endian: bool) -> u32 {
    if offset + 4 > data.len() {
        return 0;
    }
    let b: [u8; 4] = data[offset..offset + 4].try_into().unwrap();
    if big_endian {
        u32::from_be_bytes(b)
    } else {
        u32::from_le_bytes(b)
    }
}

fn read_u64(data: &[u8], offset: usize, big_endian: bool) -> u64 {
    if offset + 8 > data.len() {
        return 0;
    }
    let b: [u8; 8] = data[offset..offset + 8].try_into().unwrap();
    if big_endian {
        u64::from_be_bytes(b)
    } else {
        u64::from_le_bytes(b)
    }
}

fn read_f64(data: &[u8], offset: usize, big_endian: bool) -> f64 {
    if offset + 8 > data.len() {
        return 0.0;
    }
    let b: [u8; 8] = data[offset..offset + 8].try_into().unwrap();
    if big_endian {
        f64::from_be_bytes(b)
    } else {
        f64::from_le_bytes(b)
    }
}

fn read_typed(data: &[u8], offset: usize, field_type: u16, big_endian: bool) -> u64 {
    match field_type {
        1 | 2 | 6 | 7 => data.get(offset).copied().unwrap_or(0) as u64,
        3 => read_u16(data, offset, big_endian) as u64,
        4 => read_u32(data, offset, big_endian) as u64,
        16 | 17 => read_u64(data, offset, big_endian),
        _ => read_u32(data, offset, big_endian) as u64,
    }
}

fn read_typed_array(data: &[u8], field_type: u16, count: u64, big_endian: bool) -> Vec<u64> {
    let size = type_size(field_type);
    (0..count as usize)
        .map(|i| read_typed(data, i * size, field_type, big_endian))
        .collect()
}

fn read_f64_array(data: &[u8], count: u64, big_endian: bool) -> Vec<f64> {
    (0..count as usize).map(|i| read_f64(data, i * 8, big_endian)).collect()
}

fn type_size(field_type: u16) -> usize {
    match field_type {
        1 | 2 | 6 | 7 => 1,
        3 | 8 => 2,
        4 | 9 | 11 => 4,
        5 | 10 | 12 | 16 | 17 | 18 => 8,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_tiff() {
        let dir = std::env::temp_dir();
        let path = dir.join("terratile_not_a_tiff.bin");
        std::fs::write(&path, b"PNG\x0d\x0a").unwrap();
        let err = GeoTiffDataset::open(&path).unwrap_err();
        assert!(matches!(err, RasterError::InvalidTiffHeader(_)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn lzw_round_trip_simple() {
        // A tiny LZW stream: CLEAR, 'A', 'B', 'B', EOI encoded at 9 bits.
        let mut bits: Vec<bool> = Vec::new();
        let mut push = |code: u16| {
            for i in (0..9).rev() {
                bits.push(code & (1 << i) != 0);
            }
        };
        push(256); // clear
        push(b'A' as u16);
        push(b'B' as u16);
        push(b'B' as u16);
        push(257); // EOI
        let mut bytes = vec![0u8; (bits.len() + 7) / 8];
        for (i, b) in bits.iter().enumerate() {
            if *b {
                bytes[i / 8] |= 1 << (7 - (i % 8));
            }
        }
        let decoded = decompress_lzw(&bytes).unwrap();
        assert_eq!(decoded, b"ABB");
    }

    #[test]
    fn nodata_parse() {
        let geo = GeoTags { nodata_ascii: Some("-32768\0".into()), ..Default::default() };
        assert_eq!(geo.nodata(), Some(-32768.0));
    }

    #[test]
    fn geokey_directory_epsg() {
        // Version 1.1.0, one key: GeographicTypeGeoKey = 4326.
        let geo = GeoTags {
            geo_keys: Some(vec![1, 1, 0, 1, GEOKEY_GEOGRAPHIC_TYPE, 0, 1, 4326]),
            ..Default::default()
        };
        assert_eq!(geo.srs(), Some(Srs::from_epsg(4326)));
    }

    #[test]
    fn pixel_scale_tiepoint_geotransform() {
        let geo = GeoTags {
            pixel_scale: Some(vec![0.1, 0.1, 0.0]),
            tiepoint: Some(vec![0.0, 0.0, 0.0, -180.0, 90.0, 0.0]),
            ..Default::default()
        };
        let gt = geo.geo_transform().unwrap();
        assert_eq!(gt.origin(), (-180.0, 90.0));
        assert_eq!(gt.pixel_width(), 0.1);
        assert_eq!(gt.pixel_height(), -0.1);
    }
}
