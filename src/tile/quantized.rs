//! The quantized-mesh-1.0 wire format.
//!
//! Layout: header (tile centre, height range, bounding sphere, horizon
//! occlusion point), zigzag-delta-encoded u/v/height vertex buffers,
//! high-water-mark encoded triangle indices, the four edge index lists, and
//! optionally the oct-encoded vertex normals extension.

use std::collections::HashSet;

use glam::{DVec2, DVec3};

use super::MeshTile;
use crate::error::{TerrainError, TerrainResult};
use crate::geo::{
    geodetic_to_ecef, mercator_to_geodetic, Srs, WGS84_SEMI_MAJOR_AXIS, WGS84_SEMI_MINOR_AXIS,
};
use crate::geometry::{BoundingBox, BoundingSphere, CrsBounds};

/// Maximum quantized u/v/height value.
const QUANTIZED_MAX: f64 = 32767.0;

/// Vertex-normals extension id.
const EXTENSION_OCT_NORMALS: u8 = 1;

/// Encode a mesh tile to the quantized-mesh wire form (uncompressed).
///
/// `tile_bounds` is the tile extent in the grid CRS; `srs` identifies that
/// CRS so vertices can be brought to the ellipsoid for the header fields.
pub fn encode_quantized_mesh(
    tile: &MeshTile,
    tile_bounds: &CrsBounds,
    srs: Srs,
    write_vertex_normals: bool,
) -> TerrainResult<Vec<u8>> {
    let mesh = &tile.mesh;
    if mesh.indices.len() < 3 || mesh.indices.len() % 3 != 0 {
        return Err(TerrainError::encode(format!(
            "mesh for tile {} has a malformed index list of length {}",
            tile.coord,
            mesh.indices.len()
        )));
    }
    if let Some(&bad) = mesh.indices.iter().find(|&&i| i as usize >= mesh.vertices.len()) {
        return Err(TerrainError::encode(format!(
            "mesh for tile {} references vertex {bad} of {}",
            tile.coord,
            mesh.vertices.len()
        )));
    }

    // The high-water-mark index encoding needs vertices in first-use order;
    // reindex so each new index is at most one past the highest seen.
    let mut remap = vec![u32::MAX; mesh.vertices.len()];
    let mut order: Vec<u32> = Vec::with_capacity(mesh.vertices.len());
    for &i in &mesh.indices {
        if remap[i as usize] == u32::MAX {
            remap[i as usize] = order.len() as u32;
            order.push(i);
        }
    }
    for (i, slot) in remap.iter_mut().enumerate() {
        if *slot == u32::MAX {
            *slot = order.len() as u32;
            order.push(i as u32);
        }
    }
    let vertices: Vec<DVec3> = order.iter().map(|&i| mesh.vertices[i as usize]).collect();
    let indices: Vec<u32> = mesh.indices.iter().map(|&i| remap[i as usize]).collect();

    // Ellipsoid (ECEF) positions drive every header field.
    let cartesian: Vec<DVec3> = vertices
        .iter()
        .map(|v| {
            let geodetic = match srs {
                s if s == Srs::WEB_MERCATOR => {
                    let ll = mercator_to_geodetic(DVec2::new(v.x, v.y));
                    (ll.x, ll.y)
                }
                _ => (v.x, v.y),
            };
            geodetic_to_ecef(geodetic.0, geodetic.1, v.z)
        })
        .collect();

    let cartesian_bounds = BoundingBox::from_points(&cartesian);
    let sphere = BoundingSphere::from_points(&cartesian);
    let occlusion = horizon_occlusion_point(&cartesian, sphere.center);

    let (mut min_height, mut max_height) = (f64::INFINITY, f64::NEG_INFINITY);
    for v in &vertices {
        min_height = min_height.min(v.z);
        max_height = max_height.max(v.z);
    }

    let mut out = Vec::with_capacity(128 + mesh.vertices.len() * 6 + mesh.indices.len() * 2);

    // Header.
    let center = cartesian_bounds.center();
    push_f64(&mut out, center.x);
    push_f64(&mut out, center.y);
    push_f64(&mut out, center.z);
    push_f32(&mut out, min_height as f32);
    push_f32(&mut out, max_height as f32);
    push_f64(&mut out, sphere.center.x);
    push_f64(&mut out, sphere.center.y);
    push_f64(&mut out, sphere.center.z);
    push_f64(&mut out, sphere.radius);
    push_f64(&mut out, occlusion.x);
    push_f64(&mut out, occlusion.y);
    push_f64(&mut out, occlusion.z);

    // Quantize positions against the tile extent and the height range.
    let quantize = |origin: f64, extent: f64, value: f64| -> u16 {
        if extent <= 0.0 {
            return 0;
        }
        ((value - origin) / extent * QUANTIZED_MAX)
            .round()
            .clamp(0.0, QUANTIZED_MAX) as u16
    };
    let us: Vec<u16> = vertices
        .iter()
        .map(|v| quantize(tile_bounds.min_x(), tile_bounds.width(), v.x))
        .collect();
    let vs: Vec<u16> = vertices
        .iter()
        .map(|v| quantize(tile_bounds.min_y(), tile_bounds.height(), v.y))
        .collect();
    let hs: Vec<u16> = vertices
        .iter()
        .map(|v| quantize(min_height, max_height - min_height, v.z))
        .collect();

    let vertex_count = vertices.len() as u32;
    push_u32(&mut out, vertex_count);
    for buffer in [&us, &vs, &hs] {
        let mut previous = 0i32;
        for &value in buffer.iter() {
            let delta = value as i32 - previous;
            push_u16(&mut out, zigzag_encode(delta));
            previous = value as i32;
        }
    }

    // Triangle indices, high-water-mark encoded. Wide indices are used from
    // 65536 vertices up and are 4-byte aligned.
    let wide = vertex_count >= 65536;
    if wide {
        while out.len() % 4 != 0 {
            out.push(0);
        }
    }
    push_u32(&mut out, (indices.len() / 3) as u32);
    let mut highest = 0u32;
    for &index in &indices {
        let code = highest - index;
        if wide {
            push_u32(&mut out, code);
        } else {
            push_u16(&mut out, code as u16);
        }
        if code == 0 {
            highest += 1;
        }
    }

    // Edge index lists: west, south, east, north, decided on quantized
    // coordinates so boundary membership is exact.
    for (values, edge) in [(&us, 0u16), (&vs, 0), (&us, QUANTIZED_MAX as u16), (&vs, QUANTIZED_MAX as u16)]
    {
        let edge_indices = collect_edge_indices(&indices, values, edge);
        push_u32(&mut out, edge_indices.len() as u32);
        for &index in &edge_indices {
            if wide {
                push_u32(&mut out, index);
            } else {
                push_u16(&mut out, index as u16);
            }
        }
    }

    if write_vertex_normals {
        out.push(EXTENSION_OCT_NORMALS);
        push_u32(&mut out, vertex_count * 2);
        for n in vertex_normals(&cartesian, &indices) {
            let oct = oct_encode(n);
            out.push(oct[0]);
            out.push(oct[1]);
        }
    }

    Ok(out)
}

/// Vertices lying on one edge, ordered by first appearance in the index
/// list, each listed once.
fn collect_edge_indices(indices: &[u32], values: &[u16], edge: u16) -> Vec<u32> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for &index in indices {
        if values[index as usize] == edge && seen.insert(index) {
            out.push(index);
        }
    }
    out
}

/// Zigzag encoding: -1 => 1, -2 => 3, 0 => 0, 1 => 2, 2 => 4.
fn zigzag_encode(n: i32) -> u16 {
    ((n << 1) ^ (n >> 31)) as u16
}

fn zigzag_decode(z: u16) -> i32 {
    ((z >> 1) as i32) ^ -((z & 1) as i32)
}

/// The horizon occlusion point of a point set in the ellipsoid-scaled frame
/// `(1/a, 1/a, 1/b)`.
fn horizon_occlusion_point(points: &[DVec3], sphere_center: DVec3) -> DVec3 {
    let scale = DVec3::new(
        1.0 / WGS84_SEMI_MAJOR_AXIS,
        1.0 / WGS84_SEMI_MAJOR_AXIS,
        1.0 / WGS84_SEMI_MINOR_AXIS,
    );
    let scaled_center = sphere_center * scale;
    let center_direction = scaled_center.normalize_or_zero();

    let mut max_magnitude = f64::NEG_INFINITY;
    for p in points {
        let scaled = *p * scale;
        let magnitude = occlusion_magnitude(scaled, center_direction);
        if magnitude > max_magnitude {
            max_magnitude = magnitude;
        }
    }
    scaled_center * max_magnitude
}

fn occlusion_magnitude(position: DVec3, center_direction: DVec3) -> f64 {
    let magnitude_squared = position.length_squared();
    let magnitude = magnitude_squared.sqrt();
    let direction = position / magnitude;

    // For the beta terms only, points below the ellipsoid count as on it.
    let magnitude_squared = magnitude_squared.max(1.0);
    let magnitude = magnitude.max(1.0);

    let cos_alpha = direction.dot(center_direction);
    let sin_alpha = direction.cross(center_direction).length();
    let cos_beta = 1.0 / magnitude;
    let sin_beta = (magnitude_squared - 1.0).sqrt() * cos_beta;

    1.0 / (cos_alpha * cos_beta - sin_alpha * sin_beta)
}

/// Area-weighted per-vertex normals in ECEF.
fn vertex_normals(cartesian: &[DVec3], indices: &[u32]) -> Vec<DVec3> {
    let mut normals = vec![DVec3::ZERO; cartesian.len()];
    for tri in indices.chunks_exact(3) {
        let a = cartesian[tri[0] as usize];
        let b = cartesian[tri[1] as usize];
        let c = cartesian[tri[2] as usize];
        let face = (b - a).cross(c - a);
        for &i in tri {
            normals[i as usize] += face;
        }
    }
    normals
        .into_iter()
        .map(|n| {
            let len = n.length();
            if len > 0.0 {
                n / len
            } else {
                DVec3::Z
            }
        })
        .collect()
}

fn sign_not_zero(v: f64) -> f64 {
    if v < 0.0 {
        -1.0
    } else {
        1.0
    }
}

/// Octahedral unit-vector encoding to two bytes.
fn oct_encode(v: DVec3) -> [u8; 2] {
    let sum = v.x.abs() + v.y.abs() + v.z.abs();
    let mut p = DVec2::new(v.x / sum, v.y / sum);
    if v.z < 0.0 {
        p = DVec2::new(
            (1.0 - p.y.abs()) * sign_not_zero(p.x),
            (1.0 - p.x.abs()) * sign_not_zero(p.y),
        );
    }
    let to_byte = |f: f64| ((f.clamp(-1.0, 1.0) * 0.5 + 0.5) * 255.0).round() as u8;
    [to_byte(p.x), to_byte(p.y)]
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_f32(out: &mut Vec<u8>, v: f32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_f64(out: &mut Vec<u8>, v: f64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// A decoded quantized-mesh payload.
#[derive(Debug)]
pub struct DecodedQuantizedMesh {
    pub center: DVec3,
    pub min_height: f32,
    pub max_height: f32,
    pub sphere_center: DVec3,
    pub sphere_radius: f64,
    pub horizon_occlusion: DVec3,
    pub u: Vec<u16>,
    pub v: Vec<u16>,
    pub height: Vec<u16>,
    pub indices: Vec<u32>,
    pub west: Vec<u32>,
    pub south: Vec<u32>,
    pub east: Vec<u32>,
    pub north: Vec<u32>,
    pub oct_normals: Option<Vec<[u8; 2]>>,
}

/// Decode the quantized-mesh wire form (uncompressed).
pub fn decode_quantized_mesh(data: &[u8]) -> TerrainResult<DecodedQuantizedMesh> {
    let mut cursor = Cursor { data, pos: 0 };

    let center = DVec3::new(cursor.f64()?, cursor.f64()?, cursor.f64()?);
    let min_height = cursor.f32()?;
    let max_height = cursor.f32()?;
    let sphere_center = DVec3::new(cursor.f64()?, cursor.f64()?, cursor.f64()?);
    let sphere_radius = cursor.f64()?;
    let horizon_occlusion = DVec3::new(cursor.f64()?, cursor.f64()?, cursor.f64()?);

    let vertex_count = cursor.u32()? as usize;
    let decode_buffer = |cursor: &mut Cursor| -> TerrainResult<Vec<u16>> {
        let mut out = Vec::with_capacity(vertex_count);
        let mut value = 0i32;
        for _ in 0..vertex_count {
            value += zigzag_decode(cursor.u16()?);
            out.push(value as u16);
        }
        Ok(out)
    };
    let u = decode_buffer(&mut cursor)?;
    let v = decode_buffer(&mut cursor)?;
    let height = decode_buffer(&mut cursor)?;

    let wide = vertex_count >= 65536;
    if wide {
        while cursor.pos % 4 != 0 {
            cursor.pos += 1;
        }
    }
    let triangle_count = cursor.u32()? as usize;
    let mut indices = Vec::with_capacity(triangle_count * 3);
    let mut highest = 0u32;
    for _ in 0..triangle_count * 3 {
        let code = if wide { cursor.u32()? } else { cursor.u16()? as u32 };
        let index = highest
            .checked_sub(code)
            .ok_or_else(|| TerrainError::encode("index code above the high-water mark"))?;
        indices.push(index);
        if code == 0 {
            highest += 1;
        }
    }

    let edge = |cursor: &mut Cursor| -> TerrainResult<Vec<u32>> {
        let count = cursor.u32()? as usize;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(if wide { cursor.u32()? } else { cursor.u16()? as u32 });
        }
        Ok(out)
    };
    let west = edge(&mut cursor)?;
    let south = edge(&mut cursor)?;
    let east = edge(&mut cursor)?;
    let north = edge(&mut cursor)?;

    let mut oct_normals = None;
    while cursor.pos + 5 <= data.len() {
        let extension_id = cursor.u8()?;
        let length = cursor.u32()? as usize;
        if extension_id == EXTENSION_OCT_NORMALS && length == vertex_count * 2 {
            let mut normals = Vec::with_capacity(vertex_count);
            for _ in 0..vertex_count {
                normals.push([cursor.u8()?, cursor.u8()?]);
            }
            oct_normals = Some(normals);
        } else {
            cursor.pos = (cursor.pos + length).min(data.len());
        }
    }

    Ok(DecodedQuantizedMesh {
        center,
        min_height,
        max_height,
        sphere_center,
        sphere_radius,
        horizon_occlusion,
        u,
        v,
        height,
        indices,
        west,
        south,
        east,
        north,
        oct_normals,
    })
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn take(&mut self, n: usize) -> TerrainResult<&[u8]> {
        if self.pos + n > self.data.len() {
            return Err(TerrainError::encode("quantized mesh payload truncated"));
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> TerrainResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> TerrainResult<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> TerrainResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn f32(&mut self) -> TerrainResult<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> TerrainResult<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}
