use crate::core::geometry::union_polygons;
use crate::core::pixel_filter::PixelFilter;
use crate::io::raster::{row_chunks, RasterSource};
use crate::types::{Band, GeoTransform, PixelWindow, ZoneResult};
use geo::{Coord, LineString, Polygon};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Class value of pixels that belong to no band
const UNCLASSIFIED: u16 = u16::MAX;

/// Pixel-corner vertex (x = column, y = row)
type Vertex = (i64, i64);

/// Directed unit boundary step, interior on the right in raster orientation
type Edge = (Vertex, Vertex);

/// How the raster is read while tracing band masks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vectorization {
    /// Read the whole raster once
    #[default]
    WholeRaster,
    /// Trace one memory-budget row chunk at a time and stitch the seams
    Chunked,
}

/// Polygon traced in pixel-corner coordinates, relative to its window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelPolygon {
    pub exterior: Vec<Vertex>,
    pub holes: Vec<Vec<Vertex>>,
}

impl PixelPolygon {
    /// Map to georeferenced coordinates; `col_off`/`row_off` place the window in the raster
    pub fn to_polygon(&self, transform: &GeoTransform, col_off: usize, row_off: usize) -> Polygon<f64> {
        let to_line = |ring: &Vec<Vertex>| -> LineString<f64> {
            ring.iter()
                .map(|&(x, y)| {
                    let (gx, gy) = transform.apply((x + col_off as i64) as f64, (y + row_off as i64) as f64);
                    Coord { x: gx, y: gy }
                })
                .collect()
        };
        Polygon::new(to_line(&self.exterior), self.holes.iter().map(to_line).collect())
    }

    /// Enclosed pixel count
    pub fn pixel_area(&self) -> i64 {
        ring_area2(&self.exterior) / 2 + self.holes.iter().map(|h| ring_area2(h) / 2).sum::<i64>()
    }
}

/// Converts band masks into polygons
pub struct ZoneVectorizer {
    mode: Vectorization,
    chunk_budget_bytes: usize,
    smoothing: bool,
}

impl ZoneVectorizer {
    pub fn new(mode: Vectorization, chunk_budget_bytes: usize, smoothing: bool) -> Self {
        Self {
            mode,
            chunk_budget_bytes,
            smoothing,
        }
    }

    /// One list of disjoint polygons per band, in band order
    pub fn vectorize(
        &self,
        raster: &dyn RasterSource,
        filter: &PixelFilter,
        bands: &[Band],
    ) -> ZoneResult<Vec<Vec<Polygon<f64>>>> {
        let (width, height) = raster.size();
        let transform = raster.geo_transform();
        let windows: Vec<PixelWindow> = match self.mode {
            Vectorization::WholeRaster => vec![raster.full_window()],
            Vectorization::Chunked => row_chunks(width, height, self.chunk_budget_bytes).collect(),
        };

        log::info!(
            "Vectorizing {} bands over {}x{} pixels ({:?}, {} windows)",
            bands.len(),
            width,
            height,
            self.mode,
            windows.len()
        );

        let mut traced: Vec<Vec<Polygon<f64>>> = vec![Vec::new(); bands.len()];
        for window in windows {
            let values = self.read_values(raster, filter, window)?;
            let classes = classify(&values, bands);
            for (index, polygons) in traced.iter_mut().enumerate() {
                let mask = classes.mapv(|class| class as usize == index);
                for pixel_polygon in trace_mask(&mask) {
                    polygons.push(pixel_polygon.to_polygon(&transform, window.col, window.row));
                }
            }
        }

        let zones: Vec<Vec<Polygon<f64>>> = traced.iter().map(|polygons| union_polygons(polygons)).collect();
        for (band, polygons) in bands.iter().zip(&zones) {
            log::debug!("Band {} ({:.4}, {:.4}]: {} polygons", band.index, band.low, band.high, polygons.len());
        }
        Ok(zones)
    }

    /// Window values with invalid pixels replaced by NaN, smoothed when enabled
    fn read_values(
        &self,
        raster: &dyn RasterSource,
        filter: &PixelFilter,
        window: PixelWindow,
    ) -> ZoneResult<Array2<f32>> {
        if !self.smoothing {
            let mut values = raster.read_window(window)?;
            mask_invalid(&mut values, filter, window);
            return Ok(values);
        }

        // One-row halo so chunk borders smooth like the interior
        let top = window.row.saturating_sub(1);
        let bottom = (window.row + window.height + 1).min(raster.height());
        let padded = PixelWindow::new(window.col, top, window.width, bottom - top);
        let mut values = raster.read_window(padded)?;
        mask_invalid(&mut values, filter, padded);
        let smoothed = smooth_valid(&values);
        let offset = window.row - top;
        Ok(smoothed.slice(s![offset..offset + window.height, ..]).to_owned())
    }
}

fn mask_invalid(values: &mut Array2<f32>, filter: &PixelFilter, window: PixelWindow) {
    for ((r, c), value) in values.indexed_iter_mut() {
        if !filter.is_valid(window.row + r, window.col + c, *value) {
            *value = f32::NAN;
        }
    }
}

/// 3x3 mean over valid neighbours; invalid pixels stay NaN
fn smooth_valid(values: &Array2<f32>) -> Array2<f32> {
    let (height, width) = values.dim();
    let mut smoothed = Array2::from_elem((height, width), f32::NAN);

    for i in 0..height {
        for j in 0..width {
            if values[[i, j]].is_nan() {
                continue;
            }
            let mut sum = 0.0f64;
            let mut count = 0usize;
            for ii in i.saturating_sub(1)..(i + 2).min(height) {
                for jj in j.saturating_sub(1)..(j + 2).min(width) {
                    let value = values[[ii, jj]];
                    if !value.is_nan() {
                        sum += value as f64;
                        count += 1;
                    }
                }
            }
            smoothed[[i, j]] = (sum / count as f64) as f32;
        }
    }
    smoothed
}

/// Band index per pixel, `UNCLASSIFIED` for NaN or out-of-range values
fn classify(values: &Array2<f32>, bands: &[Band]) -> Array2<u16> {
    values.mapv(|value| {
        if value.is_nan() {
            return UNCLASSIFIED;
        }
        bands
            .iter()
            .position(|band| band.contains(value as f64))
            .map(|i| i as u16)
            .unwrap_or(UNCLASSIFIED)
    })
}

/// Trace the 4-connected components of `mask` into polygons with holes
pub fn trace_mask(mask: &Array2<bool>) -> Vec<PixelPolygon> {
    let (labels, count) = label_components(mask);
    let (rows, cols) = mask.dim();
    let inside = |r: i64, c: i64| -> bool {
        r >= 0 && c >= 0 && (r as usize) < rows && (c as usize) < cols && mask[[r as usize, c as usize]]
    };

    let mut edges: Vec<Vec<Edge>> = vec![Vec::new(); count];
    for ((r, c), &label) in labels.indexed_iter() {
        if label == 0 {
            continue;
        }
        let (x, y) = (c as i64, r as i64);
        let list = &mut edges[label as usize - 1];
        if !inside(y - 1, x) {
            list.push(((x, y), (x + 1, y)));
        }
        if !inside(y, x + 1) {
            list.push(((x + 1, y), (x + 1, y + 1)));
        }
        if !inside(y + 1, x) {
            list.push(((x + 1, y + 1), (x, y + 1)));
        }
        if !inside(y, x - 1) {
            list.push(((x, y + 1), (x, y)));
        }
    }

    edges.into_iter().flat_map(|e| assemble(chain_rings(e))).collect()
}

/// Label 4-connected components; 0 means background
fn label_components(mask: &Array2<bool>) -> (Array2<u32>, usize) {
    let (rows, cols) = mask.dim();
    let mut labels = Array2::<u32>::zeros((rows, cols));
    let mut count = 0usize;
    let mut queue = VecDeque::new();

    for r in 0..rows {
        for c in 0..cols {
            if !mask[[r, c]] || labels[[r, c]] != 0 {
                continue;
            }
            count += 1;
            let label = count as u32;
            labels[[r, c]] = label;
            queue.push_back((r, c));

            while let Some((cr, cc)) = queue.pop_front() {
                let mut visit = |nr: usize, nc: usize| {
                    if mask[[nr, nc]] && labels[[nr, nc]] == 0 {
                        labels[[nr, nc]] = label;
                        queue.push_back((nr, nc));
                    }
                };
                if cr > 0 {
                    visit(cr - 1, cc);
                }
                if cr + 1 < rows {
                    visit(cr + 1, cc);
                }
                if cc > 0 {
                    visit(cr, cc - 1);
                }
                if cc + 1 < cols {
                    visit(cr, cc + 1);
                }
            }
        }
    }
    (labels, count)
}

/// Chain boundary edges into closed rings.
///
/// At every vertex the walk prefers a right turn, then straight, then left, so
/// it hugs the component. Where the boundary passes a vertex twice the ring is
/// split, which turns a pinched hole into two holes touching at a point.
fn chain_rings(edges: Vec<Edge>) -> Vec<Vec<Vertex>> {
    let mut outgoing: HashMap<Vertex, Vec<usize>> = HashMap::new();
    for (i, edge) in edges.iter().enumerate() {
        outgoing.entry(edge.0).or_default().push(i);
    }

    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();
    for start in 0..edges.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let mut ring = vec![edges[start].0];
        let mut current = start;

        loop {
            let (from, to) = edges[current];
            let (dx, dy) = (to.0 - from.0, to.1 - from.1);
            let candidates = outgoing.get(&to).map(Vec::as_slice).unwrap_or(&[]);
            let next = [(-dy, dx), (dx, dy), (dy, -dx)].iter().find_map(|&direction| {
                candidates.iter().copied().find(|&i| {
                    let (a, b) = edges[i];
                    (b.0 - a.0, b.1 - a.1) == direction && (!used[i] || i == start)
                })
            });
            match next {
                Some(i) if i == start => break,
                Some(i) => {
                    used[i] = true;
                    ring.push(to);
                    current = i;
                }
                None => {
                    log::warn!("Open boundary chain at {:?}", to);
                    break;
                }
            }
        }
        rings.extend(split_pinches(ring).into_iter().map(drop_collinear));
    }
    rings
}

/// Split a ring that revisits a vertex into simple loops
fn split_pinches(ring: Vec<Vertex>) -> Vec<Vec<Vertex>> {
    let mut loops = Vec::new();
    let mut stack: Vec<Vertex> = Vec::with_capacity(ring.len());
    let mut seen: HashMap<Vertex, usize> = HashMap::new();
    for vertex in ring {
        match seen.get(&vertex) {
            Some(&pos) => {
                let sub_loop = stack.split_off(pos);
                for v in &sub_loop[1..] {
                    seen.remove(v);
                }
                loops.push(sub_loop);
                stack.push(vertex);
            }
            None => {
                seen.insert(vertex, stack.len());
                stack.push(vertex);
            }
        }
    }
    loops.push(stack);
    loops
}

/// Remove vertices where the boundary continues straight on
fn drop_collinear(ring: Vec<Vertex>) -> Vec<Vertex> {
    let n = ring.len();
    if n < 4 {
        return ring;
    }
    let step = |a: Vertex, b: Vertex| ((b.0 - a.0).signum(), (b.1 - a.1).signum());
    (0..n)
        .filter(|&i| step(ring[(i + n - 1) % n], ring[i]) != step(ring[i], ring[(i + 1) % n]))
        .map(|i| ring[i])
        .collect()
}

/// Twice the signed shoelace area; positive for outer rings in raster orientation
fn ring_area2(ring: &[Vertex]) -> i64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let (x0, y0) = ring[i];
            let (x1, y1) = ring[(i + 1) % n];
            x0 * y1 - x1 * y0
        })
        .sum()
}

/// Pair outer rings with their holes
fn assemble(rings: Vec<Vec<Vertex>>) -> Vec<PixelPolygon> {
    let (outer, holes): (Vec<_>, Vec<_>) = rings.into_iter().partition(|ring| ring_area2(ring) > 0);
    let mut polygons: Vec<PixelPolygon> = outer
        .into_iter()
        .map(|exterior| PixelPolygon {
            exterior,
            holes: Vec::new(),
        })
        .collect();

    if polygons.len() == 1 {
        polygons[0].holes = holes;
        return polygons;
    }

    // A component has one outer ring; this only guards against inconsistent input
    for hole in holes {
        let hole_box = bounding_box(&hole);
        let owner = polygons
            .iter_mut()
            .filter(|p| encloses(bounding_box(&p.exterior), hole_box))
            .min_by_key(|p| ring_area2(&p.exterior));
        match owner {
            Some(polygon) => polygon.holes.push(hole),
            None => log::warn!("Dropping hole ring without an enclosing boundary"),
        }
    }
    polygons
}

fn bounding_box(ring: &[Vertex]) -> (i64, i64, i64, i64) {
    ring.iter().fold((i64::MAX, i64::MAX, i64::MIN, i64::MIN), |(x0, y0, x1, y1), &(x, y)| {
        (x0.min(x), y0.min(y), x1.max(x), y1.max(y))
    })
}

fn encloses(outer: (i64, i64, i64, i64), inner: (i64, i64, i64, i64)) -> bool {
    outer.0 <= inner.0 && outer.1 <= inner.1 && outer.2 >= inner.2 && outer.3 >= inner.3
}
