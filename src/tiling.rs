// src/tiling.rs
//
// Overlapping window layout for sliced inference. Tiles advance by
// `slice * (1 - overlap)` along each axis; the last tile on an axis is
// clamped (never padded) so it ends flush with the frame edge.

use crate::types::SlicingConfig;
use opencv::core::Rect;

/// A window into the frame. `x`/`y` are frame-global pixel offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Tile {
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn rect(&self) -> Rect {
        Rect::new(
            self.x as i32,
            self.y as i32,
            self.width as i32,
            self.height as i32,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileGrid {
    frame_width: u32,
    frame_height: u32,
    columns: usize,
    rows: usize,
    tiles: Vec<Tile>,
}

impl TileGrid {
    /// Lay out tiles row-major (top-to-bottom, left-to-right).
    ///
    /// Frame dimensions must be positive; callers obtain them from validated
    /// [`VideoMetadata`](crate::types::VideoMetadata).
    pub fn compute(
        frame_width: u32,
        frame_height: u32,
        slice_width: u32,
        slice_height: u32,
        overlap_width_ratio: f32,
        overlap_height_ratio: f32,
    ) -> Self {
        debug_assert!(frame_width > 0 && frame_height > 0);

        let xs = axis_spans(frame_width, slice_width, overlap_width_ratio);
        let ys = axis_spans(frame_height, slice_height, overlap_height_ratio);

        let mut tiles = Vec::with_capacity(xs.len() * ys.len());
        for &(y, height) in &ys {
            for &(x, width) in &xs {
                tiles.push(Tile {
                    x,
                    y,
                    width,
                    height,
                });
            }
        }

        Self {
            frame_width,
            frame_height,
            columns: xs.len(),
            rows: ys.len(),
            tiles,
        }
    }

    pub fn from_config(frame_width: u32, frame_height: u32, slicing: &SlicingConfig) -> Self {
        Self::compute(
            frame_width,
            frame_height,
            slicing.slice_width,
            slicing.slice_height,
            slicing.overlap_width_ratio,
            slicing.overlap_height_ratio,
        )
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }
}

/// Step between tile origins, at least one pixel.
pub fn step_size(slice: u32, overlap_ratio: f32) -> u32 {
    let step = (slice as f32 * (1.0 - overlap_ratio)).round();
    (step as u32).max(1)
}

/// `(offset, length)` pairs along one axis.
fn axis_spans(extent: u32, slice: u32, overlap_ratio: f32) -> Vec<(u32, u32)> {
    let slice = slice.max(1);
    if slice >= extent {
        return vec![(0, extent)];
    }

    let step = step_size(slice, overlap_ratio);
    let mut spans = Vec::new();
    let mut offset = 0u32;
    loop {
        let length = slice.min(extent - offset);
        spans.push((offset, length));
        if offset + length >= extent {
            break;
        }
        offset += step;
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_full_coverage(grid: &TileGrid) {
        let (w, h) = grid.frame_size();
        let mut covered = vec![false; (w * h) as usize];
        for tile in grid.tiles() {
            assert!(tile.width > 0 && tile.height > 0);
            assert!(tile.right() <= w, "tile {:?} exceeds width {}", tile, w);
            assert!(tile.bottom() <= h, "tile {:?} exceeds height {}", tile, h);
            for y in tile.y..tile.bottom() {
                for x in tile.x..tile.right() {
                    covered[(y * w + x) as usize] = true;
                }
            }
        }
        assert!(covered.iter().all(|c| *c), "gap in coverage for {}x{}", w, h);
    }

    #[test]
    fn test_hd_frame_layout() {
        let grid = TileGrid::compute(1280, 720, 640, 640, 0.2, 0.2);

        assert_eq!(grid.columns(), 3);
        assert_eq!(grid.rows(), 2);

        let xs: Vec<(u32, u32)> = grid.tiles()[..3].iter().map(|t| (t.x, t.width)).collect();
        assert_eq!(xs, vec![(0, 640), (512, 640), (1024, 256)]);

        let ys: Vec<(u32, u32)> = grid
            .tiles()
            .iter()
            .step_by(3)
            .map(|t| (t.y, t.height))
            .collect();
        assert_eq!(ys, vec![(0, 640), (512, 208)]);

        // 128 px overlap on both axes, last tiles flush with the far edges.
        assert_eq!(grid.tiles()[0].right() - grid.tiles()[1].x, 128);
        assert_eq!(grid.tiles()[1].right() - grid.tiles()[2].x, 128);
        assert_eq!(grid.tiles()[0].bottom() - grid.tiles()[3].y, 128);
        assert_eq!(grid.tiles().last().unwrap().right(), 1280);
        assert_eq!(grid.tiles().last().unwrap().bottom(), 720);

        assert_full_coverage(&grid);
    }

    #[test]
    fn test_row_major_order() {
        let grid = TileGrid::compute(1280, 720, 640, 640, 0.2, 0.2);
        let origins: Vec<(u32, u32)> = grid.tiles().iter().map(|t| (t.x, t.y)).collect();
        assert_eq!(
            origins,
            vec![(0, 0), (512, 0), (1024, 0), (0, 512), (512, 512), (1024, 512)]
        );
    }

    #[test]
    fn test_slice_larger_than_frame_yields_single_tile() {
        let grid = TileGrid::compute(320, 240, 640, 640, 0.2, 0.2);
        assert_eq!(
            grid.tiles(),
            &[Tile {
                x: 0,
                y: 0,
                width: 320,
                height: 240
            }]
        );

        let exact = TileGrid::compute(640, 640, 640, 640, 0.2, 0.2);
        assert_eq!(exact.len(), 1);
    }

    #[test]
    fn test_coverage_over_many_shapes() {
        let frames = [(1, 1), (7, 3), (641, 640), (1920, 1080), (1000, 333), (2048, 17)];
        let params = [
            (640, 640, 0.2, 0.2),
            (100, 50, 0.0, 0.5),
            (64, 64, 0.9, 0.1),
            (3, 5, 0.25, 0.75),
            (1, 1, 0.5, 0.5),
        ];
        for &(w, h) in &frames {
            for &(sw, sh, ow, oh) in &params {
                let grid = TileGrid::compute(w, h, sw, sh, ow, oh);
                assert!(!grid.is_empty());
                assert_eq!(grid.len(), grid.columns() * grid.rows());
                assert_full_coverage(&grid);
            }
        }
    }

    #[test]
    fn test_adjacent_overlap_matches_ratio() {
        let cases = [
            (1920, 1080, 640, 640, 0.2, 0.2),
            (1000, 700, 300, 200, 0.33, 0.1),
            (5000, 3000, 512, 256, 0.5, 0.25),
            (999, 999, 100, 100, 0.0, 0.0),
        ];
        for &(w, h, sw, sh, ow, oh) in &cases {
            let grid = TileGrid::compute(w, h, sw, sh, ow, oh);
            let cols = grid.columns();
            let tiles = grid.tiles();

            let expected_w = ow * sw as f32;
            for pair in tiles[..cols].windows(2) {
                let overlap = (pair[0].right() - pair[1].x) as f32;
                assert!(
                    (overlap - expected_w).abs() <= 1.0,
                    "horizontal overlap {} vs {}",
                    overlap,
                    expected_w
                );
            }

            let expected_h = oh * sh as f32;
            let column: Vec<&Tile> = tiles.iter().step_by(cols).collect();
            for pair in column.windows(2) {
                let overlap = (pair[0].bottom() - pair[1].y) as f32;
                assert!(
                    (overlap - expected_h).abs() <= 1.0,
                    "vertical overlap {} vs {}",
                    overlap,
                    expected_h
                );
            }
        }
    }

    #[test]
    fn test_step_never_zero() {
        assert_eq!(step_size(1, 0.9), 1);
        assert_eq!(step_size(640, 0.2), 512);
        assert_eq!(step_size(10, 0.99), 1);
    }
}
