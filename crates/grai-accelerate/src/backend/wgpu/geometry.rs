//! Thread-group sizing.
//!
//! A group holds at most `max_threads_per_group` threads and runs in SIMD slices of
//! `execution_width` lanes. 1-D groups are one slice wide; 2-D groups start from 8×8 and
//! stretch along the longer axis, at most 4× and never past the group capacity.

/// Base edge of the square group used for 2-D grids.
const PLANAR_BASE: u32 = 8;
/// Upper bound on the elongation of a 2-D group.
const MAX_PLANAR_RATIO: u32 = 4;
/// Threads of one base group; `max_threads_per_group / 64` bounds the ratio.
const PLANAR_BASE_THREADS: u32 = PLANAR_BASE * PLANAR_BASE;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Size3 {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Size3 {
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    pub fn volume(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth as u64
    }

    pub fn as_array(&self) -> [u32; 3] {
        [self.width, self.height, self.depth]
    }
}

/// Threads per grid and per group for one dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchGeometry {
    pub grid: Size3,
    pub group: Size3,
}

impl DispatchGeometry {
    pub fn new(grid: Size3, group: Size3) -> Self {
        assert!(
            group.width > 0 && group.height > 0 && group.depth > 0,
            "thread group must be non-empty, got {:?}",
            group
        );
        Self { grid, group }
    }

    /// Number of groups per axis, covering the whole grid.
    pub fn workgroups(&self) -> [u32; 3] {
        [
            div_ceil(self.grid.width, self.group.width),
            div_ceil(self.grid.height, self.group.height),
            div_ceil(self.grid.depth, self.group.depth),
        ]
    }

    pub fn is_linear(&self) -> bool {
        self.grid.height == 1
            && self.grid.depth == 1
            && self.group.height == 1
            && self.group.depth == 1
    }

    /// Group counts with no axis above `max_per_dimension`, or `None` when the grid
    /// cannot be laid out.
    ///
    /// Linear grids wrap their groups into y, then z. Kernels dispatched that way rebuild
    /// the thread index as `(gid.z * nwg.y + gid.y) * nwg.x * group_width + gid.x`.
    pub fn workgroups_within(&self, max_per_dimension: u32) -> Option<[u32; 3]> {
        let workgroups = self.workgroups();
        if workgroups.iter().all(|count| *count <= max_per_dimension) {
            return Some(workgroups);
        }
        if !self.is_linear() {
            return None;
        }
        fold_workgroups(workgroups[0], max_per_dimension)
    }
}

/// Spreads `count` groups over up to three axes of at most `max_per_dimension` each.
pub fn fold_workgroups(count: u32, max_per_dimension: u32) -> Option<[u32; 3]> {
    let max = max_per_dimension.max(1);
    if count <= max {
        return Some([count, 1, 1]);
    }
    let rows = div_ceil(count, max);
    let width = div_ceil(count, rows);
    if rows <= max {
        return Some([width, rows, 1]);
    }
    let layers = div_ceil(rows, max);
    if layers > max {
        return None;
    }
    Some([width, div_ceil(rows, layers), layers])
}

pub fn div_ceil(value: u32, divisor: u32) -> u32 {
    if value == 0 {
        0
    } else {
        (value + divisor - 1) / divisor
    }
}

/// A line of `nb_threads`, one SIMD group wide.
pub fn linear(nb_threads: u32, execution_width: u32) -> DispatchGeometry {
    DispatchGeometry::new(
        Size3::new(nb_threads, 1, 1),
        Size3::new(execution_width.max(1), 1, 1),
    )
}

/// A `width × height` grid.
///
/// A single row degrades to [`linear`]; a single column uses a tall `1 × execution_width`
/// group; otherwise an 8×8 group is stretched along the larger axis by
/// `min(max / min, max_threads_per_group / 64, 4)`.
pub fn planar(
    width: u32,
    height: u32,
    execution_width: u32,
    max_threads_per_group: u32,
) -> DispatchGeometry {
    if height == 1 {
        return linear(width, execution_width);
    }
    if width == 1 {
        return DispatchGeometry::new(
            Size3::new(1, height, 1),
            Size3::new(1, execution_width.max(1), 1),
        );
    }

    let ratio = planar_ratio(width, height, max_threads_per_group);
    let group = if width >= height {
        Size3::new(PLANAR_BASE * ratio, PLANAR_BASE, 1)
    } else {
        Size3::new(PLANAR_BASE, PLANAR_BASE * ratio, 1)
    };
    DispatchGeometry::new(Size3::new(width, height, 1), group)
}

pub fn planar_ratio(width: u32, height: u32, max_threads_per_group: u32) -> u32 {
    let max_dim = width.max(height);
    let min_dim = width.min(height).max(1);
    let max_ratio = max_threads_per_group / PLANAR_BASE_THREADS;
    (max_dim / min_dim).min(max_ratio).min(MAX_PLANAR_RATIO).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_column_uses_tall_thin_group() {
        for height in [2, 7, 1000] {
            let geometry = planar(1, height, 32, 1024);
            assert_eq!(geometry.group, Size3::new(1, 32, 1));
            assert_eq!(geometry.grid, Size3::new(1, height, 1));
        }
    }

    #[test]
    fn single_row_degrades_to_linear() {
        assert_eq!(planar(500, 1, 32, 1024), linear(500, 32));
        assert_eq!(linear(500, 32).workgroups(), [16, 1, 1]);
    }

    #[test]
    fn wide_grid_is_capped_at_four() {
        let geometry = planar(800, 100, 32, 1024);
        assert_eq!(planar_ratio(800, 100, 1024), 4);
        assert_eq!(geometry.group, Size3::new(32, 8, 1));
        assert_eq!(geometry.workgroups(), [25, 13, 1]);

        let tall = planar(100, 800, 32, 1024);
        assert_eq!(tall.group, Size3::new(8, 32, 1));
    }

    #[test]
    fn ratio_respects_group_capacity() {
        assert_eq!(planar_ratio(800, 100, 128), 2);
        assert_eq!(planar(800, 100, 32, 128).group, Size3::new(16, 8, 1));
        // Tiny devices still get a square base group.
        assert_eq!(planar_ratio(800, 100, 32), 1);
    }

    #[test]
    fn square_grid_keeps_base_group() {
        assert_eq!(planar(64, 64, 32, 256).group, Size3::new(8, 8, 1));
        assert_eq!(planar(100, 70, 32, 256).group, Size3::new(8, 8, 1));
    }

    #[test]
    fn workgroups_cover_partial_groups() {
        let geometry = DispatchGeometry::new(Size3::new(257, 3, 1), Size3::new(64, 1, 1));
        assert_eq!(geometry.workgroups(), [5, 3, 1]);
        assert_eq!(linear(0, 32).workgroups(), [0, 1, 1]);
    }

    #[test]
    fn long_lines_wrap_into_rows() {
        let geometry = linear(3_000_000, 32);
        assert_eq!(geometry.workgroups(), [93_750, 1, 1]);
        assert_eq!(geometry.workgroups_within(65_535), Some([46_875, 2, 1]));
        assert_eq!(linear(500, 32).workgroups_within(65_535), Some([16, 1, 1]));
    }

    #[test]
    fn folded_groups_cover_every_thread() {
        for (count, max) in [(65_536, 65_535), (93_750, 65_535), (1_000_001, 1000), (7, 2)] {
            let [x, y, z] = fold_workgroups(count, max).unwrap();
            assert!(x <= max && y <= max && z <= max);
            assert!(x as u64 * y as u64 * z as u64 >= count as u64);
        }
        assert_eq!(fold_workgroups(9, 2), None);
    }

    #[test]
    fn planar_grids_are_not_folded() {
        let geometry = DispatchGeometry::new(Size3::new(70_000 * 8, 16, 1), Size3::new(8, 8, 1));
        assert_eq!(geometry.workgroups_within(65_535), None);
    }
}
