//! The in-memory brightness grid and its coordinate math.
//!
//! Every cell holds a 4-bit level (`0..=15`). Cells are stored row-major, so
//! index `i` sits at `x = i % columns`, `y = i / columns`. [`GridBuffer::index_of`]
//! and [`GridBuffer::coord_of`] are the only places that math lives.

use rand::Rng;

use crate::error::{GridlinkError, Result};

/// Brightest level a cell can hold.
pub const MAX_LEVEL: u8 = 15;

/// Side length of the square blocks addressed by [`GridBuffer::set_quad`].
pub const QUAD_SIZE: usize = 8;

/// A fixed-size grid of brightness levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridBuffer {
    columns: usize,
    rows: usize,
    data: Vec<u8>,
}

impl GridBuffer {
    /// Create a grid with every cell off.
    pub fn new(columns: usize, rows: usize) -> Result<Self> {
        if columns == 0 || rows == 0 {
            return Err(GridlinkError::InvalidDimensions { columns, rows });
        }
        Ok(Self {
            columns,
            rows,
            data: vec![0; columns * rows],
        })
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of cells (`columns * rows`).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row-major index of `(x, y)`.
    pub fn index_of(&self, x: usize, y: usize) -> Result<usize> {
        if x >= self.columns || y >= self.rows {
            return Err(GridlinkError::OutOfRange {
                x,
                y,
                columns: self.columns,
                rows: self.rows,
            });
        }
        Ok(y * self.columns + x)
    }

    /// Coordinate of row-major index `index`.
    pub fn coord_of(&self, index: usize) -> Result<(usize, usize)> {
        if index >= self.data.len() {
            return Err(GridlinkError::IndexOutOfRange {
                index,
                len: self.data.len(),
            });
        }
        Ok((index % self.columns, index / self.columns))
    }

    pub fn level(&self, x: usize, y: usize) -> Result<u8> {
        let i = self.index_of(x, y)?;
        Ok(self.data[i])
    }

    /// Invert the cell at `(x, y)` and return its new level.
    ///
    /// An off cell becomes fully lit and a fully lit cell goes off. Levels in
    /// between map to `15 - level`, so toggling twice always restores the cell.
    pub fn toggle(&mut self, x: usize, y: usize) -> Result<u8> {
        let i = self.index_of(x, y)?;
        self.data[i] = MAX_LEVEL - self.data[i];
        Ok(self.data[i])
    }

    pub fn set_level(&mut self, x: usize, y: usize, level: u8) -> Result<()> {
        let i = self.index_of(x, y)?;
        check_level(i, level)?;
        self.data[i] = level;
        Ok(())
    }

    /// Set every cell to `level`.
    pub fn fill(&mut self, level: u8) -> Result<()> {
        check_level(0, level)?;
        self.data.fill(level);
        Ok(())
    }

    /// Replace the whole grid. Nothing is written unless every value is valid.
    pub fn replace(&mut self, values: &[u8]) -> Result<()> {
        if values.len() != self.data.len() {
            return Err(GridlinkError::LengthMismatch {
                expected: self.data.len(),
                actual: values.len(),
            });
        }
        for (i, &level) in values.iter().enumerate() {
            check_level(i, level)?;
        }
        self.data.copy_from_slice(values);
        Ok(())
    }

    /// Write `levels` along row `y`, starting at column `x_offset`.
    pub fn set_row(&mut self, x_offset: usize, y: usize, levels: &[u8]) -> Result<()> {
        let indices = (0..levels.len())
            .map(|dx| self.index_of(x_offset + dx, y))
            .collect::<Result<Vec<_>>>()?;
        for (&i, &level) in indices.iter().zip(levels) {
            check_level(i, level)?;
        }
        for (i, &level) in indices.into_iter().zip(levels) {
            self.data[i] = level;
        }
        Ok(())
    }

    /// Write `levels` down column `x`, starting at row `y_offset`.
    pub fn set_col(&mut self, x: usize, y_offset: usize, levels: &[u8]) -> Result<()> {
        let indices = (0..levels.len())
            .map(|dy| self.index_of(x, y_offset + dy))
            .collect::<Result<Vec<_>>>()?;
        for (&i, &level) in indices.iter().zip(levels) {
            check_level(i, level)?;
        }
        for (i, &level) in indices.into_iter().zip(levels) {
            self.data[i] = level;
        }
        Ok(())
    }

    /// Write an 8x8 block whose top-left corner is `(x_offset, y_offset)`.
    ///
    /// `levels` is row-major within the block. Offsets must be multiples of 8.
    pub fn set_quad(
        &mut self,
        x_offset: usize,
        y_offset: usize,
        levels: &[u8; QUAD_SIZE * QUAD_SIZE],
    ) -> Result<()> {
        let indices = self.quad_indices(x_offset, y_offset)?;
        for (&i, &level) in indices.iter().zip(levels.iter()) {
            check_level(i, level)?;
        }
        for (i, &level) in indices.into_iter().zip(levels.iter()) {
            self.data[i] = level;
        }
        Ok(())
    }

    /// Read the 8x8 block whose top-left corner is `(x_offset, y_offset)`.
    pub fn quad(&self, x_offset: usize, y_offset: usize) -> Result<[u8; QUAD_SIZE * QUAD_SIZE]> {
        let indices = self.quad_indices(x_offset, y_offset)?;
        let mut block = [0u8; QUAD_SIZE * QUAD_SIZE];
        for (slot, i) in block.iter_mut().zip(indices) {
            *slot = self.data[i];
        }
        Ok(block)
    }

    fn quad_indices(&self, x_offset: usize, y_offset: usize) -> Result<Vec<usize>> {
        if x_offset % QUAD_SIZE != 0 || y_offset % QUAD_SIZE != 0 {
            return Err(GridlinkError::OutOfRange {
                x: x_offset,
                y: y_offset,
                columns: self.columns,
                rows: self.rows,
            });
        }
        let mut indices = Vec::with_capacity(QUAD_SIZE * QUAD_SIZE);
        for dy in 0..QUAD_SIZE {
            for dx in 0..QUAD_SIZE {
                indices.push(self.index_of(x_offset + dx, y_offset + dy)?);
            }
        }
        Ok(indices)
    }

    /// Fill every cell with a random level below [`MAX_LEVEL`].
    pub fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for level in &mut self.data {
            *level = rng.random_range(0..MAX_LEVEL);
        }
    }

    /// Owned copy of the levels, row-major.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.clone()
    }

    /// Iterate `(x, y, level)` over every cell in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, u8)> + '_ {
        self.data.iter().enumerate().filter_map(move |(i, &level)| {
            self.coord_of(i).ok().map(|(x, y)| (x, y, level))
        })
    }
}

fn check_level(index: usize, level: u8) -> Result<()> {
    if level > MAX_LEVEL {
        return Err(GridlinkError::LevelOutOfRange { index, level });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn grid() -> GridBuffer {
        GridBuffer::new(16, 8).unwrap()
    }

    #[test]
    fn test_new_is_all_off() {
        let g = grid();
        assert_eq!(g.len(), 128);
        assert!(g.snapshot().iter().all(|&l| l == 0));
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        assert!(matches!(
            GridBuffer::new(0, 8),
            Err(GridlinkError::InvalidDimensions { .. })
        ));
        assert!(GridBuffer::new(16, 0).is_err());
    }

    #[test]
    fn test_coordinate_bijection() {
        let g = GridBuffer::new(5, 3).unwrap();
        for y in 0..3 {
            for x in 0..5 {
                let i = g.index_of(x, y).unwrap();
                assert_eq!(g.coord_of(i).unwrap(), (x, y));
            }
        }
        for i in 0..g.len() {
            let (x, y) = g.coord_of(i).unwrap();
            assert_eq!(g.index_of(x, y).unwrap(), i);
        }
        assert_eq!(g.index_of(3, 2).unwrap(), 13);
    }

    #[test]
    fn test_out_of_range() {
        let g = grid();
        assert!(matches!(
            g.index_of(16, 0),
            Err(GridlinkError::OutOfRange { x: 16, y: 0, .. })
        ));
        assert!(g.index_of(0, 8).is_err());
        assert!(matches!(
            g.coord_of(128),
            Err(GridlinkError::IndexOutOfRange { index: 128, len: 128 })
        ));
    }

    #[test]
    fn test_toggle_flips_off_and_full() {
        let mut g = grid();
        assert_eq!(g.toggle(3, 2).unwrap(), 15);
        assert_eq!(g.snapshot()[35], 15);
        assert_eq!(g.toggle(3, 2).unwrap(), 0);
    }

    #[test]
    fn test_toggle_is_involution() {
        let mut g = grid();
        g.randomize(&mut StdRng::seed_from_u64(7));
        g.set_level(1, 1, 15).unwrap();
        let before = g.clone();
        for (x, y) in [(0, 0), (1, 1), (15, 7), (8, 4)] {
            g.toggle(x, y).unwrap();
            g.toggle(x, y).unwrap();
        }
        assert_eq!(g, before);
    }

    #[test]
    fn test_toggle_out_of_range_leaves_state() {
        let mut g = grid();
        assert!(g.toggle(16, 8).is_err());
        assert_eq!(g, grid());
    }

    #[test]
    fn test_replace_round_trip() {
        let mut g = grid();
        let values: Vec<u8> = (0..128).map(|i| (i % 16) as u8).collect();
        g.replace(&values).unwrap();
        assert_eq!(g.snapshot(), values);
    }

    #[test]
    fn test_replace_length_mismatch_is_atomic() {
        let mut g = grid();
        g.toggle(0, 0).unwrap();
        let before = g.snapshot();
        let err = g.replace(&[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            GridlinkError::LengthMismatch { expected: 128, actual: 3 }
        ));
        assert_eq!(g.snapshot(), before);
    }

    #[test]
    fn test_replace_level_out_of_range_is_atomic() {
        let mut g = grid();
        let mut values = vec![5u8; 128];
        values[100] = 16;
        assert!(matches!(
            g.replace(&values),
            Err(GridlinkError::LevelOutOfRange { index: 100, level: 16 })
        ));
        assert!(g.snapshot().iter().all(|&l| l == 0));
    }

    #[test]
    fn test_snapshot_does_not_alias() {
        let mut g = grid();
        let snap = g.snapshot();
        g.toggle(0, 0).unwrap();
        assert_eq!(snap[0], 0);
    }

    #[test]
    fn test_fill_covers_every_cell() {
        let mut g = GridBuffer::new(16, 4).unwrap();
        g.fill(9).unwrap();
        assert!(g.snapshot().iter().all(|&l| l == 9));
        assert!(g.fill(20).is_err());
    }

    #[test]
    fn test_set_row_and_col() {
        let mut g = grid();
        g.set_row(2, 1, &[1, 2, 3]).unwrap();
        assert_eq!(g.level(2, 1).unwrap(), 1);
        assert_eq!(g.level(4, 1).unwrap(), 3);
        g.set_row(0, 7, &[5; 16]).unwrap();
        assert!(g.cells().filter(|&(_, y, _)| y == 7).all(|(_, _, l)| l == 5));
        assert_eq!(g.level(0, 6).unwrap(), 0);

        g.set_col(0, 5, &[7, 8, 9]).unwrap();
        assert_eq!(g.level(0, 5).unwrap(), 7);
        assert_eq!(g.level(0, 7).unwrap(), 9);

        // Runs past the edge write nothing.
        let before = g.clone();
        assert!(g.set_row(14, 0, &[1, 1, 1]).is_err());
        assert!(g.set_row(0, 8, &[]).is_ok());
        assert!(g.set_col(0, 6, &[1, 1, 1]).is_err());
        assert_eq!(g, before);
    }

    #[test]
    fn test_quads() {
        let mut g = grid();
        let mut block = [0u8; 64];
        block[0] = 15;
        block[63] = 4;
        g.set_quad(8, 0, &block).unwrap();
        assert_eq!(g.level(8, 0).unwrap(), 15);
        assert_eq!(g.level(15, 7).unwrap(), 4);
        assert_eq!(g.quad(8, 0).unwrap(), block);
        assert_eq!(g.quad(0, 0).unwrap(), [0u8; 64]);

        assert!(g.quad(4, 0).is_err());
        assert!(g.quad(16, 0).is_err());
    }

    #[test]
    fn test_randomize_stays_in_range() {
        let mut g = grid();
        g.randomize(&mut StdRng::seed_from_u64(42));
        assert!(g.snapshot().iter().all(|&l| l < MAX_LEVEL));
    }

    #[test]
    fn test_cells_iterates_row_major() {
        let mut g = GridBuffer::new(2, 2).unwrap();
        g.set_level(1, 0, 3).unwrap();
        let cells: Vec<_> = g.cells().collect();
        assert_eq!(cells, vec![(0, 0, 0), (1, 0, 3), (0, 1, 0), (1, 1, 0)]);
    }
}
