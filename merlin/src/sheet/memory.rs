use std::sync::{
    Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use tracing::debug;

use crate::sheet::{
    Color, Error, FIRST_DATA_ROW, HEADER_ROWS, Spreadsheet, category_row, column_row,
};

/// A worksheet held in process memory.
///
/// Used for local runs without spreadsheet credentials and by tests.
#[derive(Debug)]
pub struct MemorySheet {
    grid: Mutex<Grid>,
    unavailable: AtomicBool,
    reads: AtomicUsize,
}

#[derive(Debug, Default)]
struct Grid {
    rows: Vec<Vec<String>>,
    backgrounds: Vec<Option<Color>>,
}

impl Default for MemorySheet {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySheet {
    /// A worksheet that already carries the two header rows.
    pub fn new() -> Self {
        Self {
            grid: Mutex::new(Grid {
                rows: vec![category_row(), column_row()],
                backgrounds: vec![Some(Color::CATEGORY_GREY), Some(Color::HEADER_GREY)],
            }),
            unavailable: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
        }
    }

    /// Simulates the backing service going away (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of [`Spreadsheet::values`] calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Background of a row (1-based), if one was ever set.
    pub fn background(&self, row_index: usize) -> Option<Color> {
        self.grid()
            .backgrounds
            .get(row_index.wrapping_sub(1))
            .copied()
            .flatten()
    }

    /// Cells of a row (1-based).
    pub fn row(&self, row_index: usize) -> Option<Vec<String>> {
        self.grid().rows.get(row_index.wrapping_sub(1)).cloned()
    }

    pub fn data_row_count(&self) -> usize {
        self.grid().rows.len().saturating_sub(HEADER_ROWS)
    }

    /// Writes a data row directly, as an operator editing the sheet would.
    pub fn push_row(&self, cells: Vec<String>) {
        let mut grid = self.grid();
        grid.rows.push(cells);
        grid.backgrounds.push(None);
    }

    fn grid(&self) -> std::sync::MutexGuard<'_, Grid> {
        // A panic while holding the lock leaves the grid consistent enough
        // for an in-memory fake.
        self.grid.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<(), Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("in-memory sheet is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Spreadsheet for MemorySheet {
    async fn values(&self) -> Result<Vec<Vec<String>>, Error> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.grid().rows.clone())
    }

    async fn update_row(&self, row_index: usize, cells: Vec<String>) -> Result<(), Error> {
        self.check_available()?;
        let mut grid = self.grid();
        let Some(row) = grid.rows.get_mut(row_index.wrapping_sub(1)) else {
            return Err(Error::Http {
                status: 400,
                body: format!("row {row_index} is out of range"),
            });
        };
        *row = cells;
        debug!("memory sheet: updated row {row_index}");
        Ok(())
    }

    async fn append_row(&self, cells: Vec<String>) -> Result<(), Error> {
        self.check_available()?;
        self.push_row(cells);
        Ok(())
    }

    async fn set_row_backgrounds(&self, rows: Vec<(usize, Color)>) -> Result<(), Error> {
        self.check_available()?;
        let mut grid = self.grid();
        for (row_index, color) in rows {
            if let Some(background) = grid.backgrounds.get_mut(row_index.wrapping_sub(1)) {
                *background = Some(color);
            }
        }
        Ok(())
    }

    async fn clear_data_rows(&self) -> Result<(), Error> {
        self.check_available()?;
        let mut grid = self.grid();
        grid.rows.truncate(FIRST_DATA_ROW - 1);
        grid.backgrounds.truncate(FIRST_DATA_ROW - 1);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }
}
