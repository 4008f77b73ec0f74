//! Window size for the pseudo console

/// Visible terminal size in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    /// Number of rows (characters)
    pub rows: u16,
    /// Number of columns (characters)
    pub cols: u16,
}

impl WindowSize {
    /// Create a new window size
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { rows, cols }
    }

    /// Size of an inclusive window rectangle, as reported by the console
    /// screen buffer (`right - left + 1` by `bottom - top + 1`).
    ///
    /// Returns `None` when either extent is not positive.
    pub fn from_window_rect(left: i16, top: i16, right: i16, bottom: i16) -> Option<Self> {
        let cols = i32::from(right) - i32::from(left) + 1;
        let rows = i32::from(bottom) - i32::from(top) + 1;
        if cols <= 0 || rows <= 0 {
            return None;
        }
        Some(Self::new(u16::try_from(cols).ok()?, u16::try_from(rows).ok()?))
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl std::fmt::Display for WindowSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}
