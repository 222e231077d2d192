use std::time::Duration;

use colored::Color;

/// Number of trailing lines shown per file when none is requested.
pub const DEFAULT_LINES: usize = 5;

/// How often a rotated file's original path is checked for reappearance.
pub const DEFAULT_REAPPEAR_INTERVAL: Duration = Duration::from_secs(2);

/// Colors assigned to files, in argument order. Its length is also the
/// maximum number of files followed at once.
pub const DEFAULT_PALETTE: [Color; 5] = [
    Color::Red,
    Color::Yellow,
    Color::Blue,
    Color::Magenta,
    Color::Green,
];

/// Settings for a follow session, handed to every component that needs them.
#[derive(Clone, Debug, PartialEq)]
pub struct TailConfig {
    /// Trailing lines emitted for each file at startup.
    pub lines: usize,
    /// Poll interval while waiting for a rotated file to reappear.
    pub reappear_interval: Duration,
    /// Colors handed out to files in argument order, wrapping around.
    pub palette: Vec<Color>,
}

impl TailConfig {
    /// Color of the `index`-th file argument.
    pub fn color_for(&self, index: usize) -> Color {
        if self.palette.is_empty() {
            return Color::White;
        }
        self.palette[index % self.palette.len()]
    }
}

impl Default for TailConfig {
    fn default() -> Self {
        TailConfig {
            lines: DEFAULT_LINES,
            reappear_interval: DEFAULT_REAPPEAR_INTERVAL,
            palette: DEFAULT_PALETTE.to_vec(),
        }
    }
}
