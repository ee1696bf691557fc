//! # Block Assembler
//!
//! Groups incoming telemetry lines into blocks delimited by a terminator line
//! (a run of `-` characters).
//!
//! The device prints one block per reporting cycle:
//!
//! ```text
//! Date/Time: 2025-01-01 12:00:00
//! GPS: Searching, No fix for 12 seconds
//! Mean (Magnitude): 9.81
//! -------------------------------------------------------------------------------
//! ```

use tracing::{debug, warn};

/// Default maximum number of buffered lines before the buffer is dropped
pub const DEFAULT_MAX_BLOCK_LINES: usize = 30;

/// Default minimum run of `-` that marks a terminator line
pub const DEFAULT_TERMINATOR_MIN_DASHES: usize = 5;

/// A completed run of telemetry lines (terminator excluded)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    lines: Vec<String>,
}

impl Block {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Accumulates lines until a terminator completes a block
#[derive(Debug)]
pub struct BlockAssembler {
    lines: Vec<String>,
    max_lines: usize,
    terminator: String,
}

impl Default for BlockAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BLOCK_LINES, DEFAULT_TERMINATOR_MIN_DASHES)
    }
}

impl BlockAssembler {
    /// Creates an assembler
    ///
    /// # Arguments
    ///
    /// * `max_lines` - Buffered line ceiling; exceeding it drops the buffer
    /// * `terminator_min_dashes` - Length of the `-` run that ends a block
    pub fn new(max_lines: usize, terminator_min_dashes: usize) -> Self {
        Self {
            lines: Vec::with_capacity(max_lines.min(64)),
            max_lines,
            terminator: "-".repeat(terminator_min_dashes.max(1)),
        }
    }

    /// Feed one line from the line source
    ///
    /// Returns a [`Block`] when `line` is a terminator and at least one line
    /// is buffered. Blank lines are ignored, and a terminator with nothing
    /// buffered is treated as noise.
    ///
    /// # Examples
    ///
    /// ```
    /// use sensor_bridge::telemetry::BlockAssembler;
    ///
    /// let mut assembler = BlockAssembler::default();
    /// assert!(assembler.feed("-------").is_none());
    /// assert!(assembler.feed("Date/Time: 2025-01-01 12:00:00").is_none());
    ///
    /// let block = assembler.feed("-------").unwrap();
    /// assert_eq!(block.lines(), ["Date/Time: 2025-01-01 12:00:00"]);
    /// ```
    pub fn feed(&mut self, line: &str) -> Option<Block> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if self.is_terminator(line) {
            if self.lines.is_empty() {
                debug!("Ignoring terminator with no buffered lines");
                return None;
            }
            return Some(Block::new(std::mem::take(&mut self.lines)));
        }

        self.lines.push(line.to_string());

        if self.lines.len() > self.max_lines {
            warn!(
                "No terminator after {} lines, dropping buffered lines",
                self.lines.len()
            );
            self.lines.clear();
        }

        None
    }

    /// Discard a partially assembled block
    pub fn reset(&mut self) {
        if !self.lines.is_empty() {
            debug!("Discarding {} buffered lines", self.lines.len());
        }
        self.lines.clear();
    }

    /// Number of lines buffered since the last block
    pub fn pending(&self) -> usize {
        self.lines.len()
    }

    fn is_terminator(&self, line: &str) -> bool {
        line.contains(self.terminator.as_str())
    }
}
