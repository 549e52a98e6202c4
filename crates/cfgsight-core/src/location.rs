//! Source code location types

use serde::{Deserialize, Serialize};

/// A position in preprocessed source: file path plus 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// File path
    pub file: String,
    /// Line number (1-based)
    pub line: u32,
}

impl Location {
    /// Create a new location
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Stack of (path, line) frames tracking which file a line of inlined
/// output came from. A `#file "p"` marker opens a frame, `#endfile`
/// closes it; diagnostics always carry the topmost frame.
#[derive(Debug, Clone)]
pub struct ProvenanceStack {
    frames: Vec<(String, u32)>,
}

impl ProvenanceStack {
    /// Create a stack rooted at the primary source file.
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            frames: vec![(file.into(), 0)],
        }
    }

    /// Enter an inlined file. The current line number is saved so it can
    /// be restored when the matching `#endfile` is reached.
    pub fn push(&mut self, file: impl Into<String>) {
        self.frames.push((file.into(), 0));
    }

    /// Leave an inlined file. The root frame is never popped.
    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Path of the file currently being walked.
    pub fn file(&self) -> &str {
        // frames is never empty
        &self.frames.last().unwrap().0
    }

    /// Line number within the current file.
    pub fn line(&self) -> u32 {
        self.frames.last().unwrap().1
    }

    /// Advance the current frame by a number of lines.
    pub fn advance(&mut self, lines: u32) {
        if let Some(frame) = self.frames.last_mut() {
            frame.1 += lines;
        }
    }

    /// Current location as carried by diagnostics.
    pub fn location(&self) -> Location {
        Location::new(self.file(), self.line())
    }
}
