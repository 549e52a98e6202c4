//! Parallel preprocessing of many translation units using rayon
//!
//! Units are independent: each gets its own `Preprocessor` with its own
//! branch stacks, macro map and symbol map, so nothing is shared across
//! threads except the immutable settings.

use crate::preprocess::{PreprocessedUnit, Preprocessor};
use cfgsight_core::{CollectSink, Diagnostic, Result, Settings};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Progress callback type
pub type ProgressCallback = Box<dyn Fn(ProgressEvent) + Send + Sync>;

/// Progress event for tracking preprocessing progress
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

/// Preprocessing phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    Scanning,
    Preprocessing,
    Complete,
}

/// Result of preprocessing one unit, with its collected diagnostics.
#[derive(Debug)]
pub struct UnitReport {
    pub unit: PreprocessedUnit,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parallel driver over many translation units
pub struct ParallelPreprocessor {
    settings: Settings,
    progress_callback: Option<Arc<ProgressCallback>>,
}

impl ParallelPreprocessor {
    /// Create a new parallel preprocessor
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            progress_callback: None,
        }
    }

    /// Set progress callback
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }

    /// Preprocess multiple files in parallel
    pub fn preprocess_files(&self, paths: &[PathBuf]) -> Vec<(PathBuf, Result<UnitReport>)> {
        let total = paths.len();
        let processed = AtomicUsize::new(0);

        self.emit_progress(
            ProgressPhase::Preprocessing,
            0,
            total,
            "Starting parallel preprocessing...",
        );

        let results: Vec<_> = paths
            .par_iter()
            .map(|path| {
                let result = self.preprocess_one(path);

                let current = processed.fetch_add(1, Ordering::SeqCst) + 1;
                if current % 10 == 0 || current == total {
                    self.emit_progress(
                        ProgressPhase::Preprocessing,
                        current,
                        total,
                        format!("Preprocessed {}/{} files", current, total),
                    );
                }

                (path.clone(), result)
            })
            .collect();

        self.emit_progress(ProgressPhase::Complete, total, total, "Preprocessing complete");
        results
    }

    /// Preprocess every matching source file under a directory
    pub fn preprocess_directory(
        &self,
        dir: &Path,
        extensions: &[&str],
    ) -> Vec<(PathBuf, Result<UnitReport>)> {
        self.emit_progress(ProgressPhase::Scanning, 0, 0, "Scanning directory...");

        let paths: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| extensions.contains(&ext))
                    .unwrap_or(false)
            })
            .map(|e| e.path().to_path_buf())
            .collect();

        info!("Found {} files to preprocess", paths.len());
        self.emit_progress(
            ProgressPhase::Scanning,
            paths.len(),
            paths.len(),
            format!("Found {} files", paths.len()),
        );

        self.preprocess_files(&paths)
    }

    /// Preprocess a single unit with a private state and sink
    pub fn preprocess_one(&self, path: &Path) -> Result<UnitReport> {
        debug!("Preprocessing {:?}", path);
        let sink = Arc::new(CollectSink::new());
        let mut preprocessor = Preprocessor::new(self.settings.clone(), sink.clone());
        let unit = preprocessor.preprocess_file(path)?;
        Ok(UnitReport {
            unit,
            diagnostics: sink.diagnostics(),
        })
    }

    fn emit_progress<S: Into<String>>(
        &self,
        phase: ProgressPhase,
        current: usize,
        total: usize,
        message: S,
    ) {
        if let Some(ref callback) = self.progress_callback {
            callback(ProgressEvent {
                phase,
                current,
                total,
                message: message.into(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_parallel_preprocess() {
        let dir = TempDir::new().unwrap();

        for i in 0..5 {
            let path = dir.path().join(format!("test{}.c", i));
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "#ifdef FEATURE{}\nint feature;\n#endif", i).unwrap();
        }

        let driver = ParallelPreprocessor::new(Settings::default());
        let results = driver.preprocess_directory(dir.path(), &["c"]);

        assert_eq!(results.len(), 5);
        for (_, result) in results {
            let report = result.unwrap();
            assert_eq!(report.unit.configurations.len(), 2);
        }
    }

    #[test]
    fn test_progress_events() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.c"), "int x;\n").unwrap();

        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let events2 = events.clone();
        let driver = ParallelPreprocessor::new(Settings::default())
            .with_progress(move |e| events2.lock().unwrap().push(e.phase));
        driver.preprocess_directory(dir.path(), &["c"]);

        let seen = events.lock().unwrap();
        assert!(seen.contains(&ProgressPhase::Scanning));
        assert!(seen.contains(&ProgressPhase::Complete));
    }

    #[test]
    fn test_missing_include_reported_per_unit() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.c"), "#include \"gone.h\"\nint x;\n").unwrap();

        let driver = ParallelPreprocessor::new(Settings::default());
        let report = driver.preprocess_one(&dir.path().join("a.c")).unwrap();
        assert!(report.unit.missing_include);
    }
}
