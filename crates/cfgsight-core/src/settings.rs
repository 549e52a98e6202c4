//! Preprocessing settings
//!
//! Carries everything a front-end hands to the preprocessor: header search
//! paths, user-supplied defines and undefs, and feature flags.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

/// Settings for one preprocessing session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Header search paths (-I)
    pub include_paths: Vec<PathBuf>,

    /// User defines, each `NAME` or `NAME=VALUE` (-D)
    pub defines: Vec<String>,

    /// User undefs (-U); these always win over `#define`s in the code
    pub undefs: BTreeSet<String>,

    /// Feature flags
    pub features: Features,
}

impl Settings {
    /// The user defines as a symbol map. `NAME` maps to an empty value.
    pub fn define_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for def in &self.defines {
            match def.split_once('=') {
                Some((name, value)) => map.insert(name.to_string(), value.to_string()),
                None => map.insert(def.clone(), String::new()),
            };
        }
        map
    }

    /// True if the user supplied any `-D` define
    pub fn has_defines(&self) -> bool {
        !self.defines.is_empty()
    }
}

/// Feature flags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Features {
    /// Honor `// cfgsight-suppress <id>` comments
    pub inline_suppressions: bool,

    /// Enable experimental checks
    pub experimental: bool,

    /// Style checks are enabled (with `experimental`, switches fall-through
    /// comments into implicit suppressions)
    pub style_enabled: bool,

    /// Emit debug-severity diagnostics, e.g. for missing system headers
    pub debug_warnings: bool,

    /// Report include problems with exact provenance
    pub check_configuration: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            inline_suppressions: false,
            experimental: false,
            style_enabled: false,
            debug_warnings: false,
            check_configuration: false,
        }
    }
}

/// One inline suppression harvested from a comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suppression {
    pub id: String,
    pub file: String,
    pub line: u32,
}

/// Registered suppressions for a session
#[derive(Debug, Clone, Default)]
pub struct Suppressions {
    entries: Vec<Suppression>,
}

impl Suppressions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a suppression. The id must be a plain identifier; anything
    /// else is rejected with a message for the caller to report.
    pub fn add(&mut self, id: &str, file: &str, line: u32) -> Result<(), String> {
        let mut chars = id.chars();
        let valid = match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        };
        if !valid {
            return Err(format!("Failed to add suppression. Invalid id \"{}\"", id));
        }
        self.entries.push(Suppression {
            id: id.to_string(),
            file: file.to_string(),
            line,
        });
        Ok(())
    }

    /// Is the given finding suppressed? A line of 0 in the entry matches
    /// any line of that file.
    pub fn is_suppressed(&self, id: &str, file: &str, line: u32) -> bool {
        self.entries.iter().any(|s| {
            s.id == id && (s.file == file || s.file.is_empty()) && (s.line == 0 || s.line == line)
        })
    }

    pub fn entries(&self) -> &[Suppression] {
        &self.entries
    }
}
