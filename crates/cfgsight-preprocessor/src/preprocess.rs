//! The preprocessing orchestrator
//!
//! Ties the passes together: cleanup, directive normalization, include
//! resolution, configuration enumeration, per-configuration code
//! selection and macro expansion. One `Preprocessor` handles one request
//! and owns all of its state.

use crate::configs::{get_configs, get_def};
use crate::directives;
use crate::evaluator::{match_cfg_def, tokenize};
use crate::includes::{split_lines, HeaderResolver, IncludeWalker};
use crate::macros::expand_macros;
use crate::reader::{read_source, CleanContext};
use cfgsight_core::{
    Diagnostic, DiagnosticSink, ProvenanceStack, Result, Settings, Severity, Suppressions,
};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Everything one translation unit produced.
#[derive(Debug)]
pub struct PreprocessedUnit {
    /// configuration name to preprocessed text
    pub configurations: BTreeMap<String, String>,
    /// true when at least one `#include` could not be resolved
    pub missing_include: bool,
}

/// Preprocessor for one translation unit.
pub struct Preprocessor {
    settings: Settings,
    sink: Arc<dyn DiagnosticSink>,
    suppressions: Suppressions,
    missing_include: AtomicBool,
}

impl Preprocessor {
    pub fn new(settings: Settings, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            settings,
            sink,
            suppressions: Suppressions::new(),
            missing_include: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Inline suppressions harvested while reading
    pub fn suppressions(&self) -> &Suppressions {
        &self.suppressions
    }

    /// Did any include fail to resolve during this request?
    pub fn missing_includes_seen(&self) -> bool {
        self.missing_include.load(Ordering::Relaxed)
    }

    /// Read and clean a source text: line normalization, comment
    /// removal, directive canonicalization, `#if 0` removal.
    pub fn read(&mut self, input: &str, filename: &str) -> String {
        let mut ctx = CleanContext {
            settings: &self.settings,
            sink: self.sink.as_ref(),
            suppressions: &mut self.suppressions,
        };
        read_source(input, filename, &mut ctx)
    }

    /// Normalize the unit and split it into the fully inlined text plus
    /// the list of configurations it can realize. With user defines
    /// present the conditional structure is resolved instead and no
    /// enumeration happens.
    pub fn scan(&mut self, input: &str, filename: &str) -> (String, Vec<String>) {
        let mut processed = self.read(input, filename);
        directives::remove_asm(&mut processed);
        processed = directives::normalize_defined(&processed);

        let resolver = HeaderResolver::new(self.settings.include_paths.clone());

        if self.settings.has_defines() || !self.settings.undefs.is_empty() {
            let mut defs = self.settings.define_map();
            let mut walker = IncludeWalker {
                settings: &self.settings,
                sink: self.sink.as_ref(),
                suppressions: &mut self.suppressions,
                resolver: &resolver,
                missing_include: &self.missing_include,
            };
            processed = walker.resolve_with_defs(&processed, filename, &mut defs, Vec::new());

            let configurations = if !self.settings.has_defines() {
                get_configs(&processed, filename, &self.settings, self.sink.as_ref())
            } else {
                Vec::new()
            };
            (processed, configurations)
        } else {
            let mut walker = IncludeWalker {
                settings: &self.settings,
                sink: self.sink.as_ref(),
                suppressions: &mut self.suppressions,
                resolver: &resolver,
                missing_include: &self.missing_include,
            };
            processed = walker.annotate(&processed, filename);
            processed = directives::replace_if_defined(&processed);

            let configurations =
                get_configs(&processed, filename, &self.settings, self.sink.as_ref());
            (processed, configurations)
        }
    }

    /// Preprocess a source text into a map from configuration name to
    /// preprocessed output. With user defines there is exactly one
    /// entry, keyed by the empty (default) configuration.
    pub fn preprocess_source(&mut self, input: &str, filename: &str) -> BTreeMap<String, String> {
        let (data, configurations) = self.scan(input, filename);
        let mut result = BTreeMap::new();

        if self.settings.has_defines() {
            result.insert(String::new(), self.get_code(&data, "", filename));
            return result;
        }

        for cfg in configurations {
            if self.settings.undefs.contains(&cfg) {
                debug!("skipping undefined configuration: {}", cfg);
                continue;
            }
            let code = self.get_code(&data, &cfg, filename);
            result.insert(cfg, code);
        }
        result
    }

    /// Preprocess a file on disk.
    pub fn preprocess_file(&mut self, path: &Path) -> Result<PreprocessedUnit> {
        let bytes = std::fs::read(path)?;
        let input = String::from_utf8_lossy(&bytes);
        let filename = path.to_string_lossy().replace('\\', "/");
        let configurations = self.preprocess_source(&input, &filename);
        Ok(PreprocessedUnit {
            configurations,
            missing_include: self.missing_includes_seen(),
        })
    }

    /// Re-walk the inlined text under one configuration: inactive arms
    /// become blank lines, `#define`/`#undef`/`#file`/`#endfile` are
    /// preserved, every other directive is blanked, then macros are
    /// expanded. A matched `#error` empties the whole output.
    pub fn get_code(&mut self, filedata: &str, cfg: &str, filename: &str) -> String {
        let mut cfgmap: HashMap<String, String> = HashMap::new();
        for part in cfg.split(';') {
            if part.is_empty() {
                continue;
            }
            match part.split_once('=') {
                Some((name, value)) => cfgmap.insert(name.to_string(), value.to_string()),
                None => cfgmap.insert(part.to_string(), String::new()),
            };
        }

        let mut ret = String::with_capacity(filedata.len());

        let mut matched_cfg = true;
        let mut matching_ifdef: Vec<bool> = Vec::new();
        let mut matched_ifdef: Vec<bool> = Vec::new();

        let mut provenance = ProvenanceStack::new(filename);

        let lines = split_lines(filedata);
        let mut i = 0;
        while i < lines.len() {
            let mut line = lines[i].to_string();
            i += 1;
            provenance.advance(1);

            if line.starts_with("#pragma asm") {
                ret.push('\n');
                let mut found_end = false;
                while i < lines.len() {
                    line = lines[i].to_string();
                    i += 1;
                    if line.starts_with("#pragma endasm") {
                        found_end = true;
                        break;
                    }
                    ret.push('\n');
                }
                if !found_end {
                    break;
                }

                // "#pragma endasm ( var = value )" keeps the assigned variable
                if line.contains('=') {
                    let rest = &line["#pragma endasm".len()..];
                    if let Some(tokens) = tokenize(rest) {
                        if tokens.len() == 5
                            && tokens[0] == "("
                            && tokens[2] == "="
                            && tokens[4] == ")"
                        {
                            ret.push_str(&format!("asm({});", tokens[1]));
                        }
                    }
                }
                ret.push('\n');
                continue;
            }

            let def = get_def(&line, true);
            let ndef = get_def(&line, false);

            let emptymatch = matching_ifdef.is_empty() || matched_ifdef.is_empty();

            if line.starts_with("#define ") {
                matched_cfg = true;

                // a user undef suppresses the define outright
                for undef in &self.settings.undefs {
                    let tail = &line[8..];
                    if let Some(pos) = tail.find(undef.as_str()) {
                        let end = pos + undef.len();
                        let boundary = tail.as_bytes().get(end);
                        if boundary.is_none() || boundary == Some(&b' ') || boundary == Some(&b'(')
                        {
                            matched_cfg = false;
                            break;
                        }
                    }
                }

                for &m in &matching_ifdef {
                    matched_cfg &= m;
                }

                if matched_cfg {
                    let tail = &line[8..];
                    match tail.find([' ', '(']) {
                        None => {
                            cfgmap.insert(tail.to_string(), String::new());
                        }
                        Some(pos) if tail.as_bytes()[pos] == b' ' => {
                            let mut value = tail[pos + 1..].to_string();
                            if let Some(resolved) = cfgmap.get(&value) {
                                value = resolved.clone();
                            }
                            cfgmap.insert(tail[..pos].to_string(), value);
                        }
                        Some(pos) => {
                            cfgmap.insert(tail[..pos].to_string(), String::new());
                        }
                    }
                }
            } else if let Some(name) = line.strip_prefix("#undef ") {
                cfgmap.remove(name);
            } else if !emptymatch && line.starts_with("#elif !") {
                if *matched_ifdef.last().unwrap() {
                    *matching_ifdef.last_mut().unwrap() = false;
                } else if !match_cfg_def(&cfgmap, &ndef) {
                    *matching_ifdef.last_mut().unwrap() = true;
                    *matched_ifdef.last_mut().unwrap() = true;
                }
            } else if !emptymatch && line.starts_with("#elif ") {
                if *matched_ifdef.last().unwrap() {
                    *matching_ifdef.last_mut().unwrap() = false;
                } else if match_cfg_def(&cfgmap, &def) {
                    *matching_ifdef.last_mut().unwrap() = true;
                    *matched_ifdef.last_mut().unwrap() = true;
                }
            } else if !def.is_empty() {
                let matches = match_cfg_def(&cfgmap, &def);
                matching_ifdef.push(matches);
                matched_ifdef.push(matches);
            } else if !ndef.is_empty() {
                let matches = !match_cfg_def(&cfgmap, &ndef);
                matching_ifdef.push(matches);
                matched_ifdef.push(matches);
            } else if !emptymatch && line == "#else" {
                if let Some(last) = matched_ifdef.last() {
                    *matching_ifdef.last_mut().unwrap() = !*last;
                }
            } else if line.starts_with("#endif") {
                matched_ifdef.pop();
                matching_ifdef.pop();
            }

            if line.starts_with('#') {
                matched_cfg = matching_ifdef.iter().all(|&m| m);
            }

            // a reachable #error empties this configuration's output
            if matched_cfg && line.starts_with("#error") {
                if self.settings.has_defines() {
                    self.sink.report(Diagnostic::new(
                        Severity::Error,
                        "preprocessorErrorDirective",
                        provenance.location(),
                        line.clone(),
                    ));
                }
                return String::new();
            }

            if !matched_cfg
                && (line.starts_with("#define ") || line.starts_with("#undef"))
            {
                line.clear();
            } else if line.starts_with("#file \"")
                || line.starts_with("#endfile")
                || line.starts_with("#define ")
                || line.starts_with("#undef")
            {
                // #file/#endfile must survive or line numbers downstream
                // are corrupted
                if line.starts_with("#file \"") {
                    let end = line.len().saturating_sub(1).max(7);
                    provenance.push(&line[7..end]);
                } else if line.starts_with("#endfile") {
                    provenance.pop();
                }
            } else if !matched_cfg || line.starts_with('#') {
                // only #define/#undef/#file/#endfile survive the walk
                line.clear();
            }

            ret.push_str(&line);
            ret.push('\n');
        }

        expand_macros(&ret, filename, self.sink.as_ref()).unwrap_or_default()
    }
}
