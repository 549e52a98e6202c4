//! Header resolution and inlining
//!
//! Locates headers on the search path and inlines their cleaned-up
//! contents, bracketed by `#file "path"` / `#endfile` markers so that
//! line/file provenance can be reconstructed downstream. Two walks share
//! the machinery: one inlines everything (both branch arms kept, used
//! before configuration enumeration), one resolves conditionals against a
//! running symbol map (used when user defines are active).

use crate::configs::get_def;
use crate::evaluator::match_cfg_def;
use crate::reader::{read_source, CleanContext};
use cfgsight_core::{
    Diagnostic, DiagnosticSink, Location, Settings, Severity, Suppressions,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Kind of `#include` directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    /// `#include "header.h"` - searched relative to the including file
    User,
    /// `#include <header.h>` - search paths only
    System,
}

/// Extract the header name from the text after `#include`. Backslashes in
/// the name are normalized to forward slashes.
pub(crate) fn header_name(tail: &str) -> Option<(String, HeaderKind)> {
    let chars: Vec<char> = tail.chars().collect();
    let start = chars.iter().position(|&c| c == '<' || c == '"')?;
    let close = if chars[start] == '<' { '>' } else { '"' };

    let mut name = String::new();
    for &c in &chars[start + 1..] {
        if c == close {
            break;
        }
        name.push(if c == '\\' { '/' } else { c });
    }

    let kind = if close == '"' {
        HeaderKind::User
    } else {
        HeaderKind::System
    };
    Some((name, kind))
}

/// Header file resolver for the configured search paths.
pub struct HeaderResolver {
    include_paths: Vec<PathBuf>,
}

impl HeaderResolver {
    /// Create a resolver over the given search paths.
    pub fn new(include_paths: Vec<PathBuf>) -> Self {
        Self { include_paths }
    }

    /// Get all include paths
    pub fn include_paths(&self) -> &[PathBuf] {
        &self.include_paths
    }

    /// Resolve a header file path.
    ///
    /// User headers first try the directory of the including file, then
    /// the search paths; system headers skip the local directory. The bare
    /// name (relative to the working directory) is the last resort.
    pub fn resolve(
        &self,
        header: &str,
        kind: HeaderKind,
        from_dir: Option<&Path>,
    ) -> Option<PathBuf> {
        if kind == HeaderKind::User {
            if let Some(dir) = from_dir {
                let candidate = dir.join(header);
                if candidate.is_file() {
                    debug!("resolved {} relative to {:?}", header, dir);
                    return Some(candidate);
                }
            }
        }

        for include_path in &self.include_paths {
            let candidate = include_path.join(header);
            if candidate.is_file() {
                debug!("resolved {} in {:?}", header, include_path);
                return Some(candidate);
            }
        }

        let bare = PathBuf::from(header);
        if bare.is_file() {
            return Some(bare);
        }

        debug!("failed to resolve header: {}", header);
        None
    }
}

/// Directory part of a path string, for resolving sibling headers.
fn dir_of(file_path: &str) -> Option<PathBuf> {
    let p = Path::new(file_path);
    p.parent().map(Path::to_path_buf)
}

/// State shared by one include-resolution walk.
pub(crate) struct IncludeWalker<'a> {
    pub settings: &'a Settings,
    pub sink: &'a dyn DiagnosticSink,
    pub suppressions: &'a mut Suppressions,
    pub resolver: &'a HeaderResolver,
    pub missing_include: &'a AtomicBool,
}

impl IncludeWalker<'_> {
    fn read_header(&mut self, content: &str, filename: &str) -> String {
        let mut ctx = CleanContext {
            settings: self.settings,
            sink: self.sink,
            suppressions: &mut *self.suppressions,
        };
        read_source(content, filename, &mut ctx)
    }

    fn report_missing(&self, file: &str, linenr: u32, header: &str, kind: HeaderKind) {
        let (severity, id) = match kind {
            HeaderKind::User => (Severity::Information, "missingInclude"),
            HeaderKind::System => (Severity::Debug, "debug"),
        };
        self.sink.report(Diagnostic::new(
            severity,
            id,
            Location::new(file, linenr),
            format!("Include file: \"{}\" not found.", header),
        ));
    }

    fn handle_missing(&mut self, file: &str, linenr: u32, header: &str, kind: HeaderKind) {
        if kind == HeaderKind::User || self.settings.features.debug_warnings {
            if !self.suppressions.is_suppressed("missingInclude", "", 0) {
                self.missing_include.store(true, Ordering::Relaxed);
            }
            if !self
                .suppressions
                .is_suppressed("missingInclude", file, linenr)
            {
                self.report_missing(file, linenr, header, kind);
            }
        }
    }

    /// Inline every reachable `#include`, leaving the conditional
    /// structure untouched. A header already inlined anywhere in the unit
    /// is skipped (lowercased path comparison), which also breaks cycles.
    pub fn annotate(&mut self, code: &str, file_path: &str) -> String {
        let mut handled: HashSet<String> = HashSet::new();
        self.annotate_inner(code, file_path, &mut handled)
    }

    fn annotate_inner(
        &mut self,
        code: &str,
        file_path: &str,
        handled: &mut HashSet<String>,
    ) -> String {
        let local_dir = dir_of(file_path);
        let mut out = String::with_capacity(code.len());

        let mut linenr = 0u32;
        for line in split_lines(code) {
            linenr += 1;
            let Some(tail) = line.strip_prefix("#include") else {
                out.push_str(line);
                out.push('\n');
                continue;
            };
            let Some((header, kind)) = header_name(tail) else {
                out.push('\n');
                continue;
            };

            let resolved = self.resolver.resolve(&header, kind, local_dir.as_deref());
            let Some(resolved) = resolved else {
                if self.settings.features.check_configuration {
                    self.handle_missing(file_path, linenr, &header, kind);
                } else if kind == HeaderKind::User || self.settings.features.debug_warnings {
                    if !self.suppressions.is_suppressed("missingInclude", "", 0) {
                        self.missing_include.store(true, Ordering::Relaxed);
                    }
                }
                out.push('\n');
                continue;
            };

            let resolved_str = resolved.to_string_lossy().replace('\\', "/");
            if !handled.insert(resolved_str.to_lowercase()) {
                // already inlined once in this unit
                out.push('\n');
                continue;
            }

            let content = match std::fs::read(&resolved) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(_) => {
                    out.push('\n');
                    continue;
                }
            };
            let processed = self.read_header(&content, &resolved_str);
            if processed.is_empty() {
                out.push('\n');
                continue;
            }

            let inlined = self.annotate_inner(&processed, &resolved_str, handled);
            out.push_str(&format!(
                "#file \"{}\"\n{}\n#endfile\n",
                resolved_str, inlined
            ));
        }
        out
    }

    /// Resolve conditionals against the running symbol map `defs` while
    /// inlining active `#include`s. `includes` carries the headers already
    /// visited on the current include path (lowercased), breaking cycles.
    pub fn resolve_with_defs(
        &mut self,
        code: &str,
        file_path: &str,
        defs: &mut HashMap<String, String>,
        mut includes: Vec<String>,
    ) -> String {
        let local_dir = dir_of(file_path);

        // current #if nesting depth, and how deep the arms match
        let mut indent = 0u32;
        let mut indentmatch = 0u32;
        // no more #elif/#else arm can match once one arm at this depth has
        let mut else_is_true = true;
        let mut suppress = false;

        let mut out = String::with_capacity(code.len());
        let mut linenr = 0u32;
        for line in split_lines(code) {
            linenr += 1;

            if line.starts_with("#ifdef ") {
                if indent == indentmatch {
                    let tag = get_def(line, true);
                    if defs.contains_key(&tag) {
                        else_is_true = false;
                        indentmatch += 1;
                    } else if self.settings.undefs.contains(&tag) {
                        else_is_true = true;
                        indentmatch += 1;
                        suppress = true;
                    }
                }
                indent += 1;
                if indent == indentmatch + 1 {
                    else_is_true = true;
                }
            } else if line.starts_with("#ifndef ") {
                if indent == indentmatch {
                    let tag = get_def(line, false);
                    if !defs.contains_key(&tag) {
                        else_is_true = false;
                        indentmatch += 1;
                    } else if self.settings.undefs.contains(&tag) {
                        else_is_true = false;
                        indentmatch += 1;
                        suppress = false;
                    }
                }
                indent += 1;
                if indent == indentmatch + 1 {
                    else_is_true = true;
                }
            } else if !suppress && line.starts_with("#if ") {
                if indent == indentmatch && match_cfg_def(defs, &line[4..]) {
                    else_is_true = false;
                    indentmatch += 1;
                }
                indent += 1;
                if indent == indentmatch + 1 {
                    else_is_true = true;
                }
            } else if line.starts_with("#elif ") || line.starts_with("#else") {
                if !else_is_true {
                    if indentmatch == indent {
                        indentmatch = indent.saturating_sub(1);
                    }
                } else if indentmatch == indent {
                    indentmatch = indent.saturating_sub(1);
                } else if indentmatch + 1 == indent {
                    let matched = if line.starts_with("#else") {
                        true
                    } else {
                        match_cfg_def(defs, &line[6..])
                    };
                    if matched {
                        indentmatch = indent;
                        else_is_true = false;
                    }
                }
                if suppress {
                    suppress = false;
                    indentmatch = indent;
                }
            } else if line.starts_with("#endif") {
                indent = indent.saturating_sub(1);
                if indentmatch > indent || indent == 0 {
                    indentmatch = indent;
                    else_is_true = false;
                    suppress = false;
                }
            } else if indentmatch == indent {
                if !suppress && line.starts_with("#define ") {
                    let tail = &line[8..];
                    let tag = match tail.find([' ', '(']) {
                        None => {
                            defs.insert(tail.to_string(), String::new());
                            tail.to_string()
                        }
                        Some(pos) if tail.as_bytes()[pos] == b'(' => {
                            let tag = tail[..pos].to_string();
                            defs.insert(tag.clone(), String::new());
                            tag
                        }
                        Some(pos) => {
                            let tag = tail[..pos].to_string();
                            let value = tail[pos + 1..].to_string();
                            // alias one define to another's resolved value
                            let resolved =
                                defs.get(&value).cloned().unwrap_or(value);
                            defs.insert(tag.clone(), resolved);
                            tag
                        }
                    };
                    if self.settings.undefs.contains(&tag) {
                        defs.remove(&tag);
                    }
                } else if !suppress && line.starts_with("#undef ") {
                    defs.remove(&line[7..]);
                } else if !suppress && line.starts_with("#error ") {
                    self.sink.report(Diagnostic::new(
                        Severity::Error,
                        "preprocessorErrorDirective",
                        Location::new(file_path, linenr),
                        line[7..].to_string(),
                    ));
                } else if !suppress && line.starts_with("#include ") {
                    let Some((header, kind)) = header_name(&line[9..]) else {
                        out.push('\n');
                        continue;
                    };

                    let resolved =
                        self.resolver.resolve(&header, kind, local_dir.as_deref());
                    let Some(resolved) = resolved else {
                        self.handle_missing(file_path, linenr, &header, kind);
                        out.push('\n');
                        continue;
                    };

                    let resolved_str = resolved.to_string_lossy().replace('\\', "/");
                    if includes
                        .iter()
                        .any(|p| p.eq_ignore_ascii_case(&resolved_str))
                    {
                        out.push('\n');
                        continue;
                    }
                    includes.push(resolved_str.clone());

                    let content = match std::fs::read(&resolved) {
                        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                        Err(_) => {
                            out.push('\n');
                            continue;
                        }
                    };
                    let processed = self.read_header(&content, &resolved_str);
                    let inner = self.resolve_with_defs(
                        &processed,
                        &resolved_str,
                        defs,
                        includes.clone(),
                    );
                    out.push_str(&format!(
                        "#file \"{}\"\n{}\n#endfile\n",
                        resolved_str, inner
                    ));
                    continue;
                }

                if !suppress {
                    out.push_str(line);
                }
            }

            out.push('\n');
        }

        out
    }
}

/// The lines of a text the way a `getline` loop sees them: a trailing
/// newline does not produce a final empty line.
pub(crate) fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    let text = text.strip_suffix('\n').unwrap_or(text);
    text.split('\n').collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfgsight_core::CollectSink;
    use std::fs;
    use tempfile::TempDir;

    fn walker_fixture(
        settings: &Settings,
        sink: &CollectSink,
        suppressions: &mut Suppressions,
        resolver: &HeaderResolver,
        flag: &AtomicBool,
    ) -> String {
        let mut walker = IncludeWalker {
            settings,
            sink,
            suppressions,
            resolver,
            missing_include: flag,
        };
        walker.annotate("#include \"inc.h\"\nint x = FOO;\n", "main.c")
    }

    #[test]
    fn test_header_name() {
        assert_eq!(
            header_name(" \"foo.h\""),
            Some(("foo.h".to_string(), HeaderKind::User))
        );
        assert_eq!(
            header_name(" <sys/stat.h>"),
            Some(("sys/stat.h".to_string(), HeaderKind::System))
        );
        assert_eq!(
            header_name(" \"dir\\\\sub\\\\x.h\"").map(|(n, _)| n),
            Some("dir//sub//x.h".to_string())
        );
        assert_eq!(header_name(" FOO"), None);
    }

    #[test]
    fn test_resolver() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("include")).unwrap();
        fs::write(dir.path().join("include/a.h"), "int a;\n").unwrap();

        let resolver = HeaderResolver::new(vec![dir.path().join("include")]);
        assert!(resolver
            .resolve("a.h", HeaderKind::System, None)
            .is_some());
        assert!(resolver.resolve("b.h", HeaderKind::System, None).is_none());
    }

    #[test]
    fn test_annotate_inlines_with_provenance() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("inc.h"), "#define FOO 42\n").unwrap();

        let settings = Settings::default();
        let sink = CollectSink::new();
        let mut suppressions = Suppressions::new();
        let resolver = HeaderResolver::new(vec![dir.path().to_path_buf()]);
        let flag = AtomicBool::new(false);
        let out = walker_fixture(&settings, &sink, &mut suppressions, &resolver, &flag);

        assert!(out.contains("#file \""));
        assert!(out.contains("#define FOO 42"));
        assert!(out.contains("#endfile"));
        assert!(!flag.load(Ordering::Relaxed));
    }

    #[test]
    fn test_missing_include_sets_flag() {
        let settings = Settings::default();
        let sink = CollectSink::new();
        let mut suppressions = Suppressions::new();
        let resolver = HeaderResolver::new(vec![]);
        let flag = AtomicBool::new(false);
        let out = walker_fixture(&settings, &sink, &mut suppressions, &resolver, &flag);

        // directive replaced by a blank line, flag raised
        assert!(out.starts_with('\n'));
        assert!(flag.load(Ordering::Relaxed));
    }

    #[test]
    fn test_include_cycle_broken() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("a.h"),
            "#include \"b.h\"\nint a;\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("b.h"),
            "#include \"a.h\"\nint b;\n",
        )
        .unwrap();

        let settings = Settings::default();
        let sink = CollectSink::new();
        let mut suppressions = Suppressions::new();
        let resolver = HeaderResolver::new(vec![dir.path().to_path_buf()]);
        let flag = AtomicBool::new(false);
        let mut walker = IncludeWalker {
            settings: &settings,
            sink: &sink,
            suppressions: &mut suppressions,
            resolver: &resolver,
            missing_include: &flag,
        };
        let out = walker.annotate("#include \"a.h\"\nint m;\n", "main.c");

        // each header is inlined exactly once
        assert_eq!(out.matches("int a;").count(), 1);
        assert_eq!(out.matches("int b;").count(), 1);
        assert_eq!(
            out.matches("#file").count(),
            out.matches("#endfile").count()
        );
        assert_eq!(out.matches("#file").count(), 2);
    }

    #[test]
    fn test_resolve_with_defs_selects_arm() {
        let settings = Settings::default();
        let sink = CollectSink::new();
        let mut suppressions = Suppressions::new();
        let resolver = HeaderResolver::new(vec![]);
        let flag = AtomicBool::new(false);
        let mut walker = IncludeWalker {
            settings: &settings,
            sink: &sink,
            suppressions: &mut suppressions,
            resolver: &resolver,
            missing_include: &flag,
        };

        let mut defs: HashMap<String, String> =
            [("A".to_string(), String::new())].into_iter().collect();
        let code = "#ifdef A\nx;\n#else\ny;\n#endif\n";
        let out = walker.resolve_with_defs(code, "main.c", &mut defs, Vec::new());
        assert!(out.contains("x;"));
        assert!(!out.contains("y;"));
    }

    #[test]
    fn test_resolve_with_defs_alias_binding() {
        let settings = Settings::default();
        let sink = CollectSink::new();
        let mut suppressions = Suppressions::new();
        let resolver = HeaderResolver::new(vec![]);
        let flag = AtomicBool::new(false);
        let mut walker = IncludeWalker {
            settings: &settings,
            sink: &sink,
            suppressions: &mut suppressions,
            resolver: &resolver,
            missing_include: &flag,
        };

        let mut defs: HashMap<String, String> = HashMap::new();
        let code = "#define A 1\n#define B A\n#if B\nyes;\n#endif\n";
        let out = walker.resolve_with_defs(code, "main.c", &mut defs, Vec::new());
        assert_eq!(defs.get("B"), Some(&"1".to_string()));
        assert!(out.contains("yes;"));
    }

    #[test]
    fn test_user_undef_wins() {
        let mut settings = Settings::default();
        settings.undefs.insert("A".to_string());
        let sink = CollectSink::new();
        let mut suppressions = Suppressions::new();
        let resolver = HeaderResolver::new(vec![]);
        let flag = AtomicBool::new(false);
        let mut walker = IncludeWalker {
            settings: &settings,
            sink: &sink,
            suppressions: &mut suppressions,
            resolver: &resolver,
            missing_include: &flag,
        };

        let mut defs: HashMap<String, String> = HashMap::new();
        let code = "#define A\n#ifdef A\nx;\n#endif\n";
        let out = walker.resolve_with_defs(code, "main.c", &mut defs, Vec::new());
        assert!(!defs.contains_key("A"));
        assert!(!out.contains("x;"));
    }

    #[test]
    fn test_error_directive_reported() {
        let settings = Settings::default();
        let sink = CollectSink::new();
        let mut suppressions = Suppressions::new();
        let resolver = HeaderResolver::new(vec![]);
        let flag = AtomicBool::new(false);
        let mut walker = IncludeWalker {
            settings: &settings,
            sink: &sink,
            suppressions: &mut suppressions,
            resolver: &resolver,
            missing_include: &flag,
        };

        let mut defs: HashMap<String, String> = HashMap::new();
        let code = "#error unsupported platform\n";
        walker.resolve_with_defs(code, "main.c", &mut defs, Vec::new());
        assert!(sink.has_id("preprocessorErrorDirective"));
    }
}
