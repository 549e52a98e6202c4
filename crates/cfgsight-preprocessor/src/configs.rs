//! Configuration enumeration
//!
//! Walks the normalized directive structure of a translation unit and
//! produces every distinct configuration the `#if` branching can realize,
//! as canonical `A;B;C` strings (sorted, unique identifiers, optionally
//! `=integer`). The empty configuration is always present.

use crate::evaluator::{simplify_condition, tokenize};
use cfgsight_core::{Diagnostic, DiagnosticSink, Location, Settings, Severity};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Extract the condition of a branch directive, the way the enumerator
/// wants it: keyword stripped, spaces removed except between identifier
/// characters. `def` selects the positive forms (`#ifdef`/`#if`/`#elif`)
/// versus the negative ones (`#ifndef`/`#elif !`). Returns an empty string
/// when the line is not the requested kind of branch opener.
pub(crate) fn get_def(line: &str, def: bool) -> String {
    if !line.starts_with('#') {
        return String::new();
    }

    if def
        && !line.starts_with("#ifdef ")
        && !line.starts_with("#if ")
        && (!line.starts_with("#elif ") || line.starts_with("#elif !"))
    {
        return String::new();
    }

    if !def && !line.starts_with("#ifndef ") && !line.starts_with("#elif !") {
        return String::new();
    }

    let mut line = line.to_string();
    if line.starts_with("#if defined ") {
        line.drain(..11);
    } else if line.starts_with("#elif !defined(") {
        line.drain(..15);
        if let Some(pos) = line.find(')') {
            line.remove(pos);
        }
    } else if let Some(pos) = line.find(' ') {
        line.drain(..pos);
    }

    // drop spaces, except the ones separating identifier characters
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(chars.len());
    for (i, &c) in chars.iter().enumerate() {
        if c == ' ' {
            let word = |c: char| c.is_ascii_alphanumeric() || c == '_';
            let prev_word = i > 0 && word(chars[i - 1]);
            let next_word = i + 1 < chars.len() && word(chars[i + 1]);
            if !(prev_word && next_word) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Enumerate the configurations of a normalized translation unit.
pub(crate) fn get_configs(
    filedata: &str,
    filename: &str,
    settings: &Settings,
    sink: &dyn DiagnosticSink,
) -> Vec<String> {
    let mut ret: Vec<String> = vec![String::new()];

    let mut deflist: Vec<String> = Vec::new();
    let mut ndeflist: Vec<String> = Vec::new();

    // identifiers defined through "#define" in the code
    let mut defines: BTreeSet<String> = BTreeSet::new();

    // how deep into included files the walk currently is
    let mut filelevel = 0i32;

    // the first branch opener after "#file" is taken to be an include
    // guard and kept out of the enumeration
    let mut includeguard = false;

    let mut linenr = 0u32;
    for line in filedata.split('\n') {
        linenr += 1;

        sink.report_progress(filename, "Preprocessing (get configurations 1)", 0);

        if line.is_empty() {
            continue;
        }

        if line.starts_with("#file ") {
            includeguard = true;
            filelevel += 1;
            continue;
        }
        if line == "#endfile" {
            includeguard = false;
            if filelevel > 0 {
                filelevel -= 1;
            }
            continue;
        }

        let mut line = line.to_string();
        if line.starts_with("#define ") {
            let tail = line[8..].to_string();
            let name = tail.split(' ').next().unwrap_or("");
            let valid = !name.is_empty()
                && name.chars().enumerate().all(|(i, ch)| {
                    ch == '_'
                        || ch.is_ascii_alphabetic()
                        || (i > 0 && ch.is_ascii_digit())
                });
            if !valid {
                line.clear();
            } else {
                match tail.find(' ') {
                    None => {
                        defines.insert(tail);
                    }
                    Some(pos) => {
                        let mut s = tail;
                        s.replace_range(pos..pos + 1, "=");
                        defines.insert(s);
                    }
                }
            }
        }

        if !line.is_empty() && !line.starts_with("#if") {
            includeguard = false;
        }
        if line.is_empty() || !line.starts_with('#') {
            continue;
        }
        if includeguard {
            continue;
        }

        let mut from_negation = false;
        let mut def = get_def(&line, true);
        if def.is_empty() {
            def = get_def(&line, false);
            // nested conditions of an #ifndef arm must be built without
            // the negated define
            if !def.is_empty() {
                from_negation = true;
            }
        }

        if !def.is_empty() {
            let mut par = 0i32;
            for ch in def.chars() {
                if ch == '(' {
                    par += 1;
                } else if ch == ')' {
                    par -= 1;
                    if par < 0 {
                        break;
                    }
                }
            }
            if par != 0 {
                sink.report(Diagnostic::new(
                    Severity::Error,
                    format!("preprocessor{}", line!()),
                    Location::new(filename, linenr),
                    format!(
                        "mismatching number of '(' and ')' in this line: {}",
                        def
                    ),
                ));
                return Vec::new();
            }

            // fold in the values of defines seen so far
            let mut varmap: HashMap<String, String> = HashMap::new();
            for it in &defines {
                if let Some((name, value)) = it.split_once('=') {
                    varmap.insert(name.to_string(), value.to_string());
                }
            }
            def = simplify_condition(&varmap, &def, false);

            if !deflist.is_empty() && line.starts_with("#elif ") {
                deflist.pop();
            }
            deflist.push(def);

            let mut cfg = String::new();
            for it in &deflist {
                if it == "0" {
                    break;
                }
                if it == "1" || it == "!" {
                    continue;
                }
                // two or more similar nested conditions count as one
                if &cfg != it {
                    if !cfg.is_empty() {
                        cfg.push(';');
                    }
                    cfg.push_str(it);
                }
            }
            if from_negation {
                ndeflist.push(deflist.last().cloned().unwrap_or_default());
                if let Some(last) = deflist.last_mut() {
                    *last = "!".to_string();
                }
            }

            if !ret.contains(&cfg) {
                ret.push(cfg);
            }
        } else if line.starts_with("#else") && !deflist.is_empty() {
            if deflist.last().map(String::as_str) == Some("!") {
                if let Some(saved) = ndeflist.pop() {
                    *deflist.last_mut().unwrap() = saved;
                }
            } else {
                let flipped = if deflist.last().map(String::as_str) == Some("1") {
                    "0"
                } else {
                    "1"
                };
                *deflist.last_mut().unwrap() = flipped.to_string();
            }
        } else if line.starts_with("#endif") && !deflist.is_empty() {
            if deflist.last().map(String::as_str) == Some("!") {
                ndeflist.pop();
            }
            deflist.pop();
        }
    }

    // configurations are differences from the baseline: drop identifiers
    // the code itself defines
    let total = ret.len();
    for (count, cfg) in ret.iter_mut().enumerate() {
        sink.report_progress(
            filename,
            "Preprocessing (get configurations 2)",
            (100 * count as u32) / total as u32,
        );

        let original_len = cfg.len();
        for def in &defines {
            let name = def.split('=').next().unwrap_or("");
            let mut pos = 0;
            while let Some(off) = cfg[pos..].find(name) {
                let at = pos + off;
                pos = at + 1;
                if at > 0 && cfg.as_bytes()[at - 1] != b';' {
                    continue;
                }
                let end = at + name.len();
                if end < cfg.len() && cfg.as_bytes()[end] != b';' {
                    continue;
                }
                cfg.replace_range(at..end, "");
                pos = at;
            }
        }
        if cfg.len() != original_len {
            while cfg.starts_with(';') {
                cfg.remove(0);
            }
            while cfg.ends_with(';') {
                cfg.pop();
            }
            while let Some(pos) = cfg.find(";;") {
                cfg.remove(pos);
            }
        }
    }

    // lift "defined(A) && defined(B)" into "A;B"
    for cfg in ret.iter_mut() {
        if !cfg.contains("&&") {
            continue;
        }
        let Some(tokens) = tokenize(cfg) else {
            sink.report(Diagnostic::new(
                Severity::Error,
                format!("preprocessor{}", line!()),
                Location::new(filename, 1),
                format!("Error parsing this: {}", cfg),
            ));
            continue;
        };

        let mut vars: BTreeSet<String> = BTreeSet::new();
        let mut i = 0;
        loop {
            let is_ident = |t: &str| {
                t.chars()
                    .next()
                    .map(|c| c.is_ascii_alphabetic() || c == '_')
                    .unwrap_or(false)
            };
            if i + 3 < tokens.len()
                && tokens[i] == "defined"
                && tokens[i + 1] == "("
                && is_ident(&tokens[i + 2])
                && tokens[i + 3] == ")"
            {
                vars.insert(tokens[i + 2].clone());
                i += 4;
                if i < tokens.len() && tokens[i] == "&&" {
                    i += 1;
                }
            } else if i + 1 < tokens.len() && is_ident(&tokens[i]) && tokens[i + 1] == ";" {
                vars.insert(tokens[i].clone());
                i += 2;
            } else {
                break;
            }
        }

        let joined = vars.into_iter().collect::<Vec<_>>().join(";");
        if !joined.is_empty() {
            *cfg = joined;
        }
    }

    // canonical form: sorted unique tokens within each configuration
    for cfg in ret.iter_mut() {
        let parts: BTreeSet<&str> = cfg.split(';').filter(|p| !p.is_empty()).collect();
        *cfg = parts.into_iter().collect::<Vec<_>>().join(";");
    }

    ret.sort();
    ret.dedup();

    // discard configurations that are not identifier[=integer] lists
    ret.retain(|cfg| {
        let s: Vec<u8> = format!("{};", cfg).into_bytes();
        let mut unhandled = false;
        let mut pos = 0;
        while pos < s.len() {
            let c = s[pos];
            if c == b';' {
                pos += 1;
                continue;
            }
            if c.is_ascii_alphabetic() || c == b'_' {
                while pos < s.len() && (s[pos].is_ascii_alphanumeric() || s[pos] == b'_') {
                    pos += 1;
                }
                if pos < s.len() && s[pos] == b'=' {
                    pos += 1;
                    while pos < s.len() && s[pos].is_ascii_digit() {
                        pos += 1;
                    }
                    if pos >= s.len() || s[pos] != b';' {
                        unhandled = true;
                        break;
                    }
                }
                continue;
            }
            unhandled = true;
            break;
        }

        if unhandled {
            debug!("unhandled configuration: {}", cfg);
            if settings.features.debug_warnings {
                sink.report(Diagnostic::new(
                    Severity::Debug,
                    "debug",
                    Location::new(filename, 0),
                    format!("unhandled configuration: {}", cfg),
                ));
            }
        }
        !unhandled
    });

    ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfgsight_core::CollectSink;

    fn configs(code: &str) -> Vec<String> {
        let settings = Settings::default();
        let sink = CollectSink::new();
        get_configs(code, "test.c", &settings, &sink)
    }

    #[test]
    fn test_get_def() {
        assert_eq!(get_def("#ifdef A", true), "A");
        assert_eq!(get_def("#ifndef A", false), "A");
        assert_eq!(get_def("#if defined A", true), "A");
        assert_eq!(get_def("#elif !defined(A)", false), "A");
        assert_eq!(get_def("#if A == 1", true), "A==1");
        assert_eq!(get_def("#ifndef A", true), "");
        assert_eq!(get_def("#ifdef A", false), "");
    }

    #[test]
    fn test_simple_ifdef() {
        let cfgs = configs("#ifdef A\nx\n#else\ny\n#endif\n");
        assert_eq!(cfgs, vec!["".to_string(), "A".to_string()]);
    }

    #[test]
    fn test_defined_macro_not_enumerated() {
        // a macro the code defines itself is not a configuration
        let cfgs = configs("#define A\n#ifdef A\nx\n#else\ny\n#endif\n");
        assert_eq!(cfgs, vec!["".to_string()]);
    }

    #[test]
    fn test_nested_conditions() {
        let cfgs = configs("#ifdef A\n#ifdef B\nx\n#endif\n#endif\n");
        assert_eq!(
            cfgs,
            vec!["".to_string(), "A".to_string(), "A;B".to_string()]
        );
    }

    #[test]
    fn test_conjunction_lifted() {
        let cfgs = configs("#if defined(A) && defined(B)\nx\n#endif\n");
        assert!(cfgs.contains(&"A;B".to_string()));
        assert!(cfgs.contains(&"".to_string()));
    }

    #[test]
    fn test_canonical_ordering() {
        let cfgs = configs("#if defined(B) && defined(A)\nx\n#endif\n");
        assert!(cfgs.contains(&"A;B".to_string()));
    }

    #[test]
    fn test_else_negation() {
        let cfgs = configs("#ifndef A\nx\n#else\ny\n#endif\n#ifdef A\nz\n#endif\n");
        // the #else of an #ifndef reintroduces the define
        assert!(cfgs.contains(&"A".to_string()));
        assert!(cfgs.contains(&"".to_string()));
    }

    #[test]
    fn test_include_guard_skipped() {
        let code = "#file \"h.h\"\n#ifndef H_H\n#define H_H\nint x;\n#endif\n#endfile\n";
        let cfgs = configs(code);
        assert_eq!(cfgs, vec!["".to_string()]);
    }

    #[test]
    fn test_value_configuration() {
        let cfgs = configs("#if A == 1\nx\n#endif\n");
        // a residual comparison is not a canonical configuration
        assert_eq!(cfgs, vec!["".to_string()]);
    }

    #[test]
    fn test_mismatched_parens_clears() {
        let settings = Settings::default();
        let sink = CollectSink::new();
        let cfgs = get_configs("#if (A\nx\n#endif\n", "test.c", &settings, &sink);
        assert!(cfgs.is_empty());
        assert!(sink
            .diagnostics()
            .iter()
            .any(|d| d.id.starts_with("preprocessor")));
    }

    #[test]
    fn test_elif_chain() {
        // "#elif defined(B)" has already been rewritten to "#elif B" by
        // the directive normalizer at this stage
        let cfgs = configs("#ifdef A\nx\n#elif B\ny\n#else\nz\n#endif\n");
        assert!(cfgs.contains(&"A".to_string()));
        assert!(cfgs.contains(&"B".to_string()));
        assert!(cfgs.contains(&"".to_string()));
    }
}
