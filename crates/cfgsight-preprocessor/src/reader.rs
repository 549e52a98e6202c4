//! Source reading and cleanup
//!
//! First pass over a translation unit: normalize line endings and control
//! characters, splice backslash-newline continuations, strip comments while
//! harvesting inline suppressions and fall-through annotations, and rewrite
//! raw string literals into ordinary ones. Line counts are preserved
//! throughout so downstream diagnostics stay accurate.

use cfgsight_core::{Diagnostic, DiagnosticSink, Location, Settings, Severity, Suppressions};

/// Mutable state shared by the cleanup passes of one request.
pub(crate) struct CleanContext<'a> {
    pub settings: &'a Settings,
    pub sink: &'a dyn DiagnosticSink,
    pub suppressions: &'a mut Suppressions,
}

/// Read a source text and perform the full cleanup pipeline: splicing,
/// comment removal, directive canonicalization, parenthesis normalization
/// and `#if 0` block removal. The result contains `\n` line breaks only and
/// the same number of them as the input.
pub(crate) fn read_source(input: &str, filename: &str, ctx: &mut CleanContext) -> String {
    let spliced = splice_lines(input);
    let mut result = remove_comments(&spliced, filename, ctx);
    result = crate::directives::cleanup_directives(&result);
    result = crate::directives::remove_parentheses(&result);
    if result.contains("#if 0\n") {
        result = crate::directives::remove_if0(&result);
    }
    result
}

/// Normalize line endings to `\n`, turn stray control characters into
/// spaces and splice `\`-newline sequences. Spliced newlines are re-emitted
/// at the next real newline so line numbers remain faithful.
///
/// Whitespace between the backslash and the newline is ignored (the
/// gcc-compatible policy).
pub(crate) fn splice_lines(input: &str) -> String {
    let mut code = String::with_capacity(input.len());
    let mut pending_newlines = 0usize;

    let mut chars = input.chars().peekable();
    while let Some(mut ch) = chars.next() {
        // \r\n and bare \r both become \n
        if ch == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            ch = '\n';
        }

        if ch.is_ascii() && ch != '\n' && (ch.is_ascii_whitespace() || ch.is_ascii_control()) {
            ch = ' ';
        }

        if ch == '\\' {
            // skip whitespace between the backslash and a line break
            while let Some(&next) = chars.peek() {
                if next != '\n'
                    && next != '\r'
                    && next.is_ascii()
                    && (next.is_ascii_whitespace() || next.is_ascii_control())
                {
                    chars.next();
                } else {
                    break;
                }
            }
            match chars.peek() {
                Some(&'\n') | Some(&'\r') => {
                    pending_newlines += 1;
                    let nl = chars.next();
                    if nl == Some('\r') && chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                }
                _ => code.push('\\'),
            }
        } else {
            code.push(ch);
            if ch == '\n' && pending_newlines > 0 {
                for _ in 0..pending_newlines {
                    code.push('\n');
                }
                pending_newlines = 0;
            }
        }
    }

    code
}

/// Case-folded, whitespace-stripped comment text that announces an
/// intentional switch-case fall through.
fn is_fall_through_comment(comment: &str) -> bool {
    let folded: String = comment
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(|c| c.to_lowercase())
        .collect();

    folded.contains("fallthr")
        || folded.contains("fallsthr")
        || folded.contains("fall-thr")
        || folded.contains("dropthr")
        || folded.contains("passthr")
        || folded.contains("nobreak")
        || folded == "fall"
}

/// Extract a `cfgsight-suppress <id>` directive from comment text.
fn suppression_in_comment(comment: &str) -> Option<String> {
    let mut words = comment.split_whitespace();
    if words.next() == Some("cfgsight-suppress") {
        words.next().map(str::to_string)
    } else {
        None
    }
}

fn matches_at(s: &[char], i: usize, pat: &str) -> bool {
    s.len() >= i + pat.len() && s[i..i + pat.len()].iter().collect::<String>() == pat
}

/// Strip `//` and `/* */` comments, replacing them so that the newline
/// count is unchanged. While scanning, collect inline suppressions and
/// fall-through annotations and report any non-ASCII characters.
pub(crate) fn remove_comments(text: &str, filename: &str, ctx: &mut CleanContext) -> String {
    let s: Vec<char> = text.chars().collect();
    let mut code = String::with_capacity(text.len());

    let mut lineno = 1u32;
    // pending spliced newlines harvested inside block comments and strings
    let mut newlines = 0usize;
    let mut previous: char = '\0';
    let mut in_directive = false;
    let mut suppression_ids: Vec<String> = Vec::new();
    let mut fall_through_comment = false;

    let mut i = if s.first() == Some(&'\u{feff}') { 1 } else { 0 };
    while i < s.len() {
        let ch = s[i];

        if ch as u32 > 0x7f {
            ctx.sink.report(Diagnostic::new(
                Severity::Error,
                "syntaxError",
                Location::new(filename, lineno),
                format!(
                    "The code contains characters that are unhandled. \
                     Neither unicode nor extended ASCII are supported. \
                     (line={}, character code={:x})",
                    lineno, ch as u32
                ),
            ));
        }

        // #error text is dropped unless user defines are active (then the
        // directive handler needs it); #warning text is always dropped.
        if (matches_at(&s, i, "#error") && !ctx.settings.has_defines())
            || matches_at(&s, i, "#warning")
        {
            if matches_at(&s, i, "#error") {
                code.push_str("#error");
            }
            match s[i..].iter().position(|&c| c == '\n') {
                Some(off) => {
                    i += off;
                    continue;
                }
                None => break,
            }
        }

        if ch.is_ascii_whitespace() {
            if !(ch == ' ' && previous == ' ') {
                code.push(ch);
                previous = ch;
            }
            if ch == '\n' {
                if previous != '\\' {
                    in_directive = false;
                }
                lineno += 1;
                if newlines > 0 {
                    for _ in 0..newlines {
                        code.push('\n');
                    }
                    newlines = 0;
                    previous = '\n';
                }
            }
            i += 1;
            continue;
        }

        if matches_at(&s, i, "//") {
            let comment_start = i + 2;
            let Some(off) = s[i..].iter().position(|&c| c == '\n') else {
                break;
            };
            i += off;
            let comment: String = s[comment_start..i].iter().collect();

            if ctx.settings.features.inline_suppressions {
                if let Some(id) = suppression_in_comment(&comment) {
                    suppression_ids.push(id);
                }
            }
            if is_fall_through_comment(&comment) {
                fall_through_comment = true;
            }

            code.push('\n');
            previous = '\n';
            lineno += 1;
            i += 1;
        } else if matches_at(&s, i, "/*") {
            let comment_start = i + 2;
            let mut ch_prev = '\0';
            let mut cur = ch;
            i += 1;
            while i < s.len() && (ch_prev != '*' || cur != '/') {
                ch_prev = cur;
                i += 1;
                if i >= s.len() {
                    break;
                }
                cur = s[i];
                if cur == '\n' {
                    newlines += 1;
                    lineno += 1;
                }
            }
            let comment: String = s[comment_start..i.saturating_sub(1).min(s.len())]
                .iter()
                .collect();

            if is_fall_through_comment(&comment) {
                fall_through_comment = true;
            }
            if ctx.settings.features.inline_suppressions {
                if let Some(id) = suppression_in_comment(&comment) {
                    suppression_ids.push(id);
                }
            }
            i += 1;
        } else if ch == '#' && previous == '\n' {
            code.push(ch);
            previous = ch;
            in_directive = true;
            flush_suppressions(&mut suppression_ids, filename, lineno, ctx);
            i += 1;
        } else {
            if !in_directive {
                // A fall-through comment only becomes a suppression when the
                // next token opens a case label.
                if ctx.settings.features.style_enabled
                    && ctx.settings.features.experimental
                    && fall_through_comment
                {
                    let mut j = i;
                    while j < s.len() && s[j].is_ascii_lowercase() {
                        j += 1;
                    }
                    let tok: String = s[i..j].iter().collect();
                    if tok == "case" || tok == "default" {
                        suppression_ids.push("switchCaseFallThrough".to_string());
                    }
                    fall_through_comment = false;
                }
                flush_suppressions(&mut suppression_ids, filename, lineno, ctx);
            }

            if ch == '"' || ch == '\'' {
                code.push(ch);
                loop {
                    i += 1;
                    if i >= s.len() {
                        break;
                    }
                    let next = s[i];
                    if next == '\\' {
                        i += 1;
                        if i >= s.len() {
                            break;
                        }
                        let seq = s[i];
                        if seq == '\n' {
                            newlines += 1;
                        } else {
                            code.push(next);
                            code.push(seq);
                            previous = seq;
                        }
                    } else {
                        code.push(next);
                        previous = next;
                        if next == ch || next == '\n' {
                            break;
                        }
                    }
                }
                i += 1;
            } else if matches_at(&s, i, "R\"") {
                i = rewrite_raw_string(&s, i, &mut code, &mut previous);
            } else {
                code.push(ch);
                previous = ch;
                i += 1;
            }
        }
    }

    code
}

/// Register pending inline suppressions against the line they precede,
/// reporting the ones the suppression list rejects.
fn flush_suppressions(
    ids: &mut Vec<String>,
    filename: &str,
    line: u32,
    ctx: &mut CleanContext,
) {
    for id in ids.drain(..) {
        if let Err(msg) = ctx.suppressions.add(&id, filename, line) {
            ctx.sink.report(Diagnostic::new(
                Severity::Error,
                "cfgsightError",
                Location::new(filename, line),
                msg,
            ));
        }
    }
}

/// Rewrite a raw string literal starting at `i` into an ordinary string.
/// Newlines inside become the two characters `\n` and are re-emitted as real
/// newlines after the literal so the line count is unchanged. Returns the
/// index of the first character after the consumed input.
fn rewrite_raw_string(s: &[char], i: usize, code: &mut String, previous: &mut char) -> usize {
    // collect the delimiter; more than 16 characters means this is not a
    // well-formed raw string
    let mut delim = String::new();
    let mut valid = false;
    let mut j = i + 2;
    while j < s.len() {
        let c = s[j];
        if c == '(' {
            valid = true;
            break;
        }
        if delim.len() >= 16
            || (c.is_ascii() && (c.is_ascii_whitespace() || c.is_ascii_control()))
            || c == ')'
            || c == '\\'
        {
            break;
        }
        delim.push(c);
        j += 1;
    }

    let terminator: Vec<char> = format!("){}\"", delim).chars().collect();
    let endpos = if valid {
        (i..s.len()).find(|&p| {
            s.len() >= p + terminator.len() && s[p..p + terminator.len()] == terminator[..]
        })
    } else {
        None
    };

    let Some(endpos) = endpos else {
        code.push('R');
        *previous = 'R';
        return i + 1;
    };

    let mut raw_newlines = 0usize;
    code.push('"');
    for &c in &s[i + 3 + delim.len()..endpos] {
        if c == '\n' {
            raw_newlines += 1;
            code.push_str("\\n");
        } else if c.is_ascii() && (c.is_ascii_control() || c.is_ascii_whitespace()) {
            code.push(' ');
        } else if c == '"' || c == '\'' {
            code.push('\\');
            code.push(c);
        } else {
            code.push(c);
        }
    }
    code.push('"');
    for _ in 0..raw_newlines {
        code.push('\n');
    }
    *previous = '"';

    endpos + delim.len() + 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfgsight_core::CollectSink;

    fn clean(input: &str) -> String {
        let settings = Settings::default();
        let sink = CollectSink::new();
        let mut suppressions = Suppressions::new();
        let mut ctx = CleanContext {
            settings: &settings,
            sink: &sink,
            suppressions: &mut suppressions,
        };
        remove_comments(&splice_lines(input), "test.c", &mut ctx)
    }

    #[test]
    fn test_splice_preserves_line_count() {
        let input = "int a\\\n= 1;\nint b;\n";
        let out = splice_lines(input);
        assert_eq!(out, "int a= 1;\n\nint b;\n");
        assert_eq!(
            input.matches('\n').count(),
            out.matches('\n').count()
        );
    }

    #[test]
    fn test_splice_ignores_trailing_whitespace() {
        // gcc policy: spaces between the backslash and the newline are ignored
        let out = splice_lines("a\\  \nb\n");
        assert_eq!(out, "ab\n\n");
    }

    #[test]
    fn test_crlf_normalization() {
        assert_eq!(splice_lines("a\r\nb\rc\n"), "a\nb\nc\n");
    }

    #[test]
    fn test_line_comment() {
        assert_eq!(clean("int x; // remove this\nint y;\n"), "int x; \nint y;\n");
    }

    #[test]
    fn test_block_comment_keeps_newlines() {
        let out = clean("a/* one\ntwo\nthree */b\n");
        assert_eq!(out.matches('\n').count(), 3);
        assert!(out.contains("ab"));
    }

    #[test]
    fn test_string_literal_untouched() {
        assert_eq!(clean("char *s = \"// not a comment\";\n"), "char *s = \"// not a comment\";\n");
    }

    #[test]
    fn test_unhandled_character_reported() {
        let settings = Settings::default();
        let sink = CollectSink::new();
        let mut suppressions = Suppressions::new();
        let mut ctx = CleanContext {
            settings: &settings,
            sink: &sink,
            suppressions: &mut suppressions,
        };
        remove_comments("int \u{00e4};\n", "test.c", &mut ctx);
        assert!(sink.has_id("syntaxError"));
    }

    #[test]
    fn test_bom_stripped() {
        assert_eq!(clean("\u{feff}int x;\n"), "int x;\n");
    }

    #[test]
    fn test_raw_string_rewrite() {
        let out = clean("const char *s = R\"xx(line1\nline2)xx\";\n");
        // embedded newline becomes the two characters \n, and a real newline
        // is re-emitted after the literal
        assert!(out.contains("\"line1\\nline2\""));
        assert_eq!(out.matches('\n').count(), 2);
    }

    #[test]
    fn test_raw_string_with_quote() {
        let out = clean("R\"(say \"hi\")\";\n");
        assert!(out.contains("\\\"hi\\\""));
    }

    #[test]
    fn test_inline_suppression_harvested() {
        let settings = Settings {
            features: cfgsight_core::Features {
                inline_suppressions: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let sink = CollectSink::new();
        let mut suppressions = Suppressions::new();
        let mut ctx = CleanContext {
            settings: &settings,
            sink: &sink,
            suppressions: &mut suppressions,
        };
        remove_comments(
            "// cfgsight-suppress nullPointer\nfoo();\n",
            "test.c",
            &mut ctx,
        );
        assert!(suppressions.is_suppressed("nullPointer", "test.c", 2));
    }

    #[test]
    fn test_fall_through_becomes_suppression() {
        let settings = Settings {
            features: cfgsight_core::Features {
                style_enabled: true,
                experimental: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let sink = CollectSink::new();
        let mut suppressions = Suppressions::new();
        let mut ctx = CleanContext {
            settings: &settings,
            sink: &sink,
            suppressions: &mut suppressions,
        };
        remove_comments(
            "switch (x) {\ncase 1:\n  f();\n  // fall through\ncase 2:\n  g();\n}\n",
            "test.c",
            &mut ctx,
        );
        assert!(suppressions.is_suppressed("switchCaseFallThrough", "test.c", 5));
    }

    #[test]
    fn test_warning_directive_dropped() {
        let out = clean("#warning do not use\nint x;\n");
        assert_eq!(out, "\nint x;\n");
    }

    #[test]
    fn test_error_text_stripped_without_user_defines() {
        let out = clean("#error A is undefined\nint x;\n");
        assert_eq!(out, "#error\nint x;\n");
    }
}
