//! Directive normalization
//!
//! Line-level cleanup of preprocessor directives: whitespace
//! canonicalization, parenthesis normalization on `#if`/`#elif`
//! conditions, `#if 0` block removal, `defined X` rewriting and
//! `#asm` block translation. All passes preserve the line count.

/// Canonicalize whitespace in directive lines: trim the line, collapse
/// runs of spaces outside quotes, drop spaces between `#` and the keyword
/// and make sure a `(` or `!` right after the keyword is preceded by a
/// space. Non-directive lines pass through untouched.
pub(crate) fn cleanup_directives(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in text.split('\n') {
        let line = line.trim_matches(' ');
        if !line.starts_with('#') {
            out.push(line.to_string());
            continue;
        }

        #[derive(PartialEq)]
        enum Escape {
            None,
            Single,
            Double,
        }

        let mut escape = Escape::None;
        // a leading pseudo-space makes the loop swallow spaces between
        // '#' and the keyword
        let mut prev = ' ';
        let mut code = String::from("#");
        let mut need_space = true;

        for ch in line.chars().skip(1) {
            match escape {
                Escape::Single if prev != '\\' && ch == '\'' => escape = Escape::None,
                Escape::Double if prev != '\\' && ch == '"' => escape = Escape::None,
                Escape::None if ch == '"' => escape = Escape::Double,
                Escape::None if ch == '\'' => escape = Escape::Single,
                _ => {}
            }

            if escape == Escape::None && prev == ' ' && ch == ' ' {
                continue;
            }
            if escape == Escape::None {
                if need_space {
                    if ch == '(' || ch == '!' {
                        code.push(' ');
                    } else if !ch.is_alphabetic() {
                        need_space = false;
                    }
                }
                if ch == '#' {
                    need_space = true;
                }
            }
            code.push(ch);
            if escape != Escape::None && prev == '\\' && ch == '\\' {
                prev = ' ';
            } else {
                prev = ch;
            }
        }
        out.push(code);
    }
    out.join("\n")
}

/// Normalize parentheses on `#if`/`#elif` lines: strip spaces flanking
/// parens, collapse doubled parens and unwrap a single outer pair
/// (`#if(X)` becomes `#if X`). `defined(X)` sub-expressions keep theirs.
pub(crate) fn remove_parentheses(text: &str) -> String {
    if !text.contains("\n#if") && !text.starts_with("#if") {
        return text.to_string();
    }

    let mut out: Vec<String> = Vec::new();
    for line in text.split('\n') {
        if !(line.starts_with("#if") || line.starts_with("#elif")) {
            out.push(line.to_string());
            continue;
        }
        let mut line = line.to_string();

        for (pat, space_at) in [(" (", 0usize), ("( ", 1), (" )", 0), (") ", 1)] {
            while let Some(pos) = line.find(pat) {
                line.remove(pos + space_at);
            }
        }

        // collapse "((..))"
        let mut pos = 0;
        while let Some(off) = line[pos..].find("((") {
            pos += off + 1;
            let bytes = line.as_bytes();
            if let Some(pos2) = bytes[pos + 1..]
                .iter()
                .position(|&b| b == b'(' || b == b')')
                .map(|p| p + pos + 1)
            {
                if bytes[pos2] == b')' {
                    line.remove(pos2);
                    line.remove(pos);
                }
            }
        }

        // "#if(A)" => "#if A", but leave "#if (defined A) || defined (B)"
        if (line.starts_with("#if(") || line.starts_with("#elif(")) && line.ends_with(')') {
            let bytes: Vec<u8> = line.bytes().collect();
            let mut depth = 0i32;
            for (i, &b) in bytes.iter().enumerate() {
                if b == b'(' {
                    depth += 1;
                } else if b == b')' {
                    depth -= 1;
                    if depth == 0 {
                        if i == bytes.len() - 1 {
                            let open = line.find('(').unwrap();
                            line.replace_range(open..open + 1, " ");
                            line.pop();
                        }
                        break;
                    }
                }
            }
        }

        if line.starts_with("#if(") {
            line.insert(3, ' ');
        } else if line.starts_with("#elif(") {
            line.insert(5, ' ');
        }
        out.push(line);
    }
    out.join("\n")
}

/// Blank out `#if 0` blocks. The branch openers and closers stay so the
/// nesting structure survives, and an `#else`/`#elif` arm of the `#if 0`
/// keeps its body. Nested conditionals inside the dead block are counted
/// so the matching `#endif` is found.
pub(crate) fn remove_if0(text: &str) -> String {
    let mut lines: Vec<&str> = text.split('\n').collect();
    if text.ends_with('\n') {
        lines.pop();
    }

    let mut ret = String::with_capacity(text.len());
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        ret.push_str(line);
        ret.push('\n');
        i += 1;

        if line == "#if 0" {
            let mut level = 1u32;
            let mut keep = false;
            while level > 0 && i < lines.len() {
                let line = lines[i];
                i += 1;
                if line.starts_with("#if") {
                    level += 1;
                } else if line == "#endif" {
                    level -= 1;
                } else if line == "#else" || line.starts_with("#elif") {
                    if level == 1 {
                        keep = true;
                    }
                } else {
                    if keep {
                        ret.push_str(line);
                    }
                    ret.push('\n');
                    continue;
                }
                ret.push_str(line);
                ret.push('\n');
            }
        }
    }
    ret
}

/// Rewrite `#asm` ... `#endasm` blocks into an `asm( ... );` expression.
pub(crate) fn remove_asm(text: &mut String) {
    let mut pos = 0;
    while let Some(off) = text[pos..].find("#asm\n") {
        pos += off;
        text.replace_range(pos..pos + 4, "asm(");

        if let Some(off2) = text[pos..].find("#endasm") {
            let pos2 = pos + off2;
            text.replace_range(pos2..pos2 + 7, ");");
            pos = pos2;
        }
    }
}

/// Rewrite `defined X` into `defined(X)` on `#if`/`#elif` lines so the
/// evaluator only has to handle one form.
pub(crate) fn normalize_defined(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in text.split('\n') {
        if !(line.starts_with("#if ") || line.starts_with("#elif ")) {
            out.push(line.to_string());
            continue;
        }
        let mut line = line.to_string();
        while let Some(pos) = line.find(" defined ") {
            line.replace_range(pos + 8..pos + 9, "(");
            let close = line[pos + 8..]
                .find(|c| c == ' ' || c == '|' || c == '&')
                .map(|p| p + pos + 8);
            match close {
                Some(p) => line.insert(p, ')'),
                None => line.push(')'),
            }
        }
        out.push(line);
    }
    out.join("\n")
}

/// Translate single-operand `defined` conditions into the dedicated
/// directives: `#if defined(X)` to `#ifdef X`, `#if !defined(X)` to
/// `#ifndef X` and `#elif defined(X)` to `#elif X`. Only applies when the
/// whole condition is the one `defined` test.
pub(crate) fn replace_if_defined(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in text.split('\n') {
        let rewritten = rewrite_defined_line(line);
        out.push(rewritten);
    }
    out.join("\n")
}

fn rewrite_defined_line(line: &str) -> String {
    if let Some(rest) = line.strip_prefix("#if defined(") {
        if let Some(close) = rest.find(')') {
            if close == rest.len() - 1 {
                return format!("#ifdef {}", &rest[..close]);
            }
        }
    }
    if let Some(rest) = line.strip_prefix("#if !defined(") {
        if let Some(close) = rest.find(')') {
            if close == rest.len() - 1 {
                return format!("#ifndef {}", &rest[..close]);
            }
        }
    }
    if let Some(rest) = line.strip_prefix("#elif defined(") {
        if let Some(close) = rest.find(')') {
            if close == rest.len() - 1 {
                return format!("#elif {}", &rest[..close]);
            }
        }
    }
    line.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_spaces() {
        assert_eq!(cleanup_directives("#  ifdef  A\n"), "#ifdef A\n");
        assert_eq!(cleanup_directives("  #endif  \n"), "#endif\n");
    }

    #[test]
    fn test_cleanup_space_before_paren() {
        assert_eq!(cleanup_directives("#if(A)\n"), "#if (A)\n");
        assert_eq!(cleanup_directives("#if!(A)\n"), "#if ! (A)\n");
    }

    #[test]
    fn test_cleanup_preserves_strings() {
        assert_eq!(
            cleanup_directives("#define GREETING \"hello  world\"\n"),
            "#define GREETING \"hello  world\"\n"
        );
    }

    #[test]
    fn test_remove_parentheses_outer() {
        assert_eq!(remove_parentheses("#if (A)\n"), "#if A\n");
        assert_eq!(remove_parentheses("#if ((A))\n"), "#if A\n");
        assert_eq!(remove_parentheses("#elif (B)\n"), "#elif B\n");
    }

    #[test]
    fn test_remove_parentheses_keeps_compound() {
        assert_eq!(
            remove_parentheses("#if (defined(A))||(defined(B))\n"),
            "#if (defined(A))||(defined(B))\n"
        );
    }

    #[test]
    fn test_remove_if0_blanks_body() {
        let input = "#if 0\ncode;\nmore;\n#endif\nafter;\n";
        let out = remove_if0(input);
        assert_eq!(out, "#if 0\n\n\n#endif\nafter;\n");
    }

    #[test]
    fn test_remove_if0_keeps_else_arm() {
        let input = "#if 0\ndead;\n#else\nlive;\n#endif\n";
        let out = remove_if0(input);
        assert_eq!(out, "#if 0\n\n#else\nlive;\n#endif\n");
    }

    #[test]
    fn test_remove_if0_nested() {
        let input = "#if 0\n#ifdef A\nx;\n#endif\ny;\n#endif\n";
        let out = remove_if0(input);
        assert_eq!(out, "#if 0\n#ifdef A\n\n#endif\n\n#endif\n");
    }

    #[test]
    fn test_remove_asm() {
        let mut text = "#asm\nmov a, b\n#endasm\n".to_string();
        remove_asm(&mut text);
        assert_eq!(text, "asm(\nmov a, b\n);\n");
    }

    #[test]
    fn test_normalize_defined() {
        assert_eq!(normalize_defined("#if defined A\n"), "#if defined(A)\n");
        assert_eq!(
            normalize_defined("#if defined A && defined B\n"),
            "#if defined(A) && defined(B)\n"
        );
    }

    #[test]
    fn test_replace_if_defined() {
        assert_eq!(replace_if_defined("#if defined(A)\n"), "#ifdef A\n");
        assert_eq!(replace_if_defined("#if !defined(A)\n"), "#ifndef A\n");
        assert_eq!(replace_if_defined("#elif defined(A)\n"), "#elif A\n");
        // compound conditions are left for the evaluator
        assert_eq!(
            replace_if_defined("#if defined(A) && defined(B)\n"),
            "#if defined(A) && defined(B)\n"
        );
    }
}
