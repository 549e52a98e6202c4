//! Macro definition and expansion
//!
//! Parses `#define`/`#undef`, models object-like, function-like and
//! variadic macros, and expands uses of them over logical lines with
//! stringification (`#`), token pasting (`##`), `__VA_ARGS__` and
//! per-macro expansion limits that stop runaway recursion while still
//! allowing independent later uses. Expanded text is prefixed with a `$`
//! sentinel so downstream consumers can tell expansion sites apart.

use cfgsight_core::{Diagnostic, DiagnosticSink, Location, ProvenanceStack, Severity};
use std::collections::HashMap;

/// What shape a macro takes. A function-like macro declared `NAME()`
/// carries an empty parameter list; a variadic one stores the
/// `__VA_ARGS__` pseudo-parameter last when it was declared `, ...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MacroKind {
    Object,
    Function { params: Vec<String> },
    Variadic { params: Vec<String> },
}

/// One `#define`d macro.
#[derive(Debug, Clone)]
pub(crate) struct MacroDef {
    name: String,
    kind: MacroKind,
    /// full definition text after `#define `, e.g. `A(x) foo(x);`
    raw: String,
}

fn is_ident_start(tok: &str) -> bool {
    tok.chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false)
}

fn is_num_start(tok: &str) -> bool {
    tok.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false)
}

/// Lex a macro replacement list into tokens. `##` is one token and a `#`
/// glued to an identifier stays glued, so stringification and pasting
/// fall out of the token stream directly.
fn lex(text: &str) -> Vec<String> {
    let s: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < s.len() {
        let c = s[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < s.len() && (s[i].is_ascii_alphanumeric() || s[i] == '_') {
                i += 1;
            }
            tokens.push(s[start..i].iter().collect());
        } else if c.is_ascii_digit() {
            let start = i;
            while i < s.len() && (s[i].is_ascii_alphanumeric() || s[i] == '.') {
                i += 1;
            }
            tokens.push(s[start..i].iter().collect());
        } else if c == '"' || c == '\'' {
            let start = i;
            i += 1;
            while i < s.len() && s[i] != c {
                if s[i] == '\\' {
                    i += 1;
                }
                i += 1;
            }
            i = (i + 1).min(s.len());
            tokens.push(s[start..i.min(s.len())].iter().collect());
        } else if c == '#' {
            if s.get(i + 1) == Some(&'#') {
                tokens.push("##".to_string());
                i += 2;
            } else if s
                .get(i + 1)
                .map(|&c| c.is_ascii_alphabetic() || c == '_')
                .unwrap_or(false)
            {
                let start = i;
                i += 1;
                while i < s.len() && (s[i].is_ascii_alphanumeric() || s[i] == '_') {
                    i += 1;
                }
                tokens.push(s[start..i].iter().collect());
            } else {
                tokens.push("#".to_string());
                i += 1;
            }
        } else {
            let two: String = s[i..(i + 2).min(s.len())].iter().collect();
            match two.as_str() {
                "&&" | "||" | "==" | "!=" | "<=" | ">=" | "<<" | ">>" | "->" | "++" | "--" => {
                    tokens.push(two);
                    i += 2;
                }
                _ => {
                    tokens.push(c.to_string());
                    i += 1;
                }
            }
        }
    }
    tokens
}

impl MacroDef {
    /// Parse the text after `#define `. Returns `None` when no macro name
    /// leads the definition.
    pub fn parse(text: &str) -> Option<Self> {
        let name_len = text
            .char_indices()
            .take_while(|&(i, c)| {
                if i == 0 {
                    c.is_ascii_alphabetic() || c == '_'
                } else {
                    c.is_ascii_alphanumeric() || c == '_'
                }
            })
            .count();
        if name_len == 0 {
            return None;
        }
        let name = text[..name_len].to_string();
        let rest = &text[name_len..];

        let kind = if rest.starts_with('(') {
            match rest.find(')') {
                None => MacroKind::Object,
                Some(close) => {
                    let inner = &rest[1..close];
                    if inner.trim().is_empty() {
                        MacroKind::Function { params: Vec::new() }
                    } else {
                        let mut params = Vec::new();
                        let mut variadic = false;
                        for (idx, entry) in inner.split(',').enumerate() {
                            let entry = entry.trim();
                            if entry == "..." {
                                if idx > 0 {
                                    params.push("__VA_ARGS__".to_string());
                                }
                                variadic = true;
                                break;
                            }
                            if let Some(named) = entry.strip_suffix("...") {
                                let named = named.trim();
                                if is_ident_start(named) {
                                    params.push(named.to_string());
                                }
                                variadic = true;
                                break;
                            }
                            if is_ident_start(entry) {
                                params.push(entry.to_string());
                            }
                        }
                        if variadic {
                            MacroKind::Variadic { params }
                        } else {
                            MacroKind::Function { params }
                        }
                    }
                }
            }
        } else {
            MacroKind::Object
        };

        Some(Self {
            name,
            kind,
            raw: text.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[String] {
        match &self.kind {
            MacroKind::Object => &[],
            MacroKind::Function { params } | MacroKind::Variadic { params } => params,
        }
    }

    pub fn variadic(&self) -> bool {
        matches!(self.kind, MacroKind::Variadic { .. })
    }

    /// A use of this macro must supply a parenthesized argument list.
    pub fn needs_parens(&self) -> bool {
        !matches!(self.kind, MacroKind::Object)
    }

    /// Replacement text after the parameter list.
    fn body_text(&self) -> &str {
        match self.raw.find(')') {
            Some(pos) => &self.raw[pos + 1..],
            None => "",
        }
    }

    /// Expand this macro with the given arguments. `None` means too few
    /// arguments reached the builder, which the caller reports as a
    /// syntax error.
    pub fn code(
        &self,
        given: &[String],
        macros: &HashMap<String, MacroDef>,
    ) -> Option<String> {
        match &self.kind {
            MacroKind::Function { params } if params.is_empty() => self.code_nopar(given, false),
            MacroKind::Variadic { params } if params.is_empty() => self.code_nopar(given, true),
            MacroKind::Object => Some(self.object_body()),
            MacroKind::Function { params } | MacroKind::Variadic { params } => {
                self.code_with_params(params, given, macros)
            }
        }
    }

    /// `NAME()` and `NAME(...)` definitions: the body is taken verbatim,
    /// with `__VA_ARGS__` spliced for the variadic form.
    fn code_nopar(&self, given: &[String], substitute_va: bool) -> Option<String> {
        let mut body = self.body_text().to_string();
        if body.is_empty() {
            return Some(body);
        }
        body = body.trim_start_matches(' ').to_string();
        if let Some(pos) = body.find(['\r', '\n']) {
            body.truncate(pos);
        }
        if substitute_va {
            let joined = given.join(",");
            body = body.replace("__VA_ARGS__", &joined);
        }
        Some(body)
    }

    fn object_body(&self) -> String {
        match self.raw.find([' ', '"']) {
            None => String::new(),
            Some(pos) => {
                let start = if self.raw.as_bytes()[pos] == b' ' {
                    pos + 1
                } else {
                    pos
                };
                let mut body = self.raw[start..].to_string();
                if let Some(end) = body.find(['\r', '\n']) {
                    body.truncate(end);
                }
                body
            }
        }
    }

    /// The general case: walk the replacement tokens, substituting
    /// parameters, stringifying `#param`, pasting across `##` and
    /// resolving single-level object-macro aliases.
    fn code_with_params(
        &self,
        params: &[String],
        given: &[String],
        macros: &HashMap<String, MacroDef>,
    ) -> Option<String> {
        let given = self.expand_inner_macros(given, macros);
        let body_tokens = lex(self.body_text());

        let mut out = String::new();
        let mut optcomma = false;
        let mut ti = 0;
        while ti < body_tokens.len() {
            let tok = &body_tokens[ti];
            if tok == "##" {
                ti += 1;
                continue;
            }

            let mut text = tok.clone();
            if text.starts_with('#') || is_ident_start(&text) {
                let stringify = text.starts_with('#');
                if stringify {
                    text.remove(0);
                }

                for i in 0..params.len() {
                    if text != params[i] {
                        continue;
                    }
                    let takes_rest = self.variadic()
                        && (i == params.len() - 1
                            || (given.len() + 2 == params.len() && i + 1 == params.len() - 1));
                    if takes_rest {
                        text.clear();
                        for j in params.len() - 1..given.len() {
                            if optcomma || j > params.len() - 1 {
                                text.push(',');
                            }
                            optcomma = false;
                            text.push_str(&given[j]);
                        }
                    } else if i >= given.len() {
                        // more parameters than the caller supplied
                        return None;
                    } else if stringify {
                        let mut quoted = String::from("\"");
                        for c in given[i].chars() {
                            if c == '\\' || c == '"' {
                                quoted.push('\\');
                            }
                            quoted.push(c);
                        }
                        quoted.push('"');
                        text = quoted;
                    } else {
                        text = given[i].clone();
                    }
                    break;
                }

                // a bare identifier naming an object-like macro is
                // resolved one level, except as a paste operand
                if ti == 0 || body_tokens[ti - 1] != "##" {
                    if let Some(alias) = macros.get(&text) {
                        if !alias.raw.contains('(') {
                            text = match alias.raw.find(' ') {
                                Some(pos) => alias.raw[pos..].to_string(),
                                None => String::new(),
                            };
                        }
                    }
                }
            }

            // a comma directly before "## __VA_ARGS__" is held back and
            // only emitted when the variadic list is non-empty
            if self.variadic()
                && tok == ","
                && body_tokens.get(ti + 1).map(String::as_str) == Some("##")
            {
                optcomma = true;
                ti += 1;
                continue;
            }
            optcomma = false;
            out.push_str(&text);

            if let Some(next) = body_tokens.get(ti + 1) {
                let adjacent_words = (is_ident_start(tok) || is_num_start(tok))
                    && (is_ident_start(next) || is_num_start(next))
                    && !(is_num_start(tok) && is_num_start(next));
                let nested_close = tok == ">" && next == ">";
                if adjacent_words || nested_close {
                    out.push(' ');
                }
            }
            ti += 1;
        }

        Some(out)
    }

    /// When an argument is itself a call of another defined macro with
    /// matching arity, expand that inner call first. The inner macro is
    /// taken out of the table for its own expansion.
    fn expand_inner_macros(
        &self,
        given: &[String],
        macros: &HashMap<String, MacroDef>,
    ) -> Vec<String> {
        let body_tokens = lex(self.body_text());

        // the body must be exactly NAME(p1, p2, ..., pn)
        if body_tokens.len() < 3 || !is_ident_start(&body_tokens[0]) || body_tokens[1] != "(" {
            return given.to_vec();
        }
        let inner_name = body_tokens[0].clone();
        let mut par = 0usize;
        let mut ti = 2;
        while ti + 1 < body_tokens.len()
            && is_ident_start(&body_tokens[ti])
            && (body_tokens[ti + 1] == "," || body_tokens[ti + 1] == ")")
        {
            let closing = body_tokens[ti + 1] == ")";
            par += 1;
            ti += 2;
            if closing {
                break;
            }
        }
        if ti != body_tokens.len() || par != given.len() {
            return given.to_vec();
        }

        let mut result = given.to_vec();
        let prefix = format!("{}(", inner_name);
        for (ipar, param) in given.iter().enumerate() {
            if !param.starts_with(&prefix) || !param.ends_with(')') {
                continue;
            }
            let pchars: Vec<char> = param.chars().collect();
            let mut ppos = prefix.len() - 1;
            let (innerparams, newlines, end_found) = get_params(&pchars, &mut ppos);
            if ppos == pchars.len() - 1
                && newlines == 0
                && end_found
                && innerparams.len() == given.len()
            {
                if let Some(inner_macro) = macros.get(&inner_name) {
                    let mut inner_macros = macros.clone();
                    inner_macros.remove(&inner_name);
                    result[ipar] = inner_macro
                        .code(&innerparams, &inner_macros)
                        .unwrap_or_default();
                }
            }
        }
        result
    }
}

/// Guard against re-expanding a macro inside its own expansion. The
/// offset is the position just past the inserted expansion, taken with a
/// snapshot of the buffer length at that moment: edits left of the
/// offset keep the distance to the end of the buffer valid.
#[derive(Debug, Clone, Copy)]
struct Limit {
    offset: usize,
    snapshot_len: usize,
}

impl Limit {
    fn distance_from_end(&self) -> usize {
        self.snapshot_len - self.offset
    }
}

/// Move `pos` from the opening quote of a string or character literal to
/// its closing quote. A backslash escapes one character.
fn skip_string(line: &[char], pos: &mut usize) {
    let ch = line[*pos];
    *pos += 1;
    while *pos < line.len() && line[*pos] != ch {
        if line[*pos] == '\\' {
            *pos += 1;
        }
        *pos += 1;
    }
}

/// Collect the arguments of a macro call. `pos` enters at (or one space
/// before) the `(` and leaves at the `)` when `end_found` comes back
/// true. Newlines inside the argument list are counted so the expansion
/// can re-emit them.
fn get_params(line: &[char], pos: &mut usize) -> (Vec<String>, usize, bool) {
    let mut params = Vec::new();
    let mut newlines = 0usize;
    let mut end_found = false;

    if *pos < line.len() && line[*pos] == ' ' {
        *pos += 1;
    }
    if *pos >= line.len() || line[*pos] != '(' {
        return (params, newlines, end_found);
    }

    let mut parlevel = 0i32;
    let mut par = String::new();
    while *pos < line.len() {
        let ch = line[*pos];
        if ch == '(' {
            parlevel += 1;
            if parlevel == 1 {
                *pos += 1;
                continue;
            }
        } else if ch == ')' {
            parlevel -= 1;
            if parlevel <= 0 {
                end_found = true;
                params.push(par);
                break;
            }
        } else if ch == '"' || ch == '\'' {
            let start = *pos;
            skip_string(line, pos);
            if *pos == line.len() {
                break;
            }
            par.extend(&line[start..*pos + 1]);
            *pos += 1;
            continue;
        } else if ch == '\n' {
            newlines += 1;
            *pos += 1;
            continue;
        }

        if parlevel == 1 && ch == ',' {
            params.push(par);
            par = String::new();
        } else if ch == ' ' {
            if par.chars().last().map(|c| c.is_ascii_alphanumeric()).unwrap_or(false) {
                par.push(' ');
            }
        } else if parlevel >= 1 {
            par.push(ch);
        }
        *pos += 1;
    }

    (params, newlines, end_found)
}

/// Read one logical line: a directive runs to its newline, other lines
/// extend while parentheses stay open and end at a `;` at paren level
/// zero or at a newline followed by a directive.
fn get_logical_line(chars: &[char], pos: &mut usize) -> Option<String> {
    if *pos >= chars.len() {
        return None;
    }
    let mut line = String::new();
    let mut parlevel = 0i32;

    while *pos < chars.len() {
        let ch = chars[*pos];
        *pos += 1;

        if ch == '\'' || ch == '"' {
            line.push(ch);
            let mut c = '\0';
            while *pos < chars.len() && c != ch {
                if c == '\\' {
                    c = chars[*pos];
                    *pos += 1;
                    line.push(c);
                    if *pos >= chars.len() {
                        return Some(line);
                    }
                }
                c = chars[*pos];
                *pos += 1;
                if c == '\n' && line.starts_with('#') {
                    return Some(line);
                }
                line.push(c);
            }
            continue;
        }

        if ch == '(' {
            parlevel += 1;
        } else if ch == ')' {
            parlevel -= 1;
        } else if ch == '\n' {
            if line.starts_with('#') {
                return Some(line);
            }
            if chars.get(*pos) == Some(&'#') {
                line.push('\n');
                return Some(line);
            }
        } else if !line.starts_with('#') && parlevel <= 0 && ch == ';' {
            line.push(';');
            return Some(line);
        }

        line.push(ch);
    }
    Some(line)
}

/// Expand all macro uses in `code`. Definitions are collected along the
/// way and destroyed when the pass completes. Returns `None` after a
/// fatal error (unterminated literal, too few macro arguments); the
/// caller maps that to an empty translation unit.
pub(crate) fn expand_macros(
    code: &str,
    filename: &str,
    sink: &dyn DiagnosticSink,
) -> Option<String> {
    let mut macros: HashMap<String, MacroDef> = HashMap::new();

    let mut provenance = ProvenanceStack::new(filename);
    provenance.advance(1);

    let mut out = String::with_capacity(code.len());
    let chars: Vec<char> = code.chars().collect();
    let mut read_pos = 0usize;

    while let Some(mut line) = get_logical_line(&chars, &mut read_pos) {
        if line.starts_with("#define ") {
            if let Some(macro_def) = MacroDef::parse(&line[8..]) {
                // BOOST_FOREACH has syntax the expander cannot model
                if macro_def.name() != "BOOST_FOREACH" {
                    macros.insert(macro_def.name().to_string(), macro_def);
                }
            }
            line = "\n".to_string();
        } else if let Some(name) = line.strip_prefix("#undef ") {
            macros.remove(name);
            line = "\n".to_string();
        } else if line.starts_with("#file \"") {
            let end = line.len().saturating_sub(1).max(7);
            provenance.push(&line[7..end]);
            line.push('\n');
        } else if line == "#endfile" {
            provenance.pop();
            line.push('\n');
        } else if line.starts_with('#') {
            line.push('\n');
        } else if !expand_line(&mut line, &macros, &provenance, sink) {
            return None;
        }

        provenance.advance(line.matches('\n').count() as u32);
        out.push_str(&line);
    }

    Some(out)
}

/// Expand the macro uses of one logical line in place. Returns false on
/// a fatal error, already reported.
fn expand_line(
    line: &mut String,
    macros: &HashMap<String, MacroDef>,
    provenance: &ProvenanceStack,
    sink: &dyn DiagnosticSink,
) -> bool {
    let mut limits: HashMap<String, Limit> = HashMap::new();

    let mut lchars: Vec<char> = line.chars().collect();
    let mut pos = 0usize;
    let mut tmp_linenr = 0u32;

    while pos < lchars.len() {
        if lchars[pos] == '\n' {
            tmp_linenr += 1;
        }

        if lchars[pos] == '"' || lchars[pos] == '\'' {
            let quote = lchars[pos];
            skip_string(&lchars, &mut pos);
            pos += 1;
            if pos >= lchars.len() {
                sink.report(Diagnostic::new(
                    Severity::Error,
                    "noQuoteCharPair",
                    Location::new(provenance.file(), provenance.line() + tmp_linenr),
                    format!(
                        "No pair for character ({}). Can't process file. \
                         File is either invalid or unicode, which is currently not supported.",
                        quote
                    ),
                ));
                return false;
            }
            continue;
        }

        if !(lchars[pos].is_ascii_alphabetic() || lchars[pos] == '_') {
            pos += 1;
        }

        while pos < lchars.len() && (lchars[pos].is_ascii_alphabetic() || lchars[pos] == '_') {
            let pos1 = pos;
            pos += 1;
            while pos < lchars.len() && (lchars[pos].is_ascii_alphanumeric() || lchars[pos] == '_')
            {
                pos += 1;
            }
            let id: String = lchars[pos1..pos].iter().collect();

            let Some(macro_def) = macros.get(&id) else {
                break;
            };

            // not past this macro's expansion limit yet?
            if let Some(limit) = limits.get(&id) {
                let blocked = match lchars.len().checked_sub(limit.distance_from_end()) {
                    Some(limit_pos) => pos <= limit_pos,
                    None => true,
                };
                if blocked {
                    break;
                }
            }

            let mut pos2 = pos;
            if !macro_def.params().is_empty() && pos2 >= lchars.len() {
                break;
            }

            let mut params = Vec::new();
            let mut call_newlines = 0usize;
            if macro_def.needs_parens() {
                let (p, n, end_found) = get_params(&lchars, &mut pos2);
                params = p;
                call_newlines = n;
                if !end_found {
                    break;
                }
            }

            if params.len() == 1 && params[0].is_empty() {
                params.clear();
            }
            if !macro_def.variadic() && params.len() != macro_def.params().len() {
                break;
            }

            let Some(expansion) = macro_def.code(&params, macros) else {
                sink.report(Diagnostic::new(
                    Severity::Error,
                    "syntaxError",
                    Location::new(provenance.file(), provenance.line() + tmp_linenr),
                    format!(
                        "Syntax error. Not enough parameters for macro '{}'.",
                        macro_def.name()
                    ),
                ));
                return false;
            };

            // the expanded call keeps the newline count of the call site
            let mut macrocode = "\n".repeat(call_newlines) + &expansion;

            if macro_def.needs_parens() {
                pos2 += 1;
            }

            // drop limits the scan has moved past
            limits.retain(|_, limit| lchars.len() - pos1 >= limit.distance_from_end());
            limits.insert(
                id,
                Limit {
                    offset: pos2,
                    snapshot_len: lchars.len(),
                },
            );

            lchars.drain(pos1..pos2.min(lchars.len()));

            // don't glue the expansion onto a following word
            if lchars
                .get(pos1)
                .map(|&c| c.is_ascii_alphanumeric() || c == '_')
                .unwrap_or(false)
            {
                macrocode.push(' ');
            }

            let insert: Vec<char> = format!("${}", macrocode).chars().collect();
            lchars.splice(pos1..pos1, insert);
            pos = pos1;
        }
    }

    *line = lchars.into_iter().collect();
    true
}
