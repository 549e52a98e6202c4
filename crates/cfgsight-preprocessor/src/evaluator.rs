//! Conditional expression evaluation
//!
//! Simplifies a directive condition under a symbol map to `"0"`, `"1"` or
//! a residual expression. Used both during configuration enumeration
//! (partial mode, unknown identifiers stay symbolic) and during selection
//! (match mode, unknown identifiers evaluate to 0).

use std::collections::HashMap;

/// Split a condition into C-ish tokens: identifiers, numbers, string and
/// character literals, and operators. Returns `None` when a character
/// cannot start any token, in which case the caller leaves the condition
/// alone.
pub(crate) fn tokenize(expr: &str) -> Option<Vec<String>> {
    let s: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < s.len() {
        let c = s[i];
        if c == ' ' || c == '\t' {
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
            if i >= s.len() {
                return None;
            }
            i += 1;
            tokens.push(s[start..i].iter().collect());
        } else {
            let two: String = s[i..(i + 2).min(s.len())].iter().collect();
            match two.as_str() {
                "&&" | "||" | "==" | "!=" | "<=" | ">=" | "<<" | ">>" => {
                    tokens.push(two);
                    i += 2;
                }
                _ => {
                    if "!<>+-*/%()&|^~,;?:".contains(c) {
                        tokens.push(c.to_string());
                        i += 1;
                    } else {
                        return None;
                    }
                }
            }
        }
    }
    Some(tokens)
}

fn is_name(tok: &str) -> bool {
    tok.chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false)
}

/// Parse an integer literal, accepting a leading sign, hex/octal prefixes
/// and integer suffixes.
pub(crate) fn to_int(tok: &str) -> Option<i64> {
    let (neg, digits) = match tok.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, tok),
    };
    let digits = digits.trim_end_matches(['u', 'U', 'l', 'L']);
    if digits.is_empty() {
        return None;
    }

    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if digits.len() > 1 && digits.starts_with('0') {
        i64::from_str_radix(&digits[1..], 8).ok()?
    } else {
        digits.parse::<i64>().ok()?
    };
    Some(if neg { -value } else { value })
}

fn is_int(tok: &str) -> bool {
    to_int(tok).is_some()
}

/// Binding strength of a binary operator; lower rank binds tighter.
fn rank(op: &str) -> Option<u32> {
    Some(match op {
        "*" | "/" | "%" => 0,
        "+" | "-" => 1,
        "<<" | ">>" => 2,
        "<" | "<=" | ">" | ">=" => 3,
        "==" | "!=" => 4,
        "&" => 5,
        "^" => 6,
        "|" => 7,
        "&&" => 8,
        "||" => 9,
        _ => return None,
    })
}

fn apply(op: &str, a: i64, b: i64) -> Option<i64> {
    Some(match op {
        "*" => a.wrapping_mul(b),
        "/" => a.checked_div(b)?,
        "%" => a.checked_rem(b)?,
        "+" => a.wrapping_add(b),
        "-" => a.wrapping_sub(b),
        "<<" => a.checked_shl(u32::try_from(b).ok()?)?,
        ">>" => a.checked_shr(u32::try_from(b).ok()?)?,
        "<" => (a < b) as i64,
        "<=" => (a <= b) as i64,
        ">" => (a > b) as i64,
        ">=" => (a >= b) as i64,
        "==" => (a == b) as i64,
        "!=" => (a != b) as i64,
        "&" => a & b,
        "^" => a ^ b,
        "|" => a | b,
        "&&" => (a != 0 && b != 0) as i64,
        "||" => (a != 0 || b != 0) as i64,
        _ => return None,
    })
}

/// One folding sweep over the token list: collapse unary signs on
/// literals and fold `int op int` where the neighborhood allows it.
/// Returns true when something changed.
fn fold_calculations(tokens: &mut Vec<String>) -> bool {
    let mut modified = false;

    // unary sign directly on a literal
    let mut i = 0;
    while i + 1 < tokens.len() {
        let sign_context = i == 0
            || rank(&tokens[i - 1]).is_some()
            || tokens[i - 1] == "("
            || tokens[i - 1] == "!";
        if (tokens[i] == "-" || tokens[i] == "+") && is_int(&tokens[i + 1]) && sign_context {
            let merged = if tokens[i] == "-" {
                format!("-{}", tokens[i + 1])
            } else {
                tokens[i + 1].clone()
            };
            // normalize through the parser so "--1" never appears
            if let Some(v) = to_int(&merged) {
                tokens.splice(i..i + 2, [v.to_string()]);
                modified = true;
                continue;
            }
        }
        i += 1;
    }

    // binary folds, tightest operators first
    for level in 0..10u32 {
        let mut i = 1;
        while i + 1 < tokens.len() {
            let op_rank = rank(&tokens[i]);
            if op_rank != Some(level) || !is_int(&tokens[i - 1]) || !is_int(&tokens[i + 1]) {
                i += 1;
                continue;
            }
            // a tighter (or equal, for the left side) operator next to the
            // operands means this fold would change grouping
            let left_blocks = i >= 2
                && (tokens[i - 2] == "!"
                    || rank(&tokens[i - 2]).map(|r| r <= level).unwrap_or(false));
            let right_blocks = i + 2 < tokens.len()
                && rank(&tokens[i + 2]).map(|r| r < level).unwrap_or(false);
            if left_blocks || right_blocks {
                i += 1;
                continue;
            }

            let a = to_int(&tokens[i - 1]).unwrap();
            let b = to_int(&tokens[i + 1]).unwrap();
            match apply(&tokens[i], a, b) {
                Some(v) => {
                    tokens.splice(i - 1..i + 2, [v.to_string()]);
                    modified = true;
                }
                None => i += 1,
            }
        }
    }

    modified
}

/// Remove parentheses around a single token, except after `defined` and
/// except the pair spanning the whole expression, which the terminal
/// `( 1 )` / `( 0 )` patterns rely on.
fn remove_redundant_parens(tokens: &mut Vec<String>) -> bool {
    let mut modified = false;
    let mut i = 0;
    while i + 2 < tokens.len() {
        if tokens[i] == "("
            && tokens[i + 2] == ")"
            && tokens[i + 1] != "("
            && tokens[i + 1] != ")"
            && !(i > 0 && tokens[i - 1] == "defined")
            && !(i == 0 && tokens.len() == 3)
        {
            let inner = tokens[i + 1].clone();
            tokens.splice(i..i + 3, [inner]);
            modified = true;
        } else {
            i += 1;
        }
    }
    modified
}

/// Simplify `condition` under the symbol map `cfg`. In match mode unknown
/// identifiers count as undefined; otherwise they stay symbolic and the
/// condition is returned unchanged unless it fully folds to `"0"`/`"1"`.
pub(crate) fn simplify_condition(
    cfg: &HashMap<String, String>,
    condition: &str,
    match_mode: bool,
) -> String {
    let Some(mut tokens) = tokenize(&format!("( {} )", condition)) else {
        return condition.to_string();
    };

    // fast path: ( X )
    if tokens.len() == 3 && tokens[0] == "(" && tokens[2] == ")" && is_name(&tokens[1]) {
        if let Some(value) = cfg.get(&tokens[1]) {
            return if value == "0" { "0" } else { "1" }.to_string();
        }
        return if match_mode {
            "0".to_string()
        } else {
            condition.to_string()
        };
    }

    // fast path: ( ! X )
    if tokens.len() == 4
        && tokens[0] == "("
        && tokens[1] == "!"
        && tokens[3] == ")"
        && is_name(&tokens[2])
    {
        match cfg.get(&tokens[2]) {
            None => return "1".to_string(),
            Some(value) if value == "0" => return "1".to_string(),
            Some(_) if match_mode => return "0".to_string(),
            Some(_) => return condition.to_string(),
        }
    }

    // replace defined() tests and bound identifiers
    let mut i = 0;
    while i < tokens.len() {
        if !is_name(&tokens[i]) {
            i += 1;
            continue;
        }

        if tokens[i] == "defined"
            && i + 3 < tokens.len()
            && tokens[i + 1] == "("
            && is_name(&tokens[i + 2])
            && tokens[i + 3] == ")"
        {
            if cfg.contains_key(&tokens[i + 2]) {
                tokens.splice(i..i + 4, ["1".to_string()]);
            } else if match_mode {
                tokens.splice(i..i + 4, ["0".to_string()]);
            } else {
                i += 1;
            }
            continue;
        }

        if tokens[i] == "defined" && i + 1 < tokens.len() && is_name(&tokens[i + 1]) {
            if cfg.contains_key(&tokens[i + 1]) {
                tokens.splice(i..i + 2, ["1".to_string()]);
            } else if match_mode {
                tokens.splice(i..i + 2, ["0".to_string()]);
            } else {
                i += 1;
            }
            continue;
        }

        if let Some(value) = cfg.get(&tokens[i]) {
            if !value.is_empty() {
                if let Some(value_tokens) = tokenize(value) {
                    let n = value_tokens.len();
                    tokens.splice(i..i + 1, value_tokens);
                    i += n;
                    continue;
                }
            } else {
                let operand_left =
                    i == 0 || ["&&", "||", "("].contains(&tokens[i - 1].as_str());
                let operand_right = i + 1 >= tokens.len()
                    || ["&&", "||", ")"].contains(&tokens[i + 1].as_str());
                if operand_left && operand_right {
                    tokens[i] = "1".to_string();
                } else {
                    tokens.remove(i);
                }
                continue;
            }
        }
        i += 1;
    }

    // fold until nothing changes
    let mut modified = true;
    while modified {
        modified = false;
        modified |= fold_calculations(&mut tokens);
        modified |= remove_redundant_parens(&mut tokens);

        let mut i = 0;
        while i + 1 < tokens.len() {
            if tokens[i] == "!" && is_int(&tokens[i + 1]) {
                let v = if to_int(&tokens[i + 1]) == Some(0) {
                    "1"
                } else {
                    "0"
                };
                tokens.splice(i..i + 2, [v.to_string()]);
                modified = true;
            } else {
                i += 1;
            }
        }
    }

    // a nonzero literal between logical operators means "true"
    for i in 1..tokens.len().saturating_sub(1) {
        if is_int(&tokens[i])
            && to_int(&tokens[i]) != Some(0)
            && ["(", "&&", "||"].contains(&tokens[i - 1].as_str())
            && ["&&", "||", ")"].contains(&tokens[i + 1].as_str())
        {
            tokens[i] = "1".to_string();
        }
    }

    // drop "<any> || 1" fragments
    loop {
        let mut changed = false;
        let mut i = 0;
        while i + 3 < tokens.len() {
            if (tokens[i] == "(" || tokens[i] == "||")
                && tokens[i + 2] == "||"
                && tokens[i + 3] == "1"
            {
                tokens.drain(i + 1..i + 3);
                changed = true;
            } else {
                i += 1;
            }
        }
        if !changed {
            break;
        }
    }

    if tokens.len() >= 3 && tokens[0] == "(" && tokens[1] == "1" {
        if tokens[2] == ")" || tokens[2] == "||" {
            return "1".to_string();
        }
    }
    if tokens.len() >= 3 && tokens[0] == "(" && tokens[1] == "0" && tokens[2] == ")" {
        return "0".to_string();
    }

    condition.to_string()
}

/// Does the condition hold under the symbol map? Unknown identifiers are
/// treated as undefined.
pub(crate) fn match_cfg_def(cfg: &HashMap<String, String>, def: &str) -> bool {
    let simplified = simplify_condition(cfg, def, true);
    if cfg.contains_key(&simplified) {
        return true;
    }
    match simplified.as_str() {
        "0" => false,
        "1" => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("defined(A)&&B>=0x10").unwrap(),
            vec!["defined", "(", "A", ")", "&&", "B", ">=", "0x10"]
        );
        assert!(tokenize("a @ b").is_none());
    }

    #[test]
    fn test_to_int() {
        assert_eq!(to_int("42"), Some(42));
        assert_eq!(to_int("0x10"), Some(16));
        assert_eq!(to_int("010"), Some(8));
        assert_eq!(to_int("-7"), Some(-7));
        assert_eq!(to_int("1UL"), Some(1));
        assert_eq!(to_int("abc"), None);
    }

    #[test]
    fn test_single_identifier() {
        assert_eq!(simplify_condition(&cfg(&[("A", "")]), "A", true), "1");
        assert_eq!(simplify_condition(&cfg(&[]), "A", true), "0");
        assert_eq!(simplify_condition(&cfg(&[]), "A", false), "A");
        assert_eq!(simplify_condition(&cfg(&[("A", "0")]), "A", true), "0");
    }

    #[test]
    fn test_negated_identifier() {
        assert_eq!(simplify_condition(&cfg(&[]), "!A", true), "1");
        assert_eq!(simplify_condition(&cfg(&[("A", "")]), "!A", true), "0");
        assert_eq!(simplify_condition(&cfg(&[("A", "0")]), "!A", true), "1");
    }

    #[test]
    fn test_defined_tests() {
        let c = cfg(&[("A", "")]);
        assert_eq!(
            simplify_condition(&c, "defined(A) && defined(B)", true),
            "0"
        );
        let c2 = cfg(&[("A", ""), ("B", "")]);
        assert_eq!(
            simplify_condition(&c2, "defined(A) && defined(B)", true),
            "1"
        );
        // partial mode: unknown identifiers keep the condition symbolic
        assert_eq!(
            simplify_condition(&c, "defined(A) && defined(B)", false),
            "defined(A) && defined(B)"
        );
    }

    #[test]
    fn test_value_substitution() {
        assert_eq!(
            simplify_condition(&cfg(&[("A", "1")]), "A == 1", true),
            "1"
        );
        assert_eq!(
            simplify_condition(&cfg(&[("LEVEL", "2")]), "LEVEL > 3", true),
            "0"
        );
    }

    #[test]
    fn test_arithmetic_folding() {
        assert_eq!(simplify_condition(&cfg(&[]), "1 + 2 * 3 == 7", true), "1");
        assert_eq!(simplify_condition(&cfg(&[]), "(2 + 3) * 4 == 20", true), "1");
        assert_eq!(simplify_condition(&cfg(&[]), "1 - 2 - 3 == -4", true), "1");
        assert_eq!(simplify_condition(&cfg(&[]), "!0 && !!1", true), "1");
    }

    #[test]
    fn test_or_one_collapse() {
        assert_eq!(simplify_condition(&cfg(&[]), "X || 1", false), "1");
    }

    #[test]
    fn test_match_cfg_def() {
        assert!(match_cfg_def(&cfg(&[("A", "")]), "A"));
        assert!(!match_cfg_def(&cfg(&[]), "A"));
        assert!(match_cfg_def(&cfg(&[]), "1"));
        assert!(!match_cfg_def(&cfg(&[]), "0"));
        assert!(match_cfg_def(&cfg(&[("A", "2")]), "A > 1"));
    }
}
