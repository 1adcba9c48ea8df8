//! LaTeX answer normalization for math questions.
//!
//! Rewrites loosely typed answers (`sqrt(2)`, `5C2`, `x=3(mod 7)`,
//! full-width digits) into one canonical LaTeX spelling so that two answers
//! can be compared as strings. This is pattern substitution, not parsing.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizeMode {
    #[default]
    Generic,
    Line,
    Ratio,
    Vector,
    Congruence,
}

impl FromStr for NormalizeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generic" => Ok(NormalizeMode::Generic),
            "line" => Ok(NormalizeMode::Line),
            "ratio" => Ok(NormalizeMode::Ratio),
            "vector" => Ok(NormalizeMode::Vector),
            "congruence" => Ok(NormalizeMode::Congruence),
            other => Err(format!("unknown answer mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedAnswer {
    pub normalized: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl NormalizedAnswer {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("static pattern compiles")
}

static DEGREES: LazyLock<Regex> = LazyLock::new(|| pattern(r"(\d+)°"));
static SQRT_CALL: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)sqrt\(([^()]+)\)"));
static ROOT_CALL: LazyLock<Regex> = LazyLock::new(|| pattern(r"√\(([^()]+)\)"));
static ROOT_BARE: LazyLock<Regex> = LazyLock::new(|| pattern(r"√([A-Za-z0-9]+)"));
static SHORT_FRAC: LazyLock<Regex> = LazyLock::new(|| pattern(r"\\f\{([^}]+)\}\{([^}]+)\}"));
static SHORT_SQRT: LazyLock<Regex> = LazyLock::new(|| pattern(r"\\s\{([^}]+)\}"));
static SHORT_VEC: LazyLock<Regex> = LazyLock::new(|| pattern(r"\\v\{([^}]+)\}"));
static SHORT_BINOM: LazyLock<Regex> = LazyLock::new(|| pattern(r"\\c\{([^}]+)\}\{([^}]+)\}"));
static SHORT_PERM: LazyLock<Regex> = LazyLock::new(|| pattern(r"\\p\{([^}]+)\}\{([^}]+)\}"));
static TRIG_CALL: LazyLock<Regex> = LazyLock::new(|| pattern(r"\b(sin|cos|tan)\("));
static TRIG_BARE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"\b(sin|cos|tan)([0-9]+[A-Za-z]?|[A-Za-z])"));
static LOG_CALL: LazyLock<Regex> = LazyLock::new(|| pattern(r"\blog_?(\d+)\(([^)]+)\)"));
static LOG_BARE: LazyLock<Regex> = LazyLock::new(|| pattern(r"\blog_?(\d+)([A-Za-z0-9]+)"));
static COMB_INFIX: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"\b([A-Za-z0-9])C_?([A-Za-z0-9])\b"));
static COMB_CALL: LazyLock<Regex> = LazyLock::new(|| pattern(r"\bC\(([^),]+),([^)]+)\)"));
static PERM_INFIX: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"\b([A-Za-z0-9])P_?([A-Za-z0-9])\b"));
static PERM_CALL: LazyLock<Regex> = LazyLock::new(|| pattern(r"\bP\(([^),]+),([^)]+)\)"));
static MOD_GROUP: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)\(\\?mod([^)]+)\)"));
static CONGRUENCE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)(\S+)=([^=]+)\(mod([^)]+)\)"));
static COMMAND: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"\\[A-Za-z]+(?:_[A-Za-z0-9]+)?(?:\{[^{}]*\})*"));
static LETTER_DIGITS: LazyLock<Regex> = LazyLock::new(|| pattern(r"([A-Za-z])(\d+)"));
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| pattern(r"\x01(\d+)\x01"));
static AMBIGUOUS_SQRT: LazyLock<Regex> = LazyLock::new(|| pattern(r"\\sqrt\{[^}]+\}[A-Za-z0-9(]"));
static PMOD: LazyLock<Regex> = LazyLock::new(|| pattern(r"\\pmod\{[^}]+\}"));
static RATIO: LazyLock<Regex> = LazyLock::new(|| pattern(r"^(-?\d+):(-?\d+)$"));

pub fn normalize_answer(input: &str, mode: NormalizeMode) -> NormalizedAnswer {
    let tokens = normalize_tokens(input);
    canonicalize(tokens, mode)
}

/// True when `given` is valid and normalizes to the same text as any of
/// `expected`.
pub fn answers_match(given: &str, expected: &[&str], mode: NormalizeMode) -> bool {
    let given = normalize_answer(given, mode);
    if !given.is_valid() {
        return false;
    }
    expected
        .iter()
        .any(|form| normalize_answer(form, mode).normalized == given.normalized)
}

fn to_half_width(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\u{0000}'..='\u{001F}' => {}
            '≤' => out.push_str("\\le"),
            '≥' => out.push_str("\\ge"),
            '\u{3000}' => out.push(' '),
            'ー' | '―' | '−' | '\u{2010}'..='\u{2014}' => out.push('-'),
            '⁄' => out.push('/'),
            '\u{FF01}'..='\u{FF5E}' => {
                out.push(char::from_u32(ch as u32 - 0xFEE0).unwrap_or(ch));
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Applies `render` to every match that is not already part of a LaTeX
/// command (i.e. not directly preceded by a backslash).
fn replace_unescaped(re: &Regex, input: &str, render: impl Fn(&Captures) -> String) -> String {
    re.replace_all(input, |caps: &Captures| {
        let start = caps.get(0).map_or(0, |m| m.start());
        if input[..start].ends_with('\\') {
            caps[0].to_string()
        } else {
            render(caps)
        }
    })
    .into_owned()
}

fn normalize_tokens(input: &str) -> String {
    let mut t = to_half_width(input);
    t.retain(|c| !c.is_whitespace());

    t = t.replace('π', "\\pi");
    t = DEGREES.replace_all(&t, r"${1}^{\circ}").into_owned();
    t = t.replace(">=", "\\ge").replace("<=", "\\le");

    t = replace_unescaped(&SQRT_CALL, &t, |c| format!("\\sqrt{{{}}}", &c[1]));
    t = ROOT_CALL.replace_all(&t, r"\sqrt{${1}}").into_owned();
    t = ROOT_BARE.replace_all(&t, r"\sqrt{${1}}").into_owned();

    t = SHORT_FRAC.replace_all(&t, r"\frac{${1}}{${2}}").into_owned();
    t = SHORT_SQRT.replace_all(&t, r"\sqrt{${1}}").into_owned();
    t = SHORT_VEC.replace_all(&t, r"\vec{${1}}").into_owned();
    t = SHORT_BINOM.replace_all(&t, r"\binom{${1}}{${2}}").into_owned();
    t = SHORT_PERM
        .replace_all(&t, r"{}_{${1}}\mathrm{P}_{${2}}")
        .into_owned();

    t = replace_unescaped(&TRIG_CALL, &t, |c| format!("\\{}(", &c[1]));
    t = replace_unescaped(&TRIG_BARE, &t, |c| format!("\\{}({})", &c[1], &c[2]));

    t = replace_unescaped(&LOG_CALL, &t, |c| format!("\\log_{{{}}}({})", &c[1], &c[2]));
    t = replace_unescaped(&LOG_BARE, &t, |c| format!("\\log_{{{}}}({})", &c[1], &c[2]));

    t = COMB_INFIX.replace_all(&t, r"\binom{${1}}{${2}}").into_owned();
    t = COMB_CALL.replace_all(&t, r"\binom{${1}}{${2}}").into_owned();
    t = PERM_INFIX
        .replace_all(&t, r"{}_{${1}}\mathrm{P}_{${2}}")
        .into_owned();
    t = PERM_CALL
        .replace_all(&t, r"{}_{${1}}\mathrm{P}_{${2}}")
        .into_owned();

    t = MOD_GROUP.replace_all(&t, "(mod${1})").into_owned();
    t = CONGRUENCE
        .replace_all(&t, r"${1}\equiv${2}\pmod{${3}}")
        .into_owned();

    t = t.replace('±', "\\pm");

    // Commands are masked so that `n2 -> 2n` never touches `\log_2`-style text.
    let mut stash: Vec<String> = Vec::new();
    t = COMMAND
        .replace_all(&t, |c: &Captures| {
            stash.push(c[0].to_string());
            format!("\x01{}\x01", stash.len() - 1)
        })
        .into_owned();
    t = LETTER_DIGITS.replace_all(&t, "${2}${1}").into_owned();
    PLACEHOLDER
        .replace_all(&t, |c: &Captures| {
            c[1].parse::<usize>()
                .ok()
                .and_then(|i| stash.get(i))
                .cloned()
                .unwrap_or_else(|| c[0].to_string())
        })
        .into_owned()
}

fn balanced(text: &str, open: char, close: char) -> bool {
    let mut depth: i64 = 0;
    for ch in text.chars() {
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth -= 1;
            if depth < 0 {
                return false;
            }
        }
    }
    depth == 0
}

fn check_exponents(text: &str, errors: &mut Vec<String>) {
    let chars: Vec<char> = text.chars().collect();
    for (i, &ch) in chars.iter().enumerate() {
        if ch != '^' {
            continue;
        }
        match chars.get(i + 1) {
            Some('{') => {}
            Some(next) if next.is_ascii_alphanumeric() => {
                if chars.get(i + 2).is_some_and(|c| c.is_ascii_alphanumeric()) {
                    errors.push(
                        "multi-character exponents must be wrapped in braces, e.g. x^{ab}"
                            .to_string(),
                    );
                    return;
                }
            }
            _ => {
                errors.push("the exponent after ^ must be wrapped in braces".to_string());
                return;
            }
        }
    }
}

fn preceded_by_command(prefix: &str) -> bool {
    let stripped = prefix.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    stripped.len() < prefix.len() && stripped.ends_with('\\')
}

fn warn_bare_braces(text: &str, warnings: &mut Vec<String>) {
    let bytes = text.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'{' || bytes.get(i + 1) == Some(&b'}') {
            continue;
        }
        let allowed = match i.checked_sub(1).map(|p| bytes[p]) {
            Some(b'\\' | b'^' | b'_' | b'}') => true,
            Some(p) if p.is_ascii_alphabetic() => preceded_by_command(&text[..i]),
            _ => false,
        };
        if !allowed {
            warnings.push("use \\{ ... \\} for set braces; bare { } is not allowed".to_string());
            return;
        }
    }
}

// Sides are parsed as i64 and widened so that negating i64::MIN cannot overflow.
fn gcd(a: i128, b: i128) -> i128 {
    if b == 0 { a.abs() } else { gcd(b, a % b) }
}

fn canonicalize_ratio(text: &str) -> NormalizedAnswer {
    let parsed = RATIO.captures(text).and_then(|c| {
        let a = c[1].parse::<i64>().ok()?;
        let b = c[2].parse::<i64>().ok()?;
        Some((i128::from(a), i128::from(b)))
    });
    let Some((mut a, mut b)) = parsed else {
        return NormalizedAnswer {
            normalized: text.to_string(),
            errors: vec!["ratios are written as a:b with integers, e.g. 1:3".to_string()],
            warnings: Vec::new(),
        };
    };
    if b == 0 {
        return NormalizedAnswer {
            normalized: format!("{a}:{b}"),
            errors: vec!["the right side of a ratio cannot be 0".to_string()],
            warnings: Vec::new(),
        };
    }
    if b < 0 {
        a = -a;
        b = -b;
    }
    let d = match gcd(a, b) {
        0 => 1,
        d => d,
    };
    NormalizedAnswer {
        normalized: format!("{}:{}", a / d, b / d),
        errors: Vec::new(),
        warnings: Vec::new(),
    }
}

struct VectorTerm<'a> {
    negative: bool,
    coef: &'a str,
    name: &'a str,
}

fn canonicalize_vector(text: &str, errors: &mut Vec<String>) -> Option<String> {
    let mut terms: Vec<VectorTerm<'_>> = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let mut negative = false;
        if let Some(r) = rest.strip_prefix('+') {
            rest = r;
        } else if let Some(r) = rest.strip_prefix('-') {
            negative = true;
            rest = r;
        }

        let coef_len = if rest.starts_with("\\frac{") {
            let Some(num_end) = rest[6..].find('}').map(|i| i + 6) else {
                errors.push("fraction coefficient \\frac{A}{B} is missing a }".to_string());
                return None;
            };
            if !rest[num_end + 1..].starts_with('{') {
                errors.push("fraction coefficient must look like \\frac{A}{B}".to_string());
                return None;
            }
            let Some(den_end) = rest[num_end + 2..].find('}').map(|i| i + num_end + 2) else {
                errors.push("fraction coefficient \\frac{A}{B} is missing a }".to_string());
                return None;
            };
            den_end + 1
        } else {
            rest.bytes().take_while(u8::is_ascii_digit).count()
        };
        let (coef, after) = rest.split_at(coef_len);

        let Some(body) = after.strip_prefix("\\vec{") else {
            errors.push("vectors are written as \\vec{a}".to_string());
            return None;
        };
        let Some(end) = body.find('}') else {
            errors.push("vector \\vec{a} is missing a }".to_string());
            return None;
        };
        let name = &body[..end];
        if name.len() != 1 || !name.bytes().all(|b| b.is_ascii_alphabetic()) {
            errors.push("vector names are a single letter, as in \\vec{a}".to_string());
            return None;
        }
        terms.push(VectorTerm {
            negative,
            coef,
            name,
        });
        rest = &body[end + 1..];
    }

    if terms.is_empty() {
        errors.push("enter a vector expression such as 2\\vec{a}+\\vec{b}".to_string());
        return None;
    }

    terms.sort_by(|a, b| a.name.cmp(b.name));
    let mut out = String::new();
    for (i, term) in terms.iter().enumerate() {
        if term.negative {
            out.push('-');
        } else if i > 0 {
            out.push('+');
        }
        out.push_str(term.coef);
        out.push_str("\\vec{");
        out.push_str(term.name);
        out.push('}');
    }
    Some(out)
}

fn canonicalize(mut text: String, mode: NormalizeMode) -> NormalizedAnswer {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if AMBIGUOUS_SQRT.is_match(&text) {
        errors.push(
            "do not write letters or digits right after \\sqrt{...}; insert * to multiply"
                .to_string(),
        );
    }
    check_exponents(&text, &mut errors);

    match mode {
        NormalizeMode::Generic => {}
        NormalizeMode::Line => {
            if !text.starts_with("y=") && !text.starts_with("x=") {
                errors.push(
                    "lines are written as y=... (or x=... when there is no y term)".to_string(),
                );
            }
            if text.starts_with("y=") && text[2..].contains('y') {
                errors.push("the right side of y= must not contain y".to_string());
            }
        }
        NormalizeMode::Ratio => return canonicalize_ratio(&text),
        NormalizeMode::Vector => match canonicalize_vector(&text, &mut errors) {
            Some(rebuilt) if errors.is_empty() => text = rebuilt,
            _ => {
                return NormalizedAnswer {
                    normalized: text,
                    errors,
                    warnings,
                };
            }
        },
        NormalizeMode::Congruence => {
            if !text.contains("\\equiv") || !PMOD.is_match(&text) {
                errors.push(
                    "congruences are written as a \\equiv b \\pmod{m} (a=b(mod m) also works)"
                        .to_string(),
                );
            }
        }
    }

    warn_bare_braces(&text, &mut warnings);

    if !balanced(&text, '(', ')') {
        errors.push("parentheses () are not balanced".to_string());
    }
    if !balanced(&text, '{', '}') {
        errors.push("braces {} are not balanced".to_string());
    }

    NormalizedAnswer {
        normalized: text,
        errors,
        warnings,
    }
}
