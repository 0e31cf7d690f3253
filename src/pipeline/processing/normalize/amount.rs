//! Amount cleanup: OCR repair, symbol stripping, sign and percent preservation,
//! decimal-separator normalization.

use once_cell::sync::Lazy;
use regex::Regex;

// A trailing `(digits)` footnote marker after some content, e.g. `4.25(2)`
static FOOTNOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*\S)\s*\(\d+\)$").expect("valid regex"));
static CLEAN_AMOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?\d+(\.\d+)?%?$").expect("valid regex"));
static SIGNED_AMOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)%?$").expect("valid regex"));

const CURRENCY: &[char] = &['$', '€', '£', '¥', '₹', '₩', '¢'];
const MINUS_LIKE: &[char] = &['-', '−', '–', '—'];

/// Cleans a raw amount cell into a plain numeric or percentage literal.
///
/// Values without any digit are passed through trimmed; the validator reports them.
pub fn clean_amount(raw: &str) -> String {
    let trimmed = strip_footnote(raw.trim());
    if trimmed.is_empty() {
        return String::new();
    }

    let repaired = trimmed
        .split_whitespace()
        .map(repair_ocr_token)
        .collect::<Vec<_>>()
        .join(" ");

    let first_digit = match repaired.find(|c: char| c.is_ascii_digit()) {
        Some(idx) => idx,
        None => return trimmed.to_string(),
    };

    // Only a sign adjacent to the number counts; spacing and currency may sit in between
    let prefix = &repaired[..first_digit];
    let sign = match prefix
        .chars()
        .rev()
        .find(|c| !c.is_whitespace() && !CURRENCY.contains(c))
    {
        Some('+') => "+",
        Some(c) if MINUS_LIKE.contains(&c) => "-",
        _ => "",
    };

    let rest = &repaired[first_digit..];
    let body_len = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(rest.len());
    let body = normalize_separators(&rest[..body_len]);
    let tail = rest[body_len..].trim_start();
    let percent = if tail.starts_with('%') || tail.to_ascii_lowercase().starts_with("percent") {
        "%"
    } else {
        ""
    };

    format!("{sign}{body}{percent}")
}

/// True when a cell reads as a number once symbols, sign, spacing and a trailing `%` are
/// set aside. Used to pick amount cells out of raw rows.
pub fn is_plausible_amount(cell: &str) -> bool {
    let trimmed = strip_footnote(cell.trim());
    if !trimmed.chars().any(|c| c.is_ascii_digit() || c == 'O' || c == 'l') {
        return false;
    }
    let repaired: String = trimmed
        .split_whitespace()
        .map(repair_ocr_token)
        .collect::<Vec<_>>()
        .concat();
    let core: String = repaired
        .chars()
        .filter(|c| !CURRENCY.contains(c) && *c != '+' && !MINUS_LIKE.contains(c))
        .collect();
    let core = core.strip_suffix('%').unwrap_or(&core);
    let mut chars = core.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_digit())
        && core.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',')
        && CLEAN_AMOUNT.is_match(&clean_amount(cell))
}

/// Signed decimal or signed percentage, as the validator accepts it
pub fn parses_as_amount(amount: &str) -> bool {
    SIGNED_AMOUNT.is_match(amount)
}

pub fn is_percentage(amount: &str) -> bool {
    amount.trim_end().ends_with('%')
}

pub fn has_digit(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
}

fn strip_footnote(text: &str) -> &str {
    match FOOTNOTE.captures(text).and_then(|caps| caps.get(1)) {
        Some(m) => m.as_str(),
        None => text,
    }
}

/// Applies the OCR substitution table to tokens that look numeric: `O` -> `0`,
/// `l` -> `1`, and a leading `S` before digits is dropped as a misread `$`.
fn repair_ocr_token(token: &str) -> String {
    let numeric_alphabet = |c: char| {
        c.is_ascii_digit()
            || matches!(c, '.' | ',' | '+' | '%' | '(' | ')' | 'O' | 'l' | 'S')
            || CURRENCY.contains(&c)
            || MINUS_LIKE.contains(&c)
    };
    if !token.chars().any(|c| c.is_ascii_digit()) || !token.chars().all(numeric_alphabet) {
        return token.to_string();
    }

    let mut out = String::with_capacity(token.len());
    let chars: Vec<char> = token.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        match c {
            'S' => {
                let before_digits = chars
                    .get(i + 1)
                    .map_or(false, |n| n.is_ascii_digit() || *n == 'O' || *n == 'l');
                let leading = chars[..i].iter().all(|p| *p == '+' || MINUS_LIKE.contains(p));
                if !(before_digits && leading) {
                    out.push(c);
                }
            }
            'O' => out.push('0'),
            'l' => out.push('1'),
            other => out.push(other),
        }
    }
    out
}

/// `3,45` -> `3.45`, `1,000` -> `1000`, `1.000,50` -> `1000.50`, `1,000.50` -> `1000.50`
fn normalize_separators(body: &str) -> String {
    let body = body.trim_end_matches(['.', ',']);
    let has_dot = body.contains('.');
    let has_comma = body.contains(',');

    match (has_dot, has_comma) {
        (true, true) => {
            let last_dot = body.rfind('.').unwrap_or(0);
            let last_comma = body.rfind(',').unwrap_or(0);
            if last_comma > last_dot {
                body.replace('.', "").replace(',', ".")
            } else {
                body.replace(',', "")
            }
        }
        (false, true) => collapse_single_separator(body, ','),
        (true, false) => collapse_single_separator(body, '.'),
        (false, false) => body.to_string(),
    }
}

// Only one kind of separator is present. Groups of exactly three digits after every
// separator mean thousands grouping, except that a lone `.` is always a decimal point.
fn collapse_single_separator(body: &str, sep: char) -> String {
    let groups: Vec<&str> = body.split(sep).collect();
    let grouped = groups.len() > 1 && groups[1..].iter().all(|g| g.len() == 3);
    if grouped && !(sep == '.' && groups.len() == 2) {
        return groups.concat();
    }
    match body.rsplit_once(sep) {
        Some((int, frac)) => format!("{}.{}", int.replace(sep, ""), frac),
        None => body.to_string(),
    }
}
