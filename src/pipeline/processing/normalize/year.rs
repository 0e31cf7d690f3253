//! Year inference as an ordered chain of rules; the first rule that yields a year wins.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::{PERIOD_LABEL_SUFFIX, UNKNOWN_YEAR};

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid regex"));
static EXPLICIT_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})(?:\.0+)?$").expect("valid regex"));
static EMPTY_BRACKETS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\s*\)|\[\s*\]").expect("valid regex"));
static PERIOD_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)^(jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec|",
        r"january|february|march|april|june|july|august|september|october|november|december|",
        r"q[1-4]|h[12])\.?$",
    ))
    .expect("valid regex")
});

/// Everything the chain may look at for one record
#[derive(Debug, Clone, Copy, Default)]
pub struct YearInputs<'a> {
    pub candidate_year: &'a str,
    pub article: &'a str,
    /// Header of the column the record's amount came from, when known
    pub column_header: Option<&'a str>,
    pub context: &'a str,
    pub title: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YearSource {
    Candidate,
    Article,
    ColumnHeader,
    Context,
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearResolution {
    pub year: String,
    pub source: YearSource,
    /// Set when the year was lifted out of the article
    pub rewritten_article: Option<String>,
}

pub type YearRule = fn(&YearInputs<'_>) -> Option<YearResolution>;

/// Full chain used for oracle-mapped records
pub const FULL_CHAIN: &[YearRule] =
    &[from_candidate, from_article, from_column_header, from_context];

/// Chain used by the heuristic fallback, which never trusts article text for years
pub const STRUCTURAL_CHAIN: &[YearRule] = &[from_column_header, from_context];

pub fn resolve_year(inputs: &YearInputs<'_>, chain: &[YearRule]) -> YearResolution {
    chain.iter().find_map(|rule| rule(inputs)).unwrap_or(YearResolution {
        year: UNKNOWN_YEAR.to_string(),
        source: YearSource::Unresolved,
        rewritten_article: None,
    })
}

/// Byte spans of plausible calendar years (1900-2099) standing alone as digit runs
pub fn year_spans(text: &str) -> Vec<(usize, usize)> {
    DIGIT_RUN
        .find_iter(text)
        .filter(|m| m.as_str().len() == 4 && is_calendar_year(m.as_str()))
        .map(|m| (m.start(), m.end()))
        .collect()
}

/// Distinct years in order of first appearance
pub fn years_in(text: &str) -> Vec<String> {
    let mut years: Vec<String> = Vec::new();
    for (start, end) in year_spans(text) {
        let year = &text[start..end];
        if !years.iter().any(|y| y == year) {
            years.push(year.to_string());
        }
    }
    years
}

fn is_calendar_year(digits: &str) -> bool {
    digits.starts_with("19") || digits.starts_with("20")
}

fn resolved(year: &str, source: YearSource) -> YearResolution {
    YearResolution { year: year.to_string(), source, rewritten_article: None }
}

pub fn from_candidate(inputs: &YearInputs<'_>) -> Option<YearResolution> {
    EXPLICIT_YEAR
        .captures(inputs.candidate_year.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| resolved(m.as_str(), YearSource::Candidate))
}

pub fn from_article(inputs: &YearInputs<'_>) -> Option<YearResolution> {
    let spans = year_spans(inputs.article);
    let &(start, end) = spans.first()?;
    let year = &inputs.article[start..end];
    let mut rest = String::with_capacity(inputs.article.len());
    rest.push_str(&inputs.article[..start]);
    rest.push(' ');
    rest.push_str(&inputs.article[end..]);
    Some(YearResolution {
        year: year.to_string(),
        source: YearSource::Article,
        rewritten_article: Some(relabel_article(&rest)),
    })
}

pub fn from_column_header(inputs: &YearInputs<'_>) -> Option<YearResolution> {
    let years = years_in(inputs.column_header?);
    match years.as_slice() {
        [only] => Some(resolved(only, YearSource::ColumnHeader)),
        _ => None,
    }
}

/// When the context names several years, the one the title also names wins, else the first.
pub fn from_context(inputs: &YearInputs<'_>) -> Option<YearResolution> {
    let years = years_in(inputs.context);
    let first = years.first()?;
    let title_years = years_in(inputs.title);
    let chosen = years.iter().find(|y| title_years.contains(y)).unwrap_or(first);
    Some(resolved(chosen, YearSource::Context))
}

// Tidies an article after its year token is removed. A bare period label such as `Jan`
// becomes `Jan Forecast`; nothing left means no specific entity.
fn relabel_article(rest: &str) -> String {
    let without_brackets = EMPTY_BRACKETS.replace_all(rest, " ");
    let collapsed = without_brackets.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| {
        c.is_whitespace() || matches!(c, '-' | '–' | '—' | '/' | ',' | ':' | ';')
    });
    if PERIOD_LABEL.is_match(trimmed) {
        format!("{} {}", trimmed.trim_end_matches('.'), PERIOD_LABEL_SUFFIX)
    } else {
        trimmed.to_string()
    }
}
