use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

pub const PROFESSIONS: &[&str] = &[
    "attorney",
    "paralegal",
    "surgeon",
    "physician",
    "professor",
    "teacher",
];

/// `First Last is a[n] [word ]profession`, captures name parts and profession.
fn bio_pattern() -> String {
    format!(
        r"([A-Z][a-zA-Z]+) ([A-Z][a-zA-Z]+) is an? [A-Za-z]* ?({})",
        PROFESSIONS.join("|")
    )
}

/// Anchored at the start of the text.
pub static LEADING_BIO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{}", bio_pattern())).unwrap());

/// Anywhere in the text.
pub static BIO_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(&bio_pattern()).unwrap());

static P_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Text content of every `<p>` element, in document order.
pub fn paragraph_texts(body: &[u8]) -> Vec<String> {
    let html = String::from_utf8_lossy(body);
    let document = Html::parse_document(&html);
    document
        .select(&P_SELECTOR)
        .map(|p| p.text().collect::<String>())
        .collect()
}

/// Paragraphs that open with a name + profession sentence.
pub fn matching_paragraphs(body: &[u8]) -> Vec<String> {
    paragraph_texts(body)
        .into_iter()
        .filter(|p| LEADING_BIO_RE.is_match(p))
        .collect()
}

/// Collapse whitespace and strip escape artifacts left by earlier dumps
/// (`\n`, `\t`, `\r` as two literal characters).
pub fn normalize(paragraph: &str) -> String {
    let collapsed = WHITESPACE_RE.replace_all(paragraph, " ");
    collapsed
        .replace('\u{a0}', " ")
        .replace("\\n", " ")
        .replace("\\t", " ")
        .replace("\\r", " ")
        .replace("  ", " ")
        .trim()
        .to_string()
}
