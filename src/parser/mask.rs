use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use super::paragraphs::{BIO_RE, LEADING_BIO_RE};

pub const FIRST_NAME: &str = "FIRST_NAME";
pub const LAST_NAME: &str = "LAST_NAME";
pub const PROFESSION: &str = "PROFESSION";

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z]+").unwrap());

/// A person named in a `First Last is a profession` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub first: String,
    pub last: String,
    pub profession: String,
}

pub fn capture_entities(text: &str) -> Vec<Entity> {
    BIO_RE
        .captures_iter(text)
        .map(|c| Entity {
            first: c[1].to_string(),
            last: c[2].to_string(),
            profession: c[3].to_string(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Masked {
    /// Non-declaratory sentences with entities replaced, rejoined with `.`.
    pub text: String,
    /// Sentences opening with a name + profession clause, untouched.
    pub declaratory: Vec<String>,
}

/// Split on `.`; sentences that open with the bio pattern are set aside,
/// every other sentence has its entity tokens replaced by placeholders.
pub fn mask(paragraph: &str, entities: &[Entity]) -> Masked {
    let mut kept = Vec::new();
    let mut declaratory = Vec::new();

    for sentence in paragraph.split('.') {
        if LEADING_BIO_RE.is_match(sentence) {
            declaratory.push(sentence.to_string());
        } else {
            kept.push(substitute(sentence, &entity_spans(sentence, entities)));
        }
    }

    Masked {
        text: kept.join("."),
        declaratory,
    }
}

/// Word spans in `sentence` that equal a captured entity, with their
/// placeholder. First names win over last names, last names over professions.
pub fn entity_spans(sentence: &str, entities: &[Entity]) -> Vec<(Range<usize>, &'static str)> {
    WORD_RE
        .find_iter(sentence)
        .filter_map(|word| {
            let w = word.as_str();
            let placeholder = if entities.iter().any(|e| e.first == w) {
                FIRST_NAME
            } else if entities.iter().any(|e| e.last == w) {
                LAST_NAME
            } else if entities.iter().any(|e| e.profession == w) {
                PROFESSION
            } else {
                return None;
            };
            Some((word.range(), placeholder))
        })
        .collect()
}

/// Replace non-overlapping, ascending spans.
fn substitute(text: &str, spans: &[(Range<usize>, &str)]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (range, placeholder) in spans {
        out.push_str(&text[cursor..range.start]);
        out.push_str(placeholder);
        cursor = range.end;
    }
    out.push_str(&text[cursor..]);
    out
}
