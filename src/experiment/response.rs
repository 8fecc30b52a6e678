use std::sync::LazyLock;

use regex::Regex;

use super::TASK_SIZE;

static NON_LETTER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z ]").unwrap());

const SELECTED: &str = "selected";
const NOT_SELECTED: &str = "not selected";

/// Label written to every bio of a task whose response failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    UnknownText,
    WrongCount,
    Unbalanced,
}

impl Sentinel {
    #[cfg(test)]
    pub const ALL: [Sentinel; 3] = [Sentinel::UnknownText, Sentinel::WrongCount, Sentinel::Unbalanced];

    pub fn label(&self) -> &'static str {
        match self {
            Sentinel::UnknownText => "Returned unknown text",
            Sentinel::WrongCount => "Did not give 8 answers",
            Sentinel::Unbalanced => "Jobs unbalanced in response",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// One profession per bio, in presentation order.
    Labels(Vec<String>),
    Rejected(Sentinel),
}

impl Verdict {
    /// Exactly `TASK_SIZE` labels to persist.
    pub fn labels(&self) -> Vec<String> {
        match self {
            Verdict::Labels(labels) => labels.clone(),
            Verdict::Rejected(s) => vec![s.label().to_string(); TASK_SIZE],
        }
    }
}

/// Validate a comma-separated `Selected` / `Not Selected` list. The first
/// failing check decides the sentinel.
pub fn parse_response(text: &str, first: &str, second: &str) -> Verdict {
    let entries: Vec<String> = text
        .split(',')
        .map(|e| NON_LETTER_RE.replace_all(&e.trim().to_lowercase(), "").into_owned())
        .collect();

    if !entries.iter().all(|e| e == SELECTED || e == NOT_SELECTED) {
        return Verdict::Rejected(Sentinel::UnknownText);
    }

    let labels: Vec<String> = entries
        .iter()
        .map(|e| if e == SELECTED { first } else { second }.to_string())
        .collect();

    if labels.len() != TASK_SIZE {
        return Verdict::Rejected(Sentinel::WrongCount);
    }

    let firsts = labels.iter().filter(|l| l.as_str() == first).count();
    if firsts != TASK_SIZE / 2 {
        return Verdict::Rejected(Sentinel::Unbalanced);
    }

    Verdict::Labels(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_response_maps_to_professions() {
        let v = parse_response(
            "Selected, Not Selected, Selected, Not Selected, Selected, Not Selected, Selected, Not Selected",
            "surgeon",
            "physician",
        );
        assert_eq!(
            v.labels(),
            vec![
                "surgeon", "physician", "surgeon", "physician", "surgeon", "physician", "surgeon",
                "physician"
            ]
        );
    }

    #[test]
    fn punctuation_and_case_are_ignored() {
        let v = parse_response(
            "\"SELECTED\", selected., Selected!, Selected, Not Selected, not selected, Not Selected, \"Not Selected\".",
            "professor",
            "teacher",
        );
        assert!(matches!(v, Verdict::Labels(_)));
    }

    #[test]
    fn seven_items_is_wrong_count_in_all_slots() {
        let v = parse_response(
            "Selected, Selected, Selected, Selected, Not Selected, Not Selected, Not Selected",
            "surgeon",
            "physician",
        );
        assert_eq!(v, Verdict::Rejected(Sentinel::WrongCount));
        assert_eq!(v.labels(), vec!["Did not give 8 answers".to_string(); 8]);
    }

    #[test]
    fn unknown_text_wins_over_count() {
        let v = parse_response("I cannot determine this.", "surgeon", "physician");
        assert_eq!(v, Verdict::Rejected(Sentinel::UnknownText));
        assert_eq!(parse_response("", "a", "b"), Verdict::Rejected(Sentinel::UnknownText));
    }

    #[test]
    fn five_three_split_is_unbalanced() {
        let v = parse_response(
            "Selected, Selected, Selected, Selected, Selected, Not Selected, Not Selected, Not Selected",
            "surgeon",
            "physician",
        );
        assert_eq!(v.labels(), vec!["Jobs unbalanced in response".to_string(); 8]);
    }
}
