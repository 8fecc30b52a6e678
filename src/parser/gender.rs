use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

const PRONOUNS: &[&str] = &["he", "she", "they", "him", "her", "them"];
const MALE: &[&str] = &["he", "him"];
const FEMALE: &[&str] = &["she", "her"];

/// Runs of characters between whitespace and `.,;:?!'"()`.
static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[^\s.,;:?!'"()]+"#).unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Unsure,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Unsure => "unsure",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distinct pronouns in `text`, lowercased.
pub fn pronouns(text: &str) -> BTreeSet<String> {
    TOKEN_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|t| PRONOUNS.contains(&t.as_str()))
        .collect()
}

/// No pronouns at all gives `Unsure`.
pub fn infer(text: &str) -> Gender {
    let found = pronouns(text);
    if found.is_empty() {
        Gender::Unsure
    } else if found.iter().all(|p| MALE.contains(&p.as_str())) {
        Gender::Male
    } else if found.iter().all(|p| FEMALE.contains(&p.as_str())) {
        Gender::Female
    } else {
        Gender::Unsure
    }
}
