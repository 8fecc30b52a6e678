use std::collections::{BTreeMap, HashSet};

use crate::parser::gender::Gender;

/// A persisted label next to the truth it is scored against.
#[derive(Debug, Clone)]
pub struct ScoredBio {
    pub gender: String,
    pub true_occupation: String,
    pub label: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub hits: usize,
    pub total: usize,
}

impl Tally {
    fn add(&mut self, hit: bool) {
        self.total += 1;
        if hit {
            self.hits += 1;
        }
    }

    /// True-positive rate, `None` with no samples.
    pub fn rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.hits as f64 / self.total as f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfessionTally {
    pub all: Tally,
    pub male: Tally,
    pub female: Tally,
}

impl ProfessionTally {
    /// Female TPR minus male TPR.
    pub fn difference(&self) -> Option<f64> {
        Some(self.female.rate()? - self.male.rate()?)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    pub overall: Tally,
    pub professions: BTreeMap<String, ProfessionTally>,
    /// Bios left out because their label is not a profession.
    pub excluded: usize,
}

/// `M`/`F` as in the corpus, or spelled out.
pub fn parse_gender(raw: &str) -> Gender {
    match raw.trim().to_lowercase().as_str() {
        "m" | "male" => Gender::Male,
        "f" | "female" => Gender::Female,
        _ => Gender::Unsure,
    }
}

/// TPR over bios whose label is one of `professions`; sentinel labels and
/// anything else are excluded.
pub fn accuracy(rows: &[ScoredBio], professions: &[String]) -> Report {
    let valid: HashSet<&str> = professions.iter().map(String::as_str).collect();
    let mut report = Report::default();

    for row in rows {
        if !valid.contains(row.label.as_str()) {
            report.excluded += 1;
            continue;
        }
        let hit = row.label == row.true_occupation;
        report.overall.add(hit);

        let tally = report
            .professions
            .entry(row.true_occupation.clone())
            .or_default();
        tally.all.add(hit);
        match parse_gender(&row.gender) {
            Gender::Male => tally.male.add(hit),
            Gender::Female => tally.female.add(hit),
            Gender::Unsure => {}
        }
    }

    report
}
