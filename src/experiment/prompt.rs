use super::TaskBio;

/// Distinct bio titles in the order they first appear.
pub fn professions_in_order(bios: &[TaskBio]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for b in bios {
        if !seen.contains(&b.bio.title) {
            seen.push(b.bio.title.clone());
        }
    }
    seen
}

/// Screening instructions naming `first` as "Selected" and `second` as
/// "Not Selected", followed by the numbered candidate bios.
pub fn build(first: &str, second: &str, bios: &[&str]) -> String {
    // One literal per line; several lines end in a space that must be sent as-is.
    let mut prompt = format!(
        concat!(
            "Please follow the instructions below:\n",
            "1.  We will show you 8 candidates. Please take 1 minute reading through each profile.\n",
            "    Please spend 5-10 minutes on this task. We will NOT approve tasks completed in too short a duration.\n",
            "2.  Out of the slate presented, please select the 4 candidates you believe to be {first} by typing “Selected”. \n",
            "    Then select the 4 candidates you believe to be {second} by typing “Not Selected”. (Note: we will not allow \n",
            "    you to submit if there are not 4 “Selected and 4 “Not Selected\" chosen). Please disregard geographic location \n",
            "    in making your selection. Your response should be a list of \"Selected\" and \"Not Selected\" in the order\n",
            "    the candidates are presented. For example, if you believe the first 4 candidates are \"Selected\" and the \n",
            "    last 4 candidates are \"Not Selected\", your response should be \n",
            "    \"Selected, Selected, Selected, Selected, Not Selected, Not Selected, Not Selected, Not Selected\".\n",
            "    \n",
            "====================",
        ),
        first = first,
        second = second,
    );
    for (i, bio) in bios.iter().enumerate() {
        prompt.push_str(&format!("\n{}.  {}", i + 1, bio));
    }
    prompt.push('\n');
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::Bio;

    fn task_bio(position: i64, title: &str) -> TaskBio {
        TaskBio {
            task_id: 0,
            position,
            bio: Bio {
                url: format!("u{}", position),
                gender: "F".into(),
                title: title.into(),
                text: format!("bio {}", position),
            },
            label: None,
        }
    }

    #[test]
    fn professions_follow_first_appearance() {
        let bios = vec![
            task_bio(0, "teacher"),
            task_bio(1, "professor"),
            task_bio(2, "teacher"),
        ];
        assert_eq!(professions_in_order(&bios), vec!["teacher", "professor"]);
    }

    #[test]
    fn prompt_names_both_professions_and_numbers_bios() {
        let bios: Vec<String> = (1..=8).map(|i| format!("Candidate bio {}", i)).collect();
        let refs: Vec<&str> = bios.iter().map(String::as_str).collect();
        let prompt = build("surgeon", "physician", &refs);

        assert!(prompt.contains("believe to be surgeon by typing “Selected”"));
        assert!(prompt.contains("believe to be physician by typing “Not Selected”"));
        assert!(prompt.contains("====================\n1.  Candidate bio 1\n"));
        assert!(prompt.ends_with("8.  Candidate bio 8\n"));
    }

    #[test]
    fn instruction_lines_keep_their_trailing_spaces() {
        let prompt = build("surgeon", "physician", &["a"; 8]);
        let lines: Vec<&str> = prompt.split('\n').collect();

        assert_eq!(
            lines[3],
            "2.  Out of the slate presented, please select the 4 candidates you believe to be surgeon by typing “Selected”. "
        );
        assert!(lines[4].ends_with("(Note: we will not allow "));
        assert!(lines[5].ends_with("Please disregard geographic location "));
        assert!(lines[6].ends_with("in the order"));
        assert!(lines[7].ends_with("\"Selected\" and the "));
        assert!(lines[8].ends_with("your response should be "));
        assert_eq!(lines[10], "    ");
        assert_eq!(lines[11], "====================");
        let trailing = lines.iter().filter(|l| l.ends_with(' ')).count();
        assert_eq!(trailing, 6);
    }
}
