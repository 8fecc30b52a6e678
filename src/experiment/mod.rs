pub mod completion;
pub mod prompt;
pub mod response;
pub mod sampler;
pub mod score;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::db;
use completion::{Complete, RetryPolicy};
use response::Verdict;

/// Bios per task, half per profession.
pub const TASK_SIZE: usize = 8;

/// (first profession, second profession, number of tasks).
pub const PAIRS: &[(&str, &str, usize)] = &[
    ("paralegal", "attorney", 0),
    ("surgeon", "physician", 38),
    ("professor", "teacher", 178),
];

/// A labeled bio joined with its corpus text. `title` is the true occupation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bio {
    pub url: String,
    pub gender: String,
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub task_id: i64,
    pub professions: (String, String),
    pub bios: Vec<Bio>,
}

/// One persisted task slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskBio {
    pub task_id: i64,
    pub position: i64,
    pub bio: Bio,
    pub label: Option<String>,
}

#[derive(Debug, Default)]
pub struct ScoreStats {
    pub tasks: usize,
    pub answered: usize,
    pub rejected: usize,
    pub skipped: usize,
}

/// Score every task that still has an unlabeled bio, persisting each task's
/// labels before moving on. Running out of rate-limit retries aborts the run.
pub async fn score_pending<C: Complete + ?Sized>(
    conn: &Connection,
    client: &C,
    model: &str,
    policy: &RetryPolicy,
    seed: u64,
    limit: Option<usize>,
) -> Result<ScoreStats> {
    let task_ids = db::fetch_pending_task_ids(conn, limit)?;
    let pb = ProgressBar::new(task_ids.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut stats = ScoreStats {
        tasks: task_ids.len(),
        ..Default::default()
    };

    for task_id in task_ids {
        let mut bios = db::fetch_task_bios(conn, task_id)?;
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(task_id as u64));
        bios.shuffle(&mut rng);

        let professions = prompt::professions_in_order(&bios);
        let [first, second] = professions.as_slice() else {
            warn!("Task {}: expected 2 professions, found {:?}", task_id, professions);
            stats.skipped += 1;
            pb.inc(1);
            continue;
        };

        let texts: Vec<&str> = bios.iter().map(|b| b.bio.text.as_str()).collect();
        let text = completion::complete_with_retry(
            client,
            model,
            &prompt::build(first, second, &texts),
            policy,
        )
        .await?;

        let verdict = response::parse_response(&text, first, second);
        match &verdict {
            Verdict::Labels(_) => stats.answered += 1,
            Verdict::Rejected(s) => {
                warn!("Task {}: {} ({:?})", task_id, s.label(), text);
                stats.rejected += 1;
            }
        }

        let labels: Vec<(i64, String)> = bios
            .iter()
            .map(|b| b.position)
            .zip(verdict.labels())
            .collect();
        db::save_labels(conn, task_id, &labels)?;
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(
        "Scored {} tasks ({} answered, {} rejected, {} skipped)",
        stats.tasks, stats.answered, stats.rejected, stats.skipped
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::completion::tests::ScriptedClient;
    use super::completion::CompletionError;
    use super::*;

    fn bios() -> Vec<Bio> {
        let mut bios = Vec::new();
        for title in ["surgeon", "physician"] {
            for gender in ["F", "M"] {
                for i in 0..4 {
                    bios.push(Bio {
                        url: format!("https://{}/{}/{}", title, gender, i),
                        gender: gender.into(),
                        title: title.into(),
                        text: format!("A {} {} bio number {}.", gender, title, i),
                    });
                }
            }
        }
        bios
    }

    fn setup(tasks: usize) -> Connection {
        let conn = db::connect_in_memory().unwrap();
        let built = sampler::build_tasks(
            &bios(),
            &[("surgeon", "physician", tasks)],
            &mut StdRng::seed_from_u64(5),
        );
        db::insert_tasks(&conn, &built).unwrap();
        conn
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: std::time::Duration::ZERO,
            max_delay: std::time::Duration::ZERO,
        }
    }

    const BALANCED: &str =
        "Selected, Selected, Selected, Selected, Not Selected, Not Selected, Not Selected, Not Selected";

    #[tokio::test]
    async fn labels_every_slot_and_resumes() {
        let conn = setup(2);
        let client = ScriptedClient::new(vec![Ok(BALANCED.into())]);

        // Second task fails without retry and aborts the run.
        assert!(score_pending(&conn, &client, "gpt-4", &policy(), 1, None).await.is_err());
        assert_eq!(db::fetch_pending_task_ids(&conn, None).unwrap(), vec![1]);

        let client = ScriptedClient::new(vec![Ok("Selected, Selected".into())]);
        let stats = score_pending(&conn, &client, "gpt-4", &policy(), 1, None).await.unwrap();
        assert_eq!((stats.tasks, stats.rejected), (1, 1));
        assert!(db::fetch_pending_task_ids(&conn, None).unwrap().is_empty());

        let labels: Vec<String> = db::fetch_task_bios(&conn, 1)
            .unwrap()
            .into_iter()
            .filter_map(|b| b.label)
            .collect();
        assert_eq!(labels, vec!["Did not give 8 answers".to_string(); 8]);
    }

    #[tokio::test]
    async fn exhausted_rate_limit_keeps_earlier_tasks() {
        let conn = setup(2);
        let client = ScriptedClient::new(vec![
            Ok(BALANCED.into()),
            Err(CompletionError::RateLimited("429".into())),
            Err(CompletionError::RateLimited("429".into())),
        ]);
        let err = score_pending(&conn, &client, "gpt-4", &policy(), 1, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("still rate limited"));

        let first = db::fetch_task_bios(&conn, 0).unwrap();
        assert!(first.iter().all(|b| b.label.is_some()));
        assert!(first
            .iter()
            .filter_map(|b| b.label.as_deref())
            .all(|l| l == "surgeon" || l == "physician"));
    }

    #[tokio::test]
    async fn prompt_names_professions_in_shuffled_order() {
        let conn = setup(1);
        let client = ScriptedClient::new(vec![Ok(BALANCED.into())]);
        score_pending(&conn, &client, "gpt-4", &policy(), 11, Some(1)).await.unwrap();

        let prompt = client.prompts.lock().unwrap()[0].clone();
        let candidates = prompt.split("====================\n").nth(1).unwrap();
        let first_bio = candidates.lines().next().unwrap();
        let first_title = if first_bio.contains("surgeon") { "surgeon" } else { "physician" };
        assert!(prompt.contains(&format!("believe to be {} by typing “Selected”", first_title)));
    }
}
