use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::experiment::score::ScoredBio;
use crate::experiment::{Bio, Task, TaskBio};

pub const DB_PATH: &str = "data/hirebias.sqlite";

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path).with_context(|| format!("opening {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    init_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn connect_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS bios (
            id         INTEGER PRIMARY KEY,
            url        TEXT NOT NULL,
            gender     TEXT NOT NULL,
            title      TEXT NOT NULL,
            bio        TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(url, gender, title)
        );

        -- One row per task slot; label stays NULL until the task is scored
        CREATE TABLE IF NOT EXISTS task_bios (
            task_id           INTEGER NOT NULL,
            position          INTEGER NOT NULL,
            bio_url           TEXT NOT NULL,
            gender            TEXT NOT NULL,
            title             TEXT NOT NULL,
            bio               TEXT NOT NULL,
            first_profession  TEXT NOT NULL,
            second_profession TEXT NOT NULL,
            label             TEXT,
            scored_at         TEXT,
            PRIMARY KEY (task_id, position)
        );
        CREATE INDEX IF NOT EXISTS idx_task_bios_label ON task_bios(label);
        ",
    )?;
    Ok(())
}

// ── Bios ──

pub fn insert_bios(conn: &Connection, bios: &[Bio]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO bios (url, gender, title, bio) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for b in bios {
            count += stmt.execute(rusqlite::params![b.url, b.gender, b.title, b.text])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

// ── Tasks ──

pub fn count_tasks(conn: &Connection) -> Result<usize> {
    let n = conn.query_row("SELECT COUNT(DISTINCT task_id) FROM task_bios", [], |r| r.get(0))?;
    Ok(n)
}

/// Insert every slot of every task. Existing slots are left untouched.
pub fn insert_tasks(conn: &Connection, tasks: &[Task]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO task_bios
             (task_id, position, bio_url, gender, title, bio, first_profession, second_profession)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for t in tasks {
            for (position, b) in t.bios.iter().enumerate() {
                count += stmt.execute(rusqlite::params![
                    t.task_id,
                    position as i64,
                    b.url,
                    b.gender,
                    b.title,
                    b.text,
                    t.professions.0,
                    t.professions.1,
                ])?;
            }
        }
    }
    tx.commit()?;
    Ok(count)
}

/// Tasks with at least one NULL label, lowest id first.
pub fn fetch_pending_task_ids(conn: &Connection, limit: Option<usize>) -> Result<Vec<i64>> {
    let sql = format!(
        "SELECT DISTINCT task_id FROM task_bios WHERE label IS NULL ORDER BY task_id{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fetch_task_bios(conn: &Connection, task_id: i64) -> Result<Vec<TaskBio>> {
    let mut stmt = conn.prepare(
        "SELECT task_id, position, bio_url, gender, title, bio, label
         FROM task_bios WHERE task_id = ?1 ORDER BY position",
    )?;
    let rows = stmt
        .query_map([task_id], |row| {
            Ok(TaskBio {
                task_id: row.get(0)?,
                position: row.get(1)?,
                bio: Bio {
                    url: row.get(2)?,
                    gender: row.get(3)?,
                    title: row.get(4)?,
                    text: row.get(5)?,
                },
                label: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Fill in labels by position. A label that is already set is never overwritten.
pub fn save_labels(conn: &Connection, task_id: i64, labels: &[(i64, String)]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "UPDATE task_bios SET label = ?1, scored_at = datetime('now')
             WHERE task_id = ?2 AND position = ?3 AND label IS NULL",
        )?;
        for (position, label) in labels {
            count += stmt.execute(rusqlite::params![label, task_id, position])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

// ── Scoring ──

pub fn fetch_scored(conn: &Connection) -> Result<Vec<ScoredBio>> {
    let mut stmt = conn.prepare(
        "SELECT gender, title, label FROM task_bios WHERE label IS NOT NULL
         ORDER BY task_id, position",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ScoredBio {
                gender: row.get(0)?,
                true_occupation: row.get(1)?,
                label: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every true occupation that appears in a task.
pub fn fetch_professions(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT title FROM task_bios ORDER BY title")?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub bios: usize,
    pub tasks: usize,
    pub scored_tasks: usize,
    pub pending_tasks: usize,
    pub rejected_bios: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let bios: usize = conn.query_row("SELECT COUNT(*) FROM bios", [], |r| r.get(0))?;
    let tasks = count_tasks(conn)?;
    let pending_tasks: usize = conn.query_row(
        "SELECT COUNT(DISTINCT task_id) FROM task_bios WHERE label IS NULL",
        [],
        |r| r.get(0),
    )?;
    let rejected_bios: usize = conn.query_row(
        "SELECT COUNT(*) FROM task_bios
         WHERE label IS NOT NULL AND label NOT IN (SELECT DISTINCT title FROM task_bios)",
        [],
        |r| r.get(0),
    )?;
    Ok(Stats {
        bios,
        tasks,
        scored_tasks: tasks - pending_tasks,
        pending_tasks,
        rejected_bios,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(task_id: i64) -> Task {
        let bios = (0..8)
            .map(|i| Bio {
                url: format!("https://x/{}/{}", task_id, i),
                gender: if i % 2 == 0 { "F" } else { "M" }.into(),
                title: if i < 4 { "surgeon" } else { "physician" }.into(),
                text: format!("bio {}", i),
            })
            .collect();
        Task {
            task_id,
            professions: ("surgeon".into(), "physician".into()),
            bios,
        }
    }

    #[test]
    fn tasks_round_trip_in_position_order() {
        let conn = connect_in_memory().unwrap();
        assert_eq!(insert_tasks(&conn, &[task(0), task(1)]).unwrap(), 16);
        assert_eq!(count_tasks(&conn).unwrap(), 2);
        // Re-inserting the same slots changes nothing.
        assert_eq!(insert_tasks(&conn, &[task(0)]).unwrap(), 0);

        let slots = fetch_task_bios(&conn, 1).unwrap();
        assert_eq!(slots.len(), 8);
        assert_eq!(slots[3].position, 3);
        assert_eq!(slots[3].bio, task(1).bios[3]);
        assert!(slots.iter().all(|s| s.label.is_none()));
    }

    #[test]
    fn labels_are_never_overwritten() {
        let conn = connect_in_memory().unwrap();
        insert_tasks(&conn, &[task(0), task(1)]).unwrap();

        let first: Vec<(i64, String)> = (0..8).map(|p| (p, "surgeon".to_string())).collect();
        assert_eq!(save_labels(&conn, 0, &first).unwrap(), 8);
        assert_eq!(fetch_pending_task_ids(&conn, None).unwrap(), vec![1]);

        let second: Vec<(i64, String)> = (0..8).map(|p| (p, "physician".to_string())).collect();
        assert_eq!(save_labels(&conn, 0, &second).unwrap(), 0);
        let labels: Vec<String> = fetch_task_bios(&conn, 0)
            .unwrap()
            .into_iter()
            .filter_map(|s| s.label)
            .collect();
        assert_eq!(labels, vec!["surgeon".to_string(); 8]);
    }

    #[test]
    fn stats_count_scored_pending_and_rejected() {
        let conn = connect_in_memory().unwrap();
        insert_bios(&conn, &task(0).bios).unwrap();
        insert_tasks(&conn, &[task(0), task(1), task(2)]).unwrap();
        let rejected: Vec<(i64, String)> =
            (0..8).map(|p| (p, "Did not give 8 answers".to_string())).collect();
        save_labels(&conn, 2, &rejected).unwrap();

        let s = get_stats(&conn).unwrap();
        assert_eq!((s.bios, s.tasks, s.scored_tasks, s.pending_tasks), (8, 3, 1, 2));
        assert_eq!(s.rejected_bios, 8);
        assert_eq!(fetch_scored(&conn).unwrap().len(), 8);
        assert_eq!(fetch_professions(&conn).unwrap(), vec!["physician", "surgeon"]);
    }
}
