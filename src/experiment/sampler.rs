use std::collections::{BTreeMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{info, warn};

use super::{Bio, Task, TASK_SIZE};

/// Bios drawn from each (occupation, gender) stratum per task.
pub const PER_STRATUM: usize = 2;

/// Shuffle `bios`, then draw `count` tasks per pair, never reusing a bio.
/// A pair stops early at the first draw that is not 8 bios split 4/4.
pub fn build_tasks<R: Rng + ?Sized>(
    bios: &[Bio],
    pairs: &[(&str, &str, usize)],
    rng: &mut R,
) -> Vec<Task> {
    let mut order: Vec<usize> = (0..bios.len()).collect();
    order.shuffle(rng);

    let mut used = HashSet::new();
    let mut tasks = Vec::new();

    for &(first, second, count) in pairs {
        for n in 0..count {
            let picked = sample_task(bios, &order, (first, second), &used, rng);
            if !is_balanced(bios, &picked, first, second) {
                warn!(
                    "{}/{}: only {} usable bios left after {} tasks, stopping pair",
                    first,
                    second,
                    picked.len(),
                    n
                );
                break;
            }
            used.extend(picked.iter().copied());
            tasks.push(Task {
                task_id: tasks.len() as i64,
                professions: (first.to_string(), second.to_string()),
                bios: picked.iter().map(|&i| bios[i].clone()).collect(),
            });
        }
    }

    info!("Built {} tasks from {} bios", tasks.len(), bios.len());
    tasks
}

/// Up to `PER_STRATUM` unused bios from every stratum of the pair.
fn sample_task<R: Rng + ?Sized>(
    bios: &[Bio],
    order: &[usize],
    (first, second): (&str, &str),
    used: &HashSet<usize>,
    rng: &mut R,
) -> Vec<usize> {
    let mut strata: BTreeMap<(&str, &str), Vec<usize>> = BTreeMap::new();
    for &i in order {
        let bio = &bios[i];
        if used.contains(&i) || (bio.title != first && bio.title != second) {
            continue;
        }
        strata
            .entry((bio.title.as_str(), bio.gender.as_str()))
            .or_default()
            .push(i);
    }

    strata
        .values()
        .flat_map(|members| members.choose_multiple(&mut *rng, PER_STRATUM).copied().collect::<Vec<_>>())
        .collect()
}

fn is_balanced(bios: &[Bio], picked: &[usize], first: &str, second: &str) -> bool {
    let count = |title: &str| picked.iter().filter(|&&i| bios[i].title == title).count();
    picked.len() == TASK_SIZE && count(first) == TASK_SIZE / 2 && count(second) == TASK_SIZE / 2
}
