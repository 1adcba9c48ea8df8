use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::str::FromStr;

use crate::model::Question;

/// Set of difficulty levels written as `"1-3,5"`. Empty means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DifficultySpec(BTreeSet<u8>);

impl DifficultySpec {
    /// Unparsable parts are skipped, as are reversed ranges.
    pub fn parse(spec: &str) -> Self {
        let mut levels = BTreeSet::new();
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if let Some((lo, hi)) = part.split_once('-') {
                if let (Ok(lo), Ok(hi)) = (lo.trim().parse::<u8>(), hi.trim().parse::<u8>())
                    && lo <= hi
                {
                    levels.extend(lo..=hi);
                }
            } else if let Ok(level) = part.parse::<u8>() {
                levels.insert(level);
            }
        }
        Self(levels)
    }

    pub fn is_any(&self) -> bool {
        self.0.is_empty()
    }

    pub fn allows(&self, level: u8) -> bool {
        self.is_any() || self.0.contains(&level)
    }

    pub fn levels(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().copied()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleMode {
    #[default]
    Uniform,
    Balanced,
}

impl FromStr for SampleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniform" | "" => Ok(SampleMode::Uniform),
            "balanced" => Ok(SampleMode::Balanced),
            other => Err(format!("unknown sample mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectionSpec {
    pub count: usize,
    pub difficulty: DifficultySpec,
    pub mode: SampleMode,
    pub tag: Option<String>,
}

/// Picks up to `spec.count` questions from `pool`.
pub fn select<R: Rng + ?Sized>(
    pool: &[Question],
    spec: &SelectionSpec,
    rng: &mut R,
) -> Vec<Question> {
    let filtered: Vec<&Question> = pool
        .iter()
        .filter(|q| spec.difficulty.allows(q.difficulty.level()))
        .filter(|q| spec.tag.as_ref().is_none_or(|tag| q.tags.contains(tag)))
        .collect();

    let picked = match spec.mode {
        SampleMode::Uniform => uniform_sample(filtered, spec.count, rng),
        SampleMode::Balanced => balanced_sample(filtered, spec.count, rng),
    };
    picked.into_iter().cloned().collect()
}

fn uniform_sample<'a, R: Rng + ?Sized>(
    mut items: Vec<&'a Question>,
    count: usize,
    rng: &mut R,
) -> Vec<&'a Question> {
    items.shuffle(rng);
    items.truncate(count);
    items
}

/// Round-robin across difficulty buckets, easiest first.
fn balanced_sample<'a, R: Rng + ?Sized>(
    items: Vec<&'a Question>,
    count: usize,
    rng: &mut R,
) -> Vec<&'a Question> {
    let mut buckets: BTreeMap<u8, Vec<&'a Question>> = BTreeMap::new();
    for q in items {
        buckets.entry(q.difficulty.level()).or_default().push(q);
    }
    let mut queues: Vec<VecDeque<&'a Question>> = buckets
        .into_values()
        .map(|mut bucket| {
            bucket.shuffle(rng);
            VecDeque::from(bucket)
        })
        .collect();

    let mut out = Vec::with_capacity(count);
    while out.len() < count && queues.iter().any(|q| !q.is_empty()) {
        for queue in queues.iter_mut() {
            if out.len() == count {
                break;
            }
            if let Some(q) = queue.pop_front() {
                out.push(q);
            }
        }
    }
    out
}
