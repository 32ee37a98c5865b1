//! Grouping candidates into one fetch plan per work.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::author::AuthorName;
use crate::catalog::{BookCandidate, SourceTag};
use crate::ledger::WorkInfo;

/// One URL in a plan's fallback order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUrl {
    pub url: String,
    pub source: SourceTag,
    /// Came from a lending catalog; success starts a loan.
    pub loan: bool,
}

/// Everything needed to acquire one work.
#[derive(Debug, Clone)]
pub struct FetchPlan {
    /// Position among the batch's works, in first-seen order.
    pub index: usize,
    pub work: WorkInfo,
    pub author: AuthorName,
    pub urls: Vec<PlannedUrl>,
}

impl FetchPlan {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.work.cross_source_key
    }
}

/// Groups `candidates` by cross-source key, preserving first-seen order.
///
/// Within a group permanent candidates come before loanable ones (stable
/// otherwise), and their URLs are concatenated without repeats.
#[must_use]
pub fn build_plans(candidates: Vec<BookCandidate>) -> Vec<FetchPlan> {
    let mut groups: Vec<Vec<BookCandidate>> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();
    for candidate in candidates {
        if let Some(&index) = by_key.get(candidate.cross_source_key()) {
            groups[index].push(candidate);
        } else {
            by_key.insert(candidate.cross_source_key().to_string(), groups.len());
            groups.push(vec![candidate]);
        }
    }

    groups
        .into_iter()
        .enumerate()
        .filter_map(|(index, mut group)| {
            group.sort_by_key(BookCandidate::is_loanable);
            plan_for_group(index, &group)
        })
        .collect()
}

fn plan_for_group(index: usize, group: &[BookCandidate]) -> Option<FetchPlan> {
    let primary = group.first()?;
    let mut work = WorkInfo::from(primary);
    work.year = group.iter().find_map(BookCandidate::year);
    let subjects: BTreeSet<String> = group
        .iter()
        .flat_map(|c| c.subjects().iter().cloned())
        .collect();
    work.subjects = subjects.into_iter().collect();

    let mut seen: HashSet<&str> = HashSet::new();
    let mut urls = Vec::new();
    for candidate in group {
        for url in candidate.candidate_urls() {
            if seen.insert(url.as_str()) {
                urls.push(PlannedUrl {
                    url: url.clone(),
                    source: candidate.source(),
                    loan: candidate.is_loanable(),
                });
            }
        }
    }

    Some(FetchPlan {
        index,
        work,
        author: primary.author().clone(),
        urls,
    })
}
