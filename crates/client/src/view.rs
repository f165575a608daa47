//! Derived job view.
//!
//! [`derive_view`] is a pure function of the cached jobs, the archive lookup
//! and the filter state. It never mutates its inputs and keeps cache order.

use serde::{Deserialize, Serialize};

use jobtrack_core::{Job, JobId};

/// Which archive partition to show.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveView {
    #[default]
    Active,
    Archived,
}

/// Tri-state remote filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteFilter {
    #[default]
    Any,
    RemoteOnly,
    OnSiteOnly,
}

impl RemoteFilter {
    pub fn accepts(self, is_remote: bool) -> bool {
        match self {
            RemoteFilter::Any => true,
            RemoteFilter::RemoteOnly => is_remote,
            RemoteFilter::OnSiteOnly => !is_remote,
        }
    }
}

/// User-controlled filter inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobFilter {
    pub view: ArchiveView,
    pub search: String,
    pub remote: RemoteFilter,
    pub grade: String,
}

/// Apply, in order: archive partition, free-text search, remote flag, grade.
pub fn derive_view(jobs: &[Job], is_archived: impl Fn(&JobId) -> bool, filter: &JobFilter) -> Vec<Job> {
    let search = filter.search.to_lowercase();
    let grade = filter.grade.to_lowercase();
    let want_archived = filter.view == ArchiveView::Archived;

    jobs.iter()
        .filter(|job| is_archived(&job.id) == want_archived)
        .filter(|job| search.is_empty() || matches_search(job, &search))
        .filter(|job| filter.remote.accepts(job.is_remote))
        .filter(|job| {
            grade.is_empty()
                || job
                    .grade
                    .as_deref()
                    .is_some_and(|g| g.to_lowercase().contains(&grade))
        })
        .cloned()
        .collect()
}

fn matches_search(job: &Job, needle: &str) -> bool {
    [
        Some(job.title.as_str()),
        job.company.as_deref(),
        job.description.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|field| field.to_lowercase().contains(needle))
}
