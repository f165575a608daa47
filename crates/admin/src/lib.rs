//! `jobtrack-admin`
//!
//! Maintenance operations run with superuser credentials.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{Value, json};

use jobtrack_client::{Backend, ListQuery};
use jobtrack_core::{Filter, JobId, UserId, collections};

pub const DEFAULT_PB_URL: &str = "http://127.0.0.1:8090";

/// Reassign every job to a single owner.
#[derive(Debug, Clone, Parser)]
#[command(name = "reassign-owner", version, about)]
pub struct Args {
    /// PocketBase base URL.
    #[arg(long, env = "PB_URL", default_value = DEFAULT_PB_URL)]
    pub pb_url: String,

    /// Superuser email.
    #[arg(long, env = "PB_EMAIL")]
    pub pb_email: Option<String>,

    #[arg(long, env = "PB_PASSWORD", hide_env_values = true)]
    pub pb_password: Option<String>,

    /// User that should own every job.
    #[arg(long, env = "TARGET_OWNER_ID")]
    pub target_owner_id: Option<String>,

    /// List the jobs that would change without writing.
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments after the required values have been checked.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub target: UserId,
}

impl Args {
    /// Names of the required variables that are missing or blank.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("PB_EMAIL", &self.pb_email),
            ("PB_PASSWORD", &self.pb_password),
            ("TARGET_OWNER_ID", &self.target_owner_id),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().is_none_or(|v| v.trim().is_empty()))
        .map(|(name, _)| name)
        .collect()
    }

    pub fn credentials(&self) -> Result<Credentials> {
        let missing = self.missing();
        if !missing.is_empty() {
            anyhow::bail!(
                "missing required environment variables: {}",
                missing.join(", ")
            );
        }
        Ok(Credentials {
            email: self.pb_email.clone().unwrap_or_default(),
            password: self.pb_password.clone().unwrap_or_default(),
            target: UserId::new(self.target_owner_id.clone().unwrap_or_default().trim()),
        })
    }
}

/// Outcome of a reassignment run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReassignReport {
    /// Jobs whose owner differed from the target.
    pub matched: usize,
    /// Jobs actually written, in update order.
    pub updated: Vec<JobId>,
    pub dry_run: bool,
}

/// Set `owner = target` on every job owned by someone else.
///
/// Progress lines go to `out`. Stops at the first failed update; jobs
/// updated before it keep their new owner.
pub async fn reassign_owner(
    backend: &dyn Backend,
    target: &UserId,
    dry_run: bool,
    out: &mut dyn Write,
) -> Result<ReassignReport> {
    let query = ListQuery::new()
        .filter(Filter::ne("owner", target.as_str()))
        .sort("-created");
    let records = backend
        .get_full_list(collections::JOBS, &query)
        .await
        .context("failed to list jobs")?;

    let mut report = ReassignReport {
        matched: records.len(),
        dry_run,
        ..Default::default()
    };
    writeln!(out, "found {} jobs to update", report.matched)?;

    // Only id and title are read; other fields may hold anything.
    for record in records {
        let id = record
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(JobId::new)
            .context("job record without an id")?;
        let title = record.get("title").and_then(Value::as_str).unwrap_or_default();
        if dry_run {
            writeln!(out, "  - would update job: {id} ({title})")?;
            continue;
        }

        backend
            .update(collections::JOBS, id.as_str(), &json!({ "owner": target.as_str() }))
            .await
            .with_context(|| format!("failed to update job {id}"))?;
        tracing::debug!(job = %id, owner = %target, "job reassigned");
        writeln!(out, "  - updated job: {id} ({title})")?;
        report.updated.push(id);
    }

    if dry_run {
        writeln!(out, "dry run: {} jobs left unchanged", report.matched)?;
    } else {
        writeln!(out, "all {} jobs updated", report.updated.len())?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobtrack_client::InMemoryBackend;

    fn backend() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        let jobs = [
            ("j1", "Rust Engineer", "alice", "2024-03-01 09:00:00.000Z"),
            ("j2", "Data Engineer", "target", "2024-03-02 09:00:00.000Z"),
            ("j3", "QA Engineer", "", "2024-03-03 09:00:00.000Z"),
        ];
        for (id, title, owner, created) in jobs {
            backend
                .insert(
                    "jobs",
                    json!({"id": id, "title": title, "owner": owner, "created": created}),
                )
                .unwrap();
        }
        backend
    }

    fn args(email: Option<&str>, password: Option<&str>, target: Option<&str>) -> Args {
        Args {
            pb_url: DEFAULT_PB_URL.to_string(),
            pb_email: email.map(String::from),
            pb_password: password.map(String::from),
            target_owner_id: target.map(String::from),
            dry_run: false,
        }
    }

    #[test]
    fn missing_lists_every_absent_variable() {
        let all = args(None, Some(" "), None);
        assert_eq!(all.missing(), vec!["PB_EMAIL", "PB_PASSWORD", "TARGET_OWNER_ID"]);

        let err = all.credentials().unwrap_err().to_string();
        assert!(err.contains("PB_EMAIL, PB_PASSWORD, TARGET_OWNER_ID"));

        let ok = args(Some("admin@example.com"), Some("secret"), Some(" u1 "));
        assert!(ok.missing().is_empty());
        assert_eq!(ok.credentials().unwrap().target, UserId::new("u1"));
    }

    #[test]
    fn flags_override_defaults() {
        let parsed = Args::try_parse_from([
            "reassign-owner",
            "--pb-url",
            "http://pb.local:8090",
            "--target-owner-id",
            "u1",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(parsed.pb_url, "http://pb.local:8090");
        assert_eq!(parsed.target_owner_id.as_deref(), Some("u1"));
        assert!(parsed.dry_run);
    }

    #[tokio::test]
    async fn reassigns_jobs_owned_by_others() {
        let backend = backend();
        let mut out = Vec::new();

        let report = reassign_owner(&backend, &UserId::new("target"), false, &mut out)
            .await
            .unwrap();

        assert_eq!(report.matched, 2);
        assert_eq!(report.updated, vec![JobId::new("j3"), JobId::new("j1")]);
        assert!(
            backend
                .records("jobs")
                .iter()
                .all(|r| r["owner"] == "target")
        );

        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("found 2 jobs to update"));
        assert!(out.contains("  - updated job: j1 (Rust Engineer)"));
        assert!(out.trim_end().ends_with("all 2 jobs updated"));
    }

    #[tokio::test]
    async fn odd_optional_fields_do_not_stop_the_run() {
        let backend = backend();
        backend
            .insert(
                "jobs",
                json!({"id": "j4", "skills": [1, {"name": "rust"}], "salaryMin": "n/a"}),
            )
            .unwrap();
        let mut out = Vec::new();

        let report = reassign_owner(&backend, &UserId::new("target"), false, &mut out)
            .await
            .unwrap();

        assert_eq!(report.matched, 3);
        assert!(report.updated.contains(&JobId::new("j4")));
        assert!(
            backend
                .records("jobs")
                .iter()
                .all(|r| r["owner"] == "target")
        );
        assert!(String::from_utf8(out).unwrap().contains("  - updated job: j4 ()"));
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let backend = backend();
        let mut out = Vec::new();

        let report = reassign_owner(&backend, &UserId::new("target"), true, &mut out)
            .await
            .unwrap();

        assert_eq!(report.matched, 2);
        assert!(report.updated.is_empty());
        let owners: Vec<_> = backend
            .records("jobs")
            .iter()
            .map(|r| r["owner"].as_str().unwrap_or_default().to_string())
            .collect();
        assert!(owners.contains(&"alice".to_string()));
        assert!(String::from_utf8(out).unwrap().contains("would update job: j3"));
    }

    #[tokio::test]
    async fn backend_failure_aborts() {
        let backend = backend();
        backend.set_offline(true);
        let mut out = Vec::new();

        let err = reassign_owner(&backend, &UserId::new("target"), false, &mut out)
            .await
            .unwrap_err();

        assert!(format!("{err:#}").starts_with("failed to list jobs"));
        assert!(out.is_empty());
    }
}
