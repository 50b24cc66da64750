//! Scheduling and phase commands: next, promote, start, complete, flush.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::super::Cli;
use super::{Session, skip_or_fail};
use phasekeep::coordinator::{CommitDisposition, PhaseCompletion, PhaseOutcome};
use phasekeep::item::BlockType;
use phasekeep::scheduler::{RunningTask, RunningTasks, plan_tick};

/// Build the reported outcome from the `complete` flags.
pub fn phase_outcome(
    blocked: Option<&str>,
    block_type: &str,
    failed: Option<&str>,
) -> Result<PhaseOutcome> {
    match (blocked, failed) {
        (Some(_), Some(_)) => anyhow::bail!("--blocked and --failed cannot be combined"),
        (Some(reason), None) => Ok(PhaseOutcome::Blocked {
            reason: reason.to_string(),
            blocked_type: block_type.parse::<BlockType>()?,
        }),
        (None, Some(reason)) => Ok(PhaseOutcome::Failed {
            reason: reason.to_string(),
        }),
        (None, None) => Ok(PhaseOutcome::PhaseComplete),
    }
}

pub async fn cmd_next(
    cli: &Cli,
    project_dir: &Path,
    running_ids: &[String],
    max_wip: Option<usize>,
    json: bool,
) -> Result<()> {
    let session = Session::open(cli, project_dir)?;
    let items = session.handle.get_snapshot().await?;
    let pipelines = session.config.toml.pipeline_set();
    let mut limits = session.config.toml.limits();
    if let Some(max) = max_wip {
        limits = limits.with_max_wip(max);
    }

    let mut running = RunningTasks::new();
    for id in running_ids {
        let Some(item) = items.iter().find(|i| i.id() == id) else {
            tracing::warn!(item = %id, "Running item is not in the active set");
            continue;
        };
        match (pipelines.current_phase(item), item.phase_pool()) {
            (Some(phase), Some(pool)) => running.insert(
                id,
                RunningTask {
                    phase: phase.name.clone(),
                    pool,
                    destructive: phase.destructive,
                },
            ),
            _ => tracing::warn!(item = %id, "Running item has no current phase"),
        }
    }

    let plan = plan_tick(&items, &running, &limits, &pipelines);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&plan).context("Failed to serialize plan")?
        );
        return session.close().await;
    }

    if plan.is_idle() {
        println!("Nothing to do.");
    } else {
        println!("Next actions:");
        for action in &plan.actions {
            println!("  {}", action);
        }
    }
    if !plan.skipped.is_empty() {
        println!();
        println!("Skipped: {}", console::style(plan.skip_summary()).dim());
        if cli.verbose {
            for (id, reason) in &plan.skipped {
                println!("  {:<10} {}", id, reason);
            }
        }
    }

    session.close().await
}

pub async fn cmd_promote(cli: &Cli, project_dir: &Path, id: &str) -> Result<()> {
    let session = Session::open(cli, project_dir)?;
    if let Some(progress) = skip_or_fail(session.handle.promote(id).await)? {
        println!("Promoted {}: {}", id, progress);
    }
    session.close().await
}

pub async fn cmd_start(
    cli: &Cli,
    project_dir: &Path,
    id: &str,
    revision: Option<String>,
) -> Result<()> {
    let session = Session::open(cli, project_dir)?;
    if let Some(recorded) = skip_or_fail(session.handle.record_phase_start(id, revision).await)? {
        match recorded {
            Some(rev) => println!("Started {} at {}", id, rev),
            None => println!("Started {} (no revision recorded)", id),
        }
    }
    session.close().await
}

pub async fn cmd_complete(
    cli: &Cli,
    project_dir: &Path,
    id: &str,
    phase: &str,
    outcome: PhaseOutcome,
    artifacts: Vec<PathBuf>,
    exclusive: Option<bool>,
) -> Result<()> {
    let session = Session::open(cli, project_dir)?;
    let artifacts = artifacts
        .into_iter()
        .map(|p| {
            if p.is_absolute() {
                p
            } else {
                session.config.project_dir.join(p)
            }
        })
        .collect();
    let destructive = match exclusive {
        Some(flag) => flag,
        None => {
            let pipelines = session.config.toml.pipeline_set();
            session
                .handle
                .get_snapshot()
                .await?
                .iter()
                .find(|item| item.id() == id)
                .and_then(|item| pipelines.current_phase(item))
                .is_some_and(|p| p.name == phase && p.destructive)
        }
    };
    let completion = PhaseCompletion::complete(id, phase)
        .with_destructive(destructive)
        .with_outcome(outcome)
        .with_artifacts(artifacts);

    if let Some(report) = skip_or_fail(session.handle.complete_phase(completion).await)? {
        match &report.progress {
            Some(progress) => println!("{} {} complete: {}", id, phase, progress),
            None => println!("{} {} recorded, item is {}", id, phase, report.status),
        }
        match &report.commit {
            CommitDisposition::Committed(rev) => println!("Committed {}", rev),
            CommitDisposition::Batched => {}
            CommitDisposition::Deferred if report.destructive => {
                println!("Commit deferred to the next flush")
            }
            CommitDisposition::Deferred => {}
        }
    }
    session.close().await
}

pub async fn cmd_flush(cli: &Cli, project_dir: &Path) -> Result<()> {
    let session = Session::open(cli, project_dir)?;
    match session.handle.flush_batch().await? {
        Some(rev) => println!("Committed {}", rev),
        None => println!("Nothing to commit."),
    }
    session.close().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_outcome_from_flags() {
        assert_eq!(
            phase_outcome(None, "clarification", None).unwrap(),
            PhaseOutcome::PhaseComplete
        );
        assert_eq!(
            phase_outcome(Some("which db?"), "decision", None).unwrap(),
            PhaseOutcome::Blocked {
                reason: "which db?".to_string(),
                blocked_type: BlockType::Decision,
            }
        );
        assert_eq!(
            phase_outcome(None, "clarification", Some("boom")).unwrap(),
            PhaseOutcome::Failed {
                reason: "boom".to_string()
            }
        );
        assert!(phase_outcome(Some("a"), "clarification", Some("b")).is_err());
        assert!(phase_outcome(Some("a"), "whenever", None).is_err());
    }
}
