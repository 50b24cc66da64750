//! Item lifecycle commands: add, status, archive, block, unblock, merge.

use anyhow::Result;
use std::path::Path;

use super::super::Cli;
use super::{Session, skip_or_fail};
use phasekeep::item::{BlockType, ItemStatus, ItemUpdate, NewItem, StructuredDescription};

/// Arguments of `phasekeep add`.
pub struct AddArgs {
    pub title: String,
    pub deps: Vec<String>,
    pub tags: Vec<String>,
    pub pipeline: Option<String>,
    pub description: Option<String>,
    pub priority: i64,
}

pub async fn cmd_add(cli: &Cli, project_dir: &Path, args: AddArgs) -> Result<()> {
    if args.title.trim().is_empty() {
        anyhow::bail!("Item title must not be empty");
    }
    let session = Session::open(cli, project_dir)?;
    if let Some(name) = &args.pipeline {
        let pipelines = session.config.toml.pipeline_set();
        if pipelines.get(name).is_none() {
            let available = pipelines.names().collect::<Vec<_>>().join(", ");
            session.close().await?;
            anyhow::bail!("Unknown pipeline '{}'. Available: {}", name, available);
        }
    }

    let spec = NewItem {
        title: args.title.trim().to_string(),
        description: args
            .description
            .filter(|d| !d.trim().is_empty())
            .map(StructuredDescription::with_context),
        dependencies: args.deps,
        tags: args.tags,
        priority: args.priority,
        pipeline_type: args.pipeline,
        origin: Some("cli".to_string()),
        ..Default::default()
    };
    let result = session.handle.ingest_follow_ups(vec![spec.clone()]).await;
    if let Some(ids) = skip_or_fail(result)? {
        for id in ids {
            println!("Created {}: {}", console::style(&id).bold(), spec.title);
        }
    }
    session.close().await
}

pub async fn cmd_status(cli: &Cli, project_dir: &Path) -> Result<()> {
    let session = Session::open(cli, project_dir)?;
    let items = session.handle.get_snapshot().await?;

    if items.is_empty() {
        println!("No active items. Run 'phasekeep add \"<title>\"' to create one.");
        return session.close().await;
    }

    println!(
        "{:<10} {:<12} {:<12} {:>4}  Title",
        "ID", "Status", "Phase", "Pri"
    );
    println!(
        "{:<10} {:<12} {:<12} {:>4}  -----",
        "----------", "------------", "------------", "----"
    );
    for item in &items {
        let status = format!("{:<12}", item.status().as_str());
        let status = match item.status() {
            ItemStatus::Blocked => console::style(status).red(),
            ItemStatus::Done => console::style(status).green(),
            ItemStatus::InProgress | ItemStatus::Scoping => console::style(status).cyan(),
            _ => console::style(status),
        };
        println!(
            "{:<10} {} {:<12} {:>4}  {}",
            item.id(),
            status,
            item.phase().unwrap_or("-"),
            item.priority(),
            item.title()
        );
        if let Some(reason) = item.blocked_reason() {
            println!("{:<10} {}", "", console::style(format!("blocked: {}", reason)).dim());
        }
        if !item.dependencies().is_empty() {
            println!(
                "{:<10} {}",
                "",
                console::style(format!("depends on: {}", item.dependencies().join(", "))).dim()
            );
        }
    }
    println!();
    println!("{} active items", items.len());

    session.close().await
}

pub async fn cmd_archive(cli: &Cli, project_dir: &Path, id: &str) -> Result<()> {
    let session = Session::open(cli, project_dir)?;
    if skip_or_fail(session.handle.archive_item(id).await)?.is_some() {
        println!("Archived {}", id);
    }
    session.close().await
}

pub async fn cmd_block(
    cli: &Cli,
    project_dir: &Path,
    id: &str,
    reason: &str,
    block_type: Option<&str>,
) -> Result<()> {
    let blocked_type = block_type.map(str::parse::<BlockType>).transpose()?;
    let session = Session::open(cli, project_dir)?;
    let update = ItemUpdate::SetBlocked {
        reason: reason.to_string(),
        blocked_type,
    };
    if skip_or_fail(session.handle.update_item(id, vec![update]).await)?.is_some() {
        println!("Blocked {}: {}", id, reason);
    }
    session.close().await
}

pub async fn cmd_unblock(
    cli: &Cli,
    project_dir: &Path,
    id: &str,
    context: Option<String>,
) -> Result<()> {
    let session = Session::open(cli, project_dir)?;
    if let Some(status) = skip_or_fail(session.handle.unblock_item(id, context).await)? {
        println!("Unblocked {} (now {})", id, status);
    }
    session.close().await
}

pub async fn cmd_merge(cli: &Cli, project_dir: &Path, source: &str, target: &str) -> Result<()> {
    let session = Session::open(cli, project_dir)?;
    if skip_or_fail(session.handle.merge_item(source, target).await)?.is_some() {
        println!("Merged {} into {}", source, target);
    }
    session.close().await
}
