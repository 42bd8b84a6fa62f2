use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use humansize::{format_size, DECIMAL};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use vaultsync_config::METADATA_FILE_NAME;
use vaultsync_core::path_utils::VaultPath;
use vaultsync_core::tree::flatten_files;
use vaultsync_core::{FileTree, SyncActionKind};
use vaultsync_pipeline::sync::planner;
use vaultsync_pipeline::{
    FileSystem, HttpRemoteSyncApi, LocalChanges, LocalFileSystem, MetadataStore,
    ReconciliationPlanner, SyncPlan,
};
use vaultsync_scanner::Scanner;

#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub tree: FileTree,
    pub files: usize,
    pub notes: usize,
    pub bytes: u64,
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(message.to_string());
    Ok(pb)
}

async fn scan(root: &Utf8Path) -> Result<ScanSummary> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<ScanSummary> {
        let tree = Scanner::scan_tree(&root)?;
        let files = flatten_files(&tree);
        let notes = files.iter().filter(|f| VaultPath::is_markdown(&f.path)).count();
        let bytes = files
            .iter()
            .filter_map(|f| std::fs::metadata(&f.path).ok())
            .map(|m| m.len())
            .sum();
        let files = files.len();
        Ok(ScanSummary {
            tree,
            files,
            notes,
            bytes,
        })
    })
    .await?
}

fn metadata_store(fs: Arc<dyn FileSystem>) -> Arc<MetadataStore> {
    Arc::new(MetadataStore::new(fs, METADATA_FILE_NAME))
}

pub async fn cmd_scan(path: Utf8PathBuf, output: Option<Utf8PathBuf>) -> Result<ScanSummary> {
    println!(":: Scanning vault: {}", path);

    let pb = spinner("Walking vault...")?;
    let summary = scan(&path).await?;
    pb.finish_with_message(format!(
        "Scanned {} files ({} notes, {})",
        summary.files,
        summary.notes,
        format_size(summary.bytes, DECIMAL)
    ));

    let json = serde_json::to_string_pretty(&summary.tree)?;
    if let Some(out) = output {
        std::fs::write(&out, json).with_context(|| format!("Failed to write {out}"))?;
        println!(":: Saved file tree to {}", out);
    } else {
        println!("{}", json);
    }

    Ok(summary)
}

pub async fn cmd_fingerprint(file: Utf8PathBuf) -> Result<String> {
    let content = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {file}"))?;
    let hash = vaultsync_infra::fingerprint(&content);
    println!("{}  {}", hash, file);
    Ok(hash)
}

/// Compare the vault against its sync metadata without contacting a server.
pub async fn cmd_status(path: Utf8PathBuf) -> Result<LocalChanges> {
    println!(":: Local status: {}", path);

    let summary = scan(&path).await?;
    let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
    let store = metadata_store(fs.clone());
    let changes = planner::local_changes(&*fs, &store, &path, &summary.tree).await?;

    println!("\n:: Local Changes");
    println!("   Added:    {}", changes.added.len());
    println!("   Modified: {}", changes.modified.len());
    println!("   Missing:  {}", changes.missing.len());
    for p in &changes.added {
        println!("   + {}", p);
    }
    for p in &changes.modified {
        println!("   ~ {}", p);
    }
    for p in &changes.missing {
        println!("   - {}", p);
    }
    if changes.is_clean() {
        println!("   Status:   Clean");
    }

    Ok(changes)
}

/// Ask the server what a sync of the vault would do.
pub async fn cmd_check(
    server: String,
    vault_id: String,
    path: Utf8PathBuf,
    token: Option<String>,
) -> Result<SyncPlan> {
    println!(":: Analyzing state...");
    println!("   Server: {}", server);
    println!("   Vault:  {} ({})", vault_id, path);

    let client = vaultsync_infra::default_http_client().context("Failed to build HTTP client")?;
    let remote = Arc::new(HttpRemoteSyncApi::new(client, &server, token)?);
    let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
    let planner = ReconciliationPlanner::new(remote, fs.clone(), metadata_store(fs));

    let summary = scan(&path).await?;
    let pb = spinner("Checking with server...")?;
    let plan = planner.check_sync(&vault_id, &path, &summary.tree).await;
    pb.finish_and_clear();
    let plan = plan?;

    let count = |kind: SyncActionKind| plan.actions.iter().filter(|a| a.kind == kind).count();
    println!("\n:: Analysis Result");
    println!("   Pending Uploads:   {}", count(SyncActionKind::Upload));
    println!("   Pending Downloads: {}", count(SyncActionKind::Download));
    println!("   In Sync:           {}", count(SyncActionKind::None));
    for action in plan.pending() {
        let marker = match action.kind {
            SyncActionKind::Upload => '^',
            _ => 'v',
        };
        println!("   {} {} (server v{})", marker, action.relative_path, action.server_version);
    }
    if plan.is_in_sync() {
        println!("   Status:            Up to date");
    }

    Ok(plan)
}
