use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{error, info};

use super::{reset_dir, AssetPaths};

pub const CWEBP_TIMEOUT: Duration = Duration::from_secs(30);
const CWEBP_QUALITY: &str = "50";

/// Every regular, non-hidden file under `root`, as paths relative to it.
async fn collect_images(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![PathBuf::new()];

    while let Some(rel) = pending.pop() {
        let dir = root.join(&rel);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("reading {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            let kind = entry.file_type().await?;
            let child = rel.join(name);
            if kind.is_dir() {
                pending.push(child);
            } else if kind.is_file() {
                found.push(child);
            }
        }
    }

    found.sort();
    Ok(found)
}

/// Output location for an image: same relative directory, `.webp` extension.
pub fn webp_path(out_dir: &Path, rel: &Path) -> PathBuf {
    out_dir.join(rel).with_extension("webp")
}

async fn convert(input: PathBuf, output: PathBuf) -> Result<()> {
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut child = Command::new("cwebp")
        .args(["-mt", "-q", CWEBP_QUALITY])
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .context("spawning cwebp")?;

    match tokio::time::timeout(CWEBP_TIMEOUT, child.wait()).await {
        Ok(status) => {
            let status = status?;
            if !status.success() {
                bail!("cwebp failed on {} ({})", input.display(), status);
            }
        }
        Err(_) => {
            child.kill().await?;
            bail!("cwebp timed out on {}", input.display());
        }
    }

    info!("Wrote {}", output.display());
    Ok(())
}

pub async fn build(paths: &AssetPaths) -> Result<()> {
    tokio::fs::create_dir_all(&paths.images_dir).await?;
    reset_dir(&paths.images_out_dir).await?;

    let mut tasks = JoinSet::new();
    for rel in collect_images(&paths.images_dir).await? {
        let input = paths.images_dir.join(&rel);
        let output = webp_path(&paths.images_out_dir, &rel);
        info!("Processing image {}", input.display());
        tasks.spawn(convert(input, output));
    }

    let mut failed = 0usize;
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined? {
            error!("{:#}", e);
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{} image(s) failed to convert", failed);
    }
    Ok(())
}
