//! Static asset build: stylesheets, scripts and images compiled into the
//! directory the web service serves under `/assets`.
//!
//! Output paths follow from input file names. Stylesheets whose names start
//! with a numeric sort prefix (`00-base.scss`) are concatenated, in name
//! order, into a single bundle; files starting with `_` are partials.

pub mod images;
pub mod scripts;
pub mod styles;
pub mod watch;

use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct AssetPaths {
    pub styles_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub images_dir: PathBuf,
    pub styles_out_dir: PathBuf,
    pub scripts_out_dir: PathBuf,
    pub images_out_dir: PathBuf,
    pub styles_out_file: String,
}

impl AssetPaths {
    /// Source and output directories relative to `root`.
    pub fn rooted(root: &Path) -> Self {
        Self {
            styles_dir: root.join("styles"),
            scripts_dir: root.join("scripts"),
            images_dir: root.join("assets").join("images"),
            styles_out_dir: root.join("assets").join("css"),
            scripts_out_dir: root.join("assets").join("js"),
            images_out_dir: root.join("assets").join("webp"),
            styles_out_file: "styles.css".to_string(),
        }
    }

    /// Paths relative to the working directory, with output locations
    /// overridable through `STYLEOUTDIR`, `SCRIPTSOUTDIR`, `IMAGESOUTDIR`
    /// and `STYLEOUTFILE`.
    pub fn from_env() -> Self {
        let mut paths = Self::rooted(Path::new("."));
        if let Ok(dir) = env::var("STYLEOUTDIR") {
            paths.styles_out_dir = dir.into();
        }
        if let Ok(dir) = env::var("SCRIPTSOUTDIR") {
            paths.scripts_out_dir = dir.into();
        }
        if let Ok(dir) = env::var("IMAGESOUTDIR") {
            paths.images_out_dir = dir.into();
        }
        if let Ok(file) = env::var("STYLEOUTFILE") {
            paths.styles_out_file = file;
        }
        paths
    }
}

/// Build every asset class once, then keep rebuilding on changes if `watch`.
pub async fn run(paths: AssetPaths, watch: bool) -> Result<()> {
    let paths = Arc::new(paths);

    let (styles, scripts, images) = tokio::join!(
        styles::build(&paths),
        scripts::build(&paths),
        images::build(&paths),
    );
    styles?;
    scripts?;
    images?;

    if watch {
        watch::run(paths).await?;
    }

    Ok(())
}

/// Create `dir` if needed and remove everything inside it.
pub(crate) async fn reset_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
    }

    info!("Cleared {}", dir.display());
    Ok(())
}

/// Regular, non-hidden files directly inside `dir`, sorted by name.
pub(crate) async fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("reading {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
