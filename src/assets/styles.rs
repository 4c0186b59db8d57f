use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use super::{list_files, reset_dir, AssetPaths};

/// `^[0-9]+-`: stylesheets carrying a sort prefix go into the bundle.
pub fn is_bundled(file_name: &str) -> bool {
    let digits = file_name.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && file_name[digits..].starts_with('-')
}

fn is_partial(file_name: &str) -> bool {
    file_name.starts_with('_')
}

fn compile(path: &Path) -> Result<String> {
    let options = grass::Options::default().style(grass::OutputStyle::Compressed);
    grass::from_path(path, &options).map_err(|e| anyhow!("compiling {}: {}", path.display(), e))
}

pub async fn build(paths: &AssetPaths) -> Result<()> {
    tokio::fs::create_dir_all(&paths.styles_dir).await?;
    reset_dir(&paths.styles_out_dir).await?;

    let sources = list_files(&paths.styles_dir).await?;
    let out_dir = paths.styles_out_dir.clone();

    // Compilation is CPU-bound, keep it off the async workers
    let (bundle, standalone) = tokio::task::spawn_blocking(move || -> Result<(Vec<String>, Vec<(PathBuf, String)>)> {
        let mut bundle = Vec::new();
        let mut standalone = Vec::new();

        for source in sources {
            let Some(name) = source.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if is_partial(&name) {
                continue;
            }

            info!("Processing style {}", source.display());
            let css = compile(&source)?;

            if is_bundled(&name) {
                bundle.push(css);
            } else {
                let stem = source.file_stem().unwrap_or_default();
                standalone.push((out_dir.join(stem).with_extension("css"), css));
            }
        }

        Ok((bundle, standalone))
    })
    .await??;

    for (output, css) in standalone {
        tokio::fs::write(&output, css)
            .await
            .with_context(|| format!("writing {}", output.display()))?;
        info!("Wrote {}", output.display());
    }

    let output = paths.styles_out_dir.join(&paths.styles_out_file);
    tokio::fs::write(&output, bundle.join("\n"))
        .await
        .with_context(|| format!("writing {}", output.display()))?;
    info!("Wrote {}", output.display());

    Ok(())
}
