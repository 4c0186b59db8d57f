use anyhow::{Context, Result};
use std::path::Path;
use tracing::{error, info};

use super::{list_files, reset_dir, AssetPaths};

pub fn minify(source: &str) -> String {
    minifier::js::minify(source).to_string()
}

async fn build_one(source: &Path, output: &Path) -> Result<()> {
    let code = tokio::fs::read_to_string(source)
        .await
        .with_context(|| format!("reading {}", source.display()))?;
    tokio::fs::write(output, minify(&code))
        .await
        .with_context(|| format!("writing {}", output.display()))?;
    Ok(())
}

pub async fn build(paths: &AssetPaths) -> Result<()> {
    tokio::fs::create_dir_all(&paths.scripts_dir).await?;
    reset_dir(&paths.scripts_out_dir).await?;

    for source in list_files(&paths.scripts_dir).await? {
        let Some(name) = source.file_name() else {
            continue;
        };
        info!("Processing script {}", source.display());

        let output = paths.scripts_out_dir.join(name);
        match build_one(&source, &output).await {
            Ok(()) => info!("Wrote {}", output.display()),
            Err(e) => error!("{:#}", e),
        }
    }

    Ok(())
}
