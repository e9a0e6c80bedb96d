use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{
    error::{PipelineError, Result},
    generate::DescriptorArtifact,
    registry::Registry,
};

/// Output of the distribution stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Distribution {
    pub digest: Option<String>,
    /// Every verified copy, under the output root.
    pub copies: Vec<PathBuf>,
}

/// Copies the one descriptor to every target that wants it and every
/// external consumer, then reads each copy back and checks its digest.
/// Never regenerates.
pub fn distribute(descriptor: Option<&DescriptorArtifact>, registry: &Registry, out_root: &Path) -> Result<Distribution> {
    let destinations = registry.descriptor_destinations();
    if destinations.is_empty() {
        debug!("no descriptor consumers configured");
        return Ok(Distribution::default());
    }

    let artifact = descriptor.ok_or_else(|| {
        PipelineError::Distribution("no descriptor artifact was produced by generation".to_string())
    })?;
    let failed = |path: &Path, what: &str, e: std::io::Error| {
        PipelineError::Distribution(format!("{} {}: {}", what, path.display(), e))
    };

    let mut copies = Vec::with_capacity(destinations.len());
    for destination in destinations {
        let path = out_root.join(&destination);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| failed(parent, "cannot create", e))?;
        }
        fs::write(&path, &artifact.bytes).map_err(|e| failed(path.as_path(), "cannot write", e))?;

        let written = fs::read(&path).map_err(|e| failed(path.as_path(), "cannot read back", e))?;
        if !artifact.matches(&written) {
            return Err(PipelineError::Distribution(format!(
                "copy at {} does not match digest {}",
                path.display(),
                artifact.digest
            )));
        }
        debug!("descriptor copied to {}", path.display());
        copies.push(path);
    }

    info!("descriptor {} distributed to {} consumers", artifact.digest, copies.len());
    Ok(Distribution {
        digest: Some(artifact.digest.clone()),
        copies,
    })
}
