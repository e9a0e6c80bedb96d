use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use flate2::{write::GzEncoder, Compression};
use tracing::{debug, info};

use crate::{
    error::{PipelineError, Result},
    registry::{ArchiveSpec, ArtifactKind, OutputTarget, Registry},
    rewrite::Rewritten,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    pub name:    String,
    pub path:    PathBuf,
    pub entries: usize,
}

/// The files this run produced for `target`, sorted: everything the rewriter
/// returned plus the descriptor copy when the target takes one. Other files
/// in the directory are left out of the bundle.
fn collect_entries(target: &OutputTarget, rewritten: &Rewritten, registry: &Registry) -> BTreeSet<PathBuf> {
    let mut entries: BTreeSet<PathBuf> = rewritten.for_target(&target.name).map(|f| f.path.clone()).collect();
    if target.has(ArtifactKind::Descriptor) {
        entries.insert(PathBuf::from(&registry.descriptor_file_name));
    }
    entries
}

/// Writes `entries` of `dir` as a gzip-compressed tarball at `archive`. Entries carry
/// fixed metadata so identical trees give identical archives.
fn write_archive(dir: &Path, entries: &BTreeSet<PathBuf>, archive: &Path) -> io::Result<()> {
    let file = File::create(archive)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut tar = tar::Builder::new(encoder);

    for relative in entries {
        let data = fs::read(dir.join(relative))?;

        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_entry_type(tar::EntryType::Regular);

        tar.append_data(&mut header, relative, data.as_slice())?;
    }

    let encoder = tar.into_inner()?;
    encoder.finish()?;
    Ok(())
}

fn package_one(bundle: &ArchiveSpec, rewritten: &Rewritten, registry: &Registry, out_root: &Path) -> Result<Archive> {
    let archive_path = out_root.join(&registry.archive_dir).join(&bundle.file_name);
    let failed = |source: io::Error| PipelineError::Packaging {
        archive: archive_path.clone(),
        source,
    };

    let target = registry.target(&bundle.target).ok_or_else(|| {
        failed(io::Error::new(io::ErrorKind::NotFound, format!("unknown target {}", bundle.target)))
    })?;
    let dir = out_root.join(&target.directory);
    let entries = collect_entries(target, rewritten, registry);

    if let Some(missing) = entries.iter().find(|path| !dir.join(path).is_file()) {
        return Err(failed(io::Error::new(
            io::ErrorKind::NotFound,
            format!("generated file {} is missing from {}", missing.display(), dir.display()),
        )));
    }

    if let Some(parent) = archive_path.parent() {
        fs::create_dir_all(parent).map_err(failed)?;
    }
    write_archive(&dir, &entries, &archive_path).map_err(failed)?;
    debug!("packed {} entries from {} into {}", entries.len(), dir.display(), archive_path.display());

    Ok(Archive {
        name: bundle.name.clone(),
        path: archive_path.clone(),
        entries: entries.len(),
    })
}

/// Bundles what this run wrote into each archived target's directory. Takes
/// the rewrite stage's output, so it only ever packs rewritten files.
pub fn package(rewritten: &Rewritten, registry: &Registry, out_root: &Path) -> Result<Vec<Archive>> {
    let mut archives = Vec::with_capacity(registry.archives.len());
    for bundle in &registry.archives {
        archives.push(package_one(bundle, rewritten, registry, out_root)?);
    }
    info!("packaged {} archives", archives.len());
    Ok(archives)
}
