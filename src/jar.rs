use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

/// One container entry, in the order it appears in the archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Entry {
    pub(crate) path: String,
    pub(crate) is_dir: bool,
    pub(crate) data: Vec<u8>,
    pub(crate) compression: CompressionMethod,
}

impl Entry {
    pub(crate) fn is_class(&self) -> bool {
        !self.is_dir && self.path.ends_with(".class")
    }
}

pub(crate) fn read_entries(path: &Path) -> Result<Vec<Entry>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let name = entry.name().to_string();
        let mut data = Vec::new();
        if !entry.is_dir() {
            entry
                .read_to_end(&mut data)
                .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        }
        entries.push(Entry {
            path: name,
            is_dir: entry.is_dir(),
            data,
            compression: entry.compression(),
        });
    }

    info!("read {} entries from {}", entries.len(), path.display());
    Ok(entries)
}

/// Write entries in order. Timestamps are pinned so identical input yields
/// identical output.
pub(crate) fn write_entries(path: &Path, entries: &[Entry]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = ZipWriter::new(file);

    for entry in entries {
        let options = SimpleFileOptions::default()
            .compression_method(output_compression(entry.compression))
            .last_modified_time(DateTime::default());
        if entry.is_dir {
            writer
                .add_directory(entry.path.as_str(), options)
                .with_context(|| format!("failed to write {}:{}", path.display(), entry.path))?;
        } else {
            writer
                .start_file(entry.path.as_str(), options)
                .with_context(|| format!("failed to write {}:{}", path.display(), entry.path))?;
            writer
                .write_all(&entry.data)
                .with_context(|| format!("failed to write {}:{}", path.display(), entry.path))?;
        }
    }

    writer
        .finish()
        .with_context(|| format!("failed to finish {}", path.display()))?;
    info!("wrote {} entries to {}", entries.len(), path.display());
    Ok(())
}

/// Stored entries stay stored; everything else is re-deflated.
fn output_compression(method: CompressionMethod) -> CompressionMethod {
    match method {
        CompressionMethod::Stored => CompressionMethod::Stored,
        _ => CompressionMethod::Deflated,
    }
}
