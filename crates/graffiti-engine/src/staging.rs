use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat};
use tempfile::TempDir;
use uuid::Uuid;

/// Scratch directory for the uploads of one dispatch.
///
/// The directory is created on first use and removed with everything in it when
/// the area is dropped, whichever way the dispatch ends.
#[derive(Debug, Default)]
pub struct StagingArea {
    parent: Option<PathBuf>,
    dir: Option<TempDir>,
    staged: HashMap<&'static str, PathBuf>,
}

impl StagingArea {
    pub fn new(parent: Option<PathBuf>) -> Self {
        Self {
            parent,
            dir: None,
            staged: HashMap::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }

    /// Writes `image` as PNG once per slot and returns its path.
    pub fn stage_image(&mut self, slot: &'static str, image: &DynamicImage) -> Result<PathBuf> {
        if let Some(path) = self.staged.get(slot) {
            return Ok(path.clone());
        }
        let dir = self.ensure_dir()?;
        let path = dir.join(format!("{slot}-{}.png", Uuid::new_v4().simple()));
        image
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("failed staging {slot} image"))?;
        self.staged.insert(slot, path.clone());
        Ok(path)
    }

    fn ensure_dir(&mut self) -> Result<PathBuf> {
        if let Some(dir) = &self.dir {
            return Ok(dir.path().to_path_buf());
        }
        let mut builder = tempfile::Builder::new();
        builder.prefix("graffiti-");
        let dir = match &self.parent {
            Some(parent) => builder
                .tempdir_in(parent)
                .with_context(|| format!("failed creating staging dir in {}", parent.display()))?,
            None => builder.tempdir().context("failed creating staging dir")?,
        };
        let path = dir.path().to_path_buf();
        self.dir = Some(dir);
        Ok(path)
    }
}
