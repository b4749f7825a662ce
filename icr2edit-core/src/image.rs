//! The opened executable and everything that touches it on disk.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::catalog::ParameterDefinition;
use crate::variant::{Variant, VariantRegistry};
use crate::{EditorError, Result};

/// In-memory copy of an executable, tagged with the build it was
/// identified as.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    variant: Variant,
    // Bytes as first read; a new backup holds these.
    opened: Vec<u8>,
    // Bytes as last written to disk.
    committed: Vec<u8>,
    bytes: Vec<u8>,
    backed_up: bool,
}

impl LoadedImage {
    pub fn from_bytes(bytes: Vec<u8>, registry: &VariantRegistry) -> Result<Self> {
        let variant = registry.identify(&bytes)?.clone();
        Ok(Self {
            variant,
            opened: bytes.clone(),
            committed: bytes.clone(),
            bytes,
            backed_up: false,
        })
    }

    pub fn variant(&self) -> &Variant {
        &self.variant
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// True when there are edits not yet written to disk.
    pub fn is_modified(&self) -> bool {
        self.bytes != self.committed
    }

    /// Throw away every in-memory edit since the last save.
    pub fn revert(&mut self) {
        self.bytes.copy_from_slice(&self.committed);
    }

    pub(crate) fn field(&self, definition: &ParameterDefinition) -> Result<&[u8]> {
        self.bytes
            .get(definition.range())
            .ok_or_else(|| self.out_of_bounds(definition))
    }

    /// Bytes as last saved.
    pub fn committed(&self) -> &[u8] {
        &self.committed
    }

    /// Overwrite one field. `bytes` must already be exactly the field's
    /// width.
    pub(crate) fn write_field(&mut self, definition: &ParameterDefinition, bytes: &[u8]) -> Result<()> {
        let range = definition.range();
        if bytes.len() != range.len() {
            return Err(EditorError::Catalog(format!(
                "'{}' expects {} bytes, got {}",
                definition.name,
                range.len(),
                bytes.len()
            )));
        }
        if range.end > self.bytes.len() {
            return Err(self.out_of_bounds(definition));
        }
        self.bytes[range].copy_from_slice(bytes);
        Ok(())
    }

    fn out_of_bounds(&self, definition: &ParameterDefinition) -> EditorError {
        EditorError::OffsetOutOfBounds {
            name: definition.name.clone(),
            variant: self.variant.tag.clone(),
            offset: definition.offset,
            width: definition.width(),
            size: self.bytes.len(),
        }
    }
}

/// Read and identify an executable.
pub fn open(path: &Path, registry: &VariantRegistry) -> Result<LoadedImage> {
    let bytes = fs::read(path).map_err(|e| EditorError::io("read", path, e))?;
    let image = LoadedImage::from_bytes(bytes, registry)?;
    tracing::info!(
        path = %path.display(),
        variant = %image.variant().tag,
        size = image.len(),
        "opened executable"
    );
    Ok(image)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// `ICR2.EXE` -> `ICR2.EXE.bak`.
pub fn backup_path(path: &Path) -> PathBuf {
    sibling(path, ".bak")
}

/// Write the bytes the image was opened with next to `path`, unless a
/// backup is already there. An existing backup predates every edit made
/// through this editor and is never overwritten.
pub fn backup(image: &LoadedImage, path: &Path) -> Result<PathBuf> {
    let target = backup_path(path);
    if target.is_file() {
        tracing::debug!(backup = %target.display(), "keeping existing backup");
        return Ok(target);
    }
    write_atomic(&target, &image.opened)?;
    tracing::info!(backup = %target.display(), "wrote backup");
    Ok(target)
}

/// Commit the image to `path`.
///
/// The first save of a session makes sure a backup exists and refuses to
/// go on if it cannot be written. The file itself is replaced via a temp file and rename, so
/// on any failure the target keeps its previous contents and the in-memory
/// edits are kept for a retry.
pub fn save(image: &mut LoadedImage, path: &Path) -> Result<()> {
    if !image.backed_up {
        backup(image, path)?;
        image.backed_up = true;
    }

    write_atomic(path, &image.bytes)?;
    image.committed.copy_from_slice(&image.bytes);

    tracing::info!(path = %path.display(), variant = %image.variant.tag, "saved executable");
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = sibling(path, ".tmp");

    let result = (|| {
        let mut file = File::create(&temp_path).map_err(|e| EditorError::io("create", &temp_path, e))?;
        file.write_all(bytes)
            .map_err(|e| EditorError::io("write", &temp_path, e))?;
        file.sync_all()
            .map_err(|e| EditorError::io("sync", &temp_path, e))?;
        fs::rename(&temp_path, path).map_err(|e| EditorError::io("replace", path, e))
    })();

    if result.is_err() && temp_path.is_file() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::Variant;
    use tempfile::tempdir;

    fn registry() -> VariantRegistry {
        let mut registry = VariantRegistry::new();
        registry.insert(Variant::new("tiny", 16, "Tiny address"));
        registry
    }

    fn def(offset: usize) -> ParameterDefinition {
        use crate::catalog::Category;
        use crate::codec::{FieldEncoding, Width};
        ParameterDefinition::new("p", Category::Engine, 0, offset, FieldEncoding::new(Width::Two, false))
    }

    #[test]
    fn backup_path_appends_suffix() {
        assert_eq!(
            backup_path(Path::new("/games/icr2/CART.EXE")),
            PathBuf::from("/games/icr2/CART.EXE.bak")
        );
    }

    #[test]
    fn open_rejects_unknown_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.exe");
        fs::write(&path, [0u8; 17]).unwrap();
        assert!(matches!(
            open(&path, &registry()),
            Err(EditorError::UnrecognizedVariant { size: 17 })
        ));
    }

    #[test]
    fn open_reports_missing_file() {
        let dir = tempdir().unwrap();
        let err = open(&dir.path().join("missing.exe"), &registry()).unwrap_err();
        assert!(matches!(err, EditorError::Io { operation: "read", .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn save_writes_backup_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.exe");
        fs::write(&path, [1u8; 16]).unwrap();

        let mut image = open(&path, &registry()).unwrap();
        image.write_field(&def(2), &[9, 9]).unwrap();
        assert!(image.is_modified());
        save(&mut image, &path).unwrap();
        assert!(!image.is_modified());

        image.write_field(&def(4), &[7, 7]).unwrap();
        save(&mut image, &path).unwrap();

        assert_eq!(fs::read(backup_path(&path)).unwrap(), vec![1u8; 16]);
        let saved = fs::read(&path).unwrap();
        assert_eq!(&saved[2..6], &[9, 9, 7, 7]);
        assert!(!dir.path().join("x.exe.tmp").exists());
    }

    #[test]
    fn failed_backup_blocks_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.exe");
        fs::write(&path, [1u8; 16]).unwrap();
        fs::create_dir(backup_path(&path)).unwrap();

        let mut image = open(&path, &registry()).unwrap();
        image.write_field(&def(0), &[5, 5]).unwrap();

        let err = save(&mut image, &path).unwrap_err();
        assert!(matches!(err, EditorError::Io { path: ref p, .. } if *p == backup_path(&path)));
        assert_eq!(fs::read(&path).unwrap(), vec![1u8; 16]);
        assert!(image.is_modified());
        assert!(!dir.path().join("x.exe.bak.tmp").exists());
    }

    #[test]
    fn later_sessions_keep_the_first_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.exe");
        fs::write(&path, [1u8; 16]).unwrap();

        let mut first = open(&path, &registry()).unwrap();
        first.write_field(&def(0), &[9, 9]).unwrap();
        save(&mut first, &path).unwrap();

        let mut second = open(&path, &registry()).unwrap();
        second.write_field(&def(0), &[7, 7]).unwrap();
        save(&mut second, &path).unwrap();

        assert_eq!(fs::read(backup_path(&path)).unwrap(), vec![1u8; 16]);
        assert_eq!(&fs::read(&path).unwrap()[0..2], &[7, 7]);
    }

    #[test]
    fn failed_write_leaves_target_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.exe");
        fs::write(&path, [1u8; 16]).unwrap();
        fs::create_dir(dir.path().join("x.exe.tmp")).unwrap();

        let mut image = open(&path, &registry()).unwrap();
        image.write_field(&def(0), &[5, 5]).unwrap();

        assert!(save(&mut image, &path).is_err());
        assert_eq!(fs::read(&path).unwrap(), vec![1u8; 16]);
        assert_eq!(&image.bytes()[0..2], &[5, 5]);
    }

    #[test]
    fn revert_restores_committed_bytes() {
        let mut image = LoadedImage::from_bytes(vec![0u8; 16], &registry()).unwrap();
        image.write_field(&def(8), &[1, 2]).unwrap();
        image.revert();
        assert_eq!(image.bytes(), &[0u8; 16]);
        assert!(!image.is_modified());
    }

    #[test]
    fn write_field_checks_width() {
        let mut image = LoadedImage::from_bytes(vec![0u8; 16], &registry()).unwrap();
        assert!(image.write_field(&def(0), &[1]).is_err());
        assert!(image.write_field(&def(15), &[1, 2]).is_err());
        assert_eq!(image.bytes(), &[0u8; 16]);
    }
}
