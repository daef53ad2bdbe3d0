//! The two storage volumes and their lazily-tracked mount state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::core::config::StorageConfig;
use crate::core::errors::Result;
use crate::core::paths::normalize_syntactic;
use crate::platform::pal::{Platform, Volume, VolumeKind, VolumeUsage};

struct VolumeSlot {
    volume: Volume,
    mounted: AtomicBool,
    // Serializes mount/unmount so two tasks never mount the same volume twice.
    transition: Mutex<()>,
}

impl VolumeSlot {
    fn new(volume: Volume) -> Self {
        Self {
            volume,
            mounted: AtomicBool::new(false),
            transition: Mutex::new(()),
        }
    }
}

/// Persistent and removable volumes over a [`Platform`].
pub struct VolumeSet {
    platform: Arc<dyn Platform>,
    persistent: VolumeSlot,
    removable: VolumeSlot,
}

impl VolumeSet {
    pub fn new(
        platform: Arc<dyn Platform>,
        persistent_root: PathBuf,
        removable_root: PathBuf,
        format_if_missing: bool,
    ) -> Self {
        Self {
            platform,
            persistent: VolumeSlot::new(Volume {
                kind: VolumeKind::Persistent,
                root: normalize_syntactic(&persistent_root),
                create_if_missing: format_if_missing,
            }),
            removable: VolumeSlot::new(Volume {
                kind: VolumeKind::Removable,
                root: normalize_syntactic(&removable_root),
                create_if_missing: false,
            }),
        }
    }

    pub fn from_config(config: &StorageConfig, platform: Arc<dyn Platform>) -> Self {
        Self::new(
            platform,
            config.persistent_root.clone(),
            config.removable_root.clone(),
            config.format_if_missing,
        )
    }

    fn slot(&self, kind: VolumeKind) -> &VolumeSlot {
        match kind {
            VolumeKind::Persistent => &self.persistent,
            VolumeKind::Removable => &self.removable,
        }
    }

    #[must_use]
    pub fn volume(&self, kind: VolumeKind) -> &Volume {
        &self.slot(kind).volume
    }

    #[must_use]
    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    #[must_use]
    pub fn is_mounted(&self, kind: VolumeKind) -> bool {
        self.slot(kind).mounted.load(Ordering::Acquire)
    }

    /// Volume whose root is the longest prefix of `path`, if any.
    ///
    /// Membership is decided on the syntactically normalized path.
    #[must_use]
    pub fn volume_for(&self, path: &Path) -> Option<VolumeKind> {
        let normalized = normalize_syntactic(path);
        [&self.persistent, &self.removable]
            .into_iter()
            .filter(|slot| normalized.starts_with(&slot.volume.root))
            .max_by_key(|slot| slot.volume.root.components().count())
            .map(|slot| slot.volume.kind)
    }

    /// Mount `kind` unless it is already mounted.
    pub fn ensure_mounted(&self, kind: VolumeKind) -> Result<()> {
        let slot = self.slot(kind);
        if slot.mounted.load(Ordering::Acquire) {
            return Ok(());
        }
        let _transition = slot.transition.lock();
        if slot.mounted.load(Ordering::Acquire) {
            return Ok(());
        }
        self.platform.mount(&slot.volume)?;
        slot.mounted.store(true, Ordering::Release);
        eprintln!(
            "[SDC-VOLUME] mounted {} volume at {}",
            kind,
            slot.volume.root.display()
        );
        Ok(())
    }

    /// Mount whichever volume holds `path`. Paths outside both volumes pass through.
    pub fn ensure_mounted_for(&self, path: &Path) -> Result<Option<VolumeKind>> {
        let kind = self.volume_for(path);
        if let Some(kind) = kind {
            self.ensure_mounted(kind)?;
        }
        Ok(kind)
    }

    /// Release `kind` if it is mounted.
    pub fn unmount(&self, kind: VolumeKind) -> Result<()> {
        let slot = self.slot(kind);
        let _transition = slot.transition.lock();
        if !slot.mounted.load(Ordering::Acquire) {
            return Ok(());
        }
        self.platform.unmount(&slot.volume)?;
        slot.mounted.store(false, Ordering::Release);
        Ok(())
    }

    /// Usage of the volume that will hold `path`.
    ///
    /// Paths outside both volumes are measured at their nearest existing
    /// ancestor.
    pub fn usage_for(&self, path: &Path) -> Result<VolumeUsage> {
        let probe = match self.volume_for(path) {
            Some(kind) => self.volume(kind).root.clone(),
            None => nearest_existing_ancestor(path),
        };
        self.platform.volume_usage(&probe)
    }
}

fn nearest_existing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|candidate| !candidate.as_os_str().is_empty() && candidate.exists())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::pal::MockPlatform;

    fn set_with(mock: Arc<MockPlatform>, persistent: &Path, removable: &Path) -> VolumeSet {
        VolumeSet::new(mock, persistent.to_path_buf(), removable.to_path_buf(), true)
    }

    #[test]
    fn resolves_by_longest_prefix() {
        let mock = Arc::new(MockPlatform::new());
        let set = set_with(mock, Path::new("/data"), Path::new("/data/sd"));
        assert_eq!(set.volume_for(Path::new("/data/x.csv")), Some(VolumeKind::Persistent));
        assert_eq!(set.volume_for(Path::new("/data/sd/x.csv")), Some(VolumeKind::Removable));
        assert_eq!(set.volume_for(Path::new("/data/sd/../y.csv")), Some(VolumeKind::Persistent));
        assert_eq!(set.volume_for(Path::new("/etc/passwd")), None);
        assert_eq!(set.volume_for(Path::new("/datax/file")), None);
    }

    #[test]
    fn mounts_lazily_and_once() {
        let dir = tempfile::tempdir().unwrap();
        let flash = dir.path().join("flash");
        let sd = dir.path().join("sd");
        std::fs::create_dir_all(&sd).unwrap();
        let mock = Arc::new(MockPlatform::new());
        let set = set_with(Arc::clone(&mock), &flash, &sd);

        assert!(!set.is_mounted(VolumeKind::Persistent));
        set.ensure_mounted_for(&flash.join("a.csv")).unwrap();
        set.ensure_mounted(VolumeKind::Persistent).unwrap();
        assert!(set.is_mounted(VolumeKind::Persistent));
        assert!(flash.is_dir());
        assert_eq!(mock.mount_calls(), 1);

        set.unmount(VolumeKind::Persistent).unwrap();
        assert!(!set.is_mounted(VolumeKind::Persistent));
        assert_eq!(mock.unmount_calls(), 1);
    }

    #[test]
    fn failed_mount_stays_unmounted() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockPlatform::new());
        mock.fail_mount(VolumeKind::Removable);
        let set = set_with(Arc::clone(&mock), dir.path(), &dir.path().join("sd"));
        let err = set.ensure_mounted(VolumeKind::Removable).unwrap_err();
        assert_eq!(err.code(), "SDC-2101");
        assert!(!set.is_mounted(VolumeKind::Removable));
    }

    #[test]
    fn outside_paths_pass_through() {
        let mock = Arc::new(MockPlatform::new());
        let set = set_with(Arc::clone(&mock), Path::new("/flash"), Path::new("/sd"));
        assert_eq!(set.ensure_mounted_for(Path::new("/tmp/x")).unwrap(), None);
        assert_eq!(mock.mount_calls(), 0);
    }
}
