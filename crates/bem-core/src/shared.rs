//! Thread-safe shared handle over a [`DatasetModel`].

use crate::DatasetModel;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

/// Many concurrent readers or one writer.
///
/// Integrity checks and queries run under [`Self::read`]; property writes
/// and promotions take [`Self::write`] for their whole duration, so readers
/// never observe a half-applied cascade.
#[derive(Debug, Clone)]
pub struct SharedModel {
    inner: Arc<RwLock<DatasetModel>>,
}

impl SharedModel {
    #[must_use]
    pub fn new(model: DatasetModel) -> Self {
        Self {
            inner: Arc::new(RwLock::new(model)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, DatasetModel> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, DatasetModel> {
        self.inner.write()
    }

    /// Replace the model wholesale, typically with a fresh scan.
    pub fn replace(&self, model: DatasetModel) -> DatasetModel {
        std::mem::replace(&mut *self.inner.write(), model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ModelOptions, check_snapshot_hierarchy, set_property};
    use bem_backend::{MemBackend, MemDatasetSpec};
    use bem_types::{PropertyKind, Provenance};
    use std::thread;

    fn backend() -> MemBackend {
        let backend = MemBackend::new();
        backend.add_pool("rpool", "");
        backend
            .with(MemDatasetSpec::filesystem("rpool").with_mountpoint("/"))
            .with(MemDatasetSpec::filesystem("rpool/a"))
            .with(MemDatasetSpec::filesystem("rpool/a/b"))
            .with(MemDatasetSpec::snapshot("rpool/a@s", 1))
            .with(MemDatasetSpec::snapshot("rpool/a/b@s", 1))
    }

    #[test]
    fn concurrent_readers_then_writer() {
        let backend = Arc::new(backend());
        let shared = SharedModel::new(
            DatasetModel::scan(backend.as_ref(), &ModelOptions::default()).expect("scan"),
        );

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || {
                    let model = shared.read();
                    let a = model.find_by_name("rpool/a").expect("a");
                    check_snapshot_hierarchy(&model, a, "s").expect("consistent");
                })
            })
            .collect();
        for reader in readers {
            reader.join().expect("reader thread");
        }

        {
            let mut model = shared.write();
            let root = model.find_by_name("rpool").expect("root");
            set_property(
                &mut model,
                backend.as_ref(),
                root,
                PropertyKind::Mountpoint,
                "/srv",
                Provenance::Local,
            )
            .expect("set");
        }
        let model = shared.read();
        let b = model.find_by_name("rpool/a/b").expect("b");
        assert_eq!(model[b].properties().mountpoint, "/srv/a/b");
    }

    #[test]
    fn replace_swaps_in_a_rescan() {
        let backend = backend();
        let shared = SharedModel::new(
            DatasetModel::scan(&backend, &ModelOptions::default()).expect("scan"),
        );
        backend
            .add(MemDatasetSpec::filesystem("rpool/c"))
            .expect("add");
        let old = shared.replace(DatasetModel::scan(&backend, &ModelOptions::default()).expect("rescan"));
        assert!(old.lookup("rpool/c").is_none());
        assert!(shared.read().lookup("rpool/c").is_some());
    }
}
