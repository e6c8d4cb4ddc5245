use once_cell::sync::OnceCell;

use super::{AnnotationCollection, AnnotationRecord, GlobalParam, Modality};
use crate::error::{DataError, Result};
use crate::persist::PersistenceFacade;

/// Lazily loaded, read-only annotation collections.
///
/// The first reference to a modality deserializes its whole artifact; the
/// result is kept for the lifetime of the cache. Concurrent first accesses
/// are serialized by the once-cell, later reads take no lock. There is no
/// invalidation: a fresh cache is needed to observe rewritten artifacts.
/// A failed load is not memoized.
pub struct AnnotationCache {
    persist: PersistenceFacade,
    collections: [OnceCell<AnnotationCollection>; Modality::COUNT],
    globals: [OnceCell<AnnotationRecord>; GlobalParam::COUNT],
}

impl AnnotationCache {
    pub fn new(persist: PersistenceFacade) -> Self {
        Self {
            persist,
            collections: std::array::from_fn(|_| OnceCell::new()),
            globals: std::array::from_fn(|_| OnceCell::new()),
        }
    }

    pub fn get_collection(&self, modality: Modality) -> Result<&AnnotationCollection> {
        self.collections[modality.slot()].get_or_try_init(|| {
            let collection = self.persist.load_collection(modality.name())?;
            log::debug!(
                "loaded {} annotations for {} frames",
                modality,
                collection.len()
            );
            Ok(collection)
        })
    }

    pub fn get(&self, modality: Modality, key: &str) -> Result<&AnnotationRecord> {
        self.try_get(modality, key)?
            .ok_or_else(|| DataError::AnnotationNotFound {
                modality: modality.name().to_string(),
                key: key.to_string(),
            })
    }

    /// Like `get`, but an absent key is `Ok(None)`.
    pub fn try_get(&self, modality: Modality, key: &str) -> Result<Option<&AnnotationRecord>> {
        Ok(self.get_collection(modality)?.get(key))
    }

    pub fn global(&self, param: GlobalParam) -> Result<&AnnotationRecord> {
        self.globals[param.slot()].get_or_try_init(|| {
            let record = self.persist.load_record(param.name())?;
            log::debug!("loaded {} ({})", param.name(), record.signature());
            Ok(record)
        })
    }

    pub fn is_loaded(&self, modality: Modality) -> bool {
        self.collections[modality.slot()].get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::{ArtifactRegistry, ArtifactValue, SaveOptions};
    use ndarray::{ArrayD, IxDyn};
    use std::sync::Arc;

    fn tensor(value: f32) -> AnnotationRecord {
        AnnotationRecord::Tensor(ArrayD::from_elem(IxDyn(&[2, 2]), value))
    }

    fn facade(dir: &std::path::Path) -> PersistenceFacade {
        PersistenceFacade::new(Arc::new(ArtifactRegistry::new(dir)))
    }

    #[test]
    fn loads_once_and_serves_from_memory() {
        let dir = tempfile::tempdir().unwrap();
        let persist = facade(dir.path());
        let mut collection = AnnotationCollection::new();
        collection.insert("f_0000000.jpg".to_string(), tensor(1.0));
        persist
            .save(
                Modality::Landmarks.name(),
                &ArtifactValue::Collection(collection),
                &SaveOptions::default(),
            )
            .unwrap();

        let cache = AnnotationCache::new(persist.clone());
        assert!(!cache.is_loaded(Modality::Landmarks));
        assert_eq!(cache.get(Modality::Landmarks, "f_0000000.jpg").unwrap(), &tensor(1.0));
        assert!(cache.is_loaded(Modality::Landmarks));

        // Rewriting the artifact is not observed by an already loaded cache.
        let mut rewritten = AnnotationCollection::new();
        rewritten.insert("f_0000000.jpg".to_string(), tensor(9.0));
        persist
            .save(
                Modality::Landmarks.name(),
                &ArtifactValue::Collection(rewritten),
                &SaveOptions::default(),
            )
            .unwrap();
        assert_eq!(cache.get(Modality::Landmarks, "f_0000000.jpg").unwrap(), &tensor(1.0));
    }

    #[test]
    fn absent_key_is_annotation_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let persist = facade(dir.path());
        persist
            .save(
                Modality::Expression.name(),
                &ArtifactValue::Collection(AnnotationCollection::new()),
                &SaveOptions::default(),
            )
            .unwrap();
        let cache = AnnotationCache::new(persist);
        assert!(matches!(
            cache.get(Modality::Expression, "f_0000003.jpg"),
            Err(DataError::AnnotationNotFound { .. })
        ));
        assert!(cache
            .try_get(Modality::Expression, "f_0000003.jpg")
            .unwrap()
            .is_none());
    }

    #[test]
    fn failed_load_is_not_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let persist = facade(dir.path());
        let cache = AnnotationCache::new(persist.clone());
        assert!(cache.get_collection(Modality::Lighting).is_err());
        assert!(!cache.is_loaded(Modality::Lighting));

        persist
            .save(
                Modality::Lighting.name(),
                &ArtifactValue::Collection(AnnotationCollection::new()),
                &SaveOptions::default(),
            )
            .unwrap();
        assert!(cache.get_collection(Modality::Lighting).unwrap().is_empty());
    }

    #[test]
    fn concurrent_first_access_sees_one_collection() {
        let dir = tempfile::tempdir().unwrap();
        let persist = facade(dir.path());
        let mut collection = AnnotationCollection::new();
        for i in 0..64 {
            collection.insert(format!("f_{:07}.jpg", i), tensor(i as f32));
        }
        persist
            .save(
                Modality::SmoothedPose.name(),
                &ArtifactValue::Collection(collection),
                &SaveOptions::default(),
            )
            .unwrap();

        let cache = AnnotationCache::new(persist);
        let addresses: Vec<usize> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        let c = cache.get_collection(Modality::SmoothedPose).unwrap();
                        c as *const AnnotationCollection as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(addresses.windows(2).all(|w| w[0] == w[1]));
    }
}
