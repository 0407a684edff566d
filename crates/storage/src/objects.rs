// Object stores for original and restored image bytes
//
// References are the keys themselves: a reference returned by `put` can be
// passed straight back to `get` on the same store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use timeglow_core::{ObjectStore, ObjectStoreError};
use tracing::debug;

/// File extension used for a stored image of `content_type`
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/heic" => "heic",
        _ => "bin",
    }
}

/// Keys are relative, `/`-separated, and never climb out of the store root
fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
    let clean = !key.is_empty()
        && !key.contains('\\')
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if !clean {
        return Err(ObjectStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<String, (Vec<u8>, String)>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().get(key).map(|(_, ct)| ct.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, reference: &str) -> Result<Vec<u8>, ObjectStoreError> {
        self.objects
            .read()
            .get(reference)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| ObjectStoreError::NotFound(reference.to_string()))
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ObjectStoreError> {
        validate_key(key)?;
        self.objects
            .write()
            .insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(key.to_string())
    }
}

/// Objects as files under a root directory
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn io_error(key: &str, e: std::io::Error) -> ObjectStoreError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ObjectStoreError::NotFound(key.to_string())
    } else {
        ObjectStoreError::Io(format!("{key}: {e}"))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, reference: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let path = self.path_for(reference)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| io_error(reference, e))
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ObjectStoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(key, e))?;
        }

        // Write then rename so a reader never sees a partial object
        let tmp = path.with_extension("partial");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| io_error(key, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(key, e))?;

        debug!(key, content_type, size = bytes.len(), "object stored");
        Ok(key.to_string())
    }
}
