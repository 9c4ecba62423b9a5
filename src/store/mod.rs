//! Service id to container id bookkeeping.
//!
//! A container id of [`REMOVED_CONTAINER_ID`] marks a container that was
//! deliberately removed; an empty id means it was never created. Readers
//! should go through [`ContainerState`] so the two are never confused.

use std::collections::BTreeMap;
use std::io;
use std::sync::{Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Sentinel container id recorded after a container is removed.
pub const REMOVED_CONTAINER_ID: &str = "-";

/// Errors raised by service stores.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StoreError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the store file cannot be decoded or encoded.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Store file.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when updating a service that was never inserted.
    #[error("service {service_id} is not registered")]
    UnknownService {
        /// Service id that was looked up.
        service_id: String,
    },
}

/// What the store knows about a service's container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ContainerState {
    /// No container was ever recorded.
    NeverCreated,
    /// The container was removed on purpose.
    Removed,
    /// A live container id.
    Created(String),
}

impl ContainerState {
    /// Interprets a raw stored container id.
    #[must_use]
    pub fn from_raw(container_id: &str) -> Self {
        match container_id.trim() {
            "" => Self::NeverCreated,
            REMOVED_CONTAINER_ID => Self::Removed,
            id => Self::Created(id.to_owned()),
        }
    }

    /// Live container id, if any.
    #[must_use]
    pub fn container_id(&self) -> Option<&str> {
        match self {
            Self::Created(id) => Some(id),
            Self::NeverCreated | Self::Removed => None,
        }
    }
}

/// One stored service row.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ServiceRecord {
    /// Cluster the service belongs to.
    pub cluster_id: String,
    /// Service id.
    pub service_id: String,
    /// Raw container id; see [`ContainerState`].
    pub container_id: String,
}

/// Key-value store of service to container mappings.
///
/// Implementations serialise their own writes so updates are atomic per
/// service id.
pub trait ServiceStore: Send + Sync {
    /// Returns the raw container id, or an empty string for unknown services.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backing storage cannot be read.
    fn get_container_id(&self, service_id: &str) -> Result<String, StoreError>;

    /// Updates the container id of a registered service.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownService`] when the service was never
    /// inserted, or a storage error.
    fn set_container_id(&self, service_id: &str, container_id: &str) -> Result<(), StoreError>;

    /// Inserts or replaces a service row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backing storage cannot be written.
    fn insert_service(
        &self,
        cluster_id: &str,
        service_id: &str,
        container_id: &str,
    ) -> Result<(), StoreError>;

    /// Deletes a service row; deleting an unknown service is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backing storage cannot be written.
    fn delete_service(&self, service_id: &str) -> Result<(), StoreError>;

    /// Lists the services of `cluster_id` ordered by service id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backing storage cannot be read.
    fn services(&self, cluster_id: &str) -> Result<Vec<ServiceRecord>, StoreError>;

    /// Interprets the stored container id of `service_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backing storage cannot be read.
    fn container_state(&self, service_id: &str) -> Result<ContainerState, StoreError> {
        self.get_container_id(service_id)
            .map(|raw| ContainerState::from_raw(&raw))
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
struct StoreData {
    #[serde(default)]
    services: BTreeMap<String, ServiceRecord>,
}

impl StoreData {
    fn get(&self, service_id: &str) -> String {
        self.services
            .get(service_id)
            .map(|record| record.container_id.clone())
            .unwrap_or_default()
    }

    fn set(&mut self, service_id: &str, container_id: &str) -> Result<(), StoreError> {
        let record =
            self.services
                .get_mut(service_id)
                .ok_or_else(|| StoreError::UnknownService {
                    service_id: service_id.to_owned(),
                })?;
        container_id.clone_into(&mut record.container_id);
        Ok(())
    }

    fn insert(&mut self, cluster_id: &str, service_id: &str, container_id: &str) {
        self.services.insert(
            service_id.to_owned(),
            ServiceRecord {
                cluster_id: cluster_id.to_owned(),
                service_id: service_id.to_owned(),
                container_id: container_id.to_owned(),
            },
        );
    }

    fn list(&self, cluster_id: &str) -> Vec<ServiceRecord> {
        self.services
            .values()
            .filter(|record| record.cluster_id == cluster_id)
            .cloned()
            .collect()
    }
}

/// In-process store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryServiceStore {
    data: Mutex<StoreData>,
}

impl MemoryServiceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServiceStore for MemoryServiceStore {
    fn get_container_id(&self, service_id: &str) -> Result<String, StoreError> {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(data.get(service_id))
    }

    fn set_container_id(&self, service_id: &str, container_id: &str) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        data.set(service_id, container_id)
    }

    fn insert_service(
        &self,
        cluster_id: &str,
        service_id: &str,
        container_id: &str,
    ) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        data.insert(cluster_id, service_id, container_id);
        Ok(())
    }

    fn delete_service(&self, service_id: &str) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        data.services.remove(service_id);
        Ok(())
    }

    fn services(&self, cluster_id: &str) -> Result<Vec<ServiceRecord>, StoreError> {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(data.list(cluster_id))
    }
}

/// JSON file store; every operation reads and rewrites the file under a lock.
#[derive(Debug)]
pub struct FileServiceStore {
    path: Utf8PathBuf,
    lock: Mutex<()>,
}

impl FileServiceStore {
    /// Opens a store backed by `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn read(&self) -> Result<StoreData, StoreError> {
        let (parent, file_name) = split_path(&self.path);
        let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(StoreData::default()),
            Err(err) => return Err(io_error(parent, &err)),
        };
        let contents = match dir.read_to_string(file_name) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(StoreData::default()),
            Err(err) => return Err(io_error(&self.path, &err)),
        };
        if contents.trim().is_empty() {
            return Ok(StoreData::default());
        }
        serde_json::from_str(&contents).map_err(|err| StoreError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        })
    }

    fn write(&self, data: &StoreData) -> Result<(), StoreError> {
        let (parent, file_name) = split_path(&self.path);
        Dir::create_ambient_dir_all(parent, ambient_authority())
            .map_err(|err| io_error(parent, &err))?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err| io_error(parent, &err))?;
        let rendered = serde_json::to_string_pretty(data).map_err(|err| StoreError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        dir.write(file_name, rendered)
            .map_err(|err| io_error(&self.path, &err))?;
        debug!(path = %self.path, services = data.services.len(), "wrote service store");
        Ok(())
    }

    fn update<T>(
        &self,
        change: impl FnOnce(&mut StoreData) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut data = self.read()?;
        let outcome = change(&mut data)?;
        self.write(&data)?;
        Ok(outcome)
    }
}

impl ServiceStore for FileServiceStore {
    fn get_container_id(&self, service_id: &str) -> Result<String, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read()?.get(service_id))
    }

    fn set_container_id(&self, service_id: &str, container_id: &str) -> Result<(), StoreError> {
        self.update(|data| data.set(service_id, container_id))
    }

    fn insert_service(
        &self,
        cluster_id: &str,
        service_id: &str,
        container_id: &str,
    ) -> Result<(), StoreError> {
        self.update(|data| {
            data.insert(cluster_id, service_id, container_id);
            Ok(())
        })
    }

    fn delete_service(&self, service_id: &str) -> Result<(), StoreError> {
        self.update(|data| {
            data.services.remove(service_id);
            Ok(())
        })
    }

    fn services(&self, cluster_id: &str) -> Result<Vec<ServiceRecord>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read()?.list(cluster_id))
    }
}

fn split_path(path: &Utf8Path) -> (&Utf8Path, &str) {
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().unwrap_or_else(|| path.as_str());
    (parent, file_name)
}

fn io_error(path: &Utf8Path, err: &io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
