//! Device registry (`devices.yaml`)
//!
//! The registry maps racks to field devices and carries the protocol
//! details the shims need. Readers get a lock-free `ArcSwap` snapshot;
//! reloads are an idempotent pull keyed on the file's mtime, triggered
//! from any access path and from `discover/approved|removed` events.
//! Approve/remove write the file, swap the snapshot, and only then notify
//! the bus — the bus handler re-pulls, it never writes back.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use anyhow::Context;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::types::DeviceEntry;

/// On-disk shape of `devices.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevicesFile {
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
    /// Register maps for the protocol shims, preserved verbatim
    #[serde(default)]
    pub maps: serde_json::Map<String, serde_json::Value>,
}

/// Hot-reloading registry handle. Cheap to clone.
#[derive(Clone)]
pub struct DeviceRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    path: PathBuf,
    snapshot: ArcSwap<DevicesFile>,
    /// mtime of the snapshot currently swapped in; also serializes writers
    last_mtime: Mutex<Option<SystemTime>>,
}

impl DeviceRegistry {
    /// Open the registry. A missing file is an empty registry, not an
    /// error — devices arrive via discovery approval.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (file, mtime) = load_file(&path);
        Self {
            inner: Arc::new(RegistryInner {
                path,
                snapshot: ArcSwap::from_pointee(file),
                last_mtime: Mutex::new(mtime),
            }),
        }
    }

    /// Current snapshot, reloading first if the file changed on disk.
    pub fn current(&self) -> Arc<DevicesFile> {
        self.pull();
        self.inner.snapshot.load_full()
    }

    /// Reload from disk when the mtime moved. Idempotent; safe to call
    /// from every access path.
    pub fn pull(&self) {
        let disk_mtime = mtime_of(&self.inner.path);
        let mut last = match self.inner.last_mtime.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if disk_mtime == *last {
            return;
        }
        let (file, mtime) = load_file(&self.inner.path);
        tracing::info!(
            path = %self.inner.path.display(),
            devices = file.devices.len(),
            "Device registry reloaded"
        );
        self.inner.snapshot.store(Arc::new(file));
        *last = mtime;
    }

    /// Resolve the registered device for a rack.
    pub fn device_for_rack(&self, rack: &str) -> Option<String> {
        self.current()
            .devices
            .iter()
            .find(|d| d.rack.as_deref() == Some(rack))
            .map(|d| d.id.clone())
    }

    /// Append or update an entry, deduplicating by `id` or by
    /// `(host, proto, port)`. Returns `"added"` or `"updated"`.
    pub fn append(&self, mut entry: DeviceEntry) -> anyhow::Result<&'static str> {
        entry.ensure_id();
        let mut last = match self.inner.last_mtime.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut file = (*self.inner.snapshot.load_full()).clone();

        let mut action = "added";
        if let Some(existing) = file
            .devices
            .iter_mut()
            .find(|d| d.id == entry.id || d.same_endpoint(&entry))
        {
            *existing = entry;
            action = "updated";
        } else {
            file.devices.push(entry);
        }

        // Collapse any duplicate ids left behind by an endpoint update,
        // keeping the newest entry per id.
        let mut seen = std::collections::HashSet::new();
        let mut deduped: Vec<DeviceEntry> = Vec::with_capacity(file.devices.len());
        for device in file.devices.into_iter().rev() {
            if seen.insert(device.id.clone()) {
                deduped.push(device);
            }
        }
        deduped.reverse();
        file.devices = deduped;

        self.write_locked(&file, &mut last)?;
        Ok(action)
    }

    /// Remove an entry by id. Returns false when the id is unknown.
    pub fn remove(&self, id: &str) -> anyhow::Result<bool> {
        let mut last = match self.inner.last_mtime.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut file = (*self.inner.snapshot.load_full()).clone();
        let before = file.devices.len();
        file.devices.retain(|d| d.id != id);
        if file.devices.len() == before {
            return Ok(false);
        }
        self.write_locked(&file, &mut last)?;
        Ok(true)
    }

    fn write_locked(
        &self,
        file: &DevicesFile,
        last: &mut Option<SystemTime>,
    ) -> anyhow::Result<()> {
        let path = &self.inner.path;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let yaml = serde_yaml::to_string(file).context("serializing device registry")?;
        std::fs::write(path, yaml).with_context(|| format!("writing {}", path.display()))?;
        self.inner.snapshot.store(Arc::new(file.clone()));
        *last = mtime_of(path);
        Ok(())
    }
}

fn mtime_of(path: &PathBuf) -> Option<SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}

fn load_file(path: &PathBuf) -> (DevicesFile, Option<SystemTime>) {
    let mtime = mtime_of(path);
    let file = match std::fs::read_to_string(path) {
        Ok(raw) => match serde_yaml::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Malformed device registry — keeping empty snapshot"
                );
                DevicesFile::default()
            }
        },
        Err(_) => DevicesFile::default(),
    };
    (file, mtime)
}
