use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use crate::calendar::Appointment;
use crate::error::{CalsyncError, Result};
use crate::message::EventRecord;

/// Durable state for one node: the replicated log and the appointment map,
/// each a JSON file under `data_dir/node{ id}/`. The occupancy grid is
/// re-derived on load, never stored.
///
/// Writes go through a temp file and rename, so a crash mid-save leaves the
/// previous snapshot intact. Missing files read as empty (first run);
/// unreadable files surface an error for the caller to treat as fatal.
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub fn open(data_dir: &Path, node_id: u64) -> Result<Self> {
        let dir = data_dir.join(format!("node{}", node_id));
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join("log.json")
    }

    fn appointments_path(&self) -> PathBuf {
        self.dir.join("appointments.json")
    }

    pub fn load_log(&self) -> Result<Vec<Option<EventRecord>>> {
        load_or_default(self.log_path())
    }

    pub fn load_appointments(&self) -> Result<HashMap<String, Appointment>> {
        load_or_default(self.appointments_path())
    }

    pub fn save(
        &self,
        log: &[Option<EventRecord>],
        appointments: &HashMap<String, Appointment>,
    ) -> Result<()> {
        write_atomic(&self.log_path(), &serde_json::to_vec_pretty(&log)?)?;
        write_atomic(
            &self.appointments_path(),
            &serde_json::to_vec_pretty(appointments)?,
        )?;
        Ok(())
    }
}

fn load_or_default<T: DeserializeOwned + Default>(path: PathBuf) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let contents = fs::read_to_string(&path)?;
    serde_json::from_str(&contents).map_err(|source| CalsyncError::CorruptState { path, source })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}
