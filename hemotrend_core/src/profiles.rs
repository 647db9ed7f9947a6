//! Patient profile persistence with file locking.
//!
//! Profiles hold per-patient overrides such as the transfusion threshold.
//! They are saved atomically and loaded leniently: a missing or corrupt
//! file yields empty profiles.

use crate::config::validate_threshold;
use crate::{Error, PatientId, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Overrides for a single patient
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct PatientProfile {
    #[serde(default)]
    pub display_name: Option<String>,

    /// Hemoglobin threshold (g/dL) for this patient
    #[serde(default)]
    pub transfusion_threshold: Option<f64>,
}

/// All patient profiles, keyed by patient id
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct PatientProfiles {
    #[serde(default)]
    pub patients: BTreeMap<PatientId, PatientProfile>,
}

impl PatientProfiles {
    /// Effective transfusion threshold: the patient's override or the default
    pub fn transfusion_threshold(&self, patient_id: &PatientId, default: f64) -> f64 {
        self.patients
            .get(patient_id)
            .and_then(|p| p.transfusion_threshold)
            .unwrap_or(default)
    }

    /// Set a per-patient threshold after checking it is a plausible Hb value
    pub fn set_transfusion_threshold(&mut self, patient_id: &PatientId, threshold: f64) -> Result<()> {
        validate_threshold(threshold).map_err(|e| Error::State(e.to_string()))?;
        self.patients
            .entry(patient_id.clone())
            .or_default()
            .transfusion_threshold = Some(threshold);
        tracing::info!(
            "Set transfusion threshold for {} to {} g/dL",
            patient_id,
            threshold
        );
        Ok(())
    }

    /// Load profiles from a file with shared locking
    ///
    /// Returns empty profiles if the file doesn't exist or can't be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No profiles file found, using defaults");
            return Ok(Self::default());
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Unable to open profiles {:?}: {}. Using defaults.", path, e);
                return Ok(Self::default());
            }
        };

        if let Err(e) = file.lock_shared() {
            tracing::warn!("Unable to lock profiles {:?}: {}. Using defaults.", path, e);
            return Ok(Self::default());
        }

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(&file);
        if let Err(e) = reader.read_to_string(&mut contents) {
            let _ = file.unlock();
            tracing::warn!("Failed to read profiles {:?}: {}. Using defaults.", path, e);
            return Ok(Self::default());
        }

        file.unlock()?;

        match serde_json::from_str::<PatientProfiles>(&contents) {
            Ok(profiles) => {
                tracing::debug!("Loaded {} patient profiles from {:?}", profiles.patients.len(), path);
                Ok(profiles)
            }
            Err(e) => {
                tracing::warn!("Failed to parse profiles {:?}: {}. Using defaults.", path, e);
                Ok(Self::default())
            }
        }
    }

    /// Save profiles atomically (temp file, fsync, rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::State(format!("profiles path {:?} has no parent", path)))?;
        std::fs::create_dir_all(parent)?;

        let temp = NamedTempFile::new_in(parent)?;
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string_pretty(self)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;

        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved patient profiles to {:?}", path);
        Ok(())
    }

    /// Load profiles, modify them, and save them back
    pub fn update<F>(path: &Path, f: F) -> Result<Self>
    where
        F: FnOnce(&mut PatientProfiles) -> Result<()>,
    {
        let mut profiles = Self::load(path)?;
        f(&mut profiles)?;
        profiles.save(path)?;
        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("profiles.json");

        let mut profiles = PatientProfiles::default();
        profiles
            .set_transfusion_threshold(&"p1".into(), 8.0)
            .unwrap();
        profiles.patients.get_mut(&"p1".into()).unwrap().display_name = Some("Sarah".into());
        profiles.save(&path).unwrap();

        let loaded = PatientProfiles::load(&path).unwrap();
        assert_eq!(loaded, profiles);
    }

    #[test]
    fn test_threshold_falls_back_to_default() {
        let mut profiles = PatientProfiles::default();
        profiles
            .set_transfusion_threshold(&"p1".into(), 8.0)
            .unwrap();

        assert_eq!(profiles.transfusion_threshold(&"p1".into(), 7.5), 8.0);
        assert_eq!(profiles.transfusion_threshold(&"p2".into(), 7.5), 7.5);
    }

    #[test]
    fn test_implausible_threshold_rejected() {
        let mut profiles = PatientProfiles::default();
        let result = profiles.set_transfusion_threshold(&"p1".into(), 40.0);
        assert!(matches!(result, Err(Error::State(_))));
        assert!(profiles.patients.is_empty());
    }

    #[test]
    fn test_corrupted_profiles_return_default() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("profiles.json");
        std::fs::write(&path, "{ invalid json }").unwrap();

        let profiles = PatientProfiles::load(&path).unwrap();
        assert!(profiles.patients.is_empty());
    }

    #[test]
    fn test_update_pattern() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("profiles.json");

        PatientProfiles::update(&path, |p| p.set_transfusion_threshold(&"p9".into(), 7.0))
            .unwrap();

        let loaded = PatientProfiles::load(&path).unwrap();
        assert_eq!(loaded.transfusion_threshold(&"p9".into(), 7.5), 7.0);
    }

    #[test]
    fn test_atomic_save_leaves_no_temp_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("profiles.json");

        PatientProfiles::default().save(&path).unwrap();

        let extras: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "profiles.json")
            .collect();
        assert!(extras.is_empty(), "unexpected files: {:?}", extras);
    }
}
