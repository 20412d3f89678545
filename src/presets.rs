//! Named effect presets persisted in a local key-value store.

use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PresetError, StoreError};
use crate::params::EffectParameters;

/// Storage key holding the whole preset mapping
pub const PRESET_KEY: &str = "sonicplay_presets_v2";

/// Minimal string key-value storage
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// One JSON file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<platform data dir>/sonicplay`, if the platform has one
    pub fn default_location() -> Option<Self> {
        dirs::data_dir().map(|d| Self::new(d.join("sonicplay")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path(key)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        // Write then rename so a crash never leaves half a document
        let tmp = self.dir.join(format!("{}.json.tmp", key));
        fs::write(&tmp, value)?;
        fs::rename(&tmp, self.path(key))?;
        Ok(())
    }
}

/// Volatile store, used when no data directory is available
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with one entry
    pub fn with_entry(key: &str, value: &str) -> Self {
        let mut store = Self::new();
        store.entries.insert(key.to_string(), value.to_string());
        store
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// The presets shipped with the app
pub fn default_presets() -> BTreeMap<String, EffectParameters> {
    let club = EffectParameters {
        volume: 1.0,
        bass_db: 8.0,
        treble_db: 2.0,
        delay_time_ms: 120.0,
        delay_feedback: 0.35,
        reverb_wet: 0.2,
        playback_rate: 1.0,
        pan: 0.0,
        sweep_hz: 8000.0,
        distortion: false,
    };
    let vocal_boost = EffectParameters {
        bass_db: 2.0,
        treble_db: 6.0,
        delay_time_ms: 40.0,
        delay_feedback: 0.12,
        reverb_wet: 0.05,
        sweep_hz: 9000.0,
        ..club
    };
    let chillout = EffectParameters {
        volume: 0.9,
        bass_db: 4.0,
        treble_db: -2.0,
        delay_time_ms: 400.0,
        delay_feedback: 0.45,
        reverb_wet: 0.45,
        playback_rate: 0.95,
        sweep_hz: 6000.0,
        ..club
    };
    BTreeMap::from([
        ("Club".to_string(), club),
        ("Vocal Boost".to_string(), vocal_boost),
        ("Chillout".to_string(), chillout),
    ])
}

/// Named [`EffectParameters`], kept in memory and written through to a store.
///
/// The in-memory mapping is authoritative: a failed write is logged and the
/// session carries on with the updated presets.
pub struct PresetStore {
    store: Box<dyn KeyValueStore>,
    presets: BTreeMap<String, EffectParameters>,
}

impl PresetStore {
    /// Load presets, seeding the defaults when storage is empty or unreadable
    pub fn open(store: Box<dyn KeyValueStore>) -> Self {
        let loaded = match store.get(PRESET_KEY) {
            Ok(Some(text)) => match serde_json::from_str::<BTreeMap<String, EffectParameters>>(&text) {
                Ok(presets) => Some(presets),
                Err(e) => {
                    warn!("Preset storage corrupted ({}), restoring defaults", e);
                    None
                }
            },
            Ok(None) => {
                info!("No presets stored yet, seeding defaults");
                None
            }
            Err(e) => {
                warn!("Preset storage unreadable ({}), restoring defaults", e);
                None
            }
        };

        let mut this = Self {
            store,
            presets: BTreeMap::new(),
        };
        match loaded {
            Some(presets) => {
                this.presets = presets
                    .into_iter()
                    .map(|(name, params)| (name, params.clamped()))
                    .collect();
                debug!("Loaded {} preset(s)", this.presets.len());
            }
            None => {
                this.presets = default_presets();
                this.persist();
            }
        }
        this
    }

    /// Preset names in sorted order
    pub fn list(&self) -> Vec<&str> {
        self.presets.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    /// Save under `name`, replacing any preset with that name
    pub fn save(&mut self, name: &str, params: &EffectParameters) -> Result<(), PresetError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PresetError::NameRequired);
        }
        self.presets.insert(name.to_string(), params.clamped());
        info!("Saved preset '{}'", name);
        self.persist();
        Ok(())
    }

    pub fn load(&self, name: &str) -> Result<EffectParameters, PresetError> {
        self.presets
            .get(name.trim())
            .copied()
            .ok_or_else(|| PresetError::NotFound(name.to_string()))
    }

    pub fn delete(&mut self, name: &str) -> Result<(), PresetError> {
        if self.presets.remove(name.trim()).is_none() {
            return Err(PresetError::NotFound(name.to_string()));
        }
        info!("Deleted preset '{}'", name);
        self.persist();
        Ok(())
    }

    fn persist(&mut self) {
        let result = serde_json::to_string_pretty(&self.presets)
            .map_err(StoreError::from)
            .and_then(|json| self.store.set(PRESET_KEY, &json));
        if let Err(e) = result {
            warn!("Failed to write presets: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Store whose reads succeed and writes always fail
    struct ReadOnly(MemoryStore);

    impl KeyValueStore for ReadOnly {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.0.get(key)
        }
        fn set(&mut self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only").into())
        }
    }

    #[test]
    fn test_defaults_seeded_on_first_use() {
        let store = PresetStore::open(Box::new(MemoryStore::new()));
        assert_eq!(store.list(), vec!["Chillout", "Club", "Vocal Boost"]);
        let club = store.load("Club").unwrap();
        assert_eq!(club.bass_db, 8.0);
        assert_eq!(club.delay_time_ms, 120.0);
        assert_eq!(store.load("Chillout").unwrap().playback_rate, 0.95);
    }

    #[test]
    fn test_save_load_round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let params = EffectParameters {
            pan: -0.5,
            distortion: true,
            ..EffectParameters::default()
        };
        {
            let mut store = PresetStore::open(Box::new(FileStore::new(dir.path())));
            store.save("Mine", &params).unwrap();
        }
        let reopened = PresetStore::open(Box::new(FileStore::new(dir.path())));
        assert_eq!(reopened.load("Mine"), Ok(params));
        assert_eq!(reopened.len(), 4);
    }

    #[test]
    fn test_stored_keys_are_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let _ = PresetStore::open(Box::new(FileStore::new(dir.path())));
        let text = fs::read_to_string(dir.path().join(format!("{}.json", PRESET_KEY))).unwrap();
        assert!(text.contains("\"delayFeedback\""));
        assert!(text.contains("\"robot\""));
    }

    #[test]
    fn test_missing_names() {
        let mut store = PresetStore::open(Box::new(MemoryStore::new()));
        assert_eq!(
            store.load("Nope"),
            Err(PresetError::NotFound("Nope".to_string()))
        );
        assert!(store.delete("Nope").is_err());
        assert_eq!(store.len(), 3);
        assert_eq!(
            store.save("  ", &EffectParameters::default()),
            Err(PresetError::NameRequired)
        );

        store.delete("Club").unwrap();
        assert!(store.load("Club").is_err());
    }

    #[test]
    fn test_corrupted_storage_reseeds() {
        let store = PresetStore::open(Box::new(MemoryStore::with_entry(PRESET_KEY, "{not json")));
        assert_eq!(store.len(), 3);
        assert!(store.load("Vocal Boost").is_ok());
    }

    #[test]
    fn test_stored_values_are_clamped() {
        let json = r#"{"Wild": {"delayFeedback": 1.5, "sweep": 5.0}}"#;
        let store = PresetStore::open(Box::new(MemoryStore::with_entry(PRESET_KEY, json)));
        let wild = store.load("Wild").unwrap();
        assert_eq!(wild.delay_feedback, 0.95);
        assert_eq!(wild.sweep_hz, 60.0);
        assert_eq!(wild.volume, 1.0);
    }

    #[test]
    fn test_write_failure_keeps_memory_authoritative() {
        let mut store = PresetStore::open(Box::new(ReadOnly(MemoryStore::new())));
        store.save("Live", &EffectParameters::default()).unwrap();
        assert!(store.load("Live").is_ok());
    }
}
