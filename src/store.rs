use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::prelude::*;

/// Key/value persistence for values that must survive a restart.
pub trait Store: Send {
    fn load(&self, key: &str) -> Option<f64>;
    fn save(&mut self, key: &str, value: f64) -> Result<()>;
    /// Make everything saved so far durable.
    fn commit(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, f64>,
    commits: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: &[(&str, f64)]) -> Self {
        Self {
            values: values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            commits: 0,
        }
    }

    pub fn commits(&self) -> usize {
        self.commits
    }
}

impl Store for MemoryStore {
    fn load(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    fn save(&mut self, key: &str, value: f64) -> Result<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.commits += 1;
        Ok(())
    }
}

/// All values in one small JSON object, rewritten on every commit.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    values: BTreeMap<String, f64>,
}

impl JsonFileStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|err| anyhow!("error reading {}: {}", path.display(), err))?;
            serde_json::from_str(&content)
                .map_err(|err| anyhow!("error parsing {}: {}", path.display(), err))?
        } else {
            info!("{} does not exist yet, starting empty", path.display());
            BTreeMap::new()
        };

        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Store for JsonFileStore {
    fn load(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    fn save(&mut self, key: &str, value: f64) -> Result<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // written to a sibling file first, then renamed over the target
        let tmp = self.path.with_extension("tmp");
        let json = serde_json::to_string_pretty(&self.values)?;
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.flush()?;
        }
        std::fs::rename(&tmp, &self.path)?;

        debug!("wrote {} values to {}", self.values.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_empty() -> Result<()> {
        let dir = TempDir::new()?;
        let store = JsonFileStore::open(dir.path().join("energy.json"))?;
        assert_eq!(store.load("energy_solar_total"), None);
        Ok(())
    }

    #[test]
    fn values_survive_reopen() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nested").join("energy.json");

        let mut store = JsonFileStore::open(&path)?;
        store.save("energy_solar_total", 12.5)?;
        store.save("energy_inverter_total", 3.25)?;
        store.commit()?;

        let store = JsonFileStore::open(&path)?;
        assert_eq!(store.load("energy_solar_total"), Some(12.5));
        assert_eq!(store.load("energy_inverter_total"), Some(3.25));
        Ok(())
    }

    #[test]
    fn uncommitted_values_are_not_written() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("energy.json");

        let mut store = JsonFileStore::open(&path)?;
        store.save("energy_solar_total", 1.0)?;
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn corrupt_file_is_an_error() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("energy.json");
        std::fs::write(&path, "not json")?;
        assert!(JsonFileStore::open(&path).is_err());
        Ok(())
    }
}
