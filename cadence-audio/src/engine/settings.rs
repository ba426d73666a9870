//! Settings shared between the engine handle and its threads

use crate::config::EngineConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Versioned settings cell
///
/// Writers bump the version; pipeline threads compare it once per block and
/// take a snapshot only when it moved.
pub struct SettingsCell {
    config: Mutex<EngineConfig>,
    version: AtomicU64,
}

impl SettingsCell {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: Mutex::new(config),
            version: AtomicU64::new(1),
        }
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> EngineConfig {
        self.config.lock().clone()
    }

    /// Read one value without cloning the whole config
    pub fn read<T>(&self, f: impl FnOnce(&EngineConfig) -> T) -> T {
        f(&self.config.lock())
    }

    pub fn update(&self, f: impl FnOnce(&mut EngineConfig)) {
        f(&mut self.config.lock());
        self.version.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_bumps_version() {
        let cell = SettingsCell::new(EngineConfig::default());
        let before = cell.version();
        cell.update(|c| c.set_volume(0.5));
        assert!(cell.version() > before);
        assert_eq!(cell.read(|c| c.volume), 0.5);
    }
}
