//! Environment lookups behind a small trait so config assembly is testable.

use std::collections::HashMap;

pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;

    fn is_set(&self, key: &str) -> bool {
        self.var(key).is_some()
    }

    /// Numeric id such as `SUDO_UID`; unparsable values count as unset
    fn id(&self, key: &str) -> Option<u32> {
        let raw = self.var(key)?;
        match raw.trim().parse::<u32>() {
            Ok(id) => Some(id),
            Err(e) => {
                log::warn!("Ignoring {}={:?}: {}", key, raw, e);
                None
            }
        }
    }
}

/// The real process environment
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var_os(key).map(|v| v.to_string_lossy().into_owned())
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}
