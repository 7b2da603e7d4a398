//! Daemon configuration

use autoconnect_shared::{policy, Profile};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Per-profile settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileConfig {
    pub profile: Profile,
    /// Concurrent connections allowed on the profile
    pub max_connections: usize,
    /// Persistence key for the profile's device list
    pub store_key: String,
}

impl ProfileConfig {
    pub fn new(profile: Profile, store_key: impl Into<String>) -> Self {
        Self {
            profile,
            max_connections: profile.default_max_connections(),
            store_key: store_key.into(),
        }
    }
}

/// Configuration for the auto-connect service
#[derive(Debug, Clone)]
pub struct AutoConnectConfig {
    /// Profiles in the order they are tried on each trigger
    pub profiles: Vec<ProfileConfig>,
    /// Failed attempts on a device before moving on
    pub max_retries: u32,
    /// How long a connect call may take to report back
    pub connect_timeout: Duration,
    /// Capacity of the serialized event queue
    pub event_capacity: usize,
    /// Settings file. `None` keeps device lists in memory only.
    pub store_path: Option<PathBuf>,
}

impl Default for AutoConnectConfig {
    fn default() -> Self {
        Self {
            profiles: vec![
                ProfileConfig::new(Profile::HandsFree, "bluetooth_autoconnect_phone_devices"),
                ProfileConfig::new(Profile::AudioSink, "bluetooth_autoconnect_music_devices"),
                ProfileConfig::new(Profile::PhoneBook, "bluetooth_autoconnect_phonebook_devices"),
                ProfileConfig::new(Profile::Messaging, "bluetooth_autoconnect_messaging_devices"),
            ],
            max_retries: policy::MAX_CONNECT_RETRIES,
            connect_timeout: Duration::from_millis(policy::CONNECTION_TIMEOUT_MS),
            event_capacity: 100,
            store_path: Some(PathBuf::from("/var/lib/autoconnect/devices.json")),
        }
    }
}

impl AutoConnectConfig {
    /// Defaults overlaid with `AUTOCONNECT_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("AUTOCONNECT_STORE_PATH") {
            config.store_path = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        if let Some(value) = lookup("AUTOCONNECT_TIMEOUT_MS") {
            match value.parse::<u64>() {
                Ok(ms) if ms > 0 => config.connect_timeout = Duration::from_millis(ms),
                _ => warn!("Ignoring invalid AUTOCONNECT_TIMEOUT_MS={:?}", value),
            }
        }

        if let Some(value) = lookup("AUTOCONNECT_MAX_RETRIES") {
            match value.parse::<u32>() {
                Ok(retries) => config.max_retries = retries,
                Err(_) => warn!("Ignoring invalid AUTOCONNECT_MAX_RETRIES={:?}", value),
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_profile_table() {
        let config = AutoConnectConfig::default();
        let order: Vec<Profile> = config.profiles.iter().map(|p| p.profile).collect();
        assert_eq!(order, Profile::ALL.to_vec());
        let limits: Vec<usize> = config.profiles.iter().map(|p| p.max_connections).collect();
        assert_eq!(limits, vec![2, 1, 2, 1]);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.connect_timeout, Duration::from_millis(8000));
    }

    #[test]
    fn test_env_overrides() {
        let config = AutoConnectConfig::from_lookup(lookup_from(&[
            ("AUTOCONNECT_STORE_PATH", "/tmp/ac.conf"),
            ("AUTOCONNECT_TIMEOUT_MS", "2500"),
            ("AUTOCONNECT_MAX_RETRIES", "3"),
        ]));
        assert_eq!(config.store_path, Some(PathBuf::from("/tmp/ac.conf")));
        assert_eq!(config.connect_timeout, Duration::from_millis(2500));
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_invalid_env_values_ignored() {
        let config = AutoConnectConfig::from_lookup(lookup_from(&[
            ("AUTOCONNECT_STORE_PATH", ""),
            ("AUTOCONNECT_TIMEOUT_MS", "soon"),
            ("AUTOCONNECT_MAX_RETRIES", "-1"),
        ]));
        assert_eq!(config.store_path, None);
        assert_eq!(config.connect_timeout, Duration::from_millis(8000));
        assert_eq!(config.max_retries, 1);
    }
}
