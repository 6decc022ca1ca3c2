use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::WatchError;
use crate::mail::MailWatcher;
use crate::notification::AlertDispatcher;
use crate::opportunities::OpportunityWatcher;
use crate::types::Config;

/// Get the canonical config file path (~/.crmwatch/config.json)
pub fn config_path() -> Result<PathBuf, WatchError> {
    let home = dirs::home_dir()
        .ok_or_else(|| WatchError::Config("Could not find home directory".to_string()))?;
    Ok(home.join(".crmwatch").join("config.json"))
}

/// Load configuration from `path`, or from ~/.crmwatch/config.json.
///
/// A missing file means "all defaults"; an unreadable or malformed one is an
/// error. The result is validated before it is returned.
pub fn load_config(path: Option<&Path>) -> Result<Config, WatchError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_path()?,
    };

    let config = if path.exists() {
        let content = fs::read_to_string(&path).map_err(|e| WatchError::ConfigFile {
            path: path.clone(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| WatchError::ConfigFile {
            path: path.clone(),
            message: e.to_string(),
        })?
    } else {
        log::info!("No config at {}, using defaults", path.display());
        Config::default()
    };

    config.validate()?;
    Ok(config)
}

/// The running watchers, built from one `Config`.
pub struct AppState {
    pub config: Config,
    pub alerts: Option<Arc<AlertDispatcher>>,
    pub opportunities: Option<OpportunityWatcher>,
    pub mail: Option<MailWatcher>,
}

impl AppState {
    /// Build every enabled watcher. Desktop permission is requested once
    /// here when notifications are on.
    pub fn from_config(config: Config) -> Result<Self, WatchError> {
        let alerts = if config.notifications.desktop {
            let dispatcher = AlertDispatcher::system();
            if !dispatcher.request_permission() {
                log::warn!("Desktop notifications not permitted; alerts go to listeners only");
            }
            Some(Arc::new(dispatcher))
        } else {
            None
        };

        let opportunities = if config.opportunities.enabled {
            Some(OpportunityWatcher::from_config(&config.opportunities, alerts.clone())?)
        } else {
            None
        };

        let mail = if config.mail.enabled {
            Some(MailWatcher::from_config(&config.mail)?)
        } else {
            None
        };

        Ok(Self {
            config,
            alerts,
            opportunities,
            mail,
        })
    }

    pub fn start(&self) {
        if let Some(w) = &self.opportunities {
            w.start();
        }
        if let Some(w) = &self.mail {
            w.start();
        }
    }

    pub fn stop(&self) {
        if let Some(w) = &self.opportunities {
            w.stop();
        }
        if let Some(w) = &self.mail {
            w.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("config.json"))).unwrap();
        assert!(config.opportunities.enabled);
        assert_eq!(config.opportunities.poll_interval_secs, 10);
    }

    #[test]
    fn test_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"opportunities": {{"warningDays": 10, "criticalDays": 20}}}}"#).unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.opportunities.warning_days, 10);
        assert_eq!(config.opportunities.critical_days, 20);
    }

    #[test]
    fn test_malformed_file_is_config_file_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        match load_config(Some(file.path())) {
            Err(WatchError::ConfigFile { path, .. }) => assert_eq!(path, file.path()),
            other => panic!("expected ConfigFile error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"opportunities": {{"pollIntervalSecs": 0}}}}"#).unwrap();
        assert!(matches!(load_config(Some(file.path())), Err(WatchError::Config(_))));
    }

    #[tokio::test]
    async fn test_app_state_builds_enabled_watchers_only() {
        let mut config = Config::default();
        config.notifications.desktop = false;

        let state = AppState::from_config(config).unwrap();
        assert!(state.opportunities.is_some());
        assert!(state.mail.is_none());
        assert!(state.alerts.is_none());

        state.start();
        assert!(state.opportunities.as_ref().unwrap().status().active);
        state.stop();
        assert!(!state.opportunities.as_ref().unwrap().status().active);
    }
}
