use std::{
    collections::HashMap,
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use event_router::RouterConfig;
use parking_lot::Mutex;
use tokio::sync::watch;
use vigil_core::{SectionConfig, log_error};

pub const DEFAULT_CONFIG_FILE: &str = "/var/lib/vigil/vigil.ini";

/// Section holding the agent settings.
pub const AGENT_SECTION: &str = "agent";
/// Section holding the display preferences.
pub const ROUTER_SECTION: &str = "router";
/// Section holding the console output settings.
pub const CONSOLE_SECTION: &str = "console";
/// Section holding the privileged peer settings.
pub const PEER_SECTION: &str = "peer";

/// Vigil configuration manager, backed by an `INI` file.
///
/// Every section is published on a watch channel, so components holding a
/// receiver see updates as soon as they are made.
#[derive(Debug, Clone)]
pub struct VigilConfig {
    inner: Arc<Mutex<VigilConfigInternal>>,
}

#[derive(Debug)]
struct VigilConfigInternal {
    config_file: PathBuf,
    sections: HashMap<String, watch::Sender<SectionConfig>>,
}

impl VigilConfig {
    /// Construct a new [`VigilConfig`] using the default file, creating it if missing.
    pub fn new() -> Result<Self> {
        let config_file = PathBuf::from(DEFAULT_CONFIG_FILE);
        if !config_file.exists() {
            if let Some(prefix) = config_file.parent() {
                std::fs::create_dir_all(prefix)
                    .with_context(|| format!("Error creating {}", prefix.display()))?;
            }
            File::create(&config_file)
                .with_context(|| format!("Error creating {}", config_file.display()))?;
        }
        Self::from_config_file(config_file)
    }

    /// Construct a new [`VigilConfig`] using a custom file.
    pub fn with_custom_file(config_file: impl AsRef<Path>) -> Result<Self> {
        let config_file = config_file.as_ref().to_path_buf();
        if !config_file.exists() {
            bail!("Configuration file {} not found", config_file.display());
        }
        Self::from_config_file(config_file)
    }

    /// Use the custom file if given, the default one otherwise.
    pub fn load(custom_file: Option<&Path>) -> Result<Self> {
        match custom_file {
            Some(custom_file) => Self::with_custom_file(custom_file),
            None => Self::new(),
        }
    }

    fn from_config_file(config_file: PathBuf) -> Result<Self> {
        let mut sections: HashMap<String, SectionConfig> = HashMap::new();

        let conf = ini::Ini::load_from_file(&config_file)
            .with_context(|| format!("Error loading configuration from {config_file:?}"))?;

        for (section, prop) in &conf {
            if let Some(section) = section {
                let section_config = sections.entry(section.to_string()).or_default();
                for (key, value) in prop.iter() {
                    log::debug!("{}.{}={}", section, key, value);
                    section_config.insert(key.to_string(), value.to_string());
                }
            }
        }

        let sections = sections
            .into_iter()
            .map(|(name, cfg)| {
                let (tx, _) = watch::channel(cfg);
                (name, tx)
            })
            .collect();

        Ok(Self {
            inner: Arc::new(Mutex::new(VigilConfigInternal {
                config_file,
                sections,
            })),
        })
    }

    /// Get a [`watch::Receiver`] of a section.
    pub fn get_watched_section(&self, section: &str) -> watch::Receiver<SectionConfig> {
        self.inner
            .lock()
            .sections
            .entry(section.to_string())
            .or_insert_with(|| watch::channel(SectionConfig::default()).0)
            .subscribe()
    }

    /// Get the current content of a section, empty if missing.
    pub fn get_section(&self, section: &str) -> SectionConfig {
        self.inner
            .lock()
            .sections
            .get(section)
            .map(|tx| tx.borrow().clone())
            .unwrap_or_default()
    }

    /// Update a value, notify the watchers and save the file.
    pub fn update_config(&self, section: &str, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.lock();

        let sender = inner
            .sections
            .entry(section.to_string())
            .or_insert_with(|| watch::channel(SectionConfig::default()).0);

        let mut section_config = sender.borrow().clone();
        section_config.insert(key.to_string(), value.to_string());
        sender.send_replace(section_config);

        update_file_config(&inner.config_file, section, key, value)
    }
}

/// Open configuration ini file, update the given value and save it to disk
fn update_file_config(config_file: &Path, section: &str, key: &str, value: &str) -> Result<()> {
    let mut conf = ini::Ini::load_from_file(config_file)
        .with_context(|| format!("Error loading configuration from {config_file:?}"))?;

    conf.with_section(Some(section)).set(key, value);
    log::debug!("Changing configuration {}.{}={}", section, key, value);

    conf.write_to_file(config_file)
        .with_context(|| format!("Error writing to {config_file:?}"))?;

    Ok(())
}

/// Keep a [`RouterConfig`] in sync with the router section.
///
/// Fails if the current section is invalid. Later invalid updates are logged
/// and ignored: the router keeps the last valid preferences.
pub fn watch_router_config(
    mut section: watch::Receiver<SectionConfig>,
) -> Result<watch::Receiver<RouterConfig>> {
    let initial = RouterConfig::try_from(&*section.borrow_and_update())
        .context("Invalid router configuration")?;
    let (tx, rx) = watch::channel(initial);

    tokio::spawn(async move {
        while section.changed().await.is_ok() {
            let parsed = RouterConfig::try_from(&*section.borrow_and_update());
            match parsed {
                Ok(config) => {
                    if tx.send(config).is_err() {
                        break;
                    }
                }
                Err(err) => log_error("Ignoring router configuration update", err),
            }
        }
    });

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use vigil_core::Category;

    use super::*;

    fn temp_config(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("vigil-{}-{name}.ini", std::process::id()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn missing_custom_file() {
        assert!(VigilConfig::with_custom_file("/nonexistent/vigil.ini").is_err());
    }

    #[test]
    fn sections_are_loaded_and_saved() {
        let path = temp_config("sections", "[agent]\nauth_timeout_ms=500\n");
        let config = VigilConfig::with_custom_file(&path).unwrap();

        let agent = config.get_section(AGENT_SECTION);
        assert_eq!(agent.required::<u64>("auth_timeout_ms").unwrap(), 500);
        assert!(config.get_section(ROUTER_SECTION).get_raw("display_mode").is_none());

        let rx = config.get_watched_section(ROUTER_SECTION);
        config
            .update_config(ROUTER_SECTION, "display_mode", "file")
            .unwrap();
        assert_eq!(rx.borrow().get_raw("display_mode"), Some("file"));

        let reloaded = VigilConfig::with_custom_file(&path).unwrap();
        assert_eq!(
            reloaded.get_section(ROUTER_SECTION).get_raw("display_mode"),
            Some("file")
        );
        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn router_config_follows_updates() {
        let path = temp_config("router", "[router]\ndisplay_mode=process\n");
        let config = VigilConfig::with_custom_file(&path).unwrap();

        let mut router = watch_router_config(config.get_watched_section(ROUTER_SECTION)).unwrap();
        assert_eq!(router.borrow_and_update().display_mode, Category::Process);

        config
            .update_config(ROUTER_SECTION, "display_mode", "bogus")
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!router.has_changed().unwrap());

        config
            .update_config(ROUTER_SECTION, "display_mode", "file")
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), router.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(router.borrow().display_mode, Category::File);
        std::fs::remove_file(path).unwrap();
    }
}
