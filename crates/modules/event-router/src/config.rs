use std::collections::HashSet;

use vigil_core::{Category, ConfigError, EventKind, SectionConfig, SecurityEvent};

/// Exclusions applied to network and DNS events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MuteRules {
    pub paths: HashSet<String>,
    /// Lower-cased remote addresses.
    pub ips: HashSet<String>,
}

impl MuteRules {
    /// Returns true if the event must be dropped without being counted.
    ///
    /// A network access without a readable remote address is dropped as well.
    pub fn suppresses(&self, event: &SecurityEvent) -> bool {
        if self.paths.contains(&event.path) {
            return true;
        }
        if event.kind != EventKind::NetworkAccess {
            return false;
        }
        match event.remote_address() {
            Some(address) => self.ips.contains(&address),
            None => {
                log::trace!("network event of process {} has no remote address", event.pid);
                true
            }
        }
    }
}

/// Display preferences, read on every routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    pub display_mode: Category,
    pub search_text: String,
    pub mute: MuteRules,
}

impl RouterConfig {
    /// Returns true if the free-text filter lets the event through.
    pub fn matches_search(&self, event: &SecurityEvent) -> bool {
        self.search_text.is_empty() || event.to_string().contains(&self.search_text)
    }

    /// Returns true if an event of `category` passing the mute rules is shown.
    pub fn shows(&self, category: Category, event: &SecurityEvent) -> bool {
        self.display_mode.shows(category) && self.matches_search(event)
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            display_mode: Category::All,
            search_text: String::new(),
            mute: MuteRules::default(),
        }
    }
}

impl TryFrom<&SectionConfig> for RouterConfig {
    type Error = ConfigError;

    fn try_from(config: &SectionConfig) -> Result<Self, Self::Error> {
        let ips: Vec<String> = config.get_list("mute_ips")?;
        Ok(Self {
            display_mode: config.with_default("display_mode", Category::All)?,
            search_text: config.with_default("search_text", String::new())?,
            mute: MuteRules {
                paths: config.get_list("mute_paths")?.into_iter().collect(),
                ips: ips.iter().map(|ip| ip.to_lowercase()).collect(),
            },
        })
    }
}
