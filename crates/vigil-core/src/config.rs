use std::{collections::HashMap, fmt::Display, str::FromStr};

use thiserror::Error;

/// Key/value settings of one configuration file section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionConfig {
    inner: HashMap<String, String>,
}

#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("field {field} is required")]
    RequiredValue { field: String },
    #[error("{value} is not a valid value for field {field}: {err}")]
    InvalidValue {
        field: String,
        value: String,
        err: String,
    },
}

impl SectionConfig {
    /// Inserts a new configuration value.
    pub fn insert(&mut self, key: String, value: String) -> Option<String> {
        self.inner.insert(key, value)
    }

    /// Returns an option of raw configuration value.
    pub fn get_raw(&self, config_name: &str) -> Option<&str> {
        self.inner.get(config_name).map(String::as_str)
    }

    /// Returns a typed configuration value.
    pub fn required<T>(&self, config_name: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        match self.inner.get(config_name) {
            None => Err(ConfigError::RequiredValue {
                field: config_name.to_string(),
            }),
            Some(value) => parse(value, config_name),
        }
    }

    /// Returns an optional typed configuration value.
    pub fn optional<T>(&self, config_name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        self.inner
            .get(config_name)
            .map(|value| parse(value, config_name))
            .transpose()
    }

    /// Returns a typed configuration value, or `default` if the field is missing.
    pub fn with_default<T>(&self, config_name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        Ok(self.optional(config_name)?.unwrap_or(default))
    }

    /// Return a comma separed list of values. Return empty vector if field is missing.
    pub fn get_list<T>(&self, config_name: &str) -> Result<Vec<T>, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        self.inner
            .get(config_name)
            .iter()
            .flat_map(|config| config.split(','))
            .filter(|item| !item.trim().is_empty())
            .map(|item| parse(item.trim(), config_name))
            .collect()
    }
}

fn parse<T>(value: &str, config_name: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    <T as FromStr>::Err: Display,
{
    T::from_str(value).map_err(|err| ConfigError::InvalidValue {
        field: config_name.to_string(),
        value: value.to_string(),
        err: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(pairs: &[(&str, &str)]) -> SectionConfig {
        let mut config = SectionConfig::default();
        for (key, value) in pairs {
            config.insert(key.to_string(), value.to_string());
        }
        config
    }

    #[test]
    fn typed_values() {
        let config = section(&[("timeout", "250"), ("name", "x")]);
        assert_eq!(config.required::<u64>("timeout").unwrap(), 250);
        assert_eq!(config.with_default("missing", 7u32).unwrap(), 7);
        assert_eq!(config.optional::<u64>("missing").unwrap(), None);
        assert!(matches!(
            config.required::<u64>("name"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config.required::<u64>("missing"),
            Err(ConfigError::RequiredValue { .. })
        ));
    }

    #[test]
    fn lists_skip_blank_items() {
        let config = section(&[("paths", "/bin/a, /bin/b,, ")]);
        assert_eq!(
            config.get_list::<String>("paths").unwrap(),
            vec!["/bin/a".to_string(), "/bin/b".to_string()]
        );
        assert!(config.get_list::<String>("missing").unwrap().is_empty());
    }
}
