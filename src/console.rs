//! Console display collaborator: prints forwarded events and the final counters.
//!
//! Standard output carries the authorization decisions, so the daemon writes
//! the console on standard error.

use std::{io::Write, str::FromStr, sync::Arc};

use anyhow::Result;
use chrono::DateTime;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use event_router::CategoryCounters;
use tokio::task::JoinHandle;
use vigil_core::{
    Bus, BusError, Category, ConfigError, SectionConfig, SecurityEvent, receive_from_broadcast,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Plaintext,
    Json,
}

impl FromStr for OutputFormat {
    type Err = ConfigError;
    fn from_str(format: &str) -> Result<Self, Self::Err> {
        match format.to_lowercase().as_str() {
            "plaintext" => Ok(OutputFormat::Plaintext),
            "json" => Ok(OutputFormat::Json),
            _ => Err(ConfigError::InvalidValue {
                field: String::from("output_format"),
                value: format.to_string(),
                err: String::from("Output format must be one of [plaintext, json]"),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub output_format: OutputFormat,
}

impl TryFrom<&SectionConfig> for ConsoleConfig {
    type Error = ConfigError;

    fn try_from(config: &SectionConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            enabled: config.with_default("enabled", true)?,
            output_format: config.with_default("output_format", OutputFormat::Plaintext)?,
        })
    }
}

/// Render a forwarded event.
pub fn render(event: &SecurityEvent, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Plaintext => {
            let time = i64::try_from(event.timestamp)
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .map(|time| time.format("%Y-%m-%dT%H:%M:%SZ").to_string())
                .unwrap_or_else(|| event.timestamp.to_string());
            format!("[{time}]\n{event}")
        }
        OutputFormat::Json => serde_json::to_string(event)?,
    })
}

/// Write every event forwarded on `bus` to `out` until the bus is stopped,
/// then give the writer back.
pub fn spawn_console_sink<W>(bus: &Bus, config: ConsoleConfig, mut out: W) -> JoinHandle<W>
where
    W: Write + Send + 'static,
{
    let mut rx = bus.get_receiver();
    tokio::spawn(async move {
        loop {
            let event: Arc<SecurityEvent> = match receive_from_broadcast(&mut rx, "console").await
            {
                Ok(event) => event,
                Err(BusError::Stopped) => break,
            };
            let written = render(&event, config.output_format)
                .and_then(|rendered| Ok(writeln!(out, "{rendered}")?));
            if let Err(err) = written {
                log::warn!("Printing event failed: {err}");
            }
        }
        out
    })
}

/// Table of the event counters.
pub fn counters_table(counters: &CategoryCounters) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("CATEGORY").add_attribute(Attribute::Bold),
        Cell::new("EVENTS").add_attribute(Attribute::Bold),
    ]);

    for (category, count) in counters.iter() {
        let color = match category {
            Category::All => Color::White,
            Category::Process => Color::Cyan,
            Category::File => Color::Green,
            Category::Network => Color::Yellow,
        };
        table.add_row(vec![
            Cell::new(category).fg(color).add_attribute(Attribute::Bold),
            Cell::new(count),
        ]);
    }

    table
}

#[cfg(test)]
mod tests {
    use vigil_core::EventKind;

    use super::*;

    #[test]
    fn output_format_config() {
        let mut section = SectionConfig::default();
        assert_eq!(
            ConsoleConfig::try_from(&section).unwrap().output_format,
            OutputFormat::Plaintext
        );
        section.insert("output_format".to_string(), "JSON".to_string());
        assert_eq!(
            ConsoleConfig::try_from(&section).unwrap().output_format,
            OutputFormat::Json
        );
        section.insert("output_format".to_string(), "xml".to_string());
        assert!(ConsoleConfig::try_from(&section).is_err());
    }

    #[test]
    fn render_formats() {
        let event = SecurityEvent::new(EventKind::FileDelete, 0, 3).with_path("/tmp/x");
        let plain = render(&event, OutputFormat::Plaintext).unwrap();
        assert!(plain.starts_with("[1970-01-01T00:00:00Z]\nEvent Type: FileDelete"));

        let json = render(&event, OutputFormat::Json).unwrap();
        let parsed: SecurityEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn counters_table_lists_categories() {
        let mut counters = CategoryCounters::default();
        counters.increment(Category::All);
        counters.increment(Category::Network);
        let rendered = counters_table(&counters).to_string();
        assert!(rendered.contains("Network"));
        assert!(rendered.contains("CATEGORY"));
    }

    #[tokio::test]
    async fn sink_writes_to_its_own_writer() {
        let bus = Bus::new();
        let sink = spawn_console_sink(
            &bus,
            ConsoleConfig {
                enabled: true,
                output_format: OutputFormat::Json,
            },
            Vec::new(),
        );

        bus.send(Arc::new(SecurityEvent::new(EventKind::FileDelete, 0, 3)));
        bus.send(Arc::new(SecurityEvent::new(EventKind::ProcessExit, 0, 4)));
        drop(bus);

        let out = String::from_utf8(sink.await.unwrap()).unwrap();
        let pids: Vec<i32> = out
            .lines()
            .map(|line| serde_json::from_str::<SecurityEvent>(line).unwrap().pid)
            .collect();
        assert_eq!(pids, vec![3, 4]);
    }
}
