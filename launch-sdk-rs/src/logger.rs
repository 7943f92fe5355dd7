use chrono::Local;
use colored::*;
use std::fmt::Write as _;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber with colored level labels.
///
/// `RUST_LOG` wins when set; otherwise `default_level` is used. Calling this
/// twice is harmless, the second call keeps the first subscriber.
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    colored::control::set_override(true);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .with_writer(std::io::stdout)
        .event_format(LaunchFormatter)
        .try_init();
}

struct LaunchFormatter;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for LaunchFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string();
        let metadata = event.metadata();

        let level_str = match *metadata.level() {
            tracing::Level::ERROR => "ERROR".red().bold().to_string(),
            tracing::Level::WARN => "WARN".yellow().bold().to_string(),
            tracing::Level::INFO => "INFO".green().bold().to_string(),
            tracing::Level::DEBUG => "DEBUG".blue().bold().to_string(),
            tracing::Level::TRACE => "TRACE".magenta().bold().to_string(),
        };

        write!(
            writer,
            "{} {} {} ",
            now.dimmed(),
            level_str,
            metadata.target().dimmed()
        )?;

        let mut line = FieldLine::default();
        event.record(&mut line);

        write!(writer, "{}{}", line.message, line.fields)?;
        writeln!(writer)
    }
}

/// Message first, remaining fields as ` key=value`.
#[derive(Default)]
struct FieldLine {
    message: String,
    fields: String,
}

impl FieldLine {
    fn push(&mut self, field: &tracing::field::Field, value: std::fmt::Arguments<'_>) {
        if field.name() == "message" {
            let _ = self.message.write_fmt(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }
}

impl tracing::field::Visit for FieldLine {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.push(field, format_args!("{:?}", value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.push(field, format_args!("{}", value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging("info");
        init_logging("debug");
        tracing::info!(session = "abc", "logger ready");
    }
}
