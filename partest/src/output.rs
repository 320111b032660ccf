// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::{
    Args, ValueEnum,
    builder::styling::{AnsiColor, Effects, Styles},
};
use owo_colors::{OwoColorize, Style, style};
use std::{fmt, sync::Once};
use supports_color::Stream;
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
    level_filters::LevelFilter,
    warn,
};
use tracing_subscriber::{
    Layer,
    filter::{ParseError, Targets},
    fmt::{FmtContext, FormatEvent, FormatFields, format},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// The environment variable read for log filters, e.g. `partest_runner=trace`.
pub(crate) const LOG_ENV: &str = "PARTEST_LOG";

/// Events logged to this target are printed without a level prefix.
pub(crate) const NO_HEADING_TARGET: &str = "partest::no_heading";

/// Help and usage colors. Yellow headings and green literals, like the progress output.
pub(crate) const CLI_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Green.on_default())
    .error(AnsiColor::Red.on_default().effects(Effects::BOLD))
    .valid(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .invalid(AnsiColor::Red.on_default());

#[derive(Copy, Clone, Debug, Args)]
#[must_use]
pub(crate) struct OutputOpts {
    /// Log scheduling decisions and list skipped tests in the results
    #[arg(long, short, global = true, env = "PARTEST_VERBOSE")]
    pub(crate) verbose: bool,

    /// When to use colors: auto, always, never
    #[arg(
        long,
        value_enum,
        default_value_t,
        hide_possible_values = true,
        global = true,
        value_name = "WHEN",
        env = "PARTEST_COLOR"
    )]
    pub(crate) color: Color,
}

impl OutputOpts {
    /// Installs the stderr logger and returns the resolved output settings.
    pub(crate) fn init(self) -> OutputContext {
        install_logger(self.verbose, self.color.enabled_for(Stream::Stderr));
        OutputContext {
            verbose: self.verbose,
            color: self.color,
        }
    }
}

/// Output settings shared by the progress reporter and error display.
#[derive(Copy, Clone, Debug)]
#[must_use]
pub struct OutputContext {
    pub(crate) verbose: bool,
    pub(crate) color: Color,
}

impl OutputContext {
    /// Styles for errors printed to stderr.
    pub fn stderr_styles(&self) -> StderrStyles {
        if self.color.enabled_for(Stream::Stderr) {
            StderrStyles::colorized()
        } else {
            StderrStyles::default()
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Default)]
#[must_use]
pub(crate) enum Color {
    #[default]
    Auto,
    Always,
    Never,
}

impl Color {
    pub(crate) fn enabled_for(self, stream: Stream) -> bool {
        match self {
            Color::Auto => supports_color::on_cached(stream).is_some(),
            Color::Always => true,
            Color::Never => false,
        }
    }
}

static LOGGER: Once = Once::new();

fn install_logger(verbose: bool, colorize: bool) {
    LOGGER.call_once(|| {
        let default_level = if verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        let (targets, parse_error) = parse_targets(std::env::var(LOG_ENV).ok(), default_level);
        let styles = if colorize {
            LogStyles::colorized()
        } else {
            LogStyles::default()
        };

        let layer = tracing_subscriber::fmt::layer()
            .event_format(LogFormatter { styles })
            .with_writer(std::io::stderr)
            .with_filter(targets);
        tracing_subscriber::registry().with(layer).init();

        if let Some(error) = parse_error {
            warn!("ignoring invalid {LOG_ENV} value: {error}");
        }
    });
}

/// Parses the log filter, falling back to `default_level` if it is unset, empty or invalid.
fn parse_targets(
    value: Option<String>,
    default_level: LevelFilter,
) -> (Targets, Option<ParseError>) {
    let default = || Targets::new().with_default(default_level);
    match value.as_deref().map(str::trim) {
        None | Some("") => (default(), None),
        Some(value) => match value.parse::<Targets>() {
            Ok(targets) => (targets, None),
            Err(error) => (default(), Some(error)),
        },
    }
}

/// Formats events as `level: message key=value ...`.
///
/// Debug and trace events also name their target, so that worker and scheduler logs can be told
/// apart when `PARTEST_LOG` enables several crates at once.
struct LogFormatter {
    styles: LogStyles,
}

impl<S, N> FormatEvent<S, N> for LogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let mut fields = EventFields::default();
        event.record(&mut fields);

        if metadata.target() != NO_HEADING_TARGET {
            let level = *metadata.level();
            let (name, level_style) = self.styles.heading(level);
            write!(writer, "{}", name.style(level_style))?;
            if level >= Level::DEBUG {
                let target = format!("[{}]", metadata.target());
                write!(writer, " {}", target.style(self.styles.target))?;
            }
            write!(writer, ": ")?;
        }

        write!(writer, "{}", fields.message)?;
        for (name, value) in &fields.extra {
            write!(writer, " {}={value}", name.style(self.styles.target))?;
        }
        writeln!(writer)
    }
}

#[derive(Debug, Default)]
struct EventFields {
    message: String,
    extra: Vec<(&'static str, String)>,
}

impl Visit for EventFields {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            name => self.extra.push((name, format!("{value:?}"))),
        }
    }
}

#[derive(Debug, Default)]
struct LogStyles {
    error: Style,
    warning: Style,
    info: Style,
    debug: Style,
    trace: Style,
    target: Style,
}

impl LogStyles {
    fn colorized() -> Self {
        Self {
            error: style().red().bold(),
            warning: style().yellow().bold(),
            info: style().green().bold(),
            debug: style().blue().bold(),
            trace: style().dimmed(),
            target: style().dimmed(),
        }
    }

    fn heading(&self, level: Level) -> (&'static str, Style) {
        match level {
            Level::ERROR => ("error", self.error),
            Level::WARN => ("warning", self.warning),
            Level::INFO => ("info", self.info),
            Level::DEBUG => ("debug", self.debug),
            Level::TRACE => ("trace", self.trace),
        }
    }
}

/// Styles used for error messages.
#[derive(Debug, Default)]
pub struct StderrStyles {
    /// Paths and other values quoted in messages.
    pub(crate) emphasis: Style,
    /// Parenthetical notes after a message.
    pub(crate) note: Style,
}

impl StderrStyles {
    fn colorized() -> Self {
        Self {
            emphasis: style().bold(),
            note: style().yellow(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_filter_parsing() {
        let (targets, error) = parse_targets(None, LevelFilter::INFO);
        assert!(error.is_none());
        assert!(targets.would_enable("partest_runner", &Level::INFO));
        assert!(!targets.would_enable("partest_runner", &Level::DEBUG));

        let (targets, error) = parse_targets(Some("  ".to_owned()), LevelFilter::DEBUG);
        assert!(error.is_none());
        assert!(targets.would_enable("partest_runner", &Level::DEBUG));

        let (targets, error) =
            parse_targets(Some("partest_runner=trace".to_owned()), LevelFilter::INFO);
        assert!(error.is_none());
        assert!(targets.would_enable("partest_runner::worker", &Level::TRACE));

        let (targets, error) = parse_targets(Some("partest=loud".to_owned()), LevelFilter::INFO);
        assert!(error.is_some());
        assert!(targets.would_enable("partest", &Level::INFO));
    }

    #[test]
    fn headings_by_level() {
        let styles = LogStyles::default();
        assert_eq!(styles.heading(Level::WARN).0, "warning");
        assert_eq!(styles.heading(Level::TRACE).0, "trace");
    }
}
