use miette::{IntoDiagnostic, Result, WrapErr};
use owo_colors::OwoColorize;
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime, UtcOffset};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    fmt::{format, FmtContext, FormatEvent, FormatFields},
    registry::LookupSpan,
    FmtSubscriber,
};

const TIME_FORMAT: &[FormatItem<'static>] = format_description!("[hour]:[minute]:[second]");

/// Log level of the number of `-v` flags
pub fn level_of_verbosity(verbose: u8) -> Level {
    match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialize the logging system
pub fn init_logging(level: Level) -> Result<()> {
    // Unknown when other threads are already running, UTC is fine then
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    let subscriber = FmtSubscriber::builder()
        .event_format(MeetingLogger { offset })
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .into_diagnostic()
        .wrap_err("Setting default subscriber failed")
}

/// One line per event: time, level, then the thread, as actors run
/// on named threads
struct MeetingLogger {
    offset: UtcOffset,
}

impl<S, N> FormatEvent<S, N> for MeetingLogger
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();

        let now = OffsetDateTime::now_utc()
            .to_offset(self.offset)
            .time()
            .format(TIME_FORMAT)
            .map_err(|_| std::fmt::Error)?;
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("main");

        if writer.has_ansi_escapes() {
            let level = match *metadata.level() {
                Level::ERROR => metadata.level().red().to_string(),
                Level::WARN => metadata.level().yellow().to_string(),
                Level::DEBUG => metadata.level().blue().to_string(),
                Level::TRACE => metadata.level().purple().to_string(),
                _ => metadata.level().green().to_string(),
            };

            write!(writer, "{now} {level:>5} {} ", thread_name.cyan())?;
        } else {
            write!(writer, "{now} {:>5} {thread_name} ", metadata.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_the_level() {
        assert_eq!(level_of_verbosity(0), Level::INFO);
        assert_eq!(level_of_verbosity(1), Level::DEBUG);
        assert_eq!(level_of_verbosity(5), Level::TRACE);
    }
}
