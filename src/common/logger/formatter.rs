use core::fmt as core_fmt;

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    fmt::{
        FmtContext,
        format::{FormatEvent, FormatFields, Writer},
    },
    registry::LookupSpan,
};

/// Escape sequences for one output; all empty when colour is off.
struct Palette {
    reset: &'static str,
    bold: &'static str,
    dim: &'static str,
}

impl Palette {
    const ANSI: Self = Self {
        reset: "\x1b[0m",
        bold: "\x1b[1m",
        dim: "\x1b[2m",
    };

    const PLAIN: Self = Self {
        reset: "",
        bold: "",
        dim: "",
    };
}

/// `[timestamp] LEVEL thread target:line > message`
///
/// Targets inside this crate are shortened to their module path, so
/// `rustamix::voice::session` prints as `voice::session`.
pub struct CustomFormatter {
    use_ansi: bool,
}

impl CustomFormatter {
    pub fn new(use_ansi: bool) -> Self {
        Self { use_ansi }
    }

    fn palette(&self) -> &'static Palette {
        if self.use_ansi {
            &Palette::ANSI
        } else {
            &Palette::PLAIN
        }
    }

    fn level_color(level: &Level) -> &'static str {
        match *level {
            Level::ERROR => "\x1b[31m",
            Level::WARN => "\x1b[33m",
            Level::INFO => "\x1b[32m",
            Level::DEBUG => "\x1b[34m",
            Level::TRACE => "\x1b[35m",
        }
    }

    fn write_timestamp(writer: &mut Writer<'_>, p: &Palette) -> core_fmt::Result {
        let format = time::macros::format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
        );
        let now =
            time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
        match now.format(&format) {
            Ok(ts) => write!(writer, "{}[{}]{} ", p.dim, ts, p.reset),
            Err(_) => write!(writer, "{}[--]{} ", p.dim, p.reset),
        }
    }

    fn write_level(&self, writer: &mut Writer<'_>, level: &Level) -> core_fmt::Result {
        let p = self.palette();
        let color = if self.use_ansi {
            Self::level_color(level)
        } else {
            ""
        };
        write!(writer, "{}{}{:<5}{} ", color, p.bold, level.as_str(), p.reset)
    }

    /// Named threads (tokio workers) print their name, others their id.
    fn write_thread(writer: &mut Writer<'_>) -> core_fmt::Result {
        let thread = std::thread::current();
        match thread.name() {
            Some(name) => write!(writer, "{} ", name),
            None => write!(writer, "{:?} ", thread.id()),
        }
    }
}

fn short_target(target: &str) -> &str {
    target
        .strip_prefix(concat!(env!("CARGO_CRATE_NAME"), "::"))
        .unwrap_or(target)
}

impl<S, N> FormatEvent<S, N> for CustomFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> core_fmt::Result {
        let p = self.palette();
        let metadata = event.metadata();

        Self::write_timestamp(&mut writer, p)?;
        self.write_level(&mut writer, metadata.level())?;
        Self::write_thread(&mut writer)?;

        write!(writer, "{}{}", p.dim, short_target(metadata.target()))?;
        match metadata.line() {
            Some(line) => write!(writer, ":{}", line)?,
            None => write!(writer, ":??")?,
        }
        write!(writer, "{} > ", p.reset)?;

        ctx.format_fields(writer.by_ref(), event)?;
        write!(writer, "{}", p.reset)?;
        writeln!(writer)
    }
}
