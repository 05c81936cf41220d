// To filter aws sdk logs, see: https://docs.aws.amazon.com/sdk-for-rust/latest/dg/logging.html#logging-filtering

use clap_verbosity_flag::{LogLevel, Verbosity};
use tracing::{Level, level_filters::LevelFilter};
use tracing_log::AsTrace as _;
use tracing_subscriber::{
    EnvFilter,
    fmt::{
        SubscriberBuilder,
        format::{DefaultFields, Format, Full},
        time::ChronoLocal,
    },
    util::SubscriberInitExt,
};

/// Output format, picked per run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, for CloudWatch.
    Json,
    /// Multi-line human output for local servers.
    Pretty,
    /// Single-line output without colors, for operator tools.
    Plain,
}

pub fn init_tracing<L: LogLevel>(v: &Verbosity<L>, format: LogFormat) {
    match format {
        LogFormat::Json => init_subscriber(v, |b| b.json()),
        LogFormat::Pretty => init_subscriber(v, |b| b.pretty()),
        LogFormat::Plain => init_subscriber(v, |b| b.with_ansi(false)),
    }
}

type DefaultSubscriberBuilder =
    SubscriberBuilder<DefaultFields, Format<Full, ChronoLocal>, EnvFilter>;

fn init_subscriber<L, F, B>(v: &Verbosity<L>, f: F)
where
    L: LogLevel,
    F: FnOnce(DefaultSubscriberBuilder) -> B,
    B: SubscriberInitExt,
{
    // Don't set subscriber if user wants to silence output.
    match v.log_level_filter().as_trace() {
        LevelFilter::OFF => (),
        filter => {
            let env_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directives(filter).into());
            let builder = SubscriberBuilder::default()
                .with_timer(ChronoLocal::rfc_3339())
                .with_env_filter(env_filter);
            f(builder).init();
        }
    }
}

// Debug and trace output of dependencies (hyper, aws sdk) is noise, keep it to our own target.
fn default_directives(filter: LevelFilter) -> String {
    if filter >= Level::DEBUG {
        format!("info,hello_github={filter}")
    } else {
        filter.to_string()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn verbose_levels_only_apply_to_this_crate() {
        assert_eq!(default_directives(LevelFilter::DEBUG), "info,hello_github=debug");
        assert_eq!(default_directives(LevelFilter::TRACE), "info,hello_github=trace");
    }

    #[test]
    fn quiet_levels_apply_everywhere() {
        assert_eq!(default_directives(LevelFilter::INFO), "info");
        assert_eq!(default_directives(LevelFilter::WARN), "warn");
    }
}
