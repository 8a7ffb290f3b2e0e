use std::{num::NonZeroU8, panic};

use time::format_description::well_known::{iso8601, Iso8601};
use tracing::{error, Level};
use tracing_subscriber::{
    fmt::{time::LocalTime, writer::MakeWriterExt},
    prelude::__tracing_subscriber_SubscriberExt,
    EnvFilter, Layer,
};

const MY_CONFIG: iso8601::EncodedConfig = iso8601::Config::DEFAULT
    .set_time_precision(iso8601::TimePrecision::Second {
        decimal_digits: NonZeroU8::new(3),
    })
    .encode();

fn default_directives() -> &'static str {
    if cfg!(debug_assertions) {
        "duocall=trace,duocall_lib=trace"
    } else {
        "duocall=info,duocall_lib=info"
    }
}

/// `RUST_LOG` overrides the default directives for both the console and the
/// log file. The file only receives warnings and errors.
pub fn init_tracing(dir: &str, file_name: &str) -> anyhow::Result<()> {
    let make_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives()))
    };
    let default_layer = || {
        const WITH_FILE_PATH: bool = cfg!(debug_assertions);
        tracing_subscriber::fmt::layer()
            .compact()
            .with_file(WITH_FILE_PATH)
            .with_line_number(WITH_FILE_PATH)
            .with_target(!WITH_FILE_PATH)
            .with_thread_ids(true)
            .with_timer(LocalTime::new(Iso8601::<MY_CONFIG>))
    };
    let file_writer = tracing_appender::rolling::never(dir, file_name).with_max_level(Level::WARN);

    tracing::subscriber::set_global_default(
        tracing_subscriber::registry().with(
            default_layer()
                .with_ansi(false)
                .with_writer(file_writer)
                .with_filter(make_filter())
                .and_then(default_layer().with_filter(make_filter())),
        ),
    )?;

    panic::set_hook(Box::new(|panic| error!("{}", panic)));
    Ok(())
}
