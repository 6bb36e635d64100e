use std::fs::File;

use time::{
    format_description::{self, parse},
    OffsetDateTime,
};
use tracing::{subscriber::set_global_default, Level};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, FmtSubscriber};

/// Will panic on error
pub fn init_file_logger() {
    let file_name = get_log_file_name();
    let file = File::create(file_name).unwrap();
    let writer = BoxMakeWriter::new(file);
    let local_offset = time::UtcOffset::current_local_offset().unwrap();
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(
        local_offset,
        format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]").unwrap(),
    );

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::TRACE)
        .with_ansi(false)
        .with_timer(timer)
        .with_writer(writer)
        .finish();

    set_global_default(subscriber).expect("Could not set global default tracing subscriber. Consider disabling logs if you are already setting a subscriber.");
}

/// Console logger for the CLI; keeps quiet below `max_level`.
pub fn init_console_logger(max_level: Level) {
    let timer = time::UtcOffset::current_local_offset()
        .ok()
        .map(|local_offset| {
            tracing_subscriber::fmt::time::OffsetTime::new(
                local_offset,
                format_description::parse("[hour]:[minute]:[second]").unwrap(),
            )
        });

    let builder = FmtSubscriber::builder()
        .with_max_level(max_level)
        .with_ansi(true)
        .with_target(false);

    let result = match timer {
        Some(timer) => set_global_default(builder.with_timer(timer).finish()),
        None => set_global_default(builder.finish()),
    };
    let _ = result; // a subscriber set by the embedder wins
}

fn get_log_file_name() -> String {
    let format = parse("[year]-[month]-[day]_[hour]:[minute]:[second]_log.txt").unwrap();
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(&format).unwrap()
}
