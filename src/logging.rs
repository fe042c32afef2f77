use fern::{Dispatch, InitError};
use log::{Level, LevelFilter, Record};
use std::io;
use yansi::{Color, Paint};

pub fn setup_logging(filter: LevelFilter) -> Result<(), InitError> {
    let location = |record: &Record| match (record.file(), record.line()) {
        (Some(file), Some(line)) => fomat!(
            (Paint::blue(strip_src(file)).bold())
            (Paint::new(":").bold())
            (Paint::magenta(line).bold())
        ),
        _ => String::new(),
    };

    Dispatch::new()
        // Exclude logs for crates that we use
        .level(LevelFilter::Off)
        // Include only the logs for this crate
        .level_for("sdc_usbkey", filter)
        .format(move |out, message, record| {
            let color = match record.level() {
                Level::Trace => Color::Cyan.style().bold(),
                Level::Debug => Color::Blue.style().bold(),
                Level::Error => Color::Red.style().bold(),
                Level::Warn => Color::Yellow.style().bold(),
                Level::Info => Color::Green.style().bold(),
            };

            out.finish(format_args!(
                "[{}] {}: {}",
                color.paint(record.level()),
                location(record),
                message
            ))
        })
        .chain(io::stderr())
        .apply()?;
    Ok(())
}

fn strip_src(input: &str) -> &str { input.split("src/").nth(1).unwrap_or(input) }
