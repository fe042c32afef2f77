#![deny(clippy::all)]

#[macro_use]
extern crate anyhow;

#[macro_use]
extern crate fomat_macros;

mod cli;
mod logging;

use crate::logging::setup_logging;
use log::LevelFilter;
use sdc_usbkey::{misc::format_error, oscmds::Host};
use std::process::exit;
use yansi::Paint;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let matches = cli::app().get_matches();

    if !atty::is(atty::Stream::Stderr) {
        Paint::disable();
    }

    let filter =
        if cli::global_flag(&matches, "verbose") { LevelFilter::Debug } else { LevelFilter::Warn };
    let _ = setup_logging(filter);

    if let Err(why) = cli::run(&Host, &matches).await {
        eprintln!("sdc-usbkey: {}", format_error(&*why));
        exit(1);
    }
}
