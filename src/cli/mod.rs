mod colors;

use self::colors::*;
use anyhow::Context;
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use sdc_usbkey::{
    media::{ensure_global_zone, Media, MediaError},
    options::MountOptions,
    oscmds::Platform,
    update::Action,
    usbkey::{EnsureMounted, MountStatus},
    CONTENTS_DIR, MOUNT_TIMEOUT, UNMOUNT_TIMEOUT,
};
use std::path::Path;

pub fn app() -> App<'static> {
    let json = || Arg::with_name("json").help("emit JSON to stdout").short('j').long("json");

    App::new("sdc-usbkey")
        .about("Manage the boot media of a Triton headnode")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("verbose")
                .help("emit debug output to stderr")
                .short('v')
                .long("verbose")
                .global(true),
        )
        .arg(
            Arg::with_name("usb")
                .help("operate on the USB key, even when booted from a ZFS pool")
                .short('u')
                .long("usb")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("mount")
                .about("mount the boot media, if it is not mounted already")
                .arg(
                    Arg::with_name("nofoldcase")
                        .help("mount without folding file names to lower case")
                        .long("nofoldcase"),
                ),
        )
        .subcommand(
            SubCommand::with_name("unmount").about("unmount the boot media, if it is mounted"),
        )
        .subcommand(
            SubCommand::with_name("status")
                .about("check if the boot media is mounted with the default settings")
                .arg(json())
                .arg(
                    Arg::with_name("more")
                        .help("print more detail than just \"mounted\" or \"unmounted\"")
                        .short('m')
                        .long("more"),
                ),
        )
        .subcommand(
            SubCommand::with_name("update")
                .about("update the boot media from the copy shipped in the platform image")
                .arg(json())
                .arg(
                    Arg::with_name("dryrun")
                        .help("report the changes without making them")
                        .short('n')
                        .long("dryrun"),
                )
                .arg(
                    Arg::with_name("ignore-missing")
                        .help("succeed without doing anything if there is no boot media")
                        .short('i')
                        .long("ignore-missing"),
                ),
        )
        .subcommand(
            SubCommand::with_name("get-variable")
                .about("get a boot loader variable")
                .arg(Arg::with_name("NAME").help("name of the variable").required(true)),
        )
        .subcommand(
            SubCommand::with_name("set-variable")
                .about("set a boot loader variable")
                .arg(Arg::with_name("NAME").help("name of the variable").required(true))
                .arg(Arg::with_name("VALUE").help("new value of the variable").required(true)),
        )
}

/// Whether a global flag was given, before or after the subcommand.
pub fn global_flag(matches: &ArgMatches, name: &str) -> bool {
    matches.is_present(name)
        || matches.subcommand().map_or(false, |(_, matches)| matches.is_present(name))
}

pub async fn run(platform: &dyn Platform, matches: &ArgMatches) -> anyhow::Result<()> {
    ensure_global_zone(platform).await?;

    let media = Media::detect(platform, global_flag(matches, "usb")).await;

    match matches.subcommand() {
        Some(("mount", matches)) => mount(platform, &media, matches).await,
        Some(("unmount", _)) => unmount(platform, &media).await,
        Some(("status", matches)) => status(platform, &media, matches).await,
        Some(("update", matches)) => update(platform, &media, matches).await,
        Some(("get-variable", matches)) => get_variable(platform, &media, matches).await,
        Some(("set-variable", matches)) => set_variable(platform, &media, matches).await,
        _ => unreachable!("clap argument parsing failed"),
    }
}

async fn mount(platform: &dyn Platform, media: &Media, matches: &ArgMatches) -> anyhow::Result<()> {
    let alt_mount_options = if matches.is_present("nofoldcase") {
        Some(MountOptions { foldcase: Some(false), ..MountOptions::default() })
    } else {
        None
    };

    let request =
        EnsureMounted { timeout: Some(MOUNT_TIMEOUT), ignore_missing: false, alt_mount_options };

    let mountpoint = media
        .mount(platform, &request)
        .await
        .context("failed to mount boot media")?
        .context("no boot media found")?;

    eprintln!("{}", color_primary("mounted"));
    println!("{}", mountpoint.display());
    Ok(())
}

async fn unmount(platform: &dyn Platform, media: &Media) -> anyhow::Result<()> {
    media
        .unmount(platform, Some(UNMOUNT_TIMEOUT))
        .await
        .context("failed to unmount boot media")?;

    eprintln!("{}", color_primary("unmounted"));
    Ok(())
}

async fn status(
    platform: &dyn Platform,
    media: &Media,
    matches: &ArgMatches,
) -> anyhow::Result<()> {
    let status = media.status(platform, None).await?;

    if matches.is_present("json") {
        println!("{}", serde_json::to_string(&status)?);
    } else {
        println!("{}", status_line(&status, matches.is_present("more")));
    }

    Ok(())
}

/// The mountpoint is only worth showing when something is mounted there.
fn status_line(status: &MountStatus, more: bool) -> String {
    if !more {
        return if status.ok { "mounted" } else { "unmounted" }.to_owned();
    }

    match status.mountpoint {
        Some(ref mountpoint) if status.steps.mounted() => {
            fomat!((status.message) " (" (mountpoint.display()) ")")
        }
        _ => status.message.clone(),
    }
}

async fn update(
    platform: &dyn Platform,
    media: &Media,
    matches: &ArgMatches,
) -> anyhow::Result<()> {
    let json = matches.is_present("json");
    let dryrun = matches.is_present("dryrun");
    let ignore_missing = matches.is_present("ignore-missing");

    if dryrun && !json {
        eprintln!("{}", color_info("dry run: the boot media will not be modified"));
    }

    match media.update(platform, Path::new(CONTENTS_DIR), dryrun, ignore_missing).await {
        Ok(Some(update)) => print_actions(update.actions(), json),
        Ok(None) => print_actions(&[], json),
        Err(MediaError::Update { actions, source }) => {
            print_actions(&actions, json)?;
            Err(anyhow::Error::new(source).context("update of boot media failed"))
        }
        Err(why) => Err(why.into()),
    }
}

fn print_actions(actions: &[Action], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(actions)?);
        return Ok(());
    }

    for action in actions {
        println!("{}", action);
    }

    if actions.is_empty() {
        eprintln!("{}", color_secondary("boot media is up to date"));
    }

    Ok(())
}

async fn get_variable(
    platform: &dyn Platform,
    media: &Media,
    matches: &ArgMatches,
) -> anyhow::Result<()> {
    let name = matches.value_of("NAME").context("missing NAME argument")?;

    match media.get_variable(platform, name).await? {
        Some(value) => println!("{}", value),
        None => return Err(anyhow!("variable \"{}\" is not set", name)),
    }

    Ok(())
}

async fn set_variable(
    platform: &dyn Platform,
    media: &Media,
    matches: &ArgMatches,
) -> anyhow::Result<()> {
    let name = matches.value_of("NAME").context("missing NAME argument")?;
    let value = matches.value_of("VALUE").context("missing VALUE argument")?;

    media
        .set_variable(platform, name, value)
        .await
        .with_context(|| fomat!("failed to set variable \"" (name) "\""))
}
