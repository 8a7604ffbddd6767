//! `csync mount|unmount|upload|download|stop|serve|auto|kill-all`: one daemon
//! request each.

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;

use csync_core::ServeProtocol;
use csync_daemon::DaemonRequest;

use super::send;

#[derive(Args, Debug)]
pub struct BookmarkArg {
    /// Bookmark name as it appears in the rclone config.
    pub bookmark: String,
}

#[derive(Args, Debug)]
pub struct KillAllArgs {
    /// Limit to one bookmark.
    pub bookmark: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum StopCommand {
    /// Stop a running upload.
    Upload(BookmarkArg),
    /// Stop a running download.
    Download(BookmarkArg),
}

#[derive(Subcommand, Debug)]
pub enum ServeCommand {
    /// Start serving a bookmark.
    Start(ServeArgs),
    /// Stop serving a bookmark.
    Stop(ServeArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// http | ftp | webdav | restic
    pub protocol: ServeProtocol,
    pub bookmark: String,
}

pub fn mount(args: BookmarkArg) -> Result<()> {
    let data = send(DaemonRequest::new("mount").for_bookmark(&args.bookmark))?;
    let mountpoint = data["mountpoint"].as_str().unwrap_or("?");
    println!("{} Mounting '{}' on {}", "✓".green(), args.bookmark, mountpoint);
    Ok(())
}

pub fn unmount(args: BookmarkArg) -> Result<()> {
    let data = send(DaemonRequest::new("unmount").for_bookmark(&args.bookmark))?;
    if data["unmounted"].as_bool().unwrap_or(false) {
        println!("{} Unmounting '{}'", "✓".green(), args.bookmark);
    } else {
        println!("'{}' is not mounted", args.bookmark);
    }
    Ok(())
}

pub fn upload(args: BookmarkArg) -> Result<()> {
    start_sync("upload", &args.bookmark)
}

pub fn download(args: BookmarkArg) -> Result<()> {
    start_sync("download", &args.bookmark)
}

fn start_sync(cmd: &str, bookmark: &str) -> Result<()> {
    send(DaemonRequest::new(cmd).for_bookmark(bookmark))?;
    println!(
        "{} {} of '{}' started; see `csync status` and `csync notifications`",
        "✓".green(),
        capitalize(cmd),
        bookmark
    );
    Ok(())
}

pub fn stop(command: StopCommand) -> Result<()> {
    let (cmd, args) = match command {
        StopCommand::Upload(args) => ("stop_upload", args),
        StopCommand::Download(args) => ("stop_download", args),
    };
    send(DaemonRequest::new(cmd).for_bookmark(&args.bookmark))?;
    println!("{} Stopping {}", "✓".green(), args.bookmark);
    Ok(())
}

pub fn serve(command: ServeCommand) -> Result<()> {
    match command {
        ServeCommand::Start(args) => {
            send(
                DaemonRequest::new("serve_start")
                    .for_bookmark(&args.bookmark)
                    .with_protocol(args.protocol.as_str()),
            )?;
            println!(
                "{} Starting {} server for '{}'; the address shows up in `csync status`",
                "✓".green(),
                args.protocol.label(),
                args.bookmark
            );
        }
        ServeCommand::Stop(args) => {
            let data = send(
                DaemonRequest::new("serve_stop")
                    .for_bookmark(&args.bookmark)
                    .with_protocol(args.protocol.as_str()),
            )?;
            if data["stopped"].as_bool().unwrap_or(false) {
                println!(
                    "{} Stopping {} server for '{}'",
                    "✓".green(),
                    args.protocol.label(),
                    args.bookmark
                );
            } else {
                println!(
                    "'{}' is not served over {}",
                    args.bookmark,
                    args.protocol.label()
                );
            }
        }
    }
    Ok(())
}

pub fn auto(args: BookmarkArg) -> Result<()> {
    let data = send(DaemonRequest::new("auto_toggle").for_bookmark(&args.bookmark))?;
    let state = if data["automatic_upload"].as_bool().unwrap_or(false) {
        "on".green()
    } else {
        "off".yellow()
    };
    println!("Automatic upload for '{}': {state}", args.bookmark);
    Ok(())
}

pub fn kill_all(args: KillAllArgs) -> Result<()> {
    let mut request = DaemonRequest::new("kill_all");
    if let Some(bookmark) = &args.bookmark {
        request = request.for_bookmark(bookmark);
    }
    let killed = send(request)?["killed"].as_u64().unwrap_or(0);
    println!("Sent SIGTERM to {killed} process(es)");
    Ok(())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
