//! csync — supervise rclone mounts, servers and bidirectional syncs.
//!
//! # Usage
//!
//! ```text
//! csync daemon start [--detach] | stop | status | logs
//! csync bookmark list | show <b> | add <b> --type <t> | update <b> | delete <b>
//! csync mount <b>            csync unmount <b>
//! csync upload <b>           csync download <b>
//! csync stop upload|download <b>
//! csync serve start|stop <protocol> <b>
//! csync auto <b>
//! csync kill-all [<b>]
//! csync status [--json]
//! csync notifications [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    bookmark::BookmarkCommand,
    control::{BookmarkArg, KillAllArgs, ServeCommand, StopCommand},
    daemon::DaemonCommand,
    notifications::NotificationsArgs,
    status::StatusArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "csync",
    version,
    about = "Mount, serve and sync rclone remotes through a supervising daemon",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run and control the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Manage bookmarks in the rclone config file.
    Bookmark {
        #[command(subcommand)]
        command: BookmarkCommand,
    },

    /// Mount a bookmark.
    Mount(BookmarkArg),

    /// Unmount a bookmark.
    Unmount(BookmarkArg),

    /// Push local changes to the remote (bisync).
    Upload(BookmarkArg),

    /// Pull remote changes to the local directory (bisync).
    Download(BookmarkArg),

    /// Stop a running upload or download.
    Stop {
        #[command(subcommand)]
        command: StopCommand,
    },

    /// Start or stop serving a bookmark over HTTP, FTP, WebDAV or restic.
    Serve {
        #[command(subcommand)]
        command: ServeCommand,
    },

    /// Toggle automatic upload on local changes.
    Auto(BookmarkArg),

    /// Terminate every process, or only those of one bookmark.
    KillAll(KillAllArgs),

    /// Show what is mounted, served and syncing.
    Status(StatusArgs),

    /// Show recent notifications.
    Notifications(NotificationsArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Bookmark { command } => commands::bookmark::run(command),
        Commands::Mount(args) => commands::control::mount(args),
        Commands::Unmount(args) => commands::control::unmount(args),
        Commands::Upload(args) => commands::control::upload(args),
        Commands::Download(args) => commands::control::download(args),
        Commands::Stop { command } => commands::control::stop(command),
        Commands::Serve { command } => commands::control::serve(command),
        Commands::Auto(args) => commands::control::auto(args),
        Commands::KillAll(args) => commands::control::kill_all(args),
        Commands::Status(args) => args.run(),
        Commands::Notifications(args) => args.run(),
    }
}
