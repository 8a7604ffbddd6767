//! `csync bookmark list|show|add|update|delete`
//!
//! Edits go straight to the rclone config file; a running daemon notices the
//! change and reloads. Deletion goes through the daemon when one is running so
//! the bookmark's processes are stopped first.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use csync_core::{bookmarks, settings, Bookmark, BookmarkName, LOCAL_PATH_KEY, REMOTE_PATH_KEY};
use csync_daemon::{DaemonError, DaemonRequest};

use super::home_dir;

#[derive(Subcommand, Debug)]
pub enum BookmarkCommand {
    /// List bookmarks.
    List(ListArgs),

    /// Print every option of one bookmark.
    Show(ShowArgs),

    /// Create a bookmark.
    Add(AddArgs),

    /// Change options of an existing bookmark.
    Update(UpdateArgs),

    /// Remove a bookmark, stopping its processes first.
    Delete(ShowArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub name: String,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Letters, digits, '-' and '_' (at most 32).
    pub name: String,

    /// Provider type, e.g. webdav, sftp, s3, drive.
    #[arg(long = "type", short = 't', value_name = "TYPE")]
    pub kind: String,

    #[command(flatten)]
    pub fields: FieldArgs,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    pub name: String,

    #[command(flatten)]
    pub fields: FieldArgs,
}

#[derive(Args, Debug)]
pub struct FieldArgs {
    /// Provider option, repeatable: `-o url=https://dav.example.com`.
    #[arg(long = "option", short = 'o', value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub options: Vec<(String, String)>,

    /// Local directory synced with the remote.
    #[arg(long)]
    pub local: Option<PathBuf>,

    /// Path inside the remote; defaults to its root.
    #[arg(long)]
    pub remote_path: Option<String>,
}

impl FieldArgs {
    fn into_map(self) -> Result<BTreeMap<String, String>> {
        let mut map: BTreeMap<String, String> = self.options.into_iter().collect();
        if let Some(local) = self.local {
            let local = if local.is_absolute() {
                local
            } else {
                std::env::current_dir()
                    .context("cannot resolve the current directory")?
                    .join(local)
            };
            map.insert(LOCAL_PATH_KEY.to_string(), local.display().to_string());
        }
        if let Some(remote) = self.remote_path {
            map.insert(REMOTE_PATH_KEY.to_string(), remote);
        }
        Ok(map)
    }
}

#[derive(Tabled)]
struct BookmarkRow {
    #[tabled(rename = "bookmark")]
    name: String,
    #[tabled(rename = "type")]
    kind: String,
    #[tabled(rename = "remote")]
    remote: String,
    #[tabled(rename = "local")]
    local: String,
}

pub fn run(command: BookmarkCommand) -> Result<()> {
    let home = home_dir()?;
    let config = config_path(&home)?;
    match command {
        BookmarkCommand::List(args) => list(&config, args.json),
        BookmarkCommand::Show(args) => show(&config, &args.name),
        BookmarkCommand::Add(args) => add(&config, args),
        BookmarkCommand::Update(args) => update(&config, args),
        BookmarkCommand::Delete(args) => delete(&home, &config, &args.name),
    }
}

fn config_path(home: &Path) -> Result<PathBuf> {
    let settings = settings::load_at(home).context("failed to load csync settings")?;
    Ok(settings.engine_config_at(home))
}

fn list(config: &Path, json: bool) -> Result<()> {
    let all = bookmarks::list_at(config)
        .with_context(|| format!("failed to read {}", config.display()))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&all).context("failed to serialize bookmarks")?
        );
        return Ok(());
    }
    if all.is_empty() {
        println!("No bookmarks in {}.", config.display());
        println!("Run: csync bookmark add <name> --type <type> -o key=value");
        return Ok(());
    }

    let rows: Vec<BookmarkRow> = all
        .iter()
        .map(|bookmark| BookmarkRow {
            name: bookmark.name.to_string(),
            kind: bookmark.kind().to_string(),
            remote: bookmark.remote_spec(),
            local: bookmark
                .local_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn show(config: &Path, name: &str) -> Result<()> {
    let bookmark = bookmarks::get_at(config, &BookmarkName::from(name))
        .with_context(|| format!("failed to load bookmark '{name}'"))?;
    print_bookmark(&bookmark);
    Ok(())
}

fn add(config: &Path, args: AddArgs) -> Result<()> {
    let mut bookmark = Bookmark::new(args.name.as_str(), &args.kind);
    bookmark.options.extend(args.fields.into_map()?);
    bookmarks::add_at(config, &bookmark)
        .with_context(|| format!("failed to add bookmark '{}'", args.name))?;
    println!("{} Added bookmark '{}'", "✓".green(), args.name);
    Ok(())
}

fn update(config: &Path, args: UpdateArgs) -> Result<()> {
    let fields = args.fields.into_map()?;
    if fields.is_empty() {
        anyhow::bail!("nothing to update; pass -o KEY=VALUE, --local or --remote-path");
    }
    let updated = bookmarks::update_at(config, &BookmarkName::from(args.name.as_str()), &fields)
        .with_context(|| format!("failed to update bookmark '{}'", args.name))?;
    println!("{} Updated bookmark '{}'", "✓".green(), args.name);
    print_bookmark(&updated);
    Ok(())
}

fn delete(home: &Path, config: &Path, name: &str) -> Result<()> {
    let request = DaemonRequest::new("delete_bookmark").for_bookmark(name);
    match csync_daemon::request(home, &request) {
        Ok(_) => {}
        Err(DaemonError::DaemonNotRunning { .. }) => {
            bookmarks::delete_at(config, &BookmarkName::from(name))
                .with_context(|| format!("failed to delete bookmark '{name}'"))?;
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to delete bookmark '{name}'"))
        }
    }
    println!("{} Deleted bookmark '{name}'", "✓".green());
    Ok(())
}

fn print_bookmark(bookmark: &Bookmark) {
    println!("[{}]", bookmark.name.to_string().bold());
    for (key, value) in &bookmark.options {
        println!("{key} = {value}");
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_pairs_are_split_on_the_first_equals() {
        assert_eq!(
            parse_key_value("url=https://dav.example.com/?a=b"),
            Ok(("url".to_string(), "https://dav.example.com/?a=b".to_string()))
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }
}
