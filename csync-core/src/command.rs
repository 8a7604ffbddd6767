//! Argument vectors for the external sync engine.
//!
//! Layout of every supervised command:
//!
//! ```text
//! <binary> --config <file> <required args…> --auto-confirm <global custom…> <bookmark custom…>
//! ```

use std::path::{Path, PathBuf};

use crate::settings::Settings;
use crate::types::Bookmark;

#[cfg(windows)]
pub const ENGINE_BINARY_NAME: &str = "rclone.exe";
#[cfg(not(windows))]
pub const ENGINE_BINARY_NAME: &str = "rclone";

/// A fully prepared engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Builds [`EngineCommand`]s from settings and bookmark options.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    program: PathBuf,
    config: Option<PathBuf>,
    global_args: Vec<String>,
}

impl CommandBuilder {
    pub fn new(settings: &Settings, config: Option<&Path>) -> Self {
        let program = match (&settings.bundled_binary, settings.use_bundled) {
            (Some(bundled), true) => bundled.clone(),
            (None, true) => {
                tracing::warn!("bundled engine requested but no path configured; using $PATH");
                PathBuf::from(ENGINE_BINARY_NAME)
            }
            _ => PathBuf::from(ENGINE_BINARY_NAME),
        };
        Self {
            program,
            config: config.map(Path::to_path_buf),
            global_args: split_custom_args(&settings.custom_args),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Command for a one-shot, non-streaming call (no custom args).
    pub fn one_shot<I, S>(&self, args: I) -> EngineCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EngineCommand {
            program: self.program.clone(),
            args: self.required(args),
        }
    }

    /// Command for a supervised process. Custom arguments are appended after
    /// the required ones; verbosity flags among them are dropped because the
    /// log classifier depends on the verbosity each operation asks for.
    pub fn supervised<I, S>(&self, args: I, bookmark: Option<&Bookmark>) -> EngineCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut all = self.required(args);
        let bookmark_args = bookmark
            .and_then(Bookmark::custom_args)
            .map(split_custom_args)
            .unwrap_or_default();
        all.extend(
            self.global_args
                .iter()
                .chain(bookmark_args.iter())
                .filter(|arg| !is_verbosity_flag(arg))
                .cloned(),
        );
        EngineCommand {
            program: self.program.clone(),
            args: all,
        }
    }

    fn required<I, S>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Vec::new();
        if let Some(config) = &self.config {
            out.push("--config".to_string());
            out.push(config.display().to_string());
        }
        out.extend(args.into_iter().map(Into::into));
        out.push("--auto-confirm".to_string());
        out.retain(|arg| !arg.trim().is_empty());
        out
    }
}

/// Split a user-entered argument string on newlines and spaces.
pub fn split_custom_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// `-v`, `-vv`, `--verbose`, `--verbose=2`.
pub fn is_verbosity_flag(arg: &str) -> bool {
    if let Some(vs) = arg.strip_prefix('-') {
        if !vs.is_empty() && vs.chars().all(|c| c == 'v') {
            return true;
        }
    }
    arg == "--verbose" || arg.starts_with("--verbose=")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CUSTOM_ARGS_KEY;

    fn settings(custom: &str) -> Settings {
        Settings {
            custom_args: custom.to_string(),
            ..Settings::default()
        }
    }

    #[test]
    fn supervised_command_layout() {
        let builder = CommandBuilder::new(
            &settings("--fast-list\n-vv\n--timeout 30s"),
            Some(Path::new("/cfg/rclone.conf")),
        );
        let bookmark =
            Bookmark::new("nas", "webdav").with_option(CUSTOM_ARGS_KEY, "--verbose --tpslimit 4");
        let cmd = builder.supervised(["mount", "nas:/", "/mnt/nas", "-vv"], Some(&bookmark));

        assert_eq!(cmd.program, PathBuf::from(ENGINE_BINARY_NAME));
        assert_eq!(
            cmd.args,
            vec![
                "--config", "/cfg/rclone.conf", "mount", "nas:/", "/mnt/nas", "-vv",
                "--auto-confirm", "--fast-list", "--timeout", "30s", "--tpslimit", "4",
            ]
        );
    }

    #[test]
    fn bundled_binary_is_selected() {
        let settings = Settings {
            use_bundled: true,
            bundled_binary: Some(PathBuf::from("/opt/csync/rclone")),
            ..Settings::default()
        };
        let builder = CommandBuilder::new(&settings, None);
        let cmd = builder.one_shot(["version"]);
        assert_eq!(cmd.program, PathBuf::from("/opt/csync/rclone"));
        assert_eq!(cmd.args, vec!["version", "--auto-confirm"]);
    }

    #[test]
    fn verbosity_flags() {
        for flag in ["-v", "-vv", "-vvv", "--verbose", "--verbose=2"] {
            assert!(is_verbosity_flag(flag), "{flag}");
        }
        for flag in ["-", "--vfs-cache-mode", "-version", "--v"] {
            assert!(!is_verbosity_flag(flag), "{flag}");
        }
    }
}
