//! Minimal reader/writer for the engine's INI-style config file.
//!
//! Section and key order is preserved so rewriting a file only changes the
//! sections that were touched. Comments are dropped on rewrite.

use std::path::Path;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct IniSection {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

impl IniSection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct IniDocument {
    pub sections: Vec<IniSection>,
}

impl IniDocument {
    pub fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let mut doc = IniDocument::default();
        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                doc.sections.push(IniSection::new(name.trim()));
                continue;
            }
            let malformed = || ConfigError::Ini {
                path: path.to_path_buf(),
                line: idx + 1,
                content: raw.to_string(),
            };
            let (key, value) = line.split_once('=').ok_or_else(malformed)?;
            let section = doc.sections.last_mut().ok_or_else(malformed)?;
            section.set(key.trim(), value.trim());
        }
        Ok(doc)
    }

    pub fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut IniSection> {
        self.sections.iter_mut().find(|s| s.name == name)
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.sections.len();
        self.sections.retain(|s| s.name != name);
        before != self.sections.len()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push_str(&format!("[{}]\n", section.name));
            for (key, value) in &section.entries {
                out.push_str(&format!("{key} = {value}\n"));
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(contents: &str) -> Result<IniDocument, ConfigError> {
        IniDocument::parse(&PathBuf::from("rclone.conf"), contents)
    }

    #[test]
    fn parses_sections_and_skips_comments() {
        let doc = parse("# header\n[nas]\ntype = webdav\nurl = https://x/y?a=b\n\n; c\n[local]\ntype=local\n")
            .expect("parse");
        assert_eq!(doc.sections.len(), 2);
        let nas = doc.section("nas").expect("nas");
        assert_eq!(nas.entries[1], ("url".to_string(), "https://x/y?a=b".to_string()));
        assert_eq!(doc.section("local").expect("local").entries[0].1, "local");
    }

    #[test]
    fn key_outside_section_is_malformed() {
        let err = parse("type = webdav\n").unwrap_err();
        assert!(matches!(err, ConfigError::Ini { line: 1, .. }), "got: {err}");
    }

    #[test]
    fn render_then_parse_is_stable() {
        let doc = parse("[a]\nx = 1\n[b]\ny = 2\n").expect("parse");
        assert_eq!(parse(&doc.render()).expect("reparse"), doc);
    }
}
