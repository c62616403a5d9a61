// urraca is a deduplicating, content-addressed snapshot engine
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;

pub const GLOBAL_SOURCE: &str = "(global)";

/// Identity of what is being snapshotted. Scoped variants leave fields
/// empty: all-empty is the global scope, `host` alone is host scope and
/// `host`+`user` is user scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceInfo {
    pub host: String,
    #[serde(rename = "userName")]
    pub user: String,
    pub path: String,
}

impl SourceInfo {
    pub fn new(host: &str, user: &str, path: &str) -> Self {
        Self {
            host: host.to_string(),
            user: user.to_string(),
            path: path.to_string(),
        }
    }

    pub fn global() -> Self {
        Self::default()
    }

    pub fn for_host(host: &str) -> Self {
        Self::new(host, "", "")
    }

    pub fn for_user(user: &str, host: &str) -> Self {
        Self::new(host, user, "")
    }

    pub fn is_global(&self) -> bool {
        self.host.is_empty() && self.user.is_empty() && self.path.is_empty()
    }

    /// True iff all three fields are populated, as required of sources on
    /// saved snapshots.
    pub fn is_complete(&self) -> bool {
        !self.host.is_empty() && !self.user.is_empty() && !self.path.is_empty()
    }
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_global() {
            return write!(f, "{GLOBAL_SOURCE}");
        }

        if self.user.is_empty() && self.path.is_empty() {
            return write!(f, "{}", self.host);
        }

        if self.path.is_empty() {
            return write!(f, "{}@{}", self.user, self.host);
        }

        write!(f, "{}@{}:{}", self.user, self.host, self.path)
    }
}

/// Parses a source from either the `user@host:path` form or a bare local
/// path (canonicalized, with host/user defaulted).
pub fn parse_source(s: &str, default_host: &str, default_user: &str) -> Result<SourceInfo> {
    if s == GLOBAL_SOURCE {
        return Ok(SourceInfo::global());
    }

    let at = s.find('@');
    let colon = s.find(':');

    let source = match (at, colon) {
        (Some(at), colon) if colon.is_none_or(|c| at < c) => {
            let user = &s[..at];
            let rest = &s[at + 1..];

            match rest.split_once(':') {
                Some((host, path)) => SourceInfo::new(host, user, path),
                None => SourceInfo::new(rest, user, ""),
            }
        }
        _ => SourceInfo::new(default_host, default_user, &canonical_path(s)),
    };

    if source.is_global() {
        return Err(StoreError::invalid("source", format!("'{s}' is empty")).into());
    }

    Ok(source)
}

/// Absolute, lexically normalized form of a local path. Symlinks are not
/// resolved; a snapshot of a symlinked tree keeps its spelled path.
fn canonical_path(path: &str) -> String {
    let p = Path::new(path);
    let absolute: PathBuf = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(p)
    };

    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }

    cleaned.to_string_lossy().into_owned()
}

fn is_windows_volume(s: &str) -> bool {
    s.len() == 2 && s.ends_with(':') && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
}

fn is_root_path(s: &str) -> bool {
    if s == "/" {
        return true;
    }

    match s.strip_suffix(['/', '\\']) {
        Some(rest) => is_windows_volume(rest),
        None => is_windows_volume(s),
    }
}

/// Paths used as policy targets must not carry a trailing separator,
/// except for filesystem roots.
pub fn validate_policy_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(StoreError::invalid("policy path", "empty path").into());
    }

    if (path.ends_with('/') || path.ends_with('\\')) && !is_root_path(path) {
        return Err(
            StoreError::invalid("policy path", format!("'{path}' has a trailing separator"))
                .into(),
        );
    }

    Ok(())
}

/// Parent of a path, preserving Windows-style volume prefixes. Returns
/// `None` at a filesystem root.
pub fn parent_path(path: &str) -> Option<String> {
    if is_root_path(path) {
        return None;
    }

    let idx = path.rfind(['/', '\\'])?;
    let parent = &path[..idx];

    if parent.is_empty() {
        return Some(String::from("/"));
    }

    if is_windows_volume(parent) {
        let separator = &path[idx..=idx];
        return Some(format!("{parent}{separator}"));
    }

    Some(parent.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_host_path() -> Result<()> {
        let source = parse_source("pepe@burrow:/home/pepe", "defhost", "defuser")?;
        assert_eq!(source, SourceInfo::new("burrow", "pepe", "/home/pepe"));
        assert_eq!(source.to_string(), "pepe@burrow:/home/pepe");
        Ok(())
    }

    #[test]
    fn test_parse_scoped_variants() -> Result<()> {
        assert_eq!(
            parse_source("pepe@burrow", "h", "u")?,
            SourceInfo::for_user("pepe", "burrow")
        );
        assert_eq!(parse_source("(global)", "h", "u")?, SourceInfo::global());
        Ok(())
    }

    #[test]
    fn test_parse_local_path_uses_defaults() -> Result<()> {
        let source = parse_source("/var/data", "burrow", "pepe")?;
        assert_eq!(source, SourceInfo::new("burrow", "pepe", "/var/data"));
        Ok(())
    }

    #[test]
    fn test_parse_normalizes_local_paths() -> Result<()> {
        let source = parse_source("/var/./data/../logs", "h", "u")?;
        assert_eq!(source.path, "/var/logs");
        Ok(())
    }

    #[test]
    fn test_parse_to_string_round_trip() -> Result<()> {
        for s in [
            "pepe@burrow:/home/pepe",
            "pepe@burrow",
            "burrow",
            "(global)",
            "/usr/share",
        ] {
            let parsed = parse_source(s, "defhost", "defuser")?;
            let reparsed = parse_source(&parsed.to_string(), "other", "other")?;
            assert_eq!(parsed, reparsed, "round trip failed for '{s}'");
        }
        Ok(())
    }

    #[test]
    fn test_parse_rejects_empty() {
        let err = parse_source("", "", "").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::Invalid { .. })
        ));
    }

    #[test]
    fn test_display_scopes() {
        assert_eq!(SourceInfo::global().to_string(), "(global)");
        assert_eq!(SourceInfo::for_host("burrow").to_string(), "burrow");
        assert_eq!(
            SourceInfo::for_user("pepe", "burrow").to_string(),
            "pepe@burrow"
        );
    }

    #[test]
    fn test_validate_policy_path() {
        assert!(validate_policy_path("/").is_ok());
        assert!(validate_policy_path("C:\\").is_ok());
        assert!(validate_policy_path("/home/pepe").is_ok());
        assert!(validate_policy_path("/home/pepe/").is_err());
        assert!(validate_policy_path("C:\\data\\").is_err());
        assert!(validate_policy_path("").is_err());
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("/home/pepe"), Some("/home".to_string()));
        assert_eq!(parent_path("/home"), Some("/".to_string()));
        assert_eq!(parent_path("/"), None);
        assert_eq!(parent_path("C:\\data\\logs"), Some("C:\\data".to_string()));
        assert_eq!(parent_path("C:\\data"), Some("C:\\".to_string()));
        assert_eq!(parent_path("C:\\"), None);
    }
}
