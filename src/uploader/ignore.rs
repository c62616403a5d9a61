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

//! Ignore-rule matching for the uploader. Rules come from the effective
//! files policy and from in-directory dot-ignore files; each rule set is
//! anchored at the directory it was defined in.
//!
//! Pattern semantics:
//! - a trailing `/` restricts the pattern to directories;
//! - patterns containing `/` match relative to the anchor directory
//!   (a leading `/` is equivalent);
//! - bare patterns match the entry name anywhere beneath the anchor.

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// One set of ignore globs anchored at a directory.
pub(crate) struct CompiledRules {
    /// Relative path of the anchor directory ("" for the source root).
    base_rel: String,
    all_entries: GlobSet,
    dirs_only: GlobSet,
}

impl CompiledRules {
    pub(crate) fn compile(base_rel: &str, patterns: &[String]) -> Result<Self> {
        let mut all_entries = GlobSetBuilder::new();
        let mut dirs_only = GlobSetBuilder::new();

        for pattern in patterns {
            let pattern = pattern.trim();
            if pattern.is_empty() || pattern.starts_with('#') {
                continue;
            }

            let (pattern, dir_only) = match pattern.strip_suffix('/') {
                Some(stripped) => (stripped, true),
                None => (pattern, false),
            };

            let builder = if dir_only { &mut dirs_only } else { &mut all_entries };

            if let Some(anchored) = pattern.strip_prefix('/') {
                add_glob(builder, anchored)?;
            } else if pattern.contains('/') {
                add_glob(builder, pattern)?;
            } else {
                add_glob(builder, pattern)?;
                add_glob(builder, &format!("**/{pattern}"))?;
            }
        }

        Ok(Self {
            base_rel: base_rel.to_string(),
            all_entries: all_entries.build()?,
            dirs_only: dirs_only.build()?,
        })
    }

    fn matches(&self, rel_path: &str, is_dir: bool) -> bool {
        let under_base = if self.base_rel.is_empty() {
            Some(rel_path)
        } else {
            rel_path
                .strip_prefix(self.base_rel.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
        };

        let Some(path) = under_base else {
            return false;
        };

        self.all_entries.is_match(path) || (is_dir && self.dirs_only.is_match(path))
    }
}

fn add_glob(builder: &mut GlobSetBuilder, pattern: &str) -> Result<()> {
    let glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .with_context(|| format!("Invalid ignore pattern '{pattern}'"))?;
    builder.add(glob);
    Ok(())
}

/// Chain of rule sets accumulated while descending into the tree. Cloning
/// is cheap; rule sets are shared.
#[derive(Clone, Default)]
pub(crate) struct IgnoreContext {
    frames: Vec<std::sync::Arc<CompiledRules>>,
}

impl IgnoreContext {
    pub(crate) fn root() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, rules: CompiledRules) {
        self.frames.push(std::sync::Arc::new(rules));
    }

    pub(crate) fn is_ignored(&self, rel_path: &str, is_dir: bool) -> bool {
        self.frames
            .iter()
            .any(|rules| rules.matches(rel_path, is_dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(base: &str, patterns: &[&str]) -> CompiledRules {
        let owned: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        CompiledRules::compile(base, &owned).unwrap()
    }

    #[test]
    fn test_bare_pattern_matches_anywhere() {
        let r = rules("", &["*.tmp"]);

        assert!(r.matches("junk.tmp", false));
        assert!(r.matches("a/b/junk.tmp", false));
        assert!(!r.matches("junk.tmp.keep", false));
    }

    #[test]
    fn test_anchored_pattern_matches_relative_to_base() {
        let r = rules("", &["/build/*.o"]);

        assert!(r.matches("build/a.o", false));
        assert!(!r.matches("src/build/a.o", false));
    }

    #[test]
    fn test_dir_only_pattern() {
        let r = rules("", &["target/"]);

        assert!(r.matches("target", true));
        assert!(r.matches("a/target", true));
        assert!(!r.matches("target", false));
    }

    #[test]
    fn test_base_anchoring_in_subdirectory() {
        let r = rules("sub", &["*.log", "nested/secret"]);

        assert!(r.matches("sub/x.log", false));
        assert!(r.matches("sub/deep/x.log", false));
        assert!(r.matches("sub/nested/secret", false));
        // Outside the anchor directory nothing matches.
        assert!(!r.matches("other/x.log", false));
        assert!(!r.matches("x.log", false));
        assert!(!r.matches("nested/secret", false));
    }

    #[test]
    fn test_context_chains_rule_sets() {
        let mut ctx = IgnoreContext::root();
        ctx.push(rules("", &["*.tmp"]));
        ctx.push(rules("sub", &["*.log"]));

        assert!(ctx.is_ignored("a.tmp", false));
        assert!(ctx.is_ignored("sub/b.log", false));
        assert!(!ctx.is_ignored("b.log", false));

        // Comments and blank lines are skipped.
        let mut ctx = IgnoreContext::root();
        ctx.push(rules("", &["# comment", "", "real"]));
        assert!(ctx.is_ignored("real", false));
        assert!(!ctx.is_ignored("# comment", false));
    }
}
