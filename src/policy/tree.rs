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

//! Immutable per-subpath policy overlay for one source. Each node carries
//! the effective policy for its relative path; undefined paths resolve to
//! synthetic nodes inheriting their parent's effective policy.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::{Policy, PolicyDefinition};
use crate::snapshot::SourceInfo;

struct TreeNode {
    policy: Arc<Policy>,
    inherited: bool,
    children: HashMap<String, Arc<TreeNode>>,
}

/// Cheaply cloneable handle onto a policy tree node.
#[derive(Clone)]
pub struct PolicyTree {
    node: Arc<TreeNode>,
}

impl PolicyTree {
    /// A tree where every path resolves to `policy`. Stands in for the
    /// absent tree.
    pub fn for_policy(policy: Policy) -> Self {
        Self {
            node: Arc::new(TreeNode {
                policy: Arc::new(policy),
                inherited: true,
                children: HashMap::new(),
            }),
        }
    }

    /// Effective policy at this node.
    pub fn effective(&self) -> &Policy {
        &self.node.policy
    }

    /// True iff no policy was explicitly defined at this relative path.
    pub fn is_inherited(&self) -> bool {
        self.node.inherited
    }

    /// Navigates one or more slash-separated segments. `""` and `"."`
    /// return the node itself; undefined segments return a synthetic
    /// inherited node carrying this node's effective policy.
    pub fn child(&self, name: &str) -> PolicyTree {
        let mut current = self.clone();

        for segment in name.split('/') {
            if segment.is_empty() || segment == "." {
                continue;
            }

            current = match current.node.children.get(segment) {
                Some(child) => PolicyTree {
                    node: child.clone(),
                },
                None => PolicyTree {
                    node: Arc::new(TreeNode {
                        policy: current.node.policy.clone(),
                        inherited: true,
                        children: HashMap::new(),
                    }),
                },
            };
        }

        current
    }
}

#[derive(Default)]
struct RawNode {
    policy: Option<Policy>,
    children: BTreeMap<String, RawNode>,
}

/// Builds a policy tree from policies keyed by relative path (`"."`,
/// `"./sub/dir"`). Each node's effective policy is the defined policy
/// merged over its parent's effective policy, bottoming out at `default`.
pub fn build_tree(policies: &BTreeMap<String, Policy>, default: Policy) -> PolicyTree {
    let mut root = RawNode::default();

    for (rel_path, policy) in policies {
        let trimmed = rel_path
            .strip_prefix("./")
            .or_else(|| (rel_path == ".").then_some(""))
            .unwrap_or(rel_path);

        let mut node = &mut root;
        for segment in trimmed.split('/').filter(|s| !s.is_empty()) {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.policy = Some(policy.clone());
    }

    PolicyTree {
        node: build_node(&root, &default),
    }
}

fn build_node(raw: &RawNode, parent_effective: &Policy) -> Arc<TreeNode> {
    let (effective, inherited) = match &raw.policy {
        Some(defined) => {
            let mut merged = defined.clone();
            let mut scratch = PolicyDefinition::default();
            merged.merge(parent_effective, &mut scratch, &SourceInfo::global());
            (merged, false)
        }
        None => (parent_effective.clone(), true),
    };

    let children = raw
        .children
        .iter()
        .map(|(name, child)| (name.clone(), build_node(child, &effective)))
        .collect();

    Arc::new(TreeNode {
        policy: Arc::new(effective),
        inherited,
        children,
    })
}
