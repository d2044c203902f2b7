/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Subtree search: `FS.FIND` (glob on basenames) and `FS.GREP` (glob on
//! payload lines, pruned by the per-file bloom filter).
//!
//! Both resolve their root argument following a final symlink, then walk
//! depth-first with an explicit stack, children in ascending byte order.
//! Symlinks encountered during the walk are enumerated, never traversed,
//! so resolution cycles cannot trap the walk.

use crate::fs::{found, FsError, Volume};
use crate::glob::{glob_match, literal_tokens};
use crate::node::{Node, NodeKind};
use crate::pathname::PathName;

type Result<T> = std::result::Result<T, FsError>;

/// One `FS.GREP` hit: path, 1-based line number and the line itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrepMatch {
    pub path: PathName,
    pub line: u64,
    pub text: Vec<u8>,
}

/// Walks the subtree under `root` and returns the paths of nodes whose
/// basename matches the pattern, optionally restricted to one node kind.
/// The start node itself participates; the volume root has basename `""`.
pub fn find(
    vol: &Volume,
    root: &PathName,
    pattern: &[u8],
    kind: Option<NodeKind>,
) -> Result<Vec<PathName>> {
    let comps = found(vol.walk(root, true)?)?;
    let mut out = Vec::new();
    let mut stack: Vec<(PathName, &Node)> = vec![(root.clone(), vol.node_ref(&comps))];
    while let Some((path, node)) = stack.pop() {
        let name = path.basename().unwrap_or("");
        if kind.map_or(true, |kind| node.kind() == kind)
            && glob_match(pattern, name.as_bytes(), false)
        {
            out.push(path.clone());
        }
        if let Node::Dir(dir) = node {
            for (name, child) in dir.sorted_entries().into_iter().rev() {
                stack.push((path.join(name), child));
            }
        }
    }
    Ok(out)
}

/// Walks the subtree under `root` and matches the pattern against every
/// line of every file whose bloom filter cannot rule the pattern's
/// literal tokens out. Files without a filter are always scanned.
pub fn grep(vol: &Volume, root: &PathName, pattern: &[u8], nocase: bool) -> Result<Vec<GrepMatch>> {
    let comps = found(vol.walk(root, true)?)?;
    let tokens = literal_tokens(pattern);
    let mut out = Vec::new();
    let mut stack: Vec<(PathName, &Node)> = vec![(root.clone(), vol.node_ref(&comps))];
    while let Some((path, node)) = stack.pop() {
        match node {
            Node::Dir(dir) => {
                for (name, child) in dir.sorted_entries().into_iter().rev() {
                    stack.push((path.join(name), child));
                }
            }
            Node::File(file) => {
                if let Some(bloom) = &file.bloom {
                    if tokens.iter().any(|token| !bloom.may_contain(token)) {
                        continue;
                    }
                }
                for (index, text) in lines(&file.data).iter().enumerate() {
                    if glob_match(pattern, text, nocase) {
                        out.push(GrepMatch {
                            path: path.clone(),
                            line: index as u64 + 1,
                            text: text.to_vec(),
                        });
                    }
                }
            }
            Node::Symlink(_) => {}
        }
    }
    Ok(out)
}

/// Newline-delimited lines; a final line without a newline counts, an
/// empty payload has none.
fn lines(data: &[u8]) -> Vec<&[u8]> {
    if data.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<&[u8]> = data.split(|b| *b == b'\n').collect();
    if data.ends_with(b"\n") {
        lines.pop();
    }
    lines
}
