/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::HashMap;

use crate::bloom::TokenBloom;
use crate::pathname::Name;

pub const DEFAULT_DIR_MODE: u16 = 0o40755;
pub const DEFAULT_FILE_MODE: u16 = 0o100644;
pub const DEFAULT_SYMLINK_MODE: u16 = 0o120777;

/// Permission bits kept by chmod; the type nibble lives above them.
pub const PERM_MASK: u16 = 0o7777;

/// Shared per-node metadata. Stored, not enforced: the engine has no
/// notion of a calling user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub atime_ms: u64,
    pub mtime_ms: u64,
    pub ctime_ms: u64,
}

impl Metadata {
    pub fn new(mode: u16, now_ms: u64) -> Metadata {
        Metadata {
            mode,
            uid: 0,
            gid: 0,
            atime_ms: now_ms,
            mtime_ms: now_ms,
            ctime_ms: now_ms,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Dir {
    pub meta: Metadata,
    pub children: HashMap<Name, Node>,
}

impl Dir {
    pub fn new(meta: Metadata) -> Dir {
        Dir {
            meta,
            children: HashMap::new(),
        }
    }

    /// Entries in ascending byte order of name.
    pub fn sorted_entries(&self) -> Vec<(&Name, &Node)> {
        let mut entries: Vec<(&Name, &Node)> = self.children.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

// Directories may nest arbitrarily deep; the default recursive drop of
// the child map could exhaust the native stack, so the subtree is drained
// onto an explicit stack first.
impl Drop for Dir {
    fn drop(&mut self) {
        let mut stack: Vec<Node> = self.children.drain().map(|(_, node)| node).collect();
        while let Some(node) = stack.pop() {
            if let Node::Dir(mut dir) = node {
                stack.extend(dir.children.drain().map(|(_, node)| node));
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub meta: Metadata,
    pub data: Vec<u8>,
    pub bloom: Option<TokenBloom>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symlink {
    pub meta: Metadata,
    pub target: String,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Node {
    Dir(Dir),
    File(File),
    Symlink(Symlink),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Dir,
    File,
    Symlink,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Dir => "dir",
            NodeKind::File => "file",
            NodeKind::Symlink => "symlink",
        }
    }

    pub fn parse(raw: &str) -> Option<NodeKind> {
        if raw.eq_ignore_ascii_case("dir") {
            Some(NodeKind::Dir)
        } else if raw.eq_ignore_ascii_case("file") {
            Some(NodeKind::File)
        } else if raw.eq_ignore_ascii_case("symlink") {
            Some(NodeKind::Symlink)
        } else {
            None
        }
    }
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Dir(_) => NodeKind::Dir,
            Node::File(_) => NodeKind::File,
            Node::Symlink(_) => NodeKind::Symlink,
        }
    }

    pub fn meta(&self) -> &Metadata {
        match self {
            Node::Dir(dir) => &dir.meta,
            Node::File(file) => &file.meta,
            Node::Symlink(link) => &link.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut Metadata {
        match self {
            Node::Dir(dir) => &mut dir.meta,
            Node::File(file) => &mut file.meta,
            Node::Symlink(link) => &mut link.meta,
        }
    }

    /// Derived size: child count for a directory, payload length for a
    /// file, target length for a symlink.
    pub fn size(&self) -> u64 {
        match self {
            Node::Dir(dir) => dir.children.len() as u64,
            Node::File(file) => file.data.len() as u64,
            Node::Symlink(link) => link.target.len() as u64,
        }
    }

    pub fn as_dir(&self) -> Option<&Dir> {
        match self {
            Node::Dir(dir) => Some(dir),
            _ => None,
        }
    }

    pub fn as_dir_mut(&mut self) -> Option<&mut Dir> {
        match self {
            Node::Dir(dir) => Some(dir),
            _ => None,
        }
    }

    /// Number of nodes in the subtree, including this one.
    pub fn count(&self) -> u64 {
        let mut total = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            total += 1;
            if let Node::Dir(dir) = node {
                stack.extend(dir.children.values());
            }
        }
        total
    }

    /// Deep copy with copy semantics: mode, uid, gid, mtime and atime are
    /// preserved, ctime is set to `now_ms`, and file blooms are rebuilt
    /// from the payload. Iterative so copied trees may nest arbitrarily.
    pub fn deep_copy(&self, now_ms: u64) -> Node {
        match self {
            Node::Dir(src) => {
                struct Frame<'a> {
                    name: Name,
                    entries: std::collections::hash_map::Iter<'a, Name, Node>,
                    copy: Dir,
                }
                let mut stack = vec![Frame {
                    name: Name::new(),
                    entries: src.children.iter(),
                    copy: Dir::new(copied_meta(&src.meta, now_ms)),
                }];
                loop {
                    let top = stack.last_mut().unwrap();
                    match top.entries.next() {
                        Some((name, Node::Dir(dir))) => stack.push(Frame {
                            name: name.clone(),
                            entries: dir.children.iter(),
                            copy: Dir::new(copied_meta(&dir.meta, now_ms)),
                        }),
                        Some((name, flat)) => {
                            let copy = flat.deep_copy(now_ms);
                            top.copy.children.insert(name.clone(), copy);
                        }
                        None => {
                            let done = stack.pop().unwrap();
                            match stack.last_mut() {
                                Some(parent) => {
                                    parent.copy.children.insert(done.name, Node::Dir(done.copy));
                                }
                                None => return Node::Dir(done.copy),
                            }
                        }
                    }
                }
            }
            Node::File(file) => Node::File(File {
                meta: copied_meta(&file.meta, now_ms),
                data: file.data.clone(),
                bloom: Some(TokenBloom::build(&file.data)),
            }),
            Node::Symlink(link) => Node::Symlink(Symlink {
                meta: copied_meta(&link.meta, now_ms),
                target: link.target.clone(),
            }),
        }
    }
}

fn copied_meta(meta: &Metadata, now_ms: u64) -> Metadata {
    Metadata {
        ctime_ms: now_ms,
        ..*meta
    }
}
