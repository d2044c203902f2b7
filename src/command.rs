/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The FS.* command surface: argument parsing, dispatch and reply
//! shaping.
//!
//! The host engine resolves the key to a [`Volume`] before calling
//! [`execute`], so `args` holds everything after the key. Arguments are
//! binary-safe byte strings; paths and option words must be UTF-8, file
//! payloads may be anything. Command names and option words are matched
//! case-insensitively. Errors are returned to the engine, which renders
//! them with the `ERR ` prefix (see [`FsError::prefixed`]).

use log::debug;

use crate::fs::{FsError, TreeEntry, Volume};
use crate::node::{NodeKind, PERM_MASK};
use crate::pathname::{Name, PathName};
use crate::search::{find, grep};

/// Type tag registered with the host engine (exactly 9 ASCII chars).
pub const TYPE_NAME: &str = "redis-fs0";

type Result<T> = std::result::Result<T, FsError>;

/// Engine reply shapes produced by the command handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Integer(i64),
    Bulk(Vec<u8>),
    Array(Vec<Reply>),
}

impl Reply {
    fn bulk(s: &str) -> Reply {
        Reply::Bulk(s.as_bytes().to_vec())
    }
}

/// Runs one FS.* command against a volume. `now_ms` is the command
/// timestamp; the engine samples its clock once per command so a
/// multi-node mutation carries one consistent time.
pub fn execute(vol: &mut Volume, now_ms: u64, name: &str, args: &[Vec<u8>]) -> Result<Reply> {
    debug!("execute {} ({} args)", name, args.len());
    match name.to_ascii_uppercase().as_str() {
        "FS.ECHO" => {
            arity(args, 2, 3)?;
            let path = path_arg(args, 0)?;
            let data = arg(args, 1)?;
            let append = keyword(args, 2, "APPEND")?;
            let written = vol.write(&path, data, append, now_ms)?;
            Ok(Reply::Integer(written as i64))
        }
        "FS.APPEND" => {
            arity(args, 2, 2)?;
            let path = path_arg(args, 0)?;
            let appended = vol.write(&path, arg(args, 1)?, true, now_ms)?;
            Ok(Reply::Integer(appended as i64))
        }
        "FS.CAT" => {
            arity(args, 1, 1)?;
            let path = path_arg(args, 0)?;
            Ok(Reply::Bulk(vol.read(&path)?.to_vec()))
        }
        "FS.TOUCH" => {
            arity(args, 1, 1)?;
            vol.touch(&path_arg(args, 0)?, now_ms)?;
            Ok(Reply::Integer(1))
        }
        "FS.MKDIR" => {
            arity(args, 1, 2)?;
            let parents = keyword(args, 1, "PARENTS")?;
            vol.mkdir(&path_arg(args, 0)?, parents, now_ms)?;
            Ok(Reply::Integer(1))
        }
        "FS.LS" => {
            arity(args, 1, 2)?;
            let path = path_arg(args, 0)?;
            let long = keyword(args, 1, "LONG")?;
            let entries = vol.list(&path)?;
            let rows = entries
                .into_iter()
                .map(|(name, node)| {
                    if long {
                        Reply::Array(vec![
                            Reply::bulk(name),
                            Reply::bulk(node.kind().as_str()),
                            Reply::bulk(&format!("{:o}", node.meta().mode & PERM_MASK)),
                            Reply::Integer(node.size() as i64),
                            Reply::Integer(node.meta().mtime_ms as i64),
                        ])
                    } else {
                        Reply::bulk(name)
                    }
                })
                .collect();
            Ok(Reply::Array(rows))
        }
        "FS.RM" => {
            arity(args, 1, 2)?;
            let recursive = keyword(args, 1, "RECURSIVE")?;
            let removed = vol.remove(&path_arg(args, 0)?, recursive)?;
            Ok(Reply::Integer(removed as i64))
        }
        "FS.CP" => {
            arity(args, 2, 3)?;
            let recursive = keyword(args, 2, "RECURSIVE")?;
            let copied = vol.copy(&path_arg(args, 0)?, &path_arg(args, 1)?, recursive, now_ms)?;
            Ok(Reply::Integer(copied as i64))
        }
        "FS.MV" => {
            arity(args, 2, 2)?;
            vol.rename(&path_arg(args, 0)?, &path_arg(args, 1)?, now_ms)?;
            Ok(Reply::Integer(1))
        }
        "FS.FIND" => {
            if args.len() != 2 && args.len() != 4 {
                return Err(FsError::Invalid);
            }
            let root = path_arg(args, 0)?;
            let kind = if args.len() == 4 {
                if !str_arg(args, 2)?.eq_ignore_ascii_case("TYPE") {
                    return Err(FsError::Invalid);
                }
                Some(NodeKind::parse(str_arg(args, 3)?).ok_or(FsError::Invalid)?)
            } else {
                None
            };
            let paths = find(vol, &root, arg(args, 1)?, kind)?;
            Ok(Reply::Array(
                paths.iter().map(|path| Reply::bulk(path.as_str())).collect(),
            ))
        }
        "FS.GREP" => {
            arity(args, 2, 3)?;
            let root = path_arg(args, 0)?;
            let nocase = keyword(args, 2, "NOCASE")?;
            let hits = grep(vol, &root, arg(args, 1)?, nocase)?;
            Ok(Reply::Array(
                hits.into_iter()
                    .map(|hit| {
                        Reply::Array(vec![
                            Reply::bulk(hit.path.as_str()),
                            Reply::Integer(hit.line as i64),
                            Reply::Bulk(hit.text),
                        ])
                    })
                    .collect(),
            ))
        }
        "FS.STAT" => {
            arity(args, 1, 1)?;
            let stat = vol.stat(&path_arg(args, 0)?)?;
            let mut pairs = vec![
                Reply::bulk("type"),
                Reply::bulk(stat.kind.as_str()),
                Reply::bulk("mode"),
                Reply::Integer(stat.mode as i64),
                Reply::bulk("uid"),
                Reply::Integer(stat.uid as i64),
                Reply::bulk("gid"),
                Reply::Integer(stat.gid as i64),
                Reply::bulk("size"),
                Reply::Integer(stat.size as i64),
                Reply::bulk("atime_ms"),
                Reply::Integer(stat.atime_ms as i64),
                Reply::bulk("mtime_ms"),
                Reply::Integer(stat.mtime_ms as i64),
                Reply::bulk("ctime_ms"),
                Reply::Integer(stat.ctime_ms as i64),
            ];
            if let Some(target) = stat.target {
                pairs.push(Reply::bulk("target"));
                pairs.push(Reply::Bulk(target.into_bytes()));
            }
            Ok(Reply::Array(pairs))
        }
        "FS.TEST" => {
            arity(args, 1, 1)?;
            let resolvable = str_arg(args, 0)
                .ok()
                .and_then(|raw| PathName::parse(raw))
                .map_or(false, |path| vol.exists(&path));
            Ok(Reply::Integer(resolvable as i64))
        }
        "FS.CHMOD" => {
            arity(args, 2, 2)?;
            let path = path_arg(args, 0)?;
            let mode = u32::from_str_radix(str_arg(args, 1)?, 8).map_err(|_| FsError::Invalid)?;
            vol.chmod(&path, (mode & PERM_MASK as u32) as u16, now_ms)?;
            Ok(Reply::Integer(1))
        }
        "FS.CHOWN" => {
            arity(args, 3, 3)?;
            let path = path_arg(args, 0)?;
            let uid = u32_arg(args, 1)?;
            let gid = u32_arg(args, 2)?;
            vol.chown(&path, uid, gid, now_ms)?;
            Ok(Reply::Integer(1))
        }
        "FS.LN" => {
            arity(args, 2, 2)?;
            let target = str_arg(args, 0)?;
            let link = path_arg(args, 1)?;
            vol.symlink(target, &link, now_ms)?;
            Ok(Reply::Integer(1))
        }
        "FS.READLINK" => {
            arity(args, 1, 1)?;
            let target = vol.readlink(&path_arg(args, 0)?)?;
            Ok(Reply::Bulk(target.as_bytes().to_vec()))
        }
        "FS.TREE" => {
            if args.len() != 1 && args.len() != 3 {
                return Err(FsError::Invalid);
            }
            let path = path_arg(args, 0)?;
            let depth = if args.len() == 3 {
                if !str_arg(args, 1)?.eq_ignore_ascii_case("DEPTH") {
                    return Err(FsError::Invalid);
                }
                Some(u32_arg(args, 2)?)
            } else {
                None
            };
            Ok(tree_reply(vol.tree(&path, depth)?))
        }
        "FS.INFO" => {
            arity(args, 0, 0)?;
            let info = vol.info();
            Ok(Reply::Array(vec![
                Reply::bulk("files"),
                Reply::Integer(info.files as i64),
                Reply::bulk("directories"),
                Reply::Integer(info.directories as i64),
                Reply::bulk("symlinks"),
                Reply::Integer(info.symlinks as i64),
                Reply::bulk("total_bytes"),
                Reply::Integer(info.total_bytes as i64),
            ]))
        }
        "FS.UTIMENS" => {
            arity(args, 3, 3)?;
            let path = path_arg(args, 0)?;
            let atime_ms = u64_arg(args, 1)?;
            let mtime_ms = u64_arg(args, 2)?;
            vol.utimens(&path, atime_ms, mtime_ms, now_ms)?;
            Ok(Reply::Integer(1))
        }
        _ => Err(FsError::Invalid),
    }
}

fn arity(args: &[Vec<u8>], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        return Err(FsError::Invalid);
    }
    Ok(())
}

fn arg<'a>(args: &'a [Vec<u8>], index: usize) -> Result<&'a [u8]> {
    args.get(index).map(Vec::as_slice).ok_or(FsError::Invalid)
}

fn str_arg<'a>(args: &'a [Vec<u8>], index: usize) -> Result<&'a str> {
    std::str::from_utf8(arg(args, index)?).map_err(|_| FsError::Invalid)
}

fn path_arg(args: &[Vec<u8>], index: usize) -> Result<PathName> {
    PathName::parse(str_arg(args, index)?).ok_or(FsError::Invalid)
}

fn u32_arg(args: &[Vec<u8>], index: usize) -> Result<u32> {
    str_arg(args, index)?.parse().map_err(|_| FsError::Invalid)
}

fn u64_arg(args: &[Vec<u8>], index: usize) -> Result<u64> {
    str_arg(args, index)?.parse().map_err(|_| FsError::Invalid)
}

/// An optional trailing option word: absent is fine, anything other than
/// the expected word is an argument error.
fn keyword(args: &[Vec<u8>], index: usize, word: &str) -> Result<bool> {
    match args.get(index) {
        None => Ok(false),
        Some(raw) => {
            let s = std::str::from_utf8(raw).map_err(|_| FsError::Invalid)?;
            if s.eq_ignore_ascii_case(word) {
                Ok(true)
            } else {
                Err(FsError::Invalid)
            }
        }
    }
}

// replies nest as deep as the listed tree, so the conversion keeps its
// own stack instead of recursing
fn tree_reply(entry: TreeEntry) -> Reply {
    struct Frame {
        name: Name,
        children: std::vec::IntoIter<TreeEntry>,
        out: Vec<Reply>,
    }
    match entry {
        TreeEntry::Leaf(name) => Reply::bulk(&name),
        TreeEntry::Dir(name, children) => {
            let mut stack = vec![Frame {
                name,
                children: children.into_iter(),
                out: Vec::new(),
            }];
            loop {
                let top = stack.last_mut().unwrap();
                match top.children.next() {
                    Some(TreeEntry::Leaf(name)) => top.out.push(Reply::bulk(&name)),
                    Some(TreeEntry::Dir(name, children)) => stack.push(Frame {
                        name,
                        children: children.into_iter(),
                        out: Vec::new(),
                    }),
                    None => {
                        let done = stack.pop().unwrap();
                        let reply =
                            Reply::Array(vec![Reply::bulk(&done.name), Reply::Array(done.out)]);
                        match stack.last_mut() {
                            Some(parent) => parent.out.push(reply),
                            None => return reply,
                        }
                    }
                }
            }
        }
    }
}
