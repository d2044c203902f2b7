/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Wire codec for volume persistence, plus the host engine's size
//! estimate hook.
//!
//! Stream layout: magic `RFSv`, format version u16, then a pre-order
//! walk of the tree. Every record is a tag byte (0 dir, 1 file, 2
//! symlink) followed by the metadata block (mode u16, uid u32, gid u32,
//! atime/mtime/ctime u64, size u64) and the variant payload: directories
//! carry a u32 child count and then each child as name (u16 length +
//! bytes) plus its record, in ascending name order; files carry a u64
//! payload plus the bloom bitmap behind a presence byte; symlinks carry
//! a u16 target. All integers little-endian. The decoder validates
//! everything it reads and rejects the stream as corrupt on the first
//! violation, so a half-written value never reaches clients.

use log::warn;

use crate::bloom::{TokenBloom, BLOOM_BYTES};
use crate::fs::{FsError, Volume};
use crate::node::{Dir, File, Metadata, Node, Symlink};
use crate::pathname::Name;

pub const MAGIC: &[u8; 4] = b"RFSv";
pub const FORMAT_VERSION: u16 = 1;

const TAG_DIR: u8 = 0;
const TAG_FILE: u8 = 1;
const TAG_SYMLINK: u8 = 2;

type Result<T> = std::result::Result<T, FsError>;

impl Volume {
    /// Serialize hook: renders the volume to the versioned byte stream.
    /// Children are emitted in ascending name order, so equal volumes
    /// serialize to equal bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        let mut stack: Vec<(Option<&Name>, &Node)> = vec![(None, &self.root)];
        while let Some((name, node)) = stack.pop() {
            if let Some(name) = name {
                put_str(&mut out, name);
            }
            put_record(&mut out, node);
            if let Node::Dir(dir) = node {
                for (name, child) in dir.sorted_entries().into_iter().rev() {
                    stack.push((Some(name), child));
                }
            }
        }
        out
    }

    /// Deserialize hook: rebuilds a volume from a byte stream, refusing
    /// anything that violates the format or the tree invariants. The id
    /// is supplied by the host engine; it is not part of the stream.
    pub fn from_bytes(id: u64, bytes: &[u8]) -> Result<Volume> {
        decode(id, bytes).map_err(|err| {
            warn!("discarding volume stream of {} bytes: {}", bytes.len(), err);
            err
        })
    }

    /// Size estimate hook: rough heap footprint in bytes.
    pub fn mem_usage(&self) -> usize {
        let mut total = std::mem::size_of::<Volume>();
        let mut stack = vec![&self.root];
        while let Some(node) = stack.pop() {
            match node {
                Node::Dir(dir) => {
                    for (name, child) in dir.children.iter() {
                        total += std::mem::size_of::<Node>() + name.len();
                        stack.push(child);
                    }
                }
                Node::File(file) => {
                    total += file.data.capacity();
                    if file.bloom.is_some() {
                        total += BLOOM_BYTES;
                    }
                }
                Node::Symlink(link) => total += link.target.len(),
            }
        }
        total
    }
}

fn put_record(out: &mut Vec<u8>, node: &Node) {
    let meta = node.meta();
    match node {
        Node::Dir(dir) => {
            out.push(TAG_DIR);
            put_meta(out, meta, node.size());
            out.extend_from_slice(&(dir.children.len() as u32).to_le_bytes());
        }
        Node::File(file) => {
            out.push(TAG_FILE);
            put_meta(out, meta, node.size());
            out.extend_from_slice(&(file.data.len() as u64).to_le_bytes());
            out.extend_from_slice(&file.data);
            match &file.bloom {
                Some(bloom) => {
                    out.push(1);
                    out.extend_from_slice(bloom.as_bytes());
                }
                None => out.push(0),
            }
        }
        Node::Symlink(link) => {
            out.push(TAG_SYMLINK);
            put_meta(out, meta, node.size());
            put_str(out, &link.target);
        }
    }
}

fn put_meta(out: &mut Vec<u8>, meta: &Metadata, size: u64) {
    out.extend_from_slice(&meta.mode.to_le_bytes());
    out.extend_from_slice(&meta.uid.to_le_bytes());
    out.extend_from_slice(&meta.gid.to_le_bytes());
    out.extend_from_slice(&meta.atime_ms.to_le_bytes());
    out.extend_from_slice(&meta.mtime_ms.to_le_bytes());
    out.extend_from_slice(&meta.ctime_ms.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
}

// name and target lengths are capped at u16::MAX on the way in
fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() - self.pos {
            return Err(FsError::Corrupt);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.bytes(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.bytes(8)?.try_into().unwrap()))
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// A decoded record: flat nodes come out whole, directories come out
/// empty with their declared child count still to be consumed.
enum Decoded {
    Full(Node),
    OpenDir(Dir, u32),
}

fn decode(id: u64, bytes: &[u8]) -> Result<Volume> {
    let mut r = Reader { buf: bytes, pos: 0 };
    if r.bytes(4)? != MAGIC {
        return Err(FsError::Corrupt);
    }
    if r.u16()? != FORMAT_VERSION {
        return Err(FsError::Corrupt);
    }
    let root = match read_record(&mut r)? {
        Decoded::OpenDir(dir, count) => build_tree(&mut r, dir, count)?,
        Decoded::Full(_) => return Err(FsError::Corrupt),
    };
    if r.remaining() != 0 {
        return Err(FsError::Corrupt);
    }
    Ok(Volume {
        id,
        root: Node::Dir(root),
    })
}

fn build_tree(r: &mut Reader, root: Dir, count: u32) -> Result<Dir> {
    struct Frame {
        name: Name,
        dir: Dir,
        left: u32,
    }
    let mut stack = vec![Frame {
        name: Name::new(),
        dir: root,
        left: count,
    }];
    loop {
        while stack.last().map_or(false, |frame| frame.left == 0) {
            let done = stack.pop().unwrap();
            match stack.last_mut() {
                None => return Ok(done.dir),
                Some(parent) => insert_child(&mut parent.dir, done.name, Node::Dir(done.dir))?,
            }
        }
        let name = read_name(r)?;
        let decoded = read_record(r)?;
        let top = stack.last_mut().unwrap();
        top.left -= 1;
        match decoded {
            Decoded::Full(node) => insert_child(&mut top.dir, name, node)?,
            Decoded::OpenDir(dir, left) => stack.push(Frame { name, dir, left }),
        }
    }
}

fn insert_child(dir: &mut Dir, name: Name, node: Node) -> Result<()> {
    if dir.children.insert(name, node).is_some() {
        return Err(FsError::Corrupt);
    }
    Ok(())
}

fn read_record(r: &mut Reader) -> Result<Decoded> {
    let tag = r.u8()?;
    let meta = Metadata {
        mode: r.u16()?,
        uid: r.u32()?,
        gid: r.u32()?,
        atime_ms: r.u64()?,
        mtime_ms: r.u64()?,
        ctime_ms: r.u64()?,
    };
    let size = r.u64()?;
    match tag {
        TAG_DIR => {
            let count = r.u32()?;
            // every child record needs at least one byte of input left
            if size != count as u64 || count as usize > r.remaining() {
                return Err(FsError::Corrupt);
            }
            Ok(Decoded::OpenDir(Dir::new(meta), count))
        }
        TAG_FILE => {
            let len = r.u64()?;
            if size != len || len > r.remaining() as u64 {
                return Err(FsError::Corrupt);
            }
            let data = r.bytes(len as usize)?.to_vec();
            let bloom = match r.u8()? {
                0 => None,
                1 => {
                    let mut bits = [0u8; BLOOM_BYTES];
                    bits.copy_from_slice(r.bytes(BLOOM_BYTES)?);
                    Some(TokenBloom::from_bytes(bits))
                }
                _ => return Err(FsError::Corrupt),
            };
            Ok(Decoded::Full(Node::File(File { meta, data, bloom })))
        }
        TAG_SYMLINK => {
            let target = read_str(r)?;
            if size != target.len() as u64 {
                return Err(FsError::Corrupt);
            }
            Ok(Decoded::Full(Node::Symlink(Symlink { meta, target })))
        }
        _ => Err(FsError::Corrupt),
    }
}

fn read_str(r: &mut Reader) -> Result<String> {
    let len = r.u16()? as usize;
    String::from_utf8(r.bytes(len)?.to_vec()).map_err(|_| FsError::Corrupt)
}

fn read_name(r: &mut Reader) -> Result<Name> {
    let name = read_str(r)?;
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(FsError::Corrupt);
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::node::DEFAULT_DIR_MODE;
    use crate::pathname::PathName;

    fn p(raw: &str) -> PathName {
        PathName::parse(raw).unwrap()
    }

    fn corrupt(bytes: &[u8]) -> Option<FsError> {
        Volume::from_bytes(0, bytes).err()
    }

    fn rich_volume() -> Volume {
        let mut vol = Volume::new(0, 10);
        vol.mkdir(&p("/etc/conf.d"), true, 11).unwrap();
        vol.write(&p("/etc/conf.d/net"), b"dhcp on\n", false, 12)
            .unwrap();
        vol.write(&p("/readme"), b"first line\nsecond line\n", false, 13)
            .unwrap();
        vol.touch(&p("/empty"), 14).unwrap();
        vol.symlink("conf.d/net", &p("/etc/net"), 15).unwrap();
        vol.chown(&p("/readme"), 500, 500, 16).unwrap();
        vol.chmod(&p("/etc"), 0o700, 17).unwrap();
        vol
    }

    #[test]
    fn test_empty_volume_bytes() {
        let vol = Volume::new(0, 0);
        let mut expected = Vec::new();
        expected.extend_from_slice(b"RFSv");
        expected.extend_from_slice(&1u16.to_le_bytes());
        expected.push(0); // dir tag
        expected.extend_from_slice(&DEFAULT_DIR_MODE.to_le_bytes());
        expected.extend_from_slice(&0u32.to_le_bytes()); // uid
        expected.extend_from_slice(&0u32.to_le_bytes()); // gid
        expected.extend_from_slice(&0u64.to_le_bytes()); // atime
        expected.extend_from_slice(&0u64.to_le_bytes()); // mtime
        expected.extend_from_slice(&0u64.to_le_bytes()); // ctime
        expected.extend_from_slice(&0u64.to_le_bytes()); // size
        expected.extend_from_slice(&0u32.to_le_bytes()); // child count
        assert_eq!(expected, vol.to_bytes());
    }

    #[test]
    fn test_round_trip() {
        let vol = rich_volume();
        let bytes = vol.to_bytes();
        let back = Volume::from_bytes(7, &bytes).unwrap();
        assert_eq!(7, back.id);
        assert_eq!(vol.root, back.root);
        assert_eq!(bytes, back.to_bytes());
    }

    #[test]
    fn test_encoding_is_insertion_order_independent() {
        let mut a = Volume::new(0, 0);
        a.write(&p("/x"), b"1", false, 1).unwrap();
        a.write(&p("/y"), b"2", false, 2).unwrap();
        let mut b = Volume::new(0, 0);
        b.write(&p("/y"), b"2", false, 2).unwrap();
        b.write(&p("/x"), b"1", false, 1).unwrap();
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn test_rename_there_and_back_is_identity() {
        let mut vol = rich_volume();
        let before = vol.to_bytes();
        vol.rename(&p("/readme"), &p("/etc/readme"), 13).unwrap();
        assert_ne!(before, vol.to_bytes());
        vol.rename(&p("/etc/readme"), &p("/readme"), 13).unwrap();
        assert_eq!(before, vol.to_bytes());
    }

    #[test]
    fn test_copy_then_remove_is_identity() {
        let mut vol = rich_volume();
        let before = vol.to_bytes();
        let copied = vol.copy(&p("/etc"), &p("/backup"), true, 99).unwrap();
        assert_eq!(3, copied);
        vol.remove(&p("/backup"), true).unwrap();
        assert_eq!(before, vol.to_bytes());
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = Volume::new(0, 0).to_bytes();
        bytes[0] = b'X';
        assert_eq!(Some(FsError::Corrupt), corrupt(&bytes));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut bytes = Volume::new(0, 0).to_bytes();
        bytes[4] = 2;
        assert_eq!(Some(FsError::Corrupt), corrupt(&bytes));
    }

    #[test]
    fn test_rejects_truncation_everywhere() {
        let bytes = rich_volume().to_bytes();
        for cut in 0..bytes.len() {
            assert_eq!(Some(FsError::Corrupt), corrupt(&bytes[..cut]), "cut at {}", cut);
        }
    }

    #[test]
    fn test_rejects_trailing_garbage() {
        let mut bytes = rich_volume().to_bytes();
        bytes.push(0);
        assert_eq!(Some(FsError::Corrupt), corrupt(&bytes));
    }

    #[test]
    fn test_rejects_non_dir_root() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RFSv");
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.push(TAG_FILE);
        put_meta(&mut bytes, &Metadata::new(0o100644, 0), 0);
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.push(0);
        assert_eq!(Some(FsError::Corrupt), corrupt(&bytes));
    }

    #[test]
    fn test_rejects_bad_names() {
        for name in ["", ".", "..", "a/b"] {
            let mut bytes = Vec::new();
            bytes.extend_from_slice(b"RFSv");
            bytes.extend_from_slice(&1u16.to_le_bytes());
            bytes.push(TAG_DIR);
            put_meta(&mut bytes, &Metadata::new(DEFAULT_DIR_MODE, 0), 1);
            bytes.extend_from_slice(&1u32.to_le_bytes());
            put_str(&mut bytes, name);
            bytes.push(TAG_FILE);
            put_meta(&mut bytes, &Metadata::new(0o100644, 0), 0);
            bytes.extend_from_slice(&0u64.to_le_bytes());
            bytes.push(0);
            assert_eq!(Some(FsError::Corrupt), corrupt(&bytes), "name {:?}", name);
        }
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RFSv");
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.push(TAG_DIR);
        put_meta(&mut bytes, &Metadata::new(DEFAULT_DIR_MODE, 0), 2);
        bytes.extend_from_slice(&2u32.to_le_bytes());
        for _ in 0..2 {
            put_str(&mut bytes, "twin");
            bytes.push(TAG_FILE);
            put_meta(&mut bytes, &Metadata::new(0o100644, 0), 0);
            bytes.extend_from_slice(&0u64.to_le_bytes());
            bytes.push(0);
        }
        assert_eq!(Some(FsError::Corrupt), corrupt(&bytes));
    }

    #[test]
    fn test_rejects_size_mismatch() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RFSv");
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.push(TAG_DIR);
        put_meta(&mut bytes, &Metadata::new(DEFAULT_DIR_MODE, 0), 1);
        bytes.extend_from_slice(&1u32.to_le_bytes());
        put_str(&mut bytes, "f");
        bytes.push(TAG_FILE);
        // stored size 9 disagrees with the 3-byte payload
        put_meta(&mut bytes, &Metadata::new(0o100644, 0), 9);
        bytes.extend_from_slice(&3u64.to_le_bytes());
        bytes.extend_from_slice(b"abc");
        bytes.push(0);
        assert_eq!(Some(FsError::Corrupt), corrupt(&bytes));
    }

    #[test]
    fn test_rejects_absurd_child_count() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RFSv");
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.push(TAG_DIR);
        put_meta(&mut bytes, &Metadata::new(DEFAULT_DIR_MODE, 0), u32::MAX as u64);
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(Some(FsError::Corrupt), corrupt(&bytes));
    }

    #[test]
    fn test_round_trip_missing_bloom() {
        let mut vol = Volume::new(0, 0);
        vol.touch(&p("/no-bloom"), 1).unwrap();
        vol.write(&p("/with-bloom"), b"alpha beta", false, 2).unwrap();
        let back = Volume::from_bytes(0, &vol.to_bytes()).unwrap();
        assert_eq!(vol.root, back.root);
    }

    #[test]
    fn test_deep_volume_round_trip() {
        let mut vol = Volume::new(0, 0);
        let mut path = String::new();
        for _ in 0..4_000 {
            path.push_str("/n");
        }
        vol.mkdir(&p(&path), true, 0).unwrap();
        let bytes = vol.to_bytes();
        let back = Volume::from_bytes(0, &bytes).unwrap();
        assert_eq!(bytes, back.to_bytes());
    }

    #[test]
    fn test_mem_usage_tracks_payloads() {
        let mut vol = Volume::new(0, 0);
        let empty = vol.mem_usage();
        vol.write(&p("/f"), &[b'x'; 4096], false, 0).unwrap();
        assert!(vol.mem_usage() >= empty + 4096);
    }

    #[test]
    fn test_random_volumes_round_trip() {
        let names = ["a", "b", "c", "d", "e"];
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut vol = Volume::new(0, 0);
            let mut dirs: Vec<PathName> = vec![p("/")];
            for step in 0..200u64 {
                let base = dirs.choose(&mut rng).unwrap().clone();
                let path = base.join(names.choose(&mut rng).unwrap());
                match rng.gen_range(0..8) {
                    0 => {
                        if vol.mkdir(&path, false, step).is_ok() {
                            dirs.push(path);
                        }
                    }
                    1 => {
                        let _ = vol.write(&path, format!("data {}", step).as_bytes(), false, step);
                    }
                    2 => {
                        let _ = vol.write(&path, b"more ", true, step);
                    }
                    3 => {
                        let _ = vol.touch(&path, step);
                    }
                    4 => {
                        let _ = vol.symlink(base.as_str(), &path, step);
                    }
                    5 => {
                        if vol.remove(&path, true).is_ok() {
                            let gone = format!("{}/", path);
                            dirs.retain(|dir| {
                                dir != &path && !dir.as_str().starts_with(&gone)
                            });
                        }
                    }
                    6 => {
                        let _ = vol.chown(&path, step as u32, 100, step);
                    }
                    _ => {
                        let _ = vol.utimens(&path, step, step + 1, step + 2);
                    }
                }
            }
            let bytes = vol.to_bytes();
            let back = Volume::from_bytes(0, &bytes).unwrap();
            assert_eq!(vol.root, back.root, "seed {}", seed);
            assert_eq!(bytes, back.to_bytes(), "seed {}", seed);
        }
    }
}
