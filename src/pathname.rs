/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fmt::Display;

/// Longest entry name (and symlink target) the wire format can carry.
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

/// Absolute path in normal form: one leading `/`, no trailing `/` (except
/// the root itself), no empty, `.` or `..` components.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct PathName(String);

impl Display for PathName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PathName {
    /// Parses and normalizes a raw path. A path is accepted if it is `/`
    /// or a `/`-led sequence of non-empty components after collapsing runs
    /// of `/`. `.` components are dropped, `..` pops (clamped at root).
    pub fn parse(raw: &str) -> Option<PathName> {
        if !raw.starts_with('/') {
            return None;
        }
        // collapse runs of '/' to detect a trailing slash
        let mut collapsed = String::with_capacity(raw.len());
        for c in raw.chars() {
            if c == '/' && collapsed.ends_with('/') {
                continue;
            }
            collapsed.push(c);
        }
        if collapsed.len() > 1 && collapsed.ends_with('/') {
            return None;
        }
        let mut segments: Vec<&str> = Vec::new();
        for segment in collapsed.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                name => {
                    if name.len() > MAX_NAME_LEN {
                        return None;
                    }
                    segments.push(name);
                }
            }
        }
        if segments.is_empty() {
            Some(PathName("/".to_owned()))
        } else {
            Some(PathName(format!("/{}", segments.join("/"))))
        }
    }

    pub fn segments(&self) -> Vec<&str> {
        self.0.split('/').filter(|s| !s.is_empty()).collect()
    }

    pub fn join(&self, name: &str) -> PathName {
        if self.is_root() {
            PathName(format!("/{}", name))
        } else {
            PathName(format!("{}/{}", self.0, name))
        }
    }

    /// Final component, `None` for the root.
    pub fn basename(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            Some(&self.0[self.0.rfind('/').unwrap() + 1..])
        }
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub type Name = String;
