/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! In-memory POSIX-like filesystem stored as a single value of a key-value
//! engine. One key holds one [`fs::Volume`] (directories, regular files,
//! symbolic links and their metadata); clients mutate and query it through
//! the FS.* command surface in [`command`]. Every command is atomic: it
//! either fully applies or leaves the volume untouched.
//!
//! The host engine owns key lookup, persistence plumbing and scheduling.
//! It drives this crate through [`command::execute`] plus the value hooks:
//! [`fs::Volume::to_bytes`], [`fs::Volume::from_bytes`],
//! [`fs::Volume::mem_usage`] and plain `Drop`.

pub mod bloom;
pub mod command;
pub mod encode;
pub mod fs;
pub mod glob;
pub mod node;
pub mod pathname;
pub mod search;

pub use command::{execute, Reply, TYPE_NAME};
pub use fs::{FsError, Volume};
