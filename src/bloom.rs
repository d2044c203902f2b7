/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Per-file bloom filter over content tokens, used by `FS.GREP` to skip
//! files that cannot contain a pattern's literal tokens.
//!
//! Content is tokenized on ASCII whitespace; every token is folded to
//! ASCII lowercase and all of its 3-byte windows are inserted. Probing a
//! query token checks every window of every whitespace-free piece of
//! length >= 3, so a substring of any content token always probes
//! positive. The filter answers "may contain" only: false positives are
//! expected, false negatives never happen.

use std::hash::Hasher;

use twox_hash::XxHash64;

pub const BLOOM_BITS: usize = 2048;
pub const BLOOM_BYTES: usize = BLOOM_BITS / 8;
/// Window width; shorter tokens are not indexed and cannot prune.
pub const MIN_TOKEN_LEN: usize = 3;

const HASH_COUNT: u64 = 4;
const SEED_LOW: u64 = 0x51_7c_c1_b7_27_22_0a_95;
const SEED_HIGH: u64 = 0x6c_62_27_2e_07_bb_01_42;

#[derive(Clone, PartialEq, Eq)]
pub struct TokenBloom {
    bits: [u8; BLOOM_BYTES],
}

impl std::fmt::Debug for TokenBloom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ones: u32 = self.bits.iter().map(|b| b.count_ones()).sum();
        write!(f, "TokenBloom({}/{} bits set)", ones, BLOOM_BITS)
    }
}

impl TokenBloom {
    /// Builds the filter for a full payload. Called on every content
    /// write; the filter is never updated incrementally.
    pub fn build(data: &[u8]) -> TokenBloom {
        let mut bloom = TokenBloom {
            bits: [0; BLOOM_BYTES],
        };
        for token in data.split(|b| b.is_ascii_whitespace()) {
            let folded = fold(token);
            for window in folded.windows(MIN_TOKEN_LEN) {
                bloom.insert(window);
            }
        }
        bloom
    }

    /// Sound "may contain" probe for a literal query token. Pieces
    /// shorter than [`MIN_TOKEN_LEN`] are ignored; a token with no
    /// qualifying piece never prunes.
    pub fn may_contain(&self, token: &[u8]) -> bool {
        let folded = fold(token);
        for piece in folded.split(|b| b.is_ascii_whitespace()) {
            for window in piece.windows(MIN_TOKEN_LEN) {
                if !self.probe(window) {
                    return false;
                }
            }
        }
        true
    }

    pub fn as_bytes(&self) -> &[u8; BLOOM_BYTES] {
        &self.bits
    }

    pub fn from_bytes(bits: [u8; BLOOM_BYTES]) -> TokenBloom {
        TokenBloom { bits }
    }

    fn insert(&mut self, window: &[u8]) {
        for bit in bit_positions(window) {
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
    }

    fn probe(&self, window: &[u8]) -> bool {
        bit_positions(window).all(|bit| self.bits[bit / 8] & (1 << (bit % 8)) != 0)
    }
}

fn fold(token: &[u8]) -> Vec<u8> {
    token.iter().map(|b| b.to_ascii_lowercase()).collect()
}

fn bit_positions(window: &[u8]) -> impl Iterator<Item = usize> {
    let low = hash(SEED_LOW, window);
    // odd step so all k indices stay distinct mod the bit width
    let step = hash(SEED_HIGH, window) | 1;
    (0..HASH_COUNT).map(move |i| (low.wrapping_add(step.wrapping_mul(i)) % BLOOM_BITS as u64) as usize)
}

fn hash(seed: u64, data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(seed);
    hasher.write(data);
    hasher.finish()
}
