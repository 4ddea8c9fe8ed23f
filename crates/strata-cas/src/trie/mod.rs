//! Hash-indexed trie substrate shared by the object store and the action
//! cache.
//!
//! Both backends branch on successive 6-bit slices of a 256-bit key, giving
//! 64-way interior nodes. Leaves carry the full key so collisions in upper
//! prefixes are disambiguated by one comparison at the bottom of the walk.

pub(crate) mod disk;
pub(crate) mod mem;

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Key width in bytes. Keys are cryptographic digests.
pub(crate) const KEY_LEN: usize = 32;

/// Bits consumed per trie level.
pub(crate) const BITS_PER_LEVEL: usize = 6;

/// Slots per interior node.
pub(crate) const FANOUT: usize = 1 << BITS_PER_LEVEL;

/// Deepest possible level; the final slice is zero-padded below the key's
/// last bits.
pub(crate) const MAX_LEVELS: usize = (KEY_LEN * 8).div_ceil(BITS_PER_LEVEL);

/// Extract the slot index for `level` from `key`.
///
/// Slices are taken in big-endian bit order so on-disk walks visit keys in
/// byte-lexicographic order.
pub(crate) fn slot_index(key: &[u8; KEY_LEN], level: usize) -> usize {
    debug_assert!(level < MAX_LEVELS);
    let bit = level * BITS_PER_LEVEL;
    let byte = bit / 8;
    let shift = bit % 8;
    let hi = u16::from(key[byte]);
    let lo = u16::from(key.get(byte + 1).copied().unwrap_or(0));
    let window = (hi << 8) | lo;
    usize::from((window >> (16 - shift - BITS_PER_LEVEL)) & (FANOUT as u16 - 1))
}

/// Lock a mutex, recovering from poisoning.
///
/// A panic while holding one of these locks leaves the protected state
/// consistent (slots publish whole values), so continuing with the recovered
/// guard is preferable to cascading panics across every store user.
pub(crate) fn lock_recover<'a, T>(mutex: &'a Mutex<T>, context: &'static str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(err) => {
            tracing::error!(
                target = "strata.cas",
                context,
                "mutex poisoned; continuing with recovered guard"
            );
            err.into_inner()
        }
    }
}

pub(crate) fn read_recover<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(err) => {
            tracing::error!(
                target = "strata.cas",
                context,
                "rwlock poisoned; continuing with recovered read guard"
            );
            err.into_inner()
        }
    }
}

pub(crate) fn write_recover<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(err) => {
            tracing::error!(
                target = "strata.cas",
                context,
                "rwlock poisoned; continuing with recovered write guard"
            );
            err.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_index_covers_all_levels() {
        let mut key = [0_u8; KEY_LEN];
        key[0] = 0b1111_1100;
        assert_eq!(slot_index(&key, 0), 0b11_1111);
        assert_eq!(slot_index(&key, 1), 0);

        // Level 1 straddles bytes 0 and 1.
        let mut key = [0_u8; KEY_LEN];
        key[0] = 0b0000_0011;
        key[1] = 0b1100_0000;
        assert_eq!(slot_index(&key, 1), 0b11_1100);

        // The last level reads past the key end and pads with zero bits.
        let mut key = [0_u8; KEY_LEN];
        key[KEY_LEN - 1] = 0b0000_1111;
        assert_eq!(slot_index(&key, MAX_LEVELS - 1), 0b11_1100);
    }

    #[test]
    fn distinct_keys_diverge_before_the_last_level() {
        let a = [0x00_u8; KEY_LEN];
        let mut b = [0x00_u8; KEY_LEN];
        b[KEY_LEN - 1] = 1;
        let diverged = (0..MAX_LEVELS).any(|level| slot_index(&a, level) != slot_index(&b, level));
        assert!(diverged);
    }
}
