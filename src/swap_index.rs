use crate::config::Config;
use crate::error::{PagerError, Result};

/// Distinguished swap-slot values.
pub mod slot {
    /// No slot assigned.
    pub const NONE: u64 = 0;
    /// Poisoned slot: a read from it failed and it must never be retried
    /// or handed back to the slot allocator.
    pub const BAD: u64 = u64::MAX;

    /// Whether a slot value names real backing store.
    pub fn is_valid(s: u64) -> bool {
        s != NONE && s != BAD
    }
}

/// Pages per hash cluster. Power of two.
pub const CLUSTER_SHIFT: u32 = 4;
pub const CLUSTER_SIZE: u64 = 1 << CLUSTER_SHIFT;
const CLUSTER_MASK: u64 = CLUSTER_SIZE - 1;

/// Objects at most this many pages use the flat array representation; a flat
/// array burns `page_count` words regardless of how sparsely swap is used,
/// which is only acceptable for small objects.
pub const ARRAY_MAX_PAGES: u64 = CLUSTER_SIZE * 4;

/// One hash entry covering `CLUSTER_SIZE` consecutive page indices.
struct Cluster {
    tag: u64,
    /// Non-zero slots currently stored. The entry is unlinked the moment
    /// this reaches zero.
    count: u16,
    slots: [u64; CLUSTER_SIZE as usize],
}

pub struct SwapHash {
    buckets: Vec<Vec<Cluster>>,
}

/// Per-object map from page index to swap slot, representation fixed at
/// creation time by object size.
pub enum SwapSlotIndex {
    Array(Vec<u64>),
    Hashed(SwapHash),
}

impl SwapSlotIndex {
    /// Build an index for an object of `page_count` pages. Allocation is
    /// non-blocking; failure surfaces as `OutOfMemory`.
    pub fn new(page_count: u64, cfg: &Config) -> Result<Self> {
        if page_count > ARRAY_MAX_PAGES {
            let nbuckets = (page_count >> CLUSTER_SHIFT).min(cfg.max_buckets).max(1) as usize;
            let mut buckets = Vec::new();
            buckets
                .try_reserve_exact(nbuckets)
                .map_err(|_| PagerError::OutOfMemory)?;
            for _ in 0..nbuckets {
                buckets.push(Vec::new());
            }
            Ok(SwapSlotIndex::Hashed(SwapHash { buckets }))
        } else {
            let mut slots = Vec::new();
            slots
                .try_reserve_exact(page_count as usize)
                .map_err(|_| PagerError::OutOfMemory)?;
            slots.resize(page_count as usize, slot::NONE);
            Ok(SwapSlotIndex::Array(slots))
        }
    }

    pub fn is_hashed(&self) -> bool {
        matches!(self, SwapSlotIndex::Hashed(_))
    }

    /// Look up the slot for a page index. Always succeeds; absent means
    /// `slot::NONE`.
    pub fn find(&self, index: u64) -> u64 {
        match self {
            SwapSlotIndex::Array(slots) => slots[index as usize],
            SwapSlotIndex::Hashed(hash) => {
                let tag = index >> CLUSTER_SHIFT;
                let chain = &hash.buckets[bucket_of(tag, hash.buckets.len())];
                match chain.iter().find(|c| c.tag == tag) {
                    Some(c) => c.slots[(index & CLUSTER_MASK) as usize],
                    None => slot::NONE,
                }
            }
        }
    }

    /// Store a slot for a page index, returning the previous value.
    ///
    /// This is the sole mutator of cluster-entry lifetime. Creating an entry
    /// for a new cluster may fail under memory pressure; clearing a slot in
    /// an absent cluster is a no-op returning `NONE`; overwriting an
    /// existing non-zero slot never allocates and never fails.
    pub fn set(&mut self, index: u64, value: u64) -> Result<u64> {
        match self {
            SwapSlotIndex::Array(slots) => {
                let old = slots[index as usize];
                slots[index as usize] = value;
                Ok(old)
            }
            SwapSlotIndex::Hashed(hash) => {
                let tag = index >> CLUSTER_SHIFT;
                let off = (index & CLUSTER_MASK) as usize;
                let nbuckets = hash.buckets.len();
                let chain = &mut hash.buckets[bucket_of(tag, nbuckets)];
                if let Some(pos) = chain.iter().position(|c| c.tag == tag) {
                    let entry = &mut chain[pos];
                    let old = entry.slots[off];
                    entry.slots[off] = value;
                    if old == slot::NONE && value != slot::NONE {
                        entry.count += 1;
                    } else if old != slot::NONE && value == slot::NONE {
                        entry.count -= 1;
                        if entry.count == 0 {
                            chain.swap_remove(pos);
                        }
                    }
                    Ok(old)
                } else {
                    if value == slot::NONE {
                        return Ok(slot::NONE);
                    }
                    chain.try_reserve(1).map_err(|_| PagerError::OutOfMemory)?;
                    let mut entry = Cluster {
                        tag,
                        count: 1,
                        slots: [slot::NONE; CLUSTER_SIZE as usize],
                    };
                    entry.slots[off] = value;
                    chain.push(entry);
                    Ok(slot::NONE)
                }
            }
        }
    }

    /// Visit every (page index, slot) pair with a non-`NONE` slot, including
    /// poisoned ones. Callers filter `slot::BAD` as needed.
    pub fn for_each_slot(&self, mut f: impl FnMut(u64, u64)) {
        match self {
            SwapSlotIndex::Array(slots) => {
                for (i, &s) in slots.iter().enumerate() {
                    if s != slot::NONE {
                        f(i as u64, s);
                    }
                }
            }
            SwapSlotIndex::Hashed(hash) => {
                for chain in &hash.buckets {
                    for entry in chain {
                        for (off, &s) in entry.slots.iter().enumerate() {
                            if s != slot::NONE {
                                f((entry.tag << CLUSTER_SHIFT) | off as u64, s);
                            }
                        }
                    }
                }
            }
        }
    }

    /// First page index whose slot lies in `[lo, hi)`, skipping poisoned
    /// slots. Used by the swap-off sweep.
    pub fn first_slot_in(&self, lo: u64, hi: u64) -> Option<(u64, u64)> {
        let mut found = None;
        self.for_each_slot(|index, s| {
            if found.is_none() && s != slot::BAD && s >= lo && s < hi {
                found = Some((index, s));
            }
        });
        found
    }

    /// Number of live cluster entries (hash mode) or non-zero array slots.
    #[cfg(test)]
    pub fn entry_count(&self) -> usize {
        match self {
            SwapSlotIndex::Array(slots) => slots.iter().filter(|&&s| s != slot::NONE).count(),
            SwapSlotIndex::Hashed(hash) => hash.buckets.iter().map(|c| c.len()).sum(),
        }
    }
}

fn bucket_of(tag: u64, nbuckets: usize) -> usize {
    (hash_u64(tag) % nbuckets as u64) as usize
}

fn hash_u64(k: u64) -> u64 {
    const M: u64 = 0xc6a4a7935bd1e995;
    const R: u32 = 47;
    let mut h = 0x8445d61a4e774912 ^ (8u64.wrapping_mul(M));
    let mut v = k.wrapping_mul(M);
    v ^= v >> R;
    v = v.wrapping_mul(M);
    h ^= v;
    h = h.wrapping_mul(M);
    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;
    h
}
