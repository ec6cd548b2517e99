use std::hash::Hasher;

use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use twox_hash::XxHash64;

use crate::codec::{Buckets, SLOTS_PER_BUCKET};
use crate::{
    Filter,
    FilterError::{self, InvalidParameter},
};

/// Relocations attempted before an insert parks its tag in the victim slot.
const MAX_KICKS: usize = 500;
/// Four-slot buckets stay insertable up to roughly this fill.
const MAX_LOAD_FACTOR: f64 = 0.96;
const MIN_BITS_PER_ITEM: usize = 5;
const MAX_BITS_PER_ITEM: usize = 32;

/// The fingerprint width most deployments use; 12 high bits per tag.
pub const DEFAULT_BITS_PER_ITEM: usize = 16;

/// The one fingerprint that could not be placed within the relocation bound,
/// and the bucket it was last evicted from. While occupied, the filter is
/// full.
#[derive(Clone, Copy, Debug, Default)]
struct Victim {
    index: usize,
    tag: u32,
    used: bool,
}

/// Outcome of offering a tag to a single bucket.
enum Insert {
    Stored,
    Evicted(u32),
    Full,
}

/// A cuckoo filter with semi-sorted buckets.
///
/// Each key is reduced to a small nonzero fingerprint stored in one of two
/// candidate buckets of four slots. The low nibbles of a bucket are
/// compressed through a permutation code, saving about one bit per item over
/// the plain packed layout. Up to four copies of the same key are counted;
/// deletion removes one occurrence.
///
/// # Example
/// ```rust
/// use scrim::{CuckooFilter, Filter};
///
/// let mut filter = CuckooFilter::new(1_000, 16).expect("couldn't construct cuckoo filter");
/// filter.add("alice").expect("filter has space");
/// assert!(filter.contains("alice"));
/// filter.delete("alice").expect("alice was added");
/// assert!(filter.is_empty());
/// ```
#[derive(Clone, Debug)]
pub struct CuckooFilter {
    buckets: Buckets,
    victim: Victim,
    num_items: usize,
    rng: Xoshiro256PlusPlus,
}

/// Size and occupancy statistics of a [`CuckooFilter`].
#[derive(Clone, Debug, PartialEq)]
pub struct FilterInfo {
    /// Bytes of the backing bucket array, tail padding included.
    pub hashtable_size_bytes: usize,
    /// Fingerprint width in bits.
    pub bits_per_item: usize,
    /// High bits stored per fingerprint outside the codeword.
    pub bits_per_tag: usize,
    /// Bucket count; always a power of two.
    pub num_buckets: usize,
    /// Total fingerprint slots.
    pub capacity: usize,
    /// Stored items over capacity.
    pub load_factor: f64,
    /// Table bits spent per stored item.
    pub bits_per_key: f64,
    /// Stored items, the victim slot included.
    pub size: usize,
}

impl CuckooFilter {
    /// Constructs a new `CuckooFilter`.
    ///
    /// * `total_size`: number of keys the filter is sized for
    /// * `bits_per_item`: fingerprint width in bits, within `[5, 32]`;
    ///   see [`DEFAULT_BITS_PER_ITEM`]
    ///
    /// The bucket count is the next power of two fitting `total_size` at
    /// four slots per bucket, doubled when that would push the fill past the
    /// maximum load factor.
    ///
    /// Fails for invalid parameters.
    pub fn new(total_size: usize, bits_per_item: usize) -> Result<CuckooFilter, FilterError> {
        Self::with_seed(total_size, bits_per_item, rand::random())
    }

    /// Constructs a new `CuckooFilter` whose eviction choices come from a
    /// generator seeded with `seed`, so insertion behavior is reproducible.
    pub fn with_seed(
        total_size: usize,
        bits_per_item: usize,
        seed: u64,
    ) -> Result<CuckooFilter, FilterError> {
        if total_size < 1 {
            return Err(InvalidParameter {
                expected: "1 <= total_size",
                found: total_size.to_string(),
            });
        }
        if !(MIN_BITS_PER_ITEM..=MAX_BITS_PER_ITEM).contains(&bits_per_item) {
            return Err(InvalidParameter {
                expected: "5 <= bits_per_item <= 32",
                found: bits_per_item.to_string(),
            });
        }

        let mut num_buckets = (total_size / SLOTS_PER_BUCKET).next_power_of_two();
        let fill = total_size as f64 / (num_buckets * SLOTS_PER_BUCKET) as f64;
        if fill > MAX_LOAD_FACTOR {
            num_buckets <<= 1;
        }

        Ok(CuckooFilter {
            buckets: Buckets::new(num_buckets, bits_per_item),
            victim: Victim::default(),
            num_items: 0,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        })
    }

    /// Returns the bucket count of the table.
    pub fn num_buckets(&self) -> usize {
        self.buckets.num_buckets()
    }

    /// Returns the fingerprint width in bits.
    pub fn bits_per_item(&self) -> usize {
        self.buckets.bits_per_item()
    }

    /// Returns the total number of fingerprint slots.
    pub fn capacity(&self) -> usize {
        self.buckets.num_buckets() * SLOTS_PER_BUCKET
    }

    /// Reports size and occupancy statistics.
    pub fn info(&self) -> FilterInfo {
        let size = self.len();
        FilterInfo {
            hashtable_size_bytes: self.buckets.byte_len(),
            bits_per_item: self.buckets.bits_per_item(),
            bits_per_tag: self.buckets.bits_per_tag(),
            num_buckets: self.num_buckets(),
            capacity: self.capacity(),
            load_factor: size as f64 / self.capacity() as f64,
            bits_per_key: (self.buckets.byte_len() * 8) as f64 / size as f64,
            size,
        }
    }

    /// Derives the first candidate bucket and the fingerprint of a key: the
    /// high hash half picks the bucket, the low half the tag.
    fn index_and_tag(&self, key: &[u8]) -> (usize, u32) {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(key);
        let hash = hasher.finish();
        (
            self.index_from_hash((hash >> 32) as u32),
            self.tag_from_hash(hash as u32),
        )
    }

    fn index_from_hash(&self, hash: u32) -> usize {
        // the bucket count is a power of two
        hash as usize & (self.buckets.num_buckets() - 1)
    }

    /// A fingerprint is never 0; that value marks an empty slot.
    fn tag_from_hash(&self, hash: u32) -> u32 {
        let tag = hash & ((1u64 << self.buckets.bits_per_item()) - 1) as u32;
        if tag == 0 {
            1
        } else {
            tag
        }
    }

    /// The other candidate bucket. XOR with the mixed tag is an involution
    /// modulo a power-of-two bucket count, so either candidate derives the
    /// other.
    fn alt_index(&self, index: usize, tag: u32) -> usize {
        // 0x5bd1e995 is the multiplier from MurmurHash2
        self.index_from_hash(index as u32 ^ tag.wrapping_mul(0x5bd1_e995))
    }

    /// The relocation loop. Once a round has kicked a tag, the loop carries
    /// the evicted tag onward; after [`MAX_KICKS`] rounds the tag in hand
    /// goes to the victim slot.
    fn add_impl(&mut self, index: usize, tag: u32) {
        let mut cur_index = index;
        let mut cur_tag = tag;
        for count in 0..MAX_KICKS {
            match self.insert_tag(cur_index, cur_tag, count > 0) {
                Insert::Stored => {
                    self.num_items += 1;
                    return;
                }
                Insert::Evicted(old_tag) => cur_tag = old_tag,
                Insert::Full => {}
            }
            cur_index = self.alt_index(cur_index, cur_tag);
        }
        self.victim = Victim {
            index: cur_index,
            tag: cur_tag,
            used: true,
        };
    }

    /// Places `tag` in the first empty slot of bucket `index`. When the
    /// bucket is full and `kickout` is set, a uniformly random slot is
    /// evicted to make room.
    fn insert_tag(&mut self, index: usize, tag: u32, kickout: bool) -> Insert {
        let mut tags = self.buckets.read(index);
        for slot in tags.iter_mut() {
            if *slot == 0 {
                *slot = tag;
                self.buckets.write(index, tags);
                return Insert::Stored;
            }
        }
        if !kickout {
            return Insert::Full;
        }
        let slot = self.rng.next_u32() as usize & (SLOTS_PER_BUCKET - 1);
        let old_tag = tags[slot];
        tags[slot] = tag;
        self.buckets.write(index, tags);
        Insert::Evicted(old_tag)
    }

    /// Clears the first slot of bucket `index` holding `tag`.
    fn remove_tag(&mut self, index: usize, tag: u32) -> bool {
        let mut tags = self.buckets.read(index);
        match tags.iter().position(|&slot| slot == tag) {
            Some(slot) => {
                tags[slot] = 0;
                self.buckets.write(index, tags);
                true
            }
            None => false,
        }
    }

    /// Offers the victim back to the table after a delete freed a slot.
    /// Single shot: if the relocation loop exhausts again, the tag returns
    /// to the victim slot.
    fn absorb_victim(&mut self) {
        if self.victim.used {
            self.victim.used = false;
            let Victim { index, tag, .. } = self.victim;
            self.add_impl(index, tag);
        }
    }

    fn matches_victim(&self, i1: usize, i2: usize, tag: u32) -> bool {
        self.victim.used
            && self.victim.tag == tag
            && (self.victim.index == i1 || self.victim.index == i2)
    }
}

impl Filter for CuckooFilter {
    /// Adds `key` to the filter.
    ///
    /// Fails with [`FilterError::NotEnoughSpace`] while the victim slot is
    /// occupied; deleting an item makes the filter insertable again.
    fn add(&mut self, key: impl AsRef<[u8]>) -> Result<(), FilterError> {
        if self.victim.used {
            return Err(FilterError::NotEnoughSpace);
        }
        let (index, tag) = self.index_and_tag(key.as_ref());
        self.add_impl(index, tag);
        Ok(())
    }

    /// *Indicates* whether `key` is in the filter.
    ///
    /// May yield false positives, but never a false negative for a key that
    /// was added and not yet deleted.
    fn contains(&self, key: impl AsRef<[u8]>) -> bool {
        let (i1, tag) = self.index_and_tag(key.as_ref());
        let i2 = self.alt_index(i1, tag);
        debug_assert_eq!(i1, self.alt_index(i2, tag));
        self.matches_victim(i1, i2, tag)
            || self.buckets.read(i1).contains(&tag)
            || self.buckets.read(i2).contains(&tag)
    }

    /// Removes one occurrence of `key` from the filter.
    ///
    /// Fails with [`FilterError::NotFound`] when the fingerprint is in
    /// neither candidate bucket nor the victim slot.
    fn delete(&mut self, key: impl AsRef<[u8]>) -> Result<(), FilterError> {
        let (i1, tag) = self.index_and_tag(key.as_ref());
        let i2 = self.alt_index(i1, tag);
        if self.remove_tag(i1, tag) || self.remove_tag(i2, tag) {
            self.num_items -= 1;
            self.absorb_victim();
            Ok(())
        } else if self.matches_victim(i1, i2, tag) {
            self.victim.used = false;
            Ok(())
        } else {
            Err(FilterError::NotFound)
        }
    }

    /// Returns the number of stored items, the victim slot included.
    fn len(&self) -> usize {
        self.num_items + usize::from(self.victim.used)
    }

    /// Resets the filter to its empty state. The table geometry is kept.
    fn reset(&mut self) -> &mut Self {
        self.buckets.clear();
        self.victim = Victim::default();
        self.num_items = 0;
        self
    }

    /// Returns the expected false positive rate when filled to capacity:
    /// eight slots are compared against one fingerprint per query.
    fn error_rate(&self) -> f64 {
        (2.0 * SLOTS_PER_BUCKET as f64) / (1u64 << self.buckets.bits_per_item()) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_validates_parameters() {
        assert!(CuckooFilter::new(0, 16).is_err());
        assert!(CuckooFilter::new(100, 4).is_err());
        assert!(CuckooFilter::new(100, 33).is_err());
        assert!(CuckooFilter::new(100, MIN_BITS_PER_ITEM).is_ok());
        assert!(CuckooFilter::new(100, MAX_BITS_PER_ITEM).is_ok());
    }

    #[test]
    fn sizes_the_table_to_the_load_factor() {
        // 256 buckets would be 97.7% full, so the count doubles
        let filter = CuckooFilter::new(1_000, 16).unwrap();
        assert_eq!(filter.num_buckets(), 512);
        assert_eq!(filter.capacity(), 2_048);

        let tiny = CuckooFilter::new(3, 16).unwrap();
        assert_eq!(tiny.num_buckets(), 1);
    }

    #[test]
    fn no_false_negatives() {
        let mut filter = CuckooFilter::with_seed(2_000, 16, 7).unwrap();
        for i in 0..1_000u32 {
            filter.add(i.to_string()).unwrap();
        }
        for i in 0..1_000u32 {
            assert!(filter.contains(i.to_string()), "lost key {i}");
        }
    }

    #[test]
    fn counts_duplicates_up_to_deletion() {
        let mut filter = CuckooFilter::with_seed(1_024, 16, 11).unwrap();
        for _ in 0..5 {
            filter.add("x").unwrap();
        }
        assert_eq!(filter.len(), 5);

        for _ in 0..5 {
            filter.delete("x").unwrap();
        }
        assert_eq!(filter.len(), 0);
        assert!(matches!(filter.delete("x"), Err(FilterError::NotFound)));
    }

    #[test]
    fn size_tracks_adds_and_deletes() {
        let mut filter = CuckooFilter::with_seed(500, 13, 17).unwrap();
        let mut expected = 0usize;
        for i in 0..400u32 {
            filter.add(i.to_string()).unwrap();
            expected += 1;
        }
        for i in (0..400u32).step_by(3) {
            filter.delete(i.to_string()).unwrap();
            expected -= 1;
        }
        assert_eq!(filter.len(), expected);
    }

    #[test]
    fn fills_to_saturation_and_recovers() {
        let mut filter = CuckooFilter::with_seed(4_096, 16, 3).unwrap();
        let mut stored = Vec::new();
        let mut key = 0u32;
        loop {
            match filter.add(key.to_string()) {
                Ok(()) => stored.push(key),
                Err(error) => {
                    assert!(matches!(error, FilterError::NotEnoughSpace));
                    break;
                }
            }
            key += 1;
        }
        let full = filter.len();
        assert_eq!(full, stored.len());
        assert!(
            full as f64 >= 0.95 * filter.capacity() as f64,
            "stalled at {full} of {}",
            filter.capacity()
        );

        // deleting live keys shrinks the filter by exactly one per call and
        // eventually re-absorbs the victim, making inserts possible again
        for key in &stored[..50] {
            let before = filter.len();
            filter.delete(key.to_string()).unwrap();
            assert_eq!(filter.len(), before - 1);
        }
        filter.add("straggler").unwrap();
    }

    #[test]
    fn reset_empties_the_filter() {
        let mut filter = CuckooFilter::with_seed(1_000, 16, 5).unwrap();
        for i in 0..100u32 {
            filter.add(i.to_string()).unwrap();
        }
        assert_eq!(filter.len(), 100);

        filter.reset();
        assert_eq!(filter.len(), 0);
        for i in 0..100u32 {
            assert!(!filter.contains(i.to_string()));
        }

        // the filter is fully usable again
        filter.add("0").unwrap();
        assert!(filter.contains("0"));
    }

    #[test]
    fn false_positive_rate_stays_in_bounds() {
        let mut filter = CuckooFilter::with_seed(4_096, 13, 23).unwrap();
        for i in 0..filter.capacity() / 2 {
            filter.add(format!("member-{i}")).unwrap();
        }

        let trials = 100_000u32;
        let mut false_positives = 0u32;
        for i in 0..trials {
            if filter.contains(format!("other-{i}")) {
                false_positives += 1;
            }
        }
        let rate = f64::from(false_positives) / f64::from(trials);
        assert!(
            rate <= filter.error_rate(),
            "rate {rate} over {}",
            filter.error_rate()
        );
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn alt_index_is_an_involution(
            total_size in 1usize..100_000,
            bits_per_item in 5usize..=32,
            index_bits in any::<u32>(),
            tag_bits in any::<u32>(),
        ) {
            let filter = CuckooFilter::with_seed(total_size, bits_per_item, 0).unwrap();
            let index = index_bits as usize & (filter.num_buckets() - 1);
            let tag = filter.tag_from_hash(tag_bits);
            let alt = filter.alt_index(index, tag);
            prop_assert_eq!(filter.alt_index(alt, tag), index);
        }

        #[test]
        fn added_keys_are_always_contained(keys in prop::collection::vec(any::<u64>(), 1..500)) {
            let mut filter = CuckooFilter::with_seed(2_000, 16, 1).unwrap();
            for key in &keys {
                filter.add(key.to_le_bytes()).unwrap();
            }
            for key in &keys {
                prop_assert!(filter.contains(key.to_le_bytes()));
            }
        }
    }
}
