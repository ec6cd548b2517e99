//! # Scrim
//!
//! A cuckoo filter with semi-sorted buckets and a simple interface.
//! The filter can claim that a given entry is
//!
//! * definitely not represented in a set of entries, or
//! * might be represented in the set.
//!
//! Unlike a Bloom filter it also supports deleting entries, and the
//! semi-sort compression packs the low nibbles of each four-slot bucket
//! through a permutation code, saving about one bit per item over the plain
//! packed encoding.
//!
//! ## Scrim in Action
//! ```rust
//! use scrim::{CuckooFilter, Filter};
//!
//! // The number of items we want the `CuckooFilter` to store
//! let capacity = 100_000;
//! // The fingerprint width in bits; wider fingerprints trade memory
//! // for a lower false positive rate
//! let bits_per_item = 16;
//! let mut filter = CuckooFilter::new(capacity, bits_per_item)
//!     .expect("couldn't construct cuckoo filter.");
//!
//! // Keys are opaque byte strings
//! filter.add("a").expect("filter has space");
//! filter.add([0u8; 2]).expect("filter has space");
//! filter.add(7u64.to_le_bytes()).expect("filter has space");
//!
//! // Querying whether a `CuckooFilter` contains an entry never yields
//! // a false negative
//! assert!(filter.contains("a"));
//!
//! // But it can yield some false positives
//! let mut false_positives = 0;
//! for i in 0..1_000u32 {
//!     if filter.contains(i.to_le_bytes()) {
//!         false_positives += 1;
//!     }
//! }
//! println!("False positives: {false_positives}");
//!
//! // Entries can be deleted; deleting a live entry always succeeds
//! filter.delete("a").expect("the entry was added");
//!
//! // We can also get some properties of the `CuckooFilter` itself
//! let info = filter.info();
//! println!("Number of buckets: {}", info.num_buckets);
//! println!("Table bytes: {}", info.hashtable_size_bytes);
//! println!("The filter's expected error rate: {}", filter.error_rate());
//! ```

use thiserror::Error;

/// An error returned by a method provided by the `Filter` trait.
#[derive(Error, Debug, PartialEq)]
pub enum FilterError {
    /// The filter is past its capacity and cannot take further items.
    #[error("not enough space")]
    NotEnoughSpace,
    /// The item to delete was not in the filter.
    #[error("not found")]
    NotFound,
    /// A method is called with invalid parameters.
    #[error("invalid parameters (expected {expected:?}, found: {found:?})")]
    InvalidParameter {
        /// Expected parameter
        expected: &'static str,
        /// Provided parameter
        found: String,
    },
}

pub trait Filter {
    /// Adds `key` to the filter.
    fn add(&mut self, key: impl AsRef<[u8]>) -> Result<(), FilterError>;

    /// *Indicates* whether `key` is in the filter.
    fn contains(&self, key: impl AsRef<[u8]>) -> bool;

    /// Removes one occurrence of `key` from the filter.
    fn delete(&mut self, key: impl AsRef<[u8]>) -> Result<(), FilterError>;

    /// Returns the number of items the filter currently holds.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resets the filter to its empty state.
    fn reset(&mut self) -> &mut Self;

    /// Returns the filter's expected false positive rate.
    fn error_rate(&self) -> f64;
}

mod codec;
pub mod cuckoo;
pub use cuckoo::{CuckooFilter, FilterInfo};
