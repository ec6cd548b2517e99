use std::sync::LazyLock;

pub const SLOTS_PER_BUCKET: usize = 4;

const CODEWORD_BITS: usize = 12;
const NIBBLE_BITS: usize = 4;
/// Number of weakly increasing nibble 4-tuples, C(16 + 3, 4).
const NUM_CODEWORDS: usize = 3876;

/// The semi-sort permutation code: a bijection between the sorted low-nibble
/// 4-tuples of a bucket and codewords in `[0, 3876)`.
///
/// `dec` maps a codeword to the packed tuple, `enc` inverts it. Entries of
/// `enc` at unsorted packed values are unused and stay zero. The tables are
/// deterministic, so a single process-wide copy serves every filter.
struct PermTables {
    dec: Vec<u16>,
    enc: Vec<u16>,
}

static PERM_TABLES: LazyLock<PermTables> = LazyLock::new(PermTables::build);

impl PermTables {
    fn build() -> Self {
        let mut tables = PermTables {
            dec: vec![0; NUM_CODEWORDS],
            enc: vec![0; 1 << 16],
        };
        let mut tuple = [0u8; SLOTS_PER_BUCKET];
        let mut codeword = 0;
        tables.fill(0, 0, &mut tuple, &mut codeword);
        debug_assert_eq!(codeword, NUM_CODEWORDS);
        tables
    }

    /// Enumerates the weakly increasing tuples in nested order, each level
    /// starting from the previous level's choice, and assigns codewords in
    /// sequence.
    fn fill(
        &mut self,
        base: u8,
        depth: usize,
        tuple: &mut [u8; SLOTS_PER_BUCKET],
        codeword: &mut usize,
    ) {
        for value in base..16 {
            tuple[depth] = value;
            if depth + 1 < SLOTS_PER_BUCKET {
                self.fill(value, depth + 1, tuple, codeword);
            } else {
                let packed = pack(tuple);
                self.dec[*codeword] = packed;
                self.enc[packed as usize] = *codeword as u16;
                *codeword += 1;
            }
        }
    }
}

/// Packs four nibbles into a `u16` in the wire order `a, c, b, d`.
fn pack(nibbles: &[u8; SLOTS_PER_BUCKET]) -> u16 {
    u16::from(nibbles[0] & 0x0f)
        | u16::from(nibbles[2] & 0x0f) << 4
        | u16::from(nibbles[1] & 0x0f) << 8
        | u16::from(nibbles[3] & 0x0f) << 12
}

fn unpack(packed: u16) -> [u8; SLOTS_PER_BUCKET] {
    [
        (packed & 0x0f) as u8,
        (packed >> 8 & 0x0f) as u8,
        (packed >> 4 & 0x0f) as u8,
        (packed >> 12) as u8,
    ]
}

/// Sorts the four tags by their low nibble with a fixed five-comparator
/// network. Slot order inside a bucket carries no meaning, so the reorder is
/// free.
fn sort_by_low_nibble(tags: &mut [u32; SLOTS_PER_BUCKET]) {
    for (a, b) in [(0, 2), (1, 3), (0, 1), (2, 3), (1, 2)] {
        if (tags[a] & 0x0f) > (tags[b] & 0x0f) {
            tags.swap(a, b);
        }
    }
}

/// Splits sorted tags into the low-nibble codeword and the per-slot high
/// bits (low nibble zeroed).
fn encode(mut tags: [u32; SLOTS_PER_BUCKET]) -> (u32, [u32; SLOTS_PER_BUCKET]) {
    sort_by_low_nibble(&mut tags);
    let mut lowbits = [0u8; SLOTS_PER_BUCKET];
    let mut highbits = [0u32; SLOTS_PER_BUCKET];
    for (slot, &tag) in tags.iter().enumerate() {
        lowbits[slot] = (tag & 0x0f) as u8;
        highbits[slot] = tag & 0xffff_fff0;
    }
    let codeword = PERM_TABLES.enc[pack(&lowbits) as usize];
    (u32::from(codeword), highbits)
}

/// Bit-packed bucket array.
///
/// Each bucket spans `(bits_per_item - 1) * 4` bits: a 12-bit codeword
/// carrying the four sorted low nibbles, then four runs of `bits_per_tag`
/// high bits, slot 0 lowest. Widths 5, 6, 7, 8, 9, 13 and 17 get
/// fixed-layout fast paths; everything else in `[5, 32]` goes through a
/// generic two-accumulator path. All multi-byte accesses assemble
/// little-endian, so the byte layout is host independent.
#[derive(Clone, Debug, PartialEq)]
pub struct Buckets {
    bits_per_item: usize,
    bits_per_tag: usize,
    bits_per_bucket: usize,
    bits_mask: u32,
    num_buckets: usize,
    data: Vec<u8>,
}

impl Buckets {
    pub fn new(num_buckets: usize, bits_per_item: usize) -> Self {
        debug_assert!(num_buckets.is_power_of_two());
        debug_assert!((5..=32).contains(&bits_per_item));
        let bits_per_tag = bits_per_item - NIBBLE_BITS;
        let bits_per_bucket = (bits_per_item - 1) * SLOTS_PER_BUCKET;
        // 7 bytes of tail padding keep the unaligned 64-bit loads in bounds
        let len = ((bits_per_bucket * num_buckets + 7) >> 3) + 7;
        Buckets {
            bits_per_item,
            bits_per_tag,
            bits_per_bucket,
            bits_mask: (((1u64 << bits_per_tag) - 1) as u32) << NIBBLE_BITS,
            num_buckets,
            data: vec![0; len],
        }
    }

    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    pub fn bits_per_item(&self) -> usize {
        self.bits_per_item
    }

    pub fn bits_per_tag(&self) -> usize {
        self.bits_per_tag
    }

    /// Bytes of the backing array, tail padding included.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Decodes bucket `i` into its four fingerprints. A zero fingerprint is
    /// an empty slot; slots come back in low-nibble order.
    pub fn read(&self, i: usize) -> [u32; SLOTS_PER_BUCKET] {
        let mask = self.bits_mask;
        let (codeword, mut tags) = match self.bits_per_item {
            5 => {
                // 1 high bit per tag, 16 bits per bucket
                let bits = u32::from(self.load_u16(i * 2));
                (
                    bits & 0x0fff,
                    [
                        bits >> 8 & mask,
                        bits >> 9 & mask,
                        bits >> 10 & mask,
                        bits >> 11 & mask,
                    ],
                )
            }
            6 => {
                // 20 bits per bucket; odd buckets sit a nibble into the word
                let bits = self.load_u32(20 * i >> 3);
                let align = ((i & 1) << 2) as u32;
                (
                    bits >> align & 0x0fff,
                    [
                        bits >> (8 + align) & mask,
                        bits >> (10 + align) & mask,
                        bits >> (12 + align) & mask,
                        bits >> (14 + align) & mask,
                    ],
                )
            }
            7 => {
                // 3 high bits per tag, 24 bits per bucket
                let bits = self.load_u32(i * 3);
                (
                    bits & 0x0fff,
                    [
                        bits >> 8 & mask,
                        bits >> 11 & mask,
                        bits >> 14 & mask,
                        bits >> 17 & mask,
                    ],
                )
            }
            8 => {
                // 28 bits per bucket; same parity split as width 6
                let bits = self.load_u32(28 * i >> 3);
                let align = ((i & 1) << 2) as u32;
                (
                    bits >> align & 0x0fff,
                    [
                        bits >> (8 + align) & mask,
                        bits >> (12 + align) & mask,
                        bits >> (16 + align) & mask,
                        bits >> (20 + align) & mask,
                    ],
                )
            }
            9 => {
                // 5 high bits per tag, 32 bits per bucket
                let bits = self.load_u32(i * 4);
                (
                    bits & 0x0fff,
                    [
                        bits >> 8 & mask,
                        bits >> 13 & mask,
                        bits >> 18 & mask,
                        bits >> 23 & mask,
                    ],
                )
            }
            13 => {
                // 9 high bits per tag, 48 bits per bucket
                let bits = self.load_u64(i * 6);
                (
                    (bits & 0x0fff) as u32,
                    [
                        (bits >> 8) as u32 & mask,
                        (bits >> 17) as u32 & mask,
                        (bits >> 26) as u32 & mask,
                        (bits >> 35) as u32 & mask,
                    ],
                )
            }
            17 => {
                // 13 high bits per tag, 64 bits per bucket
                let bits = self.load_u64(i * 8);
                (
                    (bits & 0x0fff) as u32,
                    [
                        (bits >> 8) as u32 & mask,
                        (bits >> 21) as u32 & mask,
                        (bits >> 34) as u32 & mask,
                        (bits >> 47) as u32 & mask,
                    ],
                )
            }
            _ => self.read_any(i),
        };

        let lowbits = unpack(PERM_TABLES.dec[codeword as usize]);
        for (tag, low) in tags.iter_mut().zip(lowbits) {
            *tag |= u32::from(low);
        }
        tags
    }

    /// Encodes and stores four fingerprints into bucket `i`. Every bit
    /// belonging to a neighboring bucket is preserved.
    pub fn write(&mut self, i: usize, tags: [u32; SLOTS_PER_BUCKET]) {
        let (codeword, high) = encode(tags);
        match self.bits_per_bucket {
            16 => {
                let bits = codeword | high[0] << 8 | high[1] << 9 | high[2] << 10 | high[3] << 11;
                self.store_u16(i * 2, bits as u16);
            }
            20 => {
                let at = 20 * i >> 3;
                let mut bits = self.load_u32(at);
                if i & 1 == 0 {
                    bits &= 0xfff0_0000;
                    bits |= codeword | high[0] << 8 | high[1] << 10 | high[2] << 12 | high[3] << 14;
                } else {
                    bits &= 0xff00_000f;
                    bits |=
                        codeword << 4 | high[0] << 12 | high[1] << 14 | high[2] << 16 | high[3] << 18;
                }
                self.store_u32(at, bits);
            }
            24 => {
                let at = i * 3;
                let mut bits = self.load_u32(at) & 0xff00_0000;
                bits |= codeword | high[0] << 8 | high[1] << 11 | high[2] << 14 | high[3] << 17;
                self.store_u32(at, bits);
            }
            28 => {
                let at = 28 * i >> 3;
                let mut bits = self.load_u32(at);
                if i & 1 == 0 {
                    bits &= 0xf000_0000;
                    bits |= codeword | high[0] << 8 | high[1] << 12 | high[2] << 16 | high[3] << 20;
                } else {
                    bits &= 0x0000_000f;
                    bits |=
                        codeword << 4 | high[0] << 12 | high[1] << 16 | high[2] << 20 | high[3] << 24;
                }
                self.store_u32(at, bits);
            }
            32 => {
                let bits = codeword | high[0] << 8 | high[1] << 13 | high[2] << 18 | high[3] << 23;
                self.store_u32(i * 4, bits);
            }
            48 => {
                let at = i * 6;
                let mut bits = self.load_u64(at) & 0xffff_0000_0000_0000;
                bits |= u64::from(codeword)
                    | u64::from(high[0]) << 8
                    | u64::from(high[1]) << 17
                    | u64::from(high[2]) << 26
                    | u64::from(high[3]) << 35;
                self.store_u64(at, bits);
            }
            64 => {
                let bits = u64::from(codeword)
                    | u64::from(high[0]) << 8
                    | u64::from(high[1]) << 21
                    | u64::from(high[2]) << 34
                    | u64::from(high[3]) << 47;
                self.store_u64(i * 8, bits);
            }
            _ => self.write_any(i, codeword, high),
        }
    }

    /// Generic decode. The bucket starts at bit `bits_per_bucket * i` of the
    /// stream; a 124-bit bucket shifted by the byte remainder spans at most
    /// 16 bytes, so two accumulators cover it.
    fn read_any(&self, i: usize) -> (u32, [u32; SLOTS_PER_BUCKET]) {
        let bit = self.bits_per_bucket * i;
        let base = bit >> 3;
        let rshift = bit & 7;
        let bytes = (rshift + self.bits_per_bucket + 7) >> 3;

        let mut lo = 0u64;
        let mut hi = 0u64;
        for k in 0..bytes {
            let byte = u64::from(self.data[base + k]);
            if k < 8 {
                lo |= byte << (k * 8);
            } else {
                hi |= byte << ((k - 8) * 8);
            }
        }

        let codeword = (lo >> rshift) as u32 & 0x0fff;
        let mut tags = [0u32; SLOTS_PER_BUCKET];
        for (slot, tag) in tags.iter_mut().enumerate() {
            // high bits of slot k sit at bucket bit 12 + k * bits_per_tag,
            // landing at tag bit 4 after the shift
            let offset = rshift + CODEWORD_BITS - NIBBLE_BITS + slot * self.bits_per_tag;
            let from_lo = if offset < 64 { (lo >> offset) as u32 } else { 0 };
            let from_hi = if offset < 64 {
                (hi << (64 - offset)) as u32
            } else {
                (hi >> (offset - 64)) as u32
            };
            *tag = (from_lo | from_hi) & self.bits_mask;
        }
        (codeword, tags)
    }

    /// Generic encode, mirroring [`Buckets::read_any`]. Only the first and
    /// last byte of the span can hold neighbor bits; those are masked into
    /// the accumulators before the bucket is laid down.
    fn write_any(&mut self, i: usize, codeword: u32, high: [u32; SLOTS_PER_BUCKET]) {
        let bit = self.bits_per_bucket * i;
        let base = bit >> 3;
        let rshift = bit & 7;
        let lshift = (rshift + self.bits_per_bucket) & 7;
        let bytes = (rshift + self.bits_per_bucket + 7) >> 3;

        let head_mask = if rshift == 0 { 0 } else { 0xffu8 >> (8 - rshift) };
        let tail_mask = if lshift == 0 { 0 } else { 0xffu8 << lshift };
        let mut lo = u64::from(self.data[base] & head_mask);
        let mut hi = 0u64;
        let end = bytes - 1;
        let tail = u64::from(self.data[base + end] & tail_mask);
        if bytes > 8 {
            hi |= tail << ((end - 8) * 8);
        } else {
            lo |= tail << (end * 8);
        }

        lo |= u64::from(codeword) << rshift;
        for (slot, &bits) in high.iter().enumerate() {
            let offset = rshift + CODEWORD_BITS - NIBBLE_BITS + slot * self.bits_per_tag;
            if offset < 64 {
                lo |= u64::from(bits) << offset;
                // bits pushed past the first accumulator carry into the second
                hi |= u64::from(bits) >> (64 - offset);
            } else {
                hi |= u64::from(bits) << (offset - 64);
            }
        }

        for k in 0..bytes {
            self.data[base + k] = if k < 8 {
                (lo >> (k * 8)) as u8
            } else {
                (hi >> ((k - 8) * 8)) as u8
            };
        }
    }

    fn load_u16(&self, at: usize) -> u16 {
        u16::from_le_bytes(self.data[at..at + 2].try_into().unwrap())
    }

    fn load_u32(&self, at: usize) -> u32 {
        u32::from_le_bytes(self.data[at..at + 4].try_into().unwrap())
    }

    fn load_u64(&self, at: usize) -> u64 {
        u64::from_le_bytes(self.data[at..at + 8].try_into().unwrap())
    }

    fn store_u16(&mut self, at: usize, value: u16) {
        self.data[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn store_u32(&mut self, at: usize, value: u32) {
        self.data[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn store_u64(&mut self, at: usize, value: u64) {
        self.data[at..at + 8].copy_from_slice(&value.to_le_bytes());
    }
}
