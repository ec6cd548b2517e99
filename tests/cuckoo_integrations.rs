#[cfg(test)]
mod tests {
    use scrim::{CuckooFilter, Filter, FilterError};

    #[test]
    fn test_it_works() {
        let mut filter =
            CuckooFilter::new(1_000, 16).expect("couldn't construct cuckoo filter.");

        filter.add("foo").expect("filter has space");
        filter.add("bar").expect("filter has space");
        filter.add("baz").expect("filter has space");

        assert!(filter.contains("foo") == true);
        assert!(filter.contains("bar") == true);
        assert!(filter.contains("baz") == true);
        assert_eq!(filter.len(), 3);

        filter.delete("foo").expect("foo was added");
        assert_eq!(filter.len(), 2);
        assert!(filter.contains("bar") == true);
        assert!(filter.contains("baz") == true);

        assert_eq!(filter.delete("never added"), Err(FilterError::NotFound));
    }

    #[test]
    fn test_mixed_key_types() {
        let mut filter =
            CuckooFilter::new(1_003, 16).expect("couldn't construct cuckoo filter.");
        let a = "a";
        let b = Vec::from([1u8, 2, 3]);
        let c = [0u8; 2];

        let inserts = 1_000u32;
        for i in 0..inserts {
            filter.add(i.to_le_bytes()).expect("filter has space");
        }

        filter.add(a).expect("filter has space");
        filter.add(&b).expect("filter has space");
        filter.add(c).expect("filter has space");

        assert!(filter.contains(a) == true);
        assert!(filter.contains(b) == true);
        assert!(filter.contains(c) == true);
        for i in 0..inserts {
            assert!(filter.contains(i.to_le_bytes()) == true);
        }
        assert_eq!(filter.len(), inserts as usize + 3);
    }

    #[test]
    fn test_info_reports_geometry() {
        let mut filter =
            CuckooFilter::new(1_000, 16).expect("couldn't construct cuckoo filter.");
        for i in 0..1_000u32 {
            filter.add(i.to_le_bytes()).expect("filter has space");
        }

        let info = filter.info();
        assert_eq!(info.bits_per_item, 16);
        assert_eq!(info.bits_per_tag, 12);
        assert_eq!(info.num_buckets, 512);
        assert_eq!(info.capacity, 2_048);
        assert_eq!(info.size, 1_000);
        // 60 bits per bucket over 512 buckets, plus the 7-byte read tail
        assert_eq!(info.hashtable_size_bytes, 3_847);
        assert!((info.load_factor - 1_000.0 / 2_048.0).abs() < f64::EPSILON);
        assert!(info.bits_per_key > 0.0);
    }
}
