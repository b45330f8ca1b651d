use lsm_version::bloom::BloomFilter;
use lsm_version::bloom::builder::BloomFilterBuilder;

#[test]
fn empty_filter_contains_nothing() {
    let bf = BloomFilter::new(100, 0.01);
    assert!(!bf.may_contain(b"any_key"));
    assert!(!bf.may_contain(b""));
}

#[test]
fn inserted_keys_are_never_missed() {
    let mut bf = BloomFilter::new(1000, 0.01);
    for i in 0..1000 {
        bf.insert(format!("user-key-{i}").as_bytes());
    }
    for i in 0..1000 {
        assert!(bf.may_contain(format!("user-key-{i}").as_bytes()));
    }
}

#[test]
fn false_positive_rate_stays_near_target() {
    for fpr in [0.10, 0.05, 0.01, 0.001] {
        let n = 5000;
        let mut bf = BloomFilter::new(n, fpr);
        for i in 0..n {
            bf.insert(format!("present_{fpr}_{i}").as_bytes());
        }
        let false_positives = (0..n)
            .filter(|i| bf.may_contain(format!("absent_{fpr}_{i}").as_bytes()))
            .count();
        let actual = false_positives as f64 / n as f64;
        assert!(actual < fpr * 3.0, "fpr {fpr}: measured {actual}");
    }
}

#[test]
fn out_of_range_parameters_are_clamped() {
    let bf = BloomFilter::new(0, 0.0);
    assert!(bf.num_bits() >= 64);
    assert!(bf.num_hashes() >= 1);

    let loose = BloomFilter::new(100, 0.99);
    assert_eq!(loose.num_hashes(), BloomFilter::new(100, 0.5).num_hashes());
}

#[test]
fn builder_sizes_the_filter_for_distinct_keys() {
    let mut builder = BloomFilterBuilder::new(0.01);
    for key in [b"a".as_slice(), b"a", b"b", b"c", b"c"] {
        builder.add_key(key);
    }
    let filter = builder.build();
    assert_eq!(filter.num_bits(), BloomFilter::new(3, 0.01).num_bits());
    assert!(filter.may_contain(b"a"));
    assert!(filter.may_contain(b"b"));
    assert!(filter.may_contain(b"c"));
}

#[test]
fn binary_and_large_keys() {
    let mut bf = BloomFilter::new(100, 0.01);
    let binary = vec![0x00, 0x01, 0xFF, 0xFE];
    let large = vec![7u8; 1 << 20];
    bf.insert(&binary);
    bf.insert(&large);
    assert!(bf.may_contain(&binary));
    assert!(bf.may_contain(&large));
}
