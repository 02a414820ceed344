// Statistical and persistence properties of the filter family.

use rand::{Rng, SeedableRng};

use keysweep::filter::{
    BloomFilter, CascadingBloomFilter, CountingBloomFilter, PartitionedBloomFilter,
};

fn random_hashes(n: usize, seed: u64) -> Vec<[u8; 20]> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen()).collect()
}

#[test]
fn classic_filter_fp_rate_within_3x_of_target() {
    // 10^4 members at p = 0.01, probed with 10^5 non-members.
    let filter = BloomFilter::with_params(10_000, 0.01).unwrap();
    for hash in random_hashes(10_000, 1) {
        filter.add(&hash);
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(2);
    let mut false_positives = 0u32;
    for _ in 0..100_000 {
        let probe: [u8; 20] = rng.gen();
        if filter.query(&probe) {
            false_positives += 1;
        }
    }
    let observed = false_positives as f64 / 100_000.0;
    assert!(observed <= 0.03, "fp rate {observed} above 3x the 1% target");
}

#[test]
fn no_false_negatives_across_variants() {
    let members = random_hashes(5_000, 3);

    let classic = BloomFilter::with_params(5_000, 0.01).unwrap();
    let partitioned = PartitionedBloomFilter::new(5_000, 64, 0.01).unwrap();
    let mut cascade = CascadingBloomFilter::new(5_000, 3, 0.05).unwrap();
    let mut counting = CountingBloomFilter::new(5_000, 0.01, 4).unwrap();

    for hash in &members {
        classic.add(hash);
        partitioned.add(hash);
        cascade.add(hash);
        counting.add(hash);
    }
    for hash in &members {
        assert!(classic.query(hash));
        assert!(partitioned.query(hash));
        assert!(cascade.query(hash));
        assert!(counting.query(hash));
    }
}

#[test]
fn cascade_fp_is_product_of_levels() {
    // Three levels at p = 0.05 each: combined observed fp on 10^4 negatives
    // must come in far below a single level.
    let mut cascade = CascadingBloomFilter::new(10_000, 3, 0.05).unwrap();
    for hash in random_hashes(10_000, 5) {
        cascade.add(&hash);
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(6);
    let mut hits = 0u32;
    for _ in 0..10_000 {
        let probe: [u8; 20] = rng.gen();
        if cascade.query(&probe) {
            hits += 1;
        }
    }
    let observed = hits as f64 / 10_000.0;
    assert!(observed < 0.0125, "cascade fp {observed}, expected < 0.05^3 * 10");
}

#[test]
fn persisted_filter_answers_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("filter.blm");

    let original = BloomFilter::with_params(8_000, 0.005).unwrap();
    for hash in random_hashes(8_000, 7) {
        original.add(&hash);
    }
    original.save(&path).unwrap();
    let reloaded = BloomFilter::load(&path).unwrap().unwrap();

    assert_eq!(reloaded.num_bits(), original.num_bits());
    assert_eq!(reloaded.num_hashes(), original.num_hashes());
    // Same geometry and payload: every probe, member or not, must agree.
    let mut rng = rand::rngs::StdRng::seed_from_u64(8);
    for _ in 0..20_000 {
        let probe: [u8; 20] = rng.gen();
        assert_eq!(original.query(&probe), reloaded.query(&probe));
    }
    // And the digest used by checkpoints is stable across the round trip.
    assert_eq!(original.digest(), reloaded.digest());
}

#[test]
fn counting_filter_add_remove_restores_absence() {
    let mut counting = CountingBloomFilter::new(2_000, 0.01, 4).unwrap();
    let members = random_hashes(1_000, 9);
    for hash in &members {
        counting.add(hash);
    }
    // Remove half; the removed half must vanish, the kept half must stay.
    for hash in &members[..500] {
        assert!(counting.remove(hash));
    }
    for hash in &members[500..] {
        assert!(counting.query(hash), "kept member lost");
    }
    let gone = members[..500]
        .iter()
        .filter(|h| !counting.query(h))
        .count();
    // A few removed members may still collide into present counters, but the
    // bulk must read absent.
    assert!(gone >= 450, "only {gone}/500 removed members read absent");
}
