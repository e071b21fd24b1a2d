use squall_wire::{BitSet, ChunkBits};

#[test]
fn test_bitset_set_get_unset() {
    let mut bits = BitSet::<2>::new();
    assert!(!bits.get(0));
    assert!(bits.set(0));
    assert!(!bits.set(0));
    assert!(bits.get(0));

    assert!(bits.set(127));
    assert!(bits.get(127));
    assert!(bits.unset(127));
    assert!(!bits.unset(127));
    assert!(!bits.get(127));
}

#[test]
fn test_bitset_out_of_range() {
    let mut bits = BitSet::<1>::new();
    assert!(!bits.set(64));
    assert!(!bits.get(64));
}

#[test]
fn test_bitset_count_and_clear() {
    let mut bits = BitSet::<1>::new();
    for i in (0..64).step_by(3) {
        bits.set(i);
    }
    assert_eq!(bits.count_ones(), 22);
    bits.clear();
    assert_eq!(bits.count_ones(), 0);
}

#[test]
fn test_chunk_bits_completion() {
    let mut bits = ChunkBits::new(70);
    assert_eq!(bits.len(), 70);
    for i in 0..70 {
        assert!(!bits.is_complete());
        assert!(bits.set(i));
    }
    assert!(bits.is_complete());
    assert_eq!(bits.count_ones(), 70);
}

#[test]
fn test_chunk_bits_duplicate_set() {
    let mut bits = ChunkBits::new(4);
    assert!(bits.set(2));
    assert!(!bits.set(2));
    assert_eq!(bits.count_ones(), 1);
}

#[test]
fn test_chunk_bits_out_of_range() {
    let mut bits = ChunkBits::new(4);
    assert!(!bits.set(4));
    assert!(!bits.get(4));
}
