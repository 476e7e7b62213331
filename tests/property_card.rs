//! Property-based tests for allocation and chained I/O
//!
//! Uses proptest to verify invariants across random allocation patterns and
//! cursor positions

use memcard_rs::allocator::{BlockAllocationTable, BLOCK_FREE};
use memcard_rs::{
    Card, CardSize, CardSlot, Encoding, FixedClock, SeekOrigin, SramSettings, BLOCK_SIZE,
};
use proptest::prelude::*;
use std::collections::HashSet;
use tempfile::TempDir;

const CARD_BLOCKS: u16 = 2048;

proptest! {
    #[test]
    fn prop_allocate_then_clear_restores_free_count(
        counts in prop::collection::vec(1u16..64, 1..20)
    ) {
        let mut bat = BlockAllocationTable::new(CARD_BLOCKS);
        let initial = bat.free_blocks();

        let mut chains = Vec::new();
        let mut seen = HashSet::new();
        for &count in &counts {
            let first = bat.allocate_blocks(count, CARD_BLOCKS).unwrap();
            let chain = bat.chain(first, count).unwrap();

            // No block handed out twice
            for &block in &chain {
                prop_assert!(seen.insert(block), "Block {} allocated twice!", block);
            }
            chains.push((first, count, chain));
        }

        let used: u16 = counts.iter().sum();
        prop_assert_eq!(bat.free_blocks(), initial - used);

        for (first, count, chain) in chains.iter().rev() {
            let before = bat.free_blocks();
            bat.clear(*first, *count).unwrap();
            prop_assert_eq!(bat.free_blocks(), before + count);
            for &block in chain {
                prop_assert_eq!(bat.entry(block), Some(BLOCK_FREE));
            }
        }
        prop_assert_eq!(bat.free_blocks(), initial);

        // Checksums survive an encode/decode cycle
        bat.update_checksum();
        let decoded = BlockAllocationTable::from_bytes(&bat.to_bytes()).unwrap();
        prop_assert!(decoded.is_valid());
        prop_assert_eq!(decoded, bat);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_write_seek_back_read(
        start in 0usize..BLOCK_SIZE,
        data in prop::collection::vec(any::<u8>(), 1..3 * BLOCK_SIZE)
    ) {
        let dir = TempDir::new().unwrap();
        let mut card = Card::open(dir.path().join("prop.raw")).unwrap();
        card.set_clock(FixedClock(0));
        card.format(CardSlot::A, CardSize::Blocks59, Encoding::Ascii, &SramSettings::default())
            .unwrap();

        // Fragment the free space so the file's chain is not contiguous
        let holes: Vec<_> = (0..6)
            .map(|i| card.create_file(&format!("hole{}", i), 1).unwrap())
            .collect();
        for hole in holes.iter().step_by(2) {
            card.delete_file(hole).unwrap();
        }
        card.create_file("tail", 50 * BLOCK_SIZE).unwrap();

        let mut handle = card.create_file("data", 4 * BLOCK_SIZE).unwrap();
        let n = data.len() as i32;

        card.seek(&mut handle, start as i32, SeekOrigin::Begin).unwrap();
        prop_assert_eq!(card.write(&mut handle, &data).unwrap(), data.len());
        card.seek(&mut handle, -n, SeekOrigin::Current).unwrap();

        let mut buf = vec![0u8; data.len()];
        prop_assert_eq!(card.read(&mut handle, &mut buf).unwrap(), data.len());
        prop_assert_eq!(buf, data);
        prop_assert_eq!(card.tell(&handle), start as i32 + n);
    }
}
