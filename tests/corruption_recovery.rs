//! Redundant metadata recovery tests
//!
//! Damage the on-disk image between sessions and verify which copy the card
//! trusts on the next open

use memcard_rs::{
    Card, CardError, CardSize, CardSlot, CardState, Encoding, FixedClock, Slot, SramSettings,
    BLOCK_SIZE,
};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::TempDir;

const DIR_A: u64 = 1;
const DIR_B: u64 = 2;
const BAT_A: u64 = 3;
const BAT_B: u64 = 4;
const DIR_CHECKSUM: u64 = 0x1FFC;

fn format_card(path: &Path) -> Card {
    let mut card = Card::open(path).unwrap();
    card.set_clock(FixedClock(1));
    card.format(
        CardSlot::A,
        CardSize::Blocks59,
        Encoding::Ascii,
        &SramSettings::default(),
    )
    .unwrap();
    card
}

fn flip_byte(path: &Path, offset: u64) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.read_exact(&mut byte).unwrap();
    byte[0] ^= 0xFF;
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&byte).unwrap();
}

fn block_offset(block: u64) -> u64 {
    block * BLOCK_SIZE as u64
}

#[test]
fn test_corrupt_directory_a_selects_b() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("card.raw");

    {
        let mut card = format_card(&path);
        // Generation 1 lands in copy A
        card.create_file("newer", 1).unwrap();
        assert_eq!(card.current_directory(), Slot::A);
    }

    flip_byte(&path, block_offset(DIR_A) + DIR_CHECKSUM);

    let card = Card::open(&path).unwrap();
    assert!(card.is_valid());
    assert_eq!(card.current_directory(), Slot::B);
    assert_eq!(card.directory_generation(), 0);
    // Copy B predates the create
    assert!(matches!(card.open_file("newer"), Err(CardError::NotFound(_))));
}

#[test]
fn test_higher_counter_wins_in_either_slot() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("card.raw");

    {
        let mut card = format_card(&path);
        card.create_file("one", 1).unwrap();
    }
    {
        let card = Card::open(&path).unwrap();
        assert_eq!(card.current_directory(), Slot::A);
        assert_eq!(card.current_bat(), Slot::A);
        assert_eq!(card.directory_generation(), 1);
    }
    {
        let mut card = Card::open(&path).unwrap();
        card.create_file("two", 1).unwrap();
    }

    let card = Card::open(&path).unwrap();
    assert_eq!(card.current_directory(), Slot::B);
    assert_eq!(card.directory_generation(), 2);
    assert!(card.open_file("one").is_ok());
    assert!(card.open_file("two").is_ok());
}

#[test]
fn test_corrupt_bat_copy_falls_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("card.raw");

    {
        let mut card = format_card(&path);
        card.create_file("file", 2 * BLOCK_SIZE).unwrap();
    }

    // Free count of the newer BAT copy
    flip_byte(&path, block_offset(BAT_A) + 7);

    let card = Card::open(&path).unwrap();
    assert!(card.is_valid());
    assert_eq!(card.current_bat(), Slot::B);
    assert_eq!(card.current_directory(), Slot::A);
    assert_eq!(card.free_space().unwrap().blocks, 59);
}

#[test]
fn test_both_directory_copies_corrupt() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("card.raw");
    drop(format_card(&path));

    flip_byte(&path, block_offset(DIR_A) + 10);
    flip_byte(&path, block_offset(DIR_B) + 10);

    let mut card = Card::open(&path).unwrap();
    assert_eq!(card.state(), CardState::Corrupt);
    assert!(!card.is_valid());
    assert!(matches!(
        card.create_file("x", 1),
        Err(CardError::CorruptVolume)
    ));
    assert!(matches!(card.commit(), Err(CardError::CorruptVolume)));

    // Formatting recovers the image
    card.format(
        CardSlot::A,
        CardSize::Blocks59,
        Encoding::Ascii,
        &SramSettings::default(),
    )
    .unwrap();
    assert!(card.is_valid());
}

#[test]
fn test_both_bat_copies_corrupt() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("card.raw");
    drop(format_card(&path));

    flip_byte(&path, block_offset(BAT_A) + 100);
    flip_byte(&path, block_offset(BAT_B) + 100);

    let card = Card::open(&path).unwrap();
    assert!(!card.is_valid());
}

#[test]
fn test_corrupt_header() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("card.raw");
    drop(format_card(&path));

    flip_byte(&path, 20);

    let card = Card::open(&path).unwrap();
    assert_eq!(card.state(), CardState::Corrupt);
    assert!(!card.is_valid());
}

#[test]
fn test_damaged_copy_repaired_on_commit() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("card.raw");
    drop(format_card(&path));

    flip_byte(&path, block_offset(DIR_B) + DIR_CHECKSUM);
    {
        let card = Card::open(&path).unwrap();
        assert!(card.is_valid());
        assert_eq!(card.current_directory(), Slot::A);
    } // Commit rewrites both copies

    let image = std::fs::read(&path).unwrap();
    let a = &image[BLOCK_SIZE..2 * BLOCK_SIZE];
    let b = &image[2 * BLOCK_SIZE..3 * BLOCK_SIZE];
    assert_eq!(a, b);
}

#[test]
fn test_torn_commit_keeps_last_good_generation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("card.raw");

    {
        let mut card = format_card(&path);
        card.create_file("kept", 1).unwrap();
    }
    let before = std::fs::read(&path).unwrap();

    {
        let mut card = Card::open(&path).unwrap();
        card.create_file("torn", 1).unwrap();
    }

    // Simulate power loss mid-commit: the new directory (copy B) is half
    // written, the BAT copies are untouched
    let mut image = std::fs::read(&path).unwrap();
    let dir_b = 2 * BLOCK_SIZE;
    image[dir_b + BLOCK_SIZE / 2..dir_b + BLOCK_SIZE]
        .copy_from_slice(&before[dir_b + BLOCK_SIZE / 2..dir_b + BLOCK_SIZE]);
    let bats = 3 * BLOCK_SIZE..5 * BLOCK_SIZE;
    image[bats.clone()].copy_from_slice(&before[bats]);
    std::fs::write(&path, &image).unwrap();

    let card = Card::open(&path).unwrap();
    assert!(card.is_valid());
    assert_eq!(card.current_directory(), Slot::A);
    assert!(card.open_file("kept").is_ok());
    assert!(matches!(card.open_file("torn"), Err(CardError::NotFound(_))));
}
