//! Directory block: 127 file entries plus update counter and checksum pair

use crate::checksum::checksum;
use crate::entry::{FileEntry, FileName, GameCode, MakerCode, ENTRY_SIZE};
use crate::error::{CardError, Result};
use crate::header::BLOCK_SIZE;
use byteorder::{BigEndian, ByteOrder};

/// Entry slots per directory
pub const MAX_FILES: usize = 127;

/// Bytes of the directory covered by its checksum (0xFFE words)
pub const DIRECTORY_CHECKSUM_LEN: usize = 0xFFE * 2;

const ENTRIES_LEN: usize = MAX_FILES * ENTRY_SIZE;
const PADDING_LEN: usize = 0x3A;
const UPDATE_COUNTER_OFFSET: usize = ENTRIES_LEN + PADDING_LEN;
const CHECKSUM_OFFSET: usize = UPDATE_COUNTER_OFFSET + 2;
const CHECKSUM_INV_OFFSET: usize = CHECKSUM_OFFSET + 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    entries: Vec<FileEntry>,
    padding: [u8; PADDING_LEN],
    pub update_counter: u16,
    pub checksum: u16,
    pub checksum_inv: u16,
}

impl Directory {
    /// Empty directory: every slot free, counter 0, checksum current
    pub fn new() -> Self {
        let mut dir = Directory {
            entries: vec![FileEntry::free(); MAX_FILES],
            padding: [0xFF; PADDING_LEN],
            update_counter: 0,
            checksum: 0,
            checksum_inv: 0,
        };
        dir.update_checksum();
        dir
    }

    pub fn entry(&self, index: usize) -> Option<&FileEntry> {
        self.entries.get(index)
    }

    pub fn entry_mut(&mut self, index: usize) -> Option<&mut FileEntry> {
        self.entries.get_mut(index)
    }

    /// Used slots with their indices
    pub fn files(&self) -> impl Iterator<Item = (usize, &FileEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.is_free())
    }

    pub fn free_slots(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_free()).count()
    }

    /// Find a used slot by identity; `None` filters match any value
    pub fn get_file(
        &self,
        game: Option<&GameCode>,
        maker: Option<&MakerCode>,
        filename: &FileName,
    ) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.matches(game, maker, filename))
    }

    /// Claim the first free slot for the given identity
    pub fn first_free_file(
        &mut self,
        game: Option<GameCode>,
        maker: Option<MakerCode>,
        filename: FileName,
    ) -> Result<usize> {
        let index = self
            .entries
            .iter()
            .position(FileEntry::is_free)
            .ok_or(CardError::DirectoryFull(MAX_FILES))?;

        self.entries[index] = FileEntry::new(game, maker, filename);
        Ok(index)
    }

    /// Reset a slot to the free sentinel
    pub fn release(&mut self, index: usize) {
        if let Some(entry) = self.entries.get_mut(index) {
            *entry = FileEntry::free();
        }
    }

    pub fn compute_checksum(&self) -> (u16, u16) {
        checksum(&self.to_bytes()[..DIRECTORY_CHECKSUM_LEN])
    }

    pub fn update_checksum(&mut self) {
        let (sum, inverse) = self.compute_checksum();
        self.checksum = sum;
        self.checksum_inv = inverse;
    }

    pub fn is_valid(&self) -> bool {
        self.compute_checksum() == (self.checksum, self.checksum_inv)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; BLOCK_SIZE];

        for (chunk, entry) in bytes[..ENTRIES_LEN]
            .chunks_exact_mut(ENTRY_SIZE)
            .zip(self.entries.iter())
        {
            chunk.copy_from_slice(&entry.to_bytes());
        }
        bytes[ENTRIES_LEN..UPDATE_COUNTER_OFFSET].copy_from_slice(&self.padding);
        BigEndian::write_u16(
            &mut bytes[UPDATE_COUNTER_OFFSET..CHECKSUM_OFFSET],
            self.update_counter,
        );
        BigEndian::write_u16(
            &mut bytes[CHECKSUM_OFFSET..CHECKSUM_INV_OFFSET],
            self.checksum,
        );
        BigEndian::write_u16(&mut bytes[CHECKSUM_INV_OFFSET..BLOCK_SIZE], self.checksum_inv);

        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BLOCK_SIZE {
            return Err(CardError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Insufficient bytes for directory",
            )));
        }

        let entries = bytes[..ENTRIES_LEN]
            .chunks_exact(ENTRY_SIZE)
            .map(|chunk| {
                let mut raw = [0u8; ENTRY_SIZE];
                raw.copy_from_slice(chunk);
                FileEntry::from_bytes(&raw)
            })
            .collect();

        let mut padding = [0u8; PADDING_LEN];
        padding.copy_from_slice(&bytes[ENTRIES_LEN..UPDATE_COUNTER_OFFSET]);

        Ok(Directory {
            entries,
            padding,
            update_counter: BigEndian::read_u16(&bytes[UPDATE_COUNTER_OFFSET..CHECKSUM_OFFSET]),
            checksum: BigEndian::read_u16(&bytes[CHECKSUM_OFFSET..CHECKSUM_INV_OFFSET]),
            checksum_inv: BigEndian::read_u16(&bytes[CHECKSUM_INV_OFFSET..BLOCK_SIZE]),
        })
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{code, pad_filename};

    fn name(text: &str) -> FileName {
        pad_filename(text).unwrap()
    }

    #[test]
    fn test_layout_constants() {
        assert_eq!(ENTRIES_LEN, 8128);
        assert_eq!(UPDATE_COUNTER_OFFSET, 0x1FFA);
        assert_eq!(CHECKSUM_OFFSET, 0x1FFC);
        assert_eq!(CHECKSUM_INV_OFFSET, 0x1FFE);
        assert_eq!(DIRECTORY_CHECKSUM_LEN, CHECKSUM_OFFSET);
    }

    #[test]
    fn test_new_directory() {
        let dir = Directory::new();
        assert!(dir.is_valid());
        assert_eq!(dir.update_counter, 0);
        assert_eq!(dir.free_slots(), MAX_FILES);
        assert_eq!(dir.files().count(), 0);

        let bytes = dir.to_bytes();
        assert!(bytes[..UPDATE_COUNTER_OFFSET].iter().all(|&b| b == 0xFF));
        assert_eq!(&bytes[UPDATE_COUNTER_OFFSET..CHECKSUM_OFFSET], &[0, 0]);
    }

    #[test]
    fn test_claim_and_lookup() {
        let mut dir = Directory::new();
        let idx = dir
            .first_free_file(code::<4>("GM8E"), code::<2>("01"), name("save"))
            .unwrap();
        assert_eq!(idx, 0);

        assert_eq!(dir.get_file(None, None, &name("save")), Some(0));
        assert_eq!(
            dir.get_file(Some(b"GM8E"), Some(b"01"), &name("save")),
            Some(0)
        );
        assert_eq!(dir.get_file(Some(b"GALE"), None, &name("save")), None);
        assert_eq!(dir.get_file(None, None, &name("other")), None);

        let second = dir
            .first_free_file(None, None, name("other"))
            .unwrap();
        assert_eq!(second, 1);
        assert_eq!(dir.files().count(), 2);
    }

    #[test]
    fn test_release_reuses_slot() {
        let mut dir = Directory::new();
        dir.first_free_file(None, None, name("a")).unwrap();
        dir.first_free_file(None, None, name("b")).unwrap();

        dir.release(0);
        assert!(dir.entry(0).unwrap().is_free());
        assert_eq!(dir.get_file(None, None, &name("a")), None);

        let idx = dir.first_free_file(None, None, name("c")).unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn test_directory_full() {
        let mut dir = Directory::new();
        for i in 0..MAX_FILES {
            dir.first_free_file(None, None, name(&format!("file{}", i)))
                .unwrap();
        }
        assert_eq!(dir.free_slots(), 0);
        assert!(matches!(
            dir.first_free_file(None, None, name("overflow")),
            Err(CardError::DirectoryFull(MAX_FILES))
        ));
    }

    #[test]
    fn test_checksum_tracks_contents() {
        let mut dir = Directory::new();
        dir.first_free_file(None, None, name("a")).unwrap();
        assert!(!dir.is_valid());

        dir.update_checksum();
        assert!(dir.is_valid());

        dir.update_counter += 1;
        assert!(!dir.is_valid());
    }

    #[test]
    fn test_serialization_preserves_bytes() {
        let mut dir = Directory::new();
        dir.first_free_file(code::<4>("GM8E"), code::<2>("01"), name("a"))
            .unwrap();
        dir.update_counter = 7;
        dir.update_checksum();

        let bytes = dir.to_bytes();
        let decoded = Directory::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, dir);
        assert_eq!(decoded.to_bytes(), bytes);
        assert!(decoded.is_valid());
    }

    #[test]
    fn test_bit_flip_invalidates() {
        let mut bytes = Directory::new().to_bytes();
        bytes[100] ^= 0x10;
        assert!(!Directory::from_bytes(&bytes).unwrap().is_valid());
    }
}
