//! File handles and owned file descriptions

use crate::entry::{FileEntry, FileName, GameCode, MakerCode, Permissions};
use serde::{Deserialize, Serialize};

/// Reference point for [`Card::seek`](crate::Card::seek)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Begin,
    Current,
    /// Measured back from the end of the file's last block
    End,
}

/// An open file on a card
///
/// Identifies the file by game, maker and name and carries the cursor. The
/// directory entry is looked up again on every operation, so a handle stays
/// usable across generation swaps and turns into `InvalidHandle` once its
/// file is deleted or renamed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    game: GameCode,
    maker: MakerCode,
    filename: FileName,
    offset: i32,
}

impl FileHandle {
    pub(crate) fn for_entry(entry: &FileEntry) -> Self {
        FileHandle {
            game: entry.game,
            maker: entry.maker,
            filename: entry.filename,
            offset: 0,
        }
    }

    pub fn game(&self) -> &GameCode {
        &self.game
    }

    pub fn maker(&self) -> &MakerCode {
        &self.maker
    }

    pub fn filename(&self) -> &FileName {
        &self.filename
    }

    /// File name with null padding removed
    pub fn name(&self) -> String {
        let end = self
            .filename
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.filename.len());
        String::from_utf8_lossy(&self.filename[..end]).into_owned()
    }

    /// Cursor position in bytes
    pub fn offset(&self) -> i32 {
        self.offset
    }

    pub(crate) fn set_offset(&mut self, offset: i32) {
        self.offset = offset;
    }

    pub(crate) fn advance(&mut self, len: usize) {
        self.offset = self.offset.wrapping_add(len as i32);
    }
}

/// Owned snapshot of a used directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub game: String,
    pub maker: String,
    pub first_block: u16,
    pub block_count: u16,
    /// Raw permission bits
    pub permissions: u8,
    pub copy_counter: i8,
    /// Seconds since 2000-01-01
    pub modified_time: u32,
}

impl FileInfo {
    pub fn permissions(&self) -> Permissions {
        Permissions::from_bits(self.permissions)
    }

    /// Allocated size in bytes
    pub fn size(&self) -> usize {
        self.block_count as usize * crate::header::BLOCK_SIZE
    }
}

impl From<&FileEntry> for FileInfo {
    fn from(entry: &FileEntry) -> Self {
        FileInfo {
            name: entry.name(),
            game: entry.game_code(),
            maker: entry.maker_code(),
            first_block: entry.first_block,
            block_count: entry.block_count,
            permissions: entry.permissions.bits(),
            copy_counter: entry.copy_counter,
            modified_time: entry.modified_time,
        }
    }
}
