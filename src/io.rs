//! Disk I/O for card images

use crate::error::{CardError, Result};
use crate::header::BLOCK_SIZE;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Disk-backed card image
pub struct CardFile {
    file: File,
    path: PathBuf,
}

impl CardFile {
    /// Create a card image, truncating anything already at `path`
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        Ok(CardFile {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Open an existing card image for update
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        Ok(CardFile {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Open an existing card image without write access
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(&path)?;

        Ok(CardFile {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Read a whole block
    pub fn read_block(&mut self, block: u16) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; BLOCK_SIZE];
        self.read_at(block, 0, &mut buffer)?;
        Ok(buffer)
    }

    /// Write a whole block
    pub fn write_block(&mut self, block: u16, data: &[u8]) -> Result<()> {
        if data.len() != BLOCK_SIZE {
            return Err(CardError::InvalidGeometry(format!(
                "Block data must be exactly {} bytes, got {}",
                BLOCK_SIZE,
                data.len()
            )));
        }

        self.write_at(block, 0, data)
    }

    /// Read `buf.len()` bytes starting `offset` bytes into `block`
    pub fn read_at(&mut self, block: u16, offset: usize, buf: &mut [u8]) -> Result<()> {
        check_span(offset, buf.len())?;
        self.file.seek(SeekFrom::Start(position(block, offset)))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Write `data` starting `offset` bytes into `block`
    pub fn write_at(&mut self, block: u16, offset: usize, data: &[u8]) -> Result<()> {
        check_span(offset, data.len())?;
        self.file.seek(SeekFrom::Start(position(block, offset)))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Fill blocks `[first, end)` with `value`
    pub fn fill_blocks(&mut self, first: u16, end: u16, value: u8) -> Result<()> {
        let fill = vec![value; BLOCK_SIZE];
        self.file.seek(SeekFrom::Start(position(first, 0)))?;
        for _ in first..end {
            self.file.write_all(&fill)?;
        }
        Ok(())
    }

    /// Image size in bytes
    pub fn image_len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sync all writes to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

fn position(block: u16, offset: usize) -> u64 {
    block as u64 * BLOCK_SIZE as u64 + offset as u64
}

fn check_span(offset: usize, len: usize) -> Result<()> {
    if offset + len > BLOCK_SIZE {
        return Err(CardError::InvalidGeometry(format!(
            "Access of {} bytes at offset {} crosses a block boundary",
            len, offset
        )));
    }
    Ok(())
}
