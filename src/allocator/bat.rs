//! Block allocation table
//!
//! One 8KB block of big-endian words:
//!
//! ```text
//! word 0  checksum
//! word 1  inverse checksum
//! word 2  update counter
//! word 3  free block count
//! word 4  last allocated block
//! word 5+ map, one entry per block from SYSTEM_BLOCKS upward
//! ```

use crate::checksum::checksum;
use crate::error::{CardError, Result};
use crate::header::{BLOCK_SIZE, SYSTEM_BLOCKS};
use byteorder::{BigEndian, ByteOrder};

/// Map entries in the table
pub const BAT_SIZE: u16 = 0xFFB;

/// Map value of an unallocated block
pub const BLOCK_FREE: u16 = 0x0000;

/// Map value terminating a chain; also returned when no free block exists
pub const CHAIN_END: u16 = 0xFFFF;

/// Bytes covered by the checksum, starting after the checksum pair
pub const BAT_CHECKSUM_LEN: usize = 0xFFE * 2;

const MAP_OFFSET: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAllocationTable {
    pub checksum: u16,
    pub checksum_inv: u16,
    pub update_counter: u16,
    free_blocks: u16,
    last_allocated: u16,
    map: Vec<u16>,
}

impl BlockAllocationTable {
    /// Fresh table for a card of `block_count` total blocks
    pub fn new(block_count: u16) -> Self {
        let mut bat = BlockAllocationTable {
            checksum: 0,
            checksum_inv: 0,
            update_counter: 0,
            free_blocks: block_count.saturating_sub(SYSTEM_BLOCKS),
            last_allocated: SYSTEM_BLOCKS - 1,
            map: vec![BLOCK_FREE; BAT_SIZE as usize],
        };
        bat.update_checksum();
        bat
    }

    pub fn free_blocks(&self) -> u16 {
        self.free_blocks
    }

    pub fn last_allocated(&self) -> u16 {
        self.last_allocated
    }

    /// Raw map entry for a block, if the block is addressable by the map
    pub fn entry(&self, block: u16) -> Option<u16> {
        map_index(block).and_then(|idx| self.map.get(idx).copied())
    }

    /// Next block in the chain after `block`
    pub fn next_block(&self, block: u16) -> Result<u16> {
        if block < SYSTEM_BLOCKS || block > BAT_SIZE - SYSTEM_BLOCKS {
            return Err(CardError::OutOfRange(block));
        }
        Ok(self.map[(block - SYSTEM_BLOCKS) as usize])
    }

    /// Circular scan for a free block
    ///
    /// Scans `[starting_block, max_block)` then wraps to
    /// `[SYSTEM_BLOCKS, starting_block)`. Returns [`CHAIN_END`] when the
    /// table reports no free blocks or none is found.
    pub fn next_free_block(&self, max_block: u16, starting_block: u16) -> u16 {
        if self.free_blocks == 0 {
            return CHAIN_END;
        }

        self.scan_free(max_block, starting_block)
            .next()
            .unwrap_or(CHAIN_END)
    }

    /// Allocate a chain of `count` blocks below `max_block`
    ///
    /// The scan resumes after the last allocated block so successive files
    /// rotate through the card. The free blocks are located before the map is
    /// touched; on failure the table is unchanged.
    pub fn allocate_blocks(&mut self, count: u16, max_block: u16) -> Result<u16> {
        if count == 0 || count > self.free_blocks {
            return Err(CardError::InsufficientSpace {
                needed: count,
                free: self.free_blocks,
            });
        }

        let blocks: Vec<u16> = self
            .scan_free(max_block, self.last_allocated.wrapping_add(1))
            .take(count as usize)
            .collect();

        if blocks.len() != count as usize {
            tracing::warn!(
                "Free count {} disagrees with map: only {} free blocks below {}",
                self.free_blocks,
                blocks.len(),
                max_block
            );
            return Err(CardError::InsufficientSpace {
                needed: count,
                free: blocks.len() as u16,
            });
        }

        for pair in blocks.windows(2) {
            self.set(pair[0], pair[1]);
        }
        let (first, last) = (blocks[0], blocks[blocks.len() - 1]);
        self.set(last, CHAIN_END);

        self.last_allocated = last;
        self.free_blocks -= count;

        Ok(first)
    }

    /// Walk a chain from `first` to its terminator
    ///
    /// Fails with `InvalidChain` on a free link, an out-of-range block, or a
    /// chain longer than `expected` (which also catches cycles).
    pub fn chain(&self, first: u16, expected: u16) -> Result<Vec<u16>> {
        let invalid = || CardError::InvalidChain { first, expected };

        let mut blocks = Vec::with_capacity(expected as usize);
        let mut current = first;

        while current != CHAIN_END {
            if current == BLOCK_FREE || blocks.len() >= expected as usize {
                return Err(invalid());
            }
            let next = self.next_block(current).map_err(|_| invalid())?;
            blocks.push(current);
            current = next;
        }

        if blocks.len() != expected as usize {
            return Err(invalid());
        }

        Ok(blocks)
    }

    /// Free a whole chain of exactly `expected` blocks
    pub fn clear(&mut self, first: u16, expected: u16) -> Result<()> {
        let blocks = self.chain(first, expected)?;

        for block in blocks {
            self.set(block, BLOCK_FREE);
        }
        self.free_blocks = self.free_blocks.saturating_add(expected);

        Ok(())
    }

    /// Free a single block, leaving the rest of its chain alone
    pub fn free_block(&mut self, block: u16) -> Result<()> {
        let idx = map_index(block).ok_or(CardError::OutOfRange(block))?;
        if self.map[idx] == BLOCK_FREE {
            tracing::warn!("Double-free detected for block {}", block);
            return Ok(());
        }
        self.map[idx] = BLOCK_FREE;
        self.free_blocks = self.free_blocks.saturating_add(1);
        Ok(())
    }

    pub fn compute_checksum(&self) -> (u16, u16) {
        checksum(&self.to_bytes()[4..4 + BAT_CHECKSUM_LEN])
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

        BigEndian::write_u16(&mut bytes[0..2], self.checksum);
        BigEndian::write_u16(&mut bytes[2..4], self.checksum_inv);
        BigEndian::write_u16(&mut bytes[4..6], self.update_counter);
        BigEndian::write_u16(&mut bytes[6..8], self.free_blocks);
        BigEndian::write_u16(&mut bytes[8..10], self.last_allocated);
        BigEndian::write_u16_into(&self.map, &mut bytes[MAP_OFFSET..]);

        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BLOCK_SIZE {
            return Err(CardError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Insufficient bytes for block allocation table",
            )));
        }

        let mut map = vec![0u16; BAT_SIZE as usize];
        BigEndian::read_u16_into(&bytes[MAP_OFFSET..BLOCK_SIZE], &mut map);

        Ok(BlockAllocationTable {
            checksum: BigEndian::read_u16(&bytes[0..2]),
            checksum_inv: BigEndian::read_u16(&bytes[2..4]),
            update_counter: BigEndian::read_u16(&bytes[4..6]),
            free_blocks: BigEndian::read_u16(&bytes[6..8]),
            last_allocated: BigEndian::read_u16(&bytes[8..10]),
            map,
        })
    }

    fn set(&mut self, block: u16, value: u16) {
        if let Some(idx) = map_index(block) {
            self.map[idx] = value;
        }
    }

    fn scan_free(&self, max_block: u16, starting_block: u16) -> impl Iterator<Item = u16> + '_ {
        let max = max_block.min(BAT_SIZE + SYSTEM_BLOCKS);
        let start = starting_block.max(SYSTEM_BLOCKS).min(max);

        (start..max)
            .chain(SYSTEM_BLOCKS..start)
            .filter(move |&block| self.map[(block - SYSTEM_BLOCKS) as usize] == BLOCK_FREE)
    }
}

fn map_index(block: u16) -> Option<usize> {
    if block < SYSTEM_BLOCKS || block >= BAT_SIZE + SYSTEM_BLOCKS {
        None
    } else {
        Some((block - SYSTEM_BLOCKS) as usize)
    }
}
