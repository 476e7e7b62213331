//! Block allocation for the card's data region
//!
//! Files occupy chains of 8KB blocks linked through the block allocation
//! table (BAT). Blocks in a chain are ordered but not necessarily
//! contiguous on the card:
//!
//! ```text
//! first_block ─▶ map[first] ─▶ map[next] ─▶ ... ─▶ 0xFFFF
//! ```
//!
//! A map entry of 0 marks a free block.

pub mod bat;

pub use bat::{BlockAllocationTable, BAT_SIZE, BLOCK_FREE, CHAIN_END};
