//! # memcard-rs - GameCube Memory Card Images
//!
//! `memcard-rs` reads and writes GameCube memory card images: a fixed layout
//! of 8KB blocks with checksummed, double-buffered metadata and files stored
//! as chains of data blocks.
//!
//! - **Redundant metadata**: two copies each of the directory and the block
//!   allocation table; the newer valid copy wins on load
//! - **Crash-consistent updates**: every create and delete builds a new
//!   generation in the stale copy, leaving the last good one intact
//! - **Bit-exact format**: big-endian records with paired 16-bit checksums
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use memcard_rs::{Card, CardSize, CardSlot, Encoding, Result, SeekOrigin, SramSettings};
//!
//! # fn main() -> Result<()> {
//! let mut card = Card::open("MemoryCardA.raw")?;
//! if !card.is_valid() {
//!     card.format(CardSlot::A, CardSize::Blocks2043, Encoding::Ascii, &SramSettings::default())?;
//! }
//!
//! card.set_current_game("GM8E");
//! card.set_current_maker("01");
//!
//! let mut save = card.create_file("Metroid Prime A", 0x6000)?;
//! card.write(&mut save, b"progress")?;
//!
//! card.seek(&mut save, 0, SeekOrigin::Begin)?;
//! let mut buf = [0u8; 8];
//! card.read(&mut save, &mut buf)?;
//!
//! // Metadata is committed on drop
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │ Card (open / format / commit, file API)        │
//! ├───────────────────────┬────────────────────────┤
//! │ Directory ×2          │ BlockAllocationTable ×2│
//! │ 127 × FileEntry       │ chained block map      │
//! ├───────────────────────┴────────────────────────┤
//! │ Header · checksum · CardFile (block I/O)       │
//! └────────────────────────────────────────────────┘
//! ```

pub mod allocator;
pub mod card;
pub mod checksum;
pub mod config;
pub mod directory;
pub mod entry;
pub mod error;
pub mod handle;
pub mod header;
pub mod io;
pub mod time;

pub use allocator::BlockAllocationTable;
pub use card::{Card, CardState, FreeSpace, Slot};
pub use config::{CardConfig, SramSettings};
pub use directory::{Directory, MAX_FILES};
pub use entry::{AnimationSpeed, FileEntry, ImageFormat, Permissions};
pub use error::{CardError, Result};
pub use handle::{FileHandle, FileInfo, SeekOrigin};
pub use header::{CardSize, CardSlot, Encoding, Header, BLOCK_SIZE, SYSTEM_BLOCKS};
pub use time::{FixedClock, SystemClock, TimeSource};
