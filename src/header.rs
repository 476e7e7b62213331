use crate::checksum::checksum;
use crate::error::{CardError, Result};
use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

/// Size of every block on the card, metadata and data alike
pub const BLOCK_SIZE: usize = 0x2000;

/// Header, two directory copies and two allocation table copies
pub const SYSTEM_BLOCKS: u16 = 5;

/// Blocks per megabit of card capacity
pub const MBIT_TO_BLOCKS: u16 = 0x10;

/// Bytes of the header covered by its checksum (0xFE words)
pub const HEADER_CHECKSUM_LEN: usize = 0xFE * 2;

const SERIAL_LEN: usize = 12;
const PADDING_LEN: usize = 468;
const HEADER_LEN: usize = 0x200;

/// Linear-congruential generator constants used for serial generation
const LCG_MULTIPLIER: u64 = 0x41C6_4E6D;
const LCG_INCREMENT: u64 = 0x3039;

/// Card capacity, named by the number of user blocks it provides
///
/// The discriminant is the capacity in megabits as stored in the header.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardSize {
    Blocks59 = 0x04,
    Blocks123 = 0x08,
    Blocks251 = 0x10,
    Blocks507 = 0x20,
    Blocks1019 = 0x40,
    Blocks2043 = 0x80,
}

impl CardSize {
    pub fn from_u16(value: u16) -> Result<Self> {
        match value {
            0x04 => Ok(Self::Blocks59),
            0x08 => Ok(Self::Blocks123),
            0x10 => Ok(Self::Blocks251),
            0x20 => Ok(Self::Blocks507),
            0x40 => Ok(Self::Blocks1019),
            0x80 => Ok(Self::Blocks2043),
            _ => Err(CardError::InvalidGeometry(format!(
                "unsupported card size {:#x} Mbit",
                value
            ))),
        }
    }

    /// Capacity in megabits
    pub fn mbits(self) -> u16 {
        self as u16
    }

    /// Total blocks on the card, system blocks included
    pub fn total_blocks(self) -> u16 {
        self.mbits() * MBIT_TO_BLOCKS
    }

    /// Blocks available to files
    pub fn user_blocks(self) -> u16 {
        self.total_blocks() - SYSTEM_BLOCKS
    }
}

impl Default for CardSize {
    fn default() -> Self {
        Self::Blocks2043
    }
}

/// Text encoding used for file names and comments
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    #[default]
    Ascii = 0,
    ShiftJis = 1,
}

impl Encoding {
    pub fn from_u16(value: u16) -> Result<Self> {
        match value {
            0 => Ok(Self::Ascii),
            1 => Ok(Self::ShiftJis),
            _ => Err(CardError::InvalidGeometry(format!(
                "unknown encoding {}",
                value
            ))),
        }
    }
}

/// Memory card slot the card was formatted in
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CardSlot {
    #[default]
    A = 0,
    B = 1,
}

impl CardSlot {
    pub fn from_u16(value: u16) -> Result<Self> {
        match value {
            0 => Ok(Self::A),
            1 => Ok(Self::B),
            _ => Err(CardError::InvalidGeometry(format!(
                "unknown device id {}",
                value
            ))),
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Card header (block 0)
///
/// Only the first 512 bytes carry fields; the remainder of the block is kept
/// verbatim so a loaded header writes back bit-exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Pseudo-random serial generated at format time
    pub serial: [u8; SERIAL_LEN],

    /// Format time in seconds since 2000-01-01
    pub format_time: u64,

    /// SRAM counter bias snapshot
    pub sram_bias: i32,

    /// SRAM language snapshot
    pub sram_language: u32,

    pub unknown: u32,

    /// 0 for slot A, 1 for slot B
    pub device_id: u16,

    /// Capacity in megabits
    pub size_mbits: u16,

    pub encoding: u16,

    padding: Vec<u8>,

    pub update_counter: u16,

    pub checksum: u16,

    pub checksum_inv: u16,

    tail: Vec<u8>,
}

impl Header {
    /// Create an erased header (all fields 0xFF, as on unwritten flash)
    pub fn erased() -> Self {
        Header {
            serial: [0xFF; SERIAL_LEN],
            format_time: u64::MAX,
            sram_bias: -1,
            sram_language: u32::MAX,
            unknown: u32::MAX,
            device_id: 0xFFFF,
            size_mbits: 0xFFFF,
            encoding: 0xFFFF,
            padding: vec![0xFF; PADDING_LEN],
            update_counter: 0xFFFF,
            checksum: 0xFFFF,
            checksum_inv: 0xFFFF,
            tail: vec![0xFF; BLOCK_SIZE - HEADER_LEN],
        }
    }

    /// Create a freshly formatted header
    ///
    /// The serial mixes the slot's flash id into an LCG stream seeded with
    /// `format_time`.
    pub fn format(
        slot: CardSlot,
        size: CardSize,
        encoding: Encoding,
        format_time: u64,
        flash_id: &[u8; SERIAL_LEN],
        sram_bias: i32,
        sram_language: u32,
    ) -> Self {
        let mut header = Self::erased();
        header.format_time = format_time;
        header.serial = generate_serial(format_time, flash_id);
        header.sram_bias = sram_bias;
        header.sram_language = sram_language;
        header.unknown = 0;
        header.device_id = slot as u16;
        header.size_mbits = size.mbits();
        header.encoding = encoding as u16;
        header.update_counter = 0;
        header.update_checksum();
        header
    }

    /// Total number of blocks described by the header, capped to what the
    /// allocation table can address
    pub fn max_block(&self) -> u16 {
        self.size_mbits
            .saturating_mul(MBIT_TO_BLOCKS)
            .min(crate::allocator::bat::BAT_SIZE + SYSTEM_BLOCKS)
    }

    pub fn card_size(&self) -> Result<CardSize> {
        CardSize::from_u16(self.size_mbits)
    }

    pub fn encoding(&self) -> Result<Encoding> {
        Encoding::from_u16(self.encoding)
    }

    pub fn slot(&self) -> Result<CardSlot> {
        CardSlot::from_u16(self.device_id)
    }

    /// Checksum pair over the covered region of the encoded header
    pub fn compute_checksum(&self) -> (u16, u16) {
        checksum(&self.to_bytes()[..HEADER_CHECKSUM_LEN])
    }

    pub fn update_checksum(&mut self) {
        let (sum, inverse) = self.compute_checksum();
        self.checksum = sum;
        self.checksum_inv = inverse;
    }

    /// Verify the stored checksum pair against the header contents
    pub fn is_valid(&self) -> bool {
        self.compute_checksum() == (self.checksum, self.checksum_inv)
    }

    /// Card identity digest
    ///
    /// XOR of the first four big-endian 64-bit words of the header.
    pub fn serial_digest(&self) -> u64 {
        let bytes = self.to_bytes();
        bytes[..32]
            .chunks_exact(8)
            .map(BigEndian::read_u64)
            .fold(0, |acc, word| acc ^ word)
    }

    /// Serialize header to a full block
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; BLOCK_SIZE];

        bytes[0..12].copy_from_slice(&self.serial);
        BigEndian::write_u64(&mut bytes[12..20], self.format_time);
        BigEndian::write_i32(&mut bytes[20..24], self.sram_bias);
        BigEndian::write_u32(&mut bytes[24..28], self.sram_language);
        BigEndian::write_u32(&mut bytes[28..32], self.unknown);
        BigEndian::write_u16(&mut bytes[32..34], self.device_id);
        BigEndian::write_u16(&mut bytes[34..36], self.size_mbits);
        BigEndian::write_u16(&mut bytes[36..38], self.encoding);
        bytes[38..38 + PADDING_LEN].copy_from_slice(&self.padding);
        BigEndian::write_u16(&mut bytes[506..508], self.update_counter);
        BigEndian::write_u16(&mut bytes[508..510], self.checksum);
        BigEndian::write_u16(&mut bytes[510..512], self.checksum_inv);
        bytes[HEADER_LEN..].copy_from_slice(&self.tail);

        bytes
    }

    /// Deserialize header from a full block
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BLOCK_SIZE {
            return Err(CardError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Insufficient bytes for header",
            )));
        }

        let mut serial = [0u8; SERIAL_LEN];
        serial.copy_from_slice(&bytes[0..12]);

        Ok(Header {
            serial,
            format_time: BigEndian::read_u64(&bytes[12..20]),
            sram_bias: BigEndian::read_i32(&bytes[20..24]),
            sram_language: BigEndian::read_u32(&bytes[24..28]),
            unknown: BigEndian::read_u32(&bytes[28..32]),
            device_id: BigEndian::read_u16(&bytes[32..34]),
            size_mbits: BigEndian::read_u16(&bytes[34..36]),
            encoding: BigEndian::read_u16(&bytes[36..38]),
            padding: bytes[38..38 + PADDING_LEN].to_vec(),
            update_counter: BigEndian::read_u16(&bytes[506..508]),
            checksum: BigEndian::read_u16(&bytes[508..510]),
            checksum_inv: BigEndian::read_u16(&bytes[510..512]),
            tail: bytes[HEADER_LEN..BLOCK_SIZE].to_vec(),
        })
    }
}

/// Generate a 12-byte card serial
///
/// Each byte is the slot's flash id byte plus the next LCG output; the
/// generator is stepped twice per byte and masked to 15 bits after the
/// second step.
pub fn generate_serial(seed: u64, flash_id: &[u8; SERIAL_LEN]) -> [u8; SERIAL_LEN] {
    let mut rand = seed;
    let mut serial = [0u8; SERIAL_LEN];

    for (byte, id) in serial.iter_mut().zip(flash_id.iter()) {
        rand = rand.wrapping_mul(LCG_MULTIPLIER).wrapping_add(LCG_INCREMENT) >> 16;
        *byte = id.wrapping_add(rand as u8);
        rand = rand.wrapping_mul(LCG_MULTIPLIER).wrapping_add(LCG_INCREMENT) >> 16;
        rand &= 0x7FFF;
    }

    serial
}
