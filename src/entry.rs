//! Directory entry record (64 bytes)
//!
//! ```text
//! 0x00  game id (4)          0x2C  icon address (4)
//! 0x04  maker id (2)         0x30  icon formats (2)
//! 0x06  reserved (1)         0x32  animation speeds (2)
//! 0x07  banner flags (1)     0x34  permissions (1)
//! 0x08  filename (32)        0x35  copy counter (1)
//! 0x28  modified time (4)    0x36  first block (2)
//!                            0x38  block count (2)
//!                            0x3A  reserved (2)
//!                            0x3C  comment address (4)
//! ```

use crate::error::{CardError, Result};
use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

pub const ENTRY_SIZE: usize = 0x40;
pub const GAME_LEN: usize = 4;
pub const MAKER_LEN: usize = 2;
pub const FILENAME_LEN: usize = 0x20;

/// Icon frames addressable through the 2-bit format and speed fields
pub const ICON_FRAMES: usize = 8;

/// First game id byte of an unused slot
pub const FREE_MARKER: u8 = 0xFF;

const BANNER_FORMAT_MASK: u8 = 0x03;
const BANNER_PING_PONG: u8 = 0x04;

pub type GameCode = [u8; GAME_LEN];
pub type MakerCode = [u8; MAKER_LEN];
pub type FileName = [u8; FILENAME_LEN];

/// Access permission bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Permissions(u8);

impl Permissions {
    pub const PUBLIC: u8 = 0x04;
    pub const NO_COPY: u8 = 0x08;
    pub const NO_MOVE: u8 = 0x10;

    pub fn from_bits(bits: u8) -> Self {
        Permissions(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    pub fn set(&mut self, flag: u8, enabled: bool) {
        if enabled {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }

    pub fn is_public(self) -> bool {
        self.contains(Self::PUBLIC)
    }

    pub fn can_copy(self) -> bool {
        !self.contains(Self::NO_COPY)
    }

    pub fn can_move(self) -> bool {
        !self.contains(Self::NO_MOVE)
    }
}

/// Banner and icon image format
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    None = 0,
    C8 = 1,
    Rgb5A3 = 2,
}

impl ImageFormat {
    /// Unknown values read as `None`
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::C8,
            2 => Self::Rgb5A3,
            _ => Self::None,
        }
    }
}

/// Per-frame icon animation speed
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnimationSpeed {
    End = 0,
    Fast = 1,
    Middle = 2,
    Slow = 3,
}

impl AnimationSpeed {
    pub fn from_u8(value: u8) -> Self {
        match value & 0x03 {
            0 => Self::End,
            1 => Self::Fast,
            2 => Self::Middle,
            _ => Self::Slow,
        }
    }
}

/// Parse a fixed-width game or maker code
///
/// Anything other than exactly `N` bytes yields `None`, which lookups treat
/// as "match any".
pub fn code<const N: usize>(text: &str) -> Option<[u8; N]> {
    text.as_bytes().try_into().ok()
}

/// Null-pad a file name to its on-card width
pub fn pad_filename(name: &str) -> Result<FileName> {
    let bytes = name.as_bytes();
    if bytes.len() > FILENAME_LEN {
        return Err(CardError::NameTooLong(bytes.len()));
    }

    let mut padded = [0u8; FILENAME_LEN];
    padded[..bytes.len()].copy_from_slice(bytes);
    Ok(padded)
}

/// One directory slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileEntry {
    pub game: GameCode,
    pub maker: MakerCode,
    pub reserved: u8,
    pub banner_flags: u8,
    pub filename: FileName,
    /// Seconds since 2000-01-01
    pub modified_time: u32,
    pub icon_address: u32,
    pub icon_formats: u16,
    pub animation_speeds: u16,
    pub permissions: Permissions,
    pub copy_counter: i8,
    pub first_block: u16,
    pub block_count: u16,
    pub reserved2: u16,
    pub comment_address: u32,
}

impl FileEntry {
    /// An unused slot: every byte 0xFF
    pub fn free() -> Self {
        Self::from_bytes(&[FREE_MARKER; ENTRY_SIZE])
    }

    /// A freshly claimed slot: zeroed, then stamped with identity and name
    ///
    /// A missing game or maker code leaves that field zeroed.
    pub fn new(game: Option<GameCode>, maker: Option<MakerCode>, filename: FileName) -> Self {
        let mut entry = Self::from_bytes(&[0u8; ENTRY_SIZE]);
        if let Some(game) = game {
            entry.game = game;
        }
        if let Some(maker) = maker {
            entry.maker = maker;
        }
        entry.filename = filename;
        entry
    }

    pub fn is_free(&self) -> bool {
        self.game[0] == FREE_MARKER
    }

    /// Identity match; `None` filters match any value
    pub fn matches(
        &self,
        game: Option<&GameCode>,
        maker: Option<&MakerCode>,
        filename: &FileName,
    ) -> bool {
        if self.is_free() {
            return false;
        }
        if game.is_some_and(|g| *g != self.game) {
            return false;
        }
        if maker.is_some_and(|m| *m != self.maker) {
            return false;
        }
        name_bytes(&self.filename) == name_bytes(filename)
    }

    /// File name with trailing null padding removed
    pub fn name(&self) -> String {
        String::from_utf8_lossy(name_bytes(&self.filename)).into_owned()
    }

    pub fn game_code(&self) -> String {
        String::from_utf8_lossy(&self.game).into_owned()
    }

    pub fn maker_code(&self) -> String {
        String::from_utf8_lossy(&self.maker).into_owned()
    }

    pub fn banner_format(&self) -> ImageFormat {
        ImageFormat::from_u8(self.banner_flags & BANNER_FORMAT_MASK)
    }

    pub fn set_banner_format(&mut self, format: ImageFormat) {
        self.banner_flags = (self.banner_flags & !BANNER_FORMAT_MASK) | format as u8;
    }

    pub fn animation_ping_pong(&self) -> bool {
        self.banner_flags & BANNER_PING_PONG != 0
    }

    pub fn set_animation_ping_pong(&mut self, enabled: bool) {
        if enabled {
            self.banner_flags |= BANNER_PING_PONG;
        } else {
            self.banner_flags &= !BANNER_PING_PONG;
        }
    }

    pub fn icon_format(&self, frame: usize) -> Result<ImageFormat> {
        let shift = frame_shift(frame)?;
        Ok(ImageFormat::from_u8(((self.icon_formats >> shift) & 0x3) as u8))
    }

    pub fn set_icon_format(&mut self, frame: usize, format: ImageFormat) -> Result<()> {
        let shift = frame_shift(frame)?;
        self.icon_formats = (self.icon_formats & !(0x3 << shift)) | ((format as u16) << shift);
        Ok(())
    }

    pub fn animation_speed(&self, frame: usize) -> Result<AnimationSpeed> {
        let shift = frame_shift(frame)?;
        Ok(AnimationSpeed::from_u8(
            ((self.animation_speeds >> shift) & 0x3) as u8,
        ))
    }

    pub fn set_animation_speed(&mut self, frame: usize, speed: AnimationSpeed) -> Result<()> {
        let shift = frame_shift(frame)?;
        self.animation_speeds =
            (self.animation_speeds & !(0x3 << shift)) | ((speed as u16) << shift);
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut bytes = [0u8; ENTRY_SIZE];

        bytes[0x00..0x04].copy_from_slice(&self.game);
        bytes[0x04..0x06].copy_from_slice(&self.maker);
        bytes[0x06] = self.reserved;
        bytes[0x07] = self.banner_flags;
        bytes[0x08..0x28].copy_from_slice(&self.filename);
        BigEndian::write_u32(&mut bytes[0x28..0x2C], self.modified_time);
        BigEndian::write_u32(&mut bytes[0x2C..0x30], self.icon_address);
        BigEndian::write_u16(&mut bytes[0x30..0x32], self.icon_formats);
        BigEndian::write_u16(&mut bytes[0x32..0x34], self.animation_speeds);
        bytes[0x34] = self.permissions.bits();
        bytes[0x35] = self.copy_counter as u8;
        BigEndian::write_u16(&mut bytes[0x36..0x38], self.first_block);
        BigEndian::write_u16(&mut bytes[0x38..0x3A], self.block_count);
        BigEndian::write_u16(&mut bytes[0x3A..0x3C], self.reserved2);
        BigEndian::write_u32(&mut bytes[0x3C..0x40], self.comment_address);

        bytes
    }

    pub fn from_bytes(bytes: &[u8; ENTRY_SIZE]) -> Self {
        let mut game = [0u8; GAME_LEN];
        game.copy_from_slice(&bytes[0x00..0x04]);
        let mut maker = [0u8; MAKER_LEN];
        maker.copy_from_slice(&bytes[0x04..0x06]);
        let mut filename = [0u8; FILENAME_LEN];
        filename.copy_from_slice(&bytes[0x08..0x28]);

        FileEntry {
            game,
            maker,
            reserved: bytes[0x06],
            banner_flags: bytes[0x07],
            filename,
            modified_time: BigEndian::read_u32(&bytes[0x28..0x2C]),
            icon_address: BigEndian::read_u32(&bytes[0x2C..0x30]),
            icon_formats: BigEndian::read_u16(&bytes[0x30..0x32]),
            animation_speeds: BigEndian::read_u16(&bytes[0x32..0x34]),
            permissions: Permissions::from_bits(bytes[0x34]),
            copy_counter: bytes[0x35] as i8,
            first_block: BigEndian::read_u16(&bytes[0x36..0x38]),
            block_count: BigEndian::read_u16(&bytes[0x38..0x3A]),
            reserved2: BigEndian::read_u16(&bytes[0x3A..0x3C]),
            comment_address: BigEndian::read_u32(&bytes[0x3C..0x40]),
        }
    }
}

/// Name up to the first NUL; bytes after it are ignored
fn name_bytes(name: &FileName) -> &[u8] {
    let end = name.iter().position(|&b| b == 0).unwrap_or(FILENAME_LEN);
    &name[..end]
}

fn frame_shift(frame: usize) -> Result<u32> {
    if frame >= ICON_FRAMES {
        return Err(CardError::OutOfRange(
            u16::try_from(frame).unwrap_or(u16::MAX),
        ));
    }
    Ok(2 * frame as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FileEntry {
        FileEntry::new(
            code::<4>("GM8E"),
            code::<2>("01"),
            pad_filename("MetroidPrime A").unwrap(),
        )
    }

    #[test]
    fn test_free_entry() {
        let entry = FileEntry::free();
        assert!(entry.is_free());
        assert!(entry.to_bytes().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_new_entry_is_zeroed() {
        let entry = sample();
        assert!(!entry.is_free());
        let bytes = entry.to_bytes();
        assert_eq!(&bytes[0..4], b"GM8E");
        assert_eq!(&bytes[4..6], b"01");
        assert_eq!(&bytes[8..22], b"MetroidPrime A");
        assert!(bytes[22..0x28].iter().all(|&b| b == 0));
        assert!(bytes[0x28..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_new_entry_without_codes() {
        let entry = FileEntry::new(None, None, pad_filename("x").unwrap());
        assert_eq!(entry.game, [0; 4]);
        assert_eq!(entry.maker, [0; 2]);
        assert!(!entry.is_free());
    }

    #[test]
    fn test_field_offsets() {
        let mut entry = sample();
        entry.modified_time = 0x0102_0304;
        entry.first_block = 0x0005;
        entry.block_count = 0x0003;
        entry.copy_counter = -1;
        entry.comment_address = 0xAABB_CCDD;

        let bytes = entry.to_bytes();
        assert_eq!(&bytes[0x28..0x2C], &[1, 2, 3, 4]);
        assert_eq!(&bytes[0x36..0x38], &[0, 5]);
        assert_eq!(&bytes[0x38..0x3A], &[0, 3]);
        assert_eq!(bytes[0x35], 0xFF);
        assert_eq!(&bytes[0x3C..0x40], &[0xAA, 0xBB, 0xCC, 0xDD]);

        assert_eq!(FileEntry::from_bytes(&bytes), entry);
    }

    #[test]
    fn test_matching() {
        let entry = sample();
        let name = pad_filename("MetroidPrime A").unwrap();

        assert!(entry.matches(None, None, &name));
        assert!(entry.matches(Some(b"GM8E"), Some(b"01"), &name));
        assert!(!entry.matches(Some(b"GALE"), None, &name));
        assert!(!entry.matches(None, Some(b"8P"), &name));
        assert!(!entry.matches(None, None, &pad_filename("MetroidPrime B").unwrap()));
        assert!(!FileEntry::free().matches(None, None, &[0xFF; FILENAME_LEN]));
    }

    #[test]
    fn test_matching_ignores_bytes_after_nul() {
        let mut entry = sample();
        entry.filename = pad_filename("AB").unwrap();
        entry.filename[3..7].copy_from_slice(b"junk");

        assert!(entry.matches(None, None, &pad_filename("AB").unwrap()));
        assert!(!entry.matches(None, None, &pad_filename("ABC").unwrap()));
        assert_eq!(entry.name(), "AB");
    }

    #[test]
    fn test_code_parsing() {
        assert_eq!(code::<4>("GM8E"), Some(*b"GM8E"));
        assert_eq!(code::<4>(""), None);
        assert_eq!(code::<4>("GM8"), None);
        assert_eq!(code::<2>("01"), Some(*b"01"));
    }

    #[test]
    fn test_filename_padding() {
        let full = "A".repeat(FILENAME_LEN);
        let padded = pad_filename(&full).unwrap();
        assert!(padded.iter().all(|&b| b == b'A'));

        let entry = FileEntry::new(None, None, padded);
        assert_eq!(entry.name(), full);

        assert!(matches!(
            pad_filename(&"A".repeat(FILENAME_LEN + 1)),
            Err(CardError::NameTooLong(33))
        ));
    }

    #[test]
    fn test_permissions() {
        let mut perms = Permissions::default();
        assert!(!perms.is_public());
        assert!(perms.can_copy());
        assert!(perms.can_move());

        perms.set(Permissions::PUBLIC, true);
        perms.set(Permissions::NO_COPY, true);
        assert_eq!(perms.bits(), 0x0C);
        assert!(perms.is_public());
        assert!(!perms.can_copy());

        perms.set(Permissions::NO_COPY, false);
        perms.set(Permissions::NO_MOVE, true);
        assert_eq!(perms.bits(), 0x14);
        assert!(perms.can_copy());
        assert!(!perms.can_move());
    }

    #[test]
    fn test_banner_flags() {
        let mut entry = sample();
        entry.set_banner_format(ImageFormat::Rgb5A3);
        entry.set_animation_ping_pong(true);
        assert_eq!(entry.banner_flags, 0x06);
        assert_eq!(entry.banner_format(), ImageFormat::Rgb5A3);

        entry.set_banner_format(ImageFormat::C8);
        assert_eq!(entry.banner_flags, 0x05);
        assert!(entry.animation_ping_pong());
    }

    #[test]
    fn test_icon_fields() {
        let mut entry = sample();
        entry.set_icon_format(0, ImageFormat::C8).unwrap();
        entry.set_icon_format(7, ImageFormat::Rgb5A3).unwrap();
        assert_eq!(entry.icon_formats, 0x8001);
        assert_eq!(entry.icon_format(7).unwrap(), ImageFormat::Rgb5A3);
        assert_eq!(entry.icon_format(3).unwrap(), ImageFormat::None);

        entry.set_animation_speed(1, AnimationSpeed::Slow).unwrap();
        entry.set_animation_speed(2, AnimationSpeed::Fast).unwrap();
        assert_eq!(entry.animation_speeds, 0b0001_1100);
        assert_eq!(entry.animation_speed(1).unwrap(), AnimationSpeed::Slow);

        assert!(matches!(
            entry.set_icon_format(ICON_FRAMES, ImageFormat::C8),
            Err(CardError::OutOfRange(8))
        ));
        assert!(matches!(
            entry.icon_format(0x1_0008),
            Err(CardError::OutOfRange(u16::MAX))
        ));
    }
}
