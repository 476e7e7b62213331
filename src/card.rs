//! Card: header, redundant directory and allocation table copies, file API
//!
//! ```text
//! block 0   header
//! block 1   directory copy A      block 3   BAT copy A
//! block 2   directory copy B      block 4   BAT copy B
//! block 5+  data, chained through the current BAT
//! ```
//!
//! Each metadata pair has a current copy and a previous copy. Mutating
//! operations first advance the generation: the current copy is cloned with
//! its update counter bumped into the previous slot, and that slot becomes
//! current. The image therefore always holds the last good generation next
//! to the one being built.

use crate::allocator::{BlockAllocationTable, CHAIN_END};
use crate::config::{CardConfig, SramSettings};
use crate::directory::{Directory, MAX_FILES};
use crate::entry::{
    code, pad_filename, AnimationSpeed, FileEntry, FileName, GameCode, ImageFormat, MakerCode,
    Permissions,
};
use crate::error::{CardError, Result};
use crate::handle::{FileHandle, FileInfo, SeekOrigin};
use crate::header::{CardSize, CardSlot, Encoding, Header, BLOCK_SIZE, SYSTEM_BLOCKS};
use crate::io::CardFile;
use crate::time::{SystemClock, TimeSource};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const HEADER_BLOCK: u16 = 0;
const DIRECTORY_BLOCKS: [u16; 2] = [1, 2];
const BAT_BLOCKS: [u16; 2] = [3, 4];

/// One of the two physical copies of a redundant metadata block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub fn index(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }

    pub fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }
}

/// Load state of a card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    /// No image exists at the path yet
    Fresh,
    /// Image read and at least one copy of each metadata pair is valid
    Loaded,
    /// Image unreadable or short, header invalid, or both copies of a pair invalid
    Corrupt,
}

/// Remaining capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSpace {
    pub blocks: u16,
    pub files: usize,
}

/// A memory card image
///
/// Metadata changes live in memory until [`Card::commit`] (or drop) writes
/// them out; file data is written through immediately.
pub struct Card {
    path: PathBuf,
    file: Option<CardFile>,
    state: CardState,
    header: Header,
    dirs: [Directory; 2],
    bats: [BlockAllocationTable; 2],
    current_dir: Slot,
    current_bat: Slot,
    game: Option<GameCode>,
    maker: Option<MakerCode>,
    clock: Box<dyn TimeSource>,
}

impl Card {
    fn unloaded(path: &Path) -> Self {
        Card {
            path: path.to_path_buf(),
            file: None,
            state: CardState::Fresh,
            header: Header::erased(),
            dirs: [Directory::new(), Directory::new()],
            bats: [
                BlockAllocationTable::new(SYSTEM_BLOCKS),
                BlockAllocationTable::new(SYSTEM_BLOCKS),
            ],
            current_dir: Slot::B,
            current_bat: Slot::B,
            game: None,
            maker: None,
            clock: Box::new(SystemClock),
        }
    }

    /// Open the card image at `path`
    ///
    /// I/O failures never surface here. A missing image yields a fresh card;
    /// one that cannot be opened or read yields a corrupt card. Neither is
    /// valid until formatted. The image is opened for writing only after it
    /// loads, so a read-only image still opens as a valid card.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut card = Card::unloaded(path.as_ref());

        let mut file = match CardFile::open_read_only(&card.path) {
            Ok(file) => file,
            Err(CardError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                tracing::info!("No card image at {}, starting fresh", card.path.display());
                return Ok(card);
            }
            Err(e) => {
                tracing::warn!("Cannot open card image {}: {}", card.path.display(), e);
                card.state = CardState::Corrupt;
                return Ok(card);
            }
        };

        if let Err(e) = card.load(&mut file) {
            tracing::warn!("Cannot read card image {}: {}", card.path.display(), e);
            card.state = CardState::Corrupt;
            return Ok(card);
        }

        if card.state == CardState::Loaded {
            match CardFile::open(&card.path) {
                Ok(writable) => file = writable,
                Err(e) => tracing::warn!(
                    "Card image {} is read-only, changes will not be saved: {}",
                    card.path.display(),
                    e
                ),
            }
        }

        card.file = Some(file);
        Ok(card)
    }

    /// Open a card and apply the configured game and maker filter
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: &CardConfig) -> Result<Self> {
        let mut card = Card::open(path)?;
        card.game = config.game_code();
        card.maker = config.maker_code();
        Ok(card)
    }

    fn load(&mut self, file: &mut CardFile) -> Result<()> {
        let header = Header::from_bytes(&file.read_block(HEADER_BLOCK)?)?;
        let dirs = [
            Directory::from_bytes(&file.read_block(DIRECTORY_BLOCKS[0])?)?,
            Directory::from_bytes(&file.read_block(DIRECTORY_BLOCKS[1])?)?,
        ];
        let bats = [
            BlockAllocationTable::from_bytes(&file.read_block(BAT_BLOCKS[0])?)?,
            BlockAllocationTable::from_bytes(&file.read_block(BAT_BLOCKS[1])?)?,
        ];

        let dir_valid = [dirs[0].is_valid(), dirs[1].is_valid()];
        let bat_valid = [bats[0].is_valid(), bats[1].is_valid()];
        let current_dir = select_current(dir_valid, [dirs[0].update_counter, dirs[1].update_counter]);
        let current_bat = select_current(bat_valid, [bats[0].update_counter, bats[1].update_counter]);

        self.header = header;
        self.dirs = dirs;
        self.bats = bats;
        self.state = CardState::Corrupt;

        if !self.header.is_valid() {
            tracing::warn!("Header checksum mismatch in {}", self.path.display());
            return Ok(());
        }
        if let Err(e) = self.header.card_size() {
            tracing::warn!("Header of {} is unusable: {}", self.path.display(), e);
            return Ok(());
        }

        let expected_len = self.header.max_block() as u64 * BLOCK_SIZE as u64;
        if file.image_len()? < expected_len {
            tracing::warn!(
                "Card image {} is shorter than its {} blocks",
                self.path.display(),
                self.header.max_block()
            );
            return Ok(());
        }

        let (Some(current_dir), Some(current_bat)) = (current_dir, current_bat) else {
            tracing::warn!(
                "No valid directory or allocation table in {}",
                self.path.display()
            );
            return Ok(());
        };

        repair(&mut self.dirs, current_dir, dir_valid, "Directory");
        repair(&mut self.bats, current_bat, bat_valid, "Allocation table");
        self.current_dir = current_dir;
        self.current_bat = current_bat;
        self.state = CardState::Loaded;

        tracing::info!(
            "Opened card {} (directory {:?} gen {}, allocation table {:?} gen {})",
            self.path.display(),
            current_dir,
            self.dir().update_counter,
            current_bat,
            self.bat().update_counter
        );

        Ok(())
    }

    /// Initialize a blank image at the card's path, replacing any content
    pub fn format(
        &mut self,
        slot: CardSlot,
        size: CardSize,
        encoding: Encoding,
        sram: &SramSettings,
    ) -> Result<()> {
        // Whatever was on disk is gone once the image is truncated
        self.file = None;
        self.state = CardState::Corrupt;

        let header = Header::format(
            slot,
            size,
            encoding,
            self.clock.now(),
            sram.flash_id(slot),
            sram.counter_bias,
            sram.language,
        );
        let directory = Directory::new();
        let bat = BlockAllocationTable::new(size.total_blocks());

        let mut file = CardFile::create(&self.path)?;
        file.write_block(HEADER_BLOCK, &header.to_bytes())?;
        for block in DIRECTORY_BLOCKS {
            file.write_block(block, &directory.to_bytes())?;
        }
        for block in BAT_BLOCKS {
            file.write_block(block, &bat.to_bytes())?;
        }
        file.fill_blocks(SYSTEM_BLOCKS, size.total_blocks(), 0xFF)?;
        file.sync()?;

        self.header = header;
        self.dirs = [directory.clone(), directory];
        self.bats = [bat.clone(), bat];
        // Equal counters resolve to B on reload
        self.current_dir = Slot::B;
        self.current_bat = Slot::B;
        self.file = Some(file);
        self.state = CardState::Loaded;

        tracing::info!(
            "Formatted {} as {:?} in slot {:?} ({} data blocks)",
            self.path.display(),
            size,
            slot,
            size.user_blocks()
        );

        Ok(())
    }

    /// Format with the configured slot, size, encoding and SRAM values
    pub fn format_with_config(&mut self, config: &CardConfig) -> Result<()> {
        self.format(config.slot, config.size, config.encoding, &config.sram)
    }

    /// Write the header and both copies of each metadata pair
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_valid()?;

        self.header.update_checksum();
        for dir in self.dirs.iter_mut() {
            dir.update_checksum();
        }
        for bat in self.bats.iter_mut() {
            bat.update_checksum();
        }

        let blocks = [
            (HEADER_BLOCK, self.header.to_bytes()),
            (DIRECTORY_BLOCKS[0], self.dirs[0].to_bytes()),
            (DIRECTORY_BLOCKS[1], self.dirs[1].to_bytes()),
            (BAT_BLOCKS[0], self.bats[0].to_bytes()),
            (BAT_BLOCKS[1], self.bats[1].to_bytes()),
        ];

        let file = self.file.as_mut().ok_or(CardError::CorruptVolume)?;
        for (block, data) in blocks.iter() {
            file.write_block(*block, data)?;
        }
        file.sync()?;

        tracing::info!(
            "Committed {} (directory gen {}, allocation table gen {})",
            self.path.display(),
            self.dir().update_counter,
            self.bat().update_counter
        );

        Ok(())
    }

    /// Header checksum matches and each metadata pair has a valid copy
    ///
    /// Checked once on load or format; every later mutation reseals the
    /// copies it touches, so the state stays accurate.
    pub fn is_valid(&self) -> bool {
        self.state == CardState::Loaded && self.file.is_some()
    }

    pub fn state(&self) -> CardState {
        self.state
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Use a different clock for format seeds and modification times
    pub fn set_clock<C: TimeSource + 'static>(&mut self, clock: C) {
        self.clock = Box::new(clock);
    }

    /// Restrict lookups to a game; anything but 4 bytes matches any game
    pub fn set_current_game(&mut self, game: &str) {
        self.game = code(game);
    }

    /// Restrict lookups to a maker; anything but 2 bytes matches any maker
    pub fn set_current_maker(&mut self, maker: &str) {
        self.maker = code(maker);
    }

    pub fn current_game(&self) -> Option<&GameCode> {
        self.game.as_ref()
    }

    pub fn current_maker(&self) -> Option<&MakerCode> {
        self.maker.as_ref()
    }

    /// Card identity digest
    pub fn serial(&self) -> u64 {
        self.header.serial_digest()
    }

    /// Stored header checksum pair
    pub fn checksum(&self) -> (u16, u16) {
        (self.header.checksum, self.header.checksum_inv)
    }

    /// Format time in seconds since 2000-01-01
    pub fn format_time(&self) -> u64 {
        self.header.format_time
    }

    pub fn encoding(&self) -> Result<Encoding> {
        self.header.encoding()
    }

    pub fn card_size(&self) -> Result<CardSize> {
        self.header.card_size()
    }

    pub fn slot(&self) -> Result<CardSlot> {
        self.header.slot()
    }

    /// Total blocks on the card; data blocks lie in `[5, max_block)`
    pub fn max_block(&self) -> u16 {
        self.header.max_block()
    }

    pub fn current_directory(&self) -> Slot {
        self.current_dir
    }

    pub fn current_bat(&self) -> Slot {
        self.current_bat
    }

    pub fn directory_generation(&self) -> u16 {
        self.dir().update_counter
    }

    pub fn bat_generation(&self) -> u16 {
        self.bat().update_counter
    }

    pub fn free_space(&self) -> Result<FreeSpace> {
        self.ensure_valid()?;
        Ok(FreeSpace {
            blocks: self.bat().free_blocks(),
            files: self.dir().free_slots(),
        })
    }

    /// Used directory entries, in slot order
    pub fn files(&self) -> Result<Vec<FileInfo>> {
        self.ensure_valid()?;
        Ok(self.dir().files().map(|(_, entry)| FileInfo::from(entry)).collect())
    }

    pub fn file_info(&self, handle: &FileHandle) -> Result<FileInfo> {
        self.read_entry(handle, |entry| FileInfo::from(entry))
    }

    /// Open an existing file using the current game and maker filter
    pub fn open_file(&self, filename: &str) -> Result<FileHandle> {
        self.ensure_valid()?;
        let name = pad_filename(filename)?;

        let index = self
            .dir()
            .get_file(self.game.as_ref(), self.maker.as_ref(), &name)
            .ok_or_else(|| CardError::NotFound(filename.to_string()))?;
        let entry = self
            .dir()
            .entry(index)
            .ok_or_else(|| CardError::NotFound(filename.to_string()))?;

        Ok(FileHandle::for_entry(entry))
    }

    /// Create a file of `size` bytes, rounded up to whole blocks
    ///
    /// The generation advances before anything is checked and stays advanced
    /// when creation fails.
    pub fn create_file(&mut self, filename: &str, size: usize) -> Result<FileHandle> {
        self.ensure_valid()?;
        self.advance_generation();

        let name = pad_filename(filename)?;
        if self
            .dir()
            .get_file(self.game.as_ref(), self.maker.as_ref(), &name)
            .is_some()
        {
            return Err(CardError::FileExists(filename.to_string()));
        }

        self.create_entry(self.game, self.maker, name, size)
    }

    fn create_entry(
        &mut self,
        game: Option<GameCode>,
        maker: Option<MakerCode>,
        name: FileName,
        size: usize,
    ) -> Result<FileHandle> {
        let blocks = blocks_for(size);
        let max_block = self.max_block();

        let index = self.dir_mut().first_free_file(game, maker, name)?;
        let first_block = match self.bat_mut().allocate_blocks(blocks, max_block) {
            Ok(first) => first,
            Err(e) => {
                self.dir_mut().release(index);
                return Err(e);
            }
        };

        let now = self.clock.now() as u32;
        let handle = {
            let entry = self
                .dir_mut()
                .entry_mut(index)
                .ok_or(CardError::DirectoryFull(MAX_FILES))?;
            entry.modified_time = now;
            entry.first_block = first_block;
            entry.block_count = blocks;
            FileHandle::for_entry(entry)
        };
        self.seal();

        tracing::debug!(
            "Created {} in slot {} ({} blocks from {})",
            handle.name(),
            index,
            blocks,
            first_block
        );

        Ok(handle)
    }

    /// Free a file's blocks one at a time, then release its directory slot
    pub fn delete_file(&mut self, handle: &FileHandle) -> Result<()> {
        self.ensure_valid()?;
        self.advance_generation();

        let (index, entry) = self.resolve(handle)?;
        let chain = self.bat().chain(entry.first_block, entry.block_count)?;

        let bat = self.bat_mut();
        let freed = chain.iter().try_for_each(|&block| bat.free_block(block));
        if freed.is_ok() {
            self.dir_mut().release(index);
        }
        self.seal();
        freed?;

        tracing::debug!("Deleted {} ({} blocks)", handle.name(), chain.len());
        Ok(())
    }

    /// Give a file a new name, keeping its data and metadata
    pub fn rename_file(&mut self, handle: &FileHandle, new_name: &str) -> Result<FileHandle> {
        self.ensure_valid()?;
        let name = pad_filename(new_name)?;
        let (index, entry) = self.resolve(handle)?;

        if self
            .dir()
            .get_file(Some(&entry.game), Some(&entry.maker), &name)
            .is_some()
        {
            return Err(CardError::FileExists(new_name.to_string()));
        }

        let mut renamed = {
            let slot = self
                .dir_mut()
                .entry_mut(index)
                .ok_or_else(|| CardError::InvalidHandle(handle.name()))?;
            slot.filename = name;
            FileHandle::for_entry(slot)
        };
        self.dir_mut().update_checksum();
        renamed.set_offset(handle.offset());

        tracing::debug!("Renamed {} to {}", handle.name(), new_name);
        Ok(renamed)
    }

    /// Read from the cursor, following the chain across block boundaries
    ///
    /// Returns the bytes actually read, which is short when the chain ends
    /// early. The cursor advances by `buf.len()` regardless.
    pub fn read(&mut self, handle: &mut FileHandle, buf: &mut [u8]) -> Result<usize> {
        self.ensure_valid()?;
        let (_, entry) = self.resolve(handle)?;

        let max_block = self.max_block();
        let bat = &self.bats[self.current_bat.index()];
        let file = self.file.as_mut().ok_or(CardError::CorruptVolume)?;

        let mut done = 0;
        let mut cursor = locate(bat, &entry, handle.offset());
        while let Some((block, offset)) = cursor {
            if done == buf.len() {
                break;
            }
            if !is_data_block(block, max_block) {
                tracing::warn!("Chain of {} reaches block {}", handle.name(), block);
                break;
            }

            let len = (BLOCK_SIZE - offset).min(buf.len() - done);
            file.read_at(block, offset, &mut buf[done..done + len])?;
            done += len;
            cursor = step(bat, block, offset + len);
        }

        handle.advance(buf.len());
        Ok(done)
    }

    /// Write at the cursor, following the chain across block boundaries
    ///
    /// Returns the bytes actually written, which is short when the chain
    /// ends early. The cursor advances by `buf.len()` regardless.
    pub fn write(&mut self, handle: &mut FileHandle, buf: &[u8]) -> Result<usize> {
        self.ensure_valid()?;
        let (_, entry) = self.resolve(handle)?;

        let max_block = self.max_block();
        let bat = &self.bats[self.current_bat.index()];
        let file = self.file.as_mut().ok_or(CardError::CorruptVolume)?;

        let mut done = 0;
        let mut cursor = locate(bat, &entry, handle.offset());
        while let Some((block, offset)) = cursor {
            if done == buf.len() {
                break;
            }
            if !is_data_block(block, max_block) {
                tracing::warn!("Chain of {} reaches block {}", handle.name(), block);
                break;
            }

            let len = (BLOCK_SIZE - offset).min(buf.len() - done);
            file.write_at(block, offset, &buf[done..done + len])?;
            done += len;
            cursor = step(bat, block, offset + len);
        }

        handle.advance(buf.len());
        Ok(done)
    }

    /// Move the cursor; `End` counts back from the end of the last block
    pub fn seek(&self, handle: &mut FileHandle, offset: i32, origin: SeekOrigin) -> Result<i32> {
        self.ensure_valid()?;
        let (_, entry) = self.resolve(handle)?;

        let position = match origin {
            SeekOrigin::Begin => offset,
            SeekOrigin::Current => handle.offset().wrapping_add(offset),
            SeekOrigin::End => {
                let size = entry.block_count as i32 * BLOCK_SIZE as i32;
                size.wrapping_sub(offset)
            }
        };

        handle.set_offset(position);
        Ok(position)
    }

    pub fn tell(&self, handle: &FileHandle) -> i32 {
        handle.offset()
    }

    /// Copy a file onto another card
    ///
    /// The copy keeps the source's identity and metadata on a chain of the
    /// destination's own. The source cursor is left where it was.
    pub fn copy_file_to(&mut self, handle: &FileHandle, dest: &mut Card) -> Result<FileHandle> {
        self.ensure_valid()?;
        dest.ensure_valid()?;

        let (_, source) = self.resolve(handle)?;
        if !source.permissions.can_copy() {
            return Err(CardError::PermissionDenied(format!(
                "{} may not be copied",
                handle.name()
            )));
        }
        if self.same_image(dest) {
            return Err(CardError::FileExists(handle.name()));
        }
        if dest
            .dir()
            .get_file(Some(&source.game), Some(&source.maker), &source.filename)
            .is_some()
        {
            return Err(CardError::FileExists(handle.name()));
        }

        dest.advance_generation();
        let copy = dest.create_entry(
            Some(source.game),
            Some(source.maker),
            source.filename,
            source.block_count as usize * BLOCK_SIZE,
        )?;

        let (index, _) = dest.resolve(&copy)?;
        if let Some(entry) = dest.dir_mut().entry_mut(index) {
            let first_block = entry.first_block;
            *entry = source;
            entry.first_block = first_block;
            entry.copy_counter = source.copy_counter.wrapping_add(1);
        }
        dest.dir_mut().update_checksum();

        let mut reader = handle.clone();
        reader.set_offset(0);
        let mut writer = copy.clone();
        let mut buffer = vec![0u8; BLOCK_SIZE];
        for _ in 0..source.block_count {
            self.read(&mut reader, &mut buffer)?;
            dest.write(&mut writer, &buffer)?;
        }

        tracing::debug!(
            "Copied {} to {} ({} blocks)",
            handle.name(),
            dest.path.display(),
            source.block_count
        );

        Ok(copy)
    }

    /// Copy a file onto another card, then delete it here
    ///
    /// A failed copy leaves the source untouched.
    pub fn move_file_to(&mut self, handle: &FileHandle, dest: &mut Card) -> Result<FileHandle> {
        self.ensure_valid()?;
        let (_, source) = self.resolve(handle)?;
        if !source.permissions.can_move() {
            return Err(CardError::PermissionDenied(format!(
                "{} may not be moved",
                handle.name()
            )));
        }

        let moved = self.copy_file_to(handle, dest)?;
        self.delete_file(handle)?;
        Ok(moved)
    }

    pub fn permissions(&self, handle: &FileHandle) -> Result<Permissions> {
        self.read_entry(handle, |entry| entry.permissions)
    }

    pub fn is_public(&self, handle: &FileHandle) -> Result<bool> {
        self.read_entry(handle, |entry| entry.permissions.is_public())
    }

    pub fn set_public(&mut self, handle: &FileHandle, public: bool) -> Result<()> {
        self.update_entry(handle, |entry| {
            entry.permissions.set(Permissions::PUBLIC, public);
            Ok(())
        })
    }

    pub fn can_copy(&self, handle: &FileHandle) -> Result<bool> {
        self.read_entry(handle, |entry| entry.permissions.can_copy())
    }

    pub fn set_can_copy(&mut self, handle: &FileHandle, allowed: bool) -> Result<()> {
        self.update_entry(handle, |entry| {
            entry.permissions.set(Permissions::NO_COPY, !allowed);
            Ok(())
        })
    }

    pub fn can_move(&self, handle: &FileHandle) -> Result<bool> {
        self.read_entry(handle, |entry| entry.permissions.can_move())
    }

    pub fn set_can_move(&mut self, handle: &FileHandle, allowed: bool) -> Result<()> {
        self.update_entry(handle, |entry| {
            entry.permissions.set(Permissions::NO_MOVE, !allowed);
            Ok(())
        })
    }

    pub fn banner_format(&self, handle: &FileHandle) -> Result<ImageFormat> {
        self.read_entry(handle, FileEntry::banner_format)
    }

    pub fn set_banner_format(&mut self, handle: &FileHandle, format: ImageFormat) -> Result<()> {
        self.update_entry(handle, |entry| {
            entry.set_banner_format(format);
            Ok(())
        })
    }

    pub fn animation_ping_pong(&self, handle: &FileHandle) -> Result<bool> {
        self.read_entry(handle, FileEntry::animation_ping_pong)
    }

    pub fn set_animation_ping_pong(&mut self, handle: &FileHandle, enabled: bool) -> Result<()> {
        self.update_entry(handle, |entry| {
            entry.set_animation_ping_pong(enabled);
            Ok(())
        })
    }

    pub fn icon_format(&self, handle: &FileHandle, frame: usize) -> Result<ImageFormat> {
        self.read_entry(handle, |entry| entry.icon_format(frame))?
    }

    pub fn set_icon_format(
        &mut self,
        handle: &FileHandle,
        frame: usize,
        format: ImageFormat,
    ) -> Result<()> {
        self.update_entry(handle, |entry| entry.set_icon_format(frame, format))
    }

    pub fn icon_animation_speed(&self, handle: &FileHandle, frame: usize) -> Result<AnimationSpeed> {
        self.read_entry(handle, |entry| entry.animation_speed(frame))?
    }

    pub fn set_icon_animation_speed(
        &mut self,
        handle: &FileHandle,
        frame: usize,
        speed: AnimationSpeed,
    ) -> Result<()> {
        self.update_entry(handle, |entry| entry.set_animation_speed(frame, speed))
    }

    pub fn icon_address(&self, handle: &FileHandle) -> Result<u32> {
        self.read_entry(handle, |entry| entry.icon_address)
    }

    pub fn set_icon_address(&mut self, handle: &FileHandle, address: u32) -> Result<()> {
        self.update_entry(handle, |entry| {
            entry.icon_address = address;
            Ok(())
        })
    }

    pub fn comment_address(&self, handle: &FileHandle) -> Result<u32> {
        self.read_entry(handle, |entry| entry.comment_address)
    }

    pub fn set_comment_address(&mut self, handle: &FileHandle, address: u32) -> Result<()> {
        self.update_entry(handle, |entry| {
            entry.comment_address = address;
            Ok(())
        })
    }

    fn ensure_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(CardError::CorruptVolume)
        }
    }

    fn dir(&self) -> &Directory {
        &self.dirs[self.current_dir.index()]
    }

    fn dir_mut(&mut self) -> &mut Directory {
        &mut self.dirs[self.current_dir.index()]
    }

    fn bat(&self) -> &BlockAllocationTable {
        &self.bats[self.current_bat.index()]
    }

    fn bat_mut(&mut self) -> &mut BlockAllocationTable {
        &mut self.bats[self.current_bat.index()]
    }

    /// Recompute checksums of the current copies after a mutation
    fn seal(&mut self) {
        self.dir_mut().update_checksum();
        self.bat_mut().update_checksum();
    }

    fn advance_generation(&mut self) {
        let mut dir = self.dir().clone();
        dir.update_counter = dir.update_counter.wrapping_add(1);
        dir.update_checksum();
        self.current_dir = self.current_dir.other();
        self.dirs[self.current_dir.index()] = dir;

        let mut bat = self.bat().clone();
        bat.update_counter = bat.update_counter.wrapping_add(1);
        bat.update_checksum();
        self.current_bat = self.current_bat.other();
        self.bats[self.current_bat.index()] = bat;
    }

    fn resolve(&self, handle: &FileHandle) -> Result<(usize, FileEntry)> {
        let dir = self.dir();
        dir.get_file(Some(handle.game()), Some(handle.maker()), handle.filename())
            .and_then(|index| dir.entry(index).map(|entry| (index, *entry)))
            .ok_or_else(|| CardError::InvalidHandle(handle.name()))
    }

    fn read_entry<T>(&self, handle: &FileHandle, f: impl FnOnce(&FileEntry) -> T) -> Result<T> {
        self.ensure_valid()?;
        let (_, entry) = self.resolve(handle)?;
        Ok(f(&entry))
    }

    fn update_entry<T>(
        &mut self,
        handle: &FileHandle,
        f: impl FnOnce(&mut FileEntry) -> Result<T>,
    ) -> Result<T> {
        self.ensure_valid()?;
        let (index, _) = self.resolve(handle)?;

        let entry = self
            .dir_mut()
            .entry_mut(index)
            .ok_or_else(|| CardError::InvalidHandle(handle.name()))?;
        let result = f(entry)?;
        self.dir_mut().update_checksum();

        Ok(result)
    }

    fn same_image(&self, other: &Card) -> bool {
        match (self.path.canonicalize(), other.path.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => self.path == other.path,
        }
    }
}

impl Drop for Card {
    fn drop(&mut self) {
        if !self.is_valid() {
            return;
        }
        if let Err(e) = self.commit() {
            tracing::warn!("Failed to commit {} on drop: {}", self.path.display(), e);
        }
    }
}

/// Pick the authoritative copy of a redundant pair
///
/// The valid copy with the strictly greater counter wins; equal counters
/// resolve to B; a lone valid copy wins regardless of its counter.
fn select_current(valid: [bool; 2], counters: [u16; 2]) -> Option<Slot> {
    match (valid[0], valid[1]) {
        (true, true) if counters[0] > counters[1] => Some(Slot::A),
        (true, true) => Some(Slot::B),
        (true, false) => Some(Slot::A),
        (false, true) => Some(Slot::B),
        (false, false) => None,
    }
}

/// Overwrite an invalid stale copy with the current one
fn repair<T: Clone>(copies: &mut [T; 2], current: Slot, valid: [bool; 2], what: &str) {
    let stale = current.other();
    if !valid[stale.index()] {
        tracing::warn!(
            "{} copy {:?} failed its checksum, restoring from copy {:?}",
            what,
            stale,
            current
        );
        copies[stale.index()] = copies[current.index()].clone();
    }
}

/// Blocks needed for `size` bytes; a chain always holds at least one block
fn blocks_for(size: usize) -> u16 {
    u16::try_from(size.div_ceil(BLOCK_SIZE).max(1)).unwrap_or(u16::MAX)
}

fn is_data_block(block: u16, max_block: u16) -> bool {
    (SYSTEM_BLOCKS..max_block).contains(&block)
}

/// Block and in-block offset of a cursor, hopping along the chain
fn locate(bat: &BlockAllocationTable, entry: &FileEntry, offset: i32) -> Option<(u16, usize)> {
    let offset = usize::try_from(offset).ok()?;
    let mut block = entry.first_block;
    for _ in 0..offset / BLOCK_SIZE {
        block = follow(bat, block)?;
    }
    Some((block, offset % BLOCK_SIZE))
}

/// Position after a transfer ending at `end` within `block`
fn step(bat: &BlockAllocationTable, block: u16, end: usize) -> Option<(u16, usize)> {
    if end < BLOCK_SIZE {
        Some((block, end))
    } else {
        follow(bat, block).map(|next| (next, 0))
    }
}

fn follow(bat: &BlockAllocationTable, block: u16) -> Option<u16> {
    match bat.next_block(block) {
        Ok(CHAIN_END) => None,
        Ok(next) if next >= SYSTEM_BLOCKS => Some(next),
        Ok(next) => {
            tracing::warn!("Block {} links to reserved block {}", block, next);
            None
        }
        Err(e) => {
            tracing::warn!("Chain broken at block {}: {}", block, e);
            None
        }
    }
}
