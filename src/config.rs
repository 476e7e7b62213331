//! Card configuration loaded from TOML
//!
//! ```toml
//! game = "GM8E"
//! maker = "01"
//! slot = "A"
//! size = "Blocks251"
//! encoding = "ascii"
//!
//! [sram]
//! counter_bias = 0
//! language = 0
//! flash_id = [
//!     [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
//!     [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
//! ]
//! ```

use crate::entry::{code, GameCode, MakerCode};
use crate::error::Result;
use crate::header::{CardSize, CardSlot, Encoding};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// SRAM values captured into the header at format time
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SramSettings {
    /// Per-slot flash id, mixed into the card serial
    pub flash_id: [[u8; 12]; 2],
    pub counter_bias: i32,
    pub language: u32,
}

impl SramSettings {
    pub fn flash_id(&self, slot: CardSlot) -> &[u8; 12] {
        &self.flash_id[slot.index()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CardConfig {
    /// Current game code; anything but 4 bytes matches any game
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game: Option<String>,

    /// Current maker code; anything but 2 bytes matches any maker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maker: Option<String>,

    pub slot: CardSlot,
    pub size: CardSize,
    pub encoding: Encoding,
    pub sram: SramSettings,
}

impl CardConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn game_code(&self) -> Option<GameCode> {
        self.game.as_deref().and_then(code)
    }

    pub fn maker_code(&self) -> Option<MakerCode> {
        self.maker.as_deref().and_then(code)
    }
}
