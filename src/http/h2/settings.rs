//! HTTP/2 settings
//!
//! The six parameters of RFC 7540 Section 6.5.2 with their defaults,
//! validation ranges, and wire (de)serialization. Unknown parameter ids are
//! ignored on receive.

use super::error::{Error, Result};
use super::{DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE};

/// SETTINGS parameter identifiers.
pub const SETTINGS_HEADER_TABLE_SIZE: u16 = 0x1;
pub const SETTINGS_ENABLE_PUSH: u16 = 0x2;
pub const SETTINGS_MAX_CONCURRENT_STREAMS: u16 = 0x3;
pub const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 0x4;
pub const SETTINGS_MAX_FRAME_SIZE: u16 = 0x5;
pub const SETTINGS_MAX_HEADER_LIST_SIZE: u16 = 0x6;

/// A settings snapshot. `None` means the parameter was not sent and the
/// RFC default applies.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub header_table_size: Option<u32>,
    pub enable_push: Option<bool>,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub max_frame_size: Option<u32>,
    pub max_header_list_size: Option<u32>,
}

impl Settings {
    pub fn new() -> Self {
        Settings::default()
    }

    /// The defaults a fresh connection assumes before any SETTINGS frame.
    pub fn initial() -> Self {
        Settings {
            header_table_size: Some(DEFAULT_HEADER_TABLE_SIZE),
            enable_push: Some(true),
            max_concurrent_streams: None,
            initial_window_size: Some(DEFAULT_INITIAL_WINDOW_SIZE),
            max_frame_size: Some(DEFAULT_MAX_FRAME_SIZE),
            max_header_list_size: None,
        }
    }

    pub fn header_table_size(&self) -> u32 {
        self.header_table_size.unwrap_or(DEFAULT_HEADER_TABLE_SIZE)
    }

    pub fn enable_push(&self) -> bool {
        self.enable_push.unwrap_or(true)
    }

    /// `None` means unbounded.
    pub fn max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    pub fn initial_window_size(&self) -> u32 {
        self.initial_window_size
            .unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size.unwrap_or(DEFAULT_MAX_FRAME_SIZE)
    }

    /// `None` means unbounded.
    pub fn max_header_list_size(&self) -> Option<u32> {
        self.max_header_list_size
    }

    /// Wire entries in ascending parameter order.
    pub fn entries(&self) -> Vec<(u16, u32)> {
        let mut out = Vec::new();
        if let Some(v) = self.header_table_size {
            out.push((SETTINGS_HEADER_TABLE_SIZE, v));
        }
        if let Some(v) = self.enable_push {
            out.push((SETTINGS_ENABLE_PUSH, v as u32));
        }
        if let Some(v) = self.max_concurrent_streams {
            out.push((SETTINGS_MAX_CONCURRENT_STREAMS, v));
        }
        if let Some(v) = self.initial_window_size {
            out.push((SETTINGS_INITIAL_WINDOW_SIZE, v));
        }
        if let Some(v) = self.max_frame_size {
            out.push((SETTINGS_MAX_FRAME_SIZE, v));
        }
        if let Some(v) = self.max_header_list_size {
            out.push((SETTINGS_MAX_HEADER_LIST_SIZE, v));
        }
        out
    }

    /// Parse 6-byte id/value entries. Unknown ids are skipped.
    pub fn parse(payload: &[u8]) -> Result<Settings> {
        let mut settings = Settings::new();
        let mut pos = 0;
        while pos + 6 <= payload.len() {
            let id = u16::from_be_bytes([payload[pos], payload[pos + 1]]);
            let value = u32::from_be_bytes([
                payload[pos + 2],
                payload[pos + 3],
                payload[pos + 4],
                payload[pos + 5],
            ]);
            match id {
                SETTINGS_HEADER_TABLE_SIZE => settings.header_table_size = Some(value),
                SETTINGS_ENABLE_PUSH => {
                    if value > 1 {
                        return Err(Error::InvalidSettings(format!(
                            "ENABLE_PUSH must be 0 or 1, got {}",
                            value
                        )));
                    }
                    settings.enable_push = Some(value == 1);
                }
                SETTINGS_MAX_CONCURRENT_STREAMS => settings.max_concurrent_streams = Some(value),
                SETTINGS_INITIAL_WINDOW_SIZE => settings.initial_window_size = Some(value),
                SETTINGS_MAX_FRAME_SIZE => settings.max_frame_size = Some(value),
                SETTINGS_MAX_HEADER_LIST_SIZE => settings.max_header_list_size = Some(value),
                _ => {}
            }
            pos += 6;
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Check value ranges per RFC 7540 Section 6.5.2.
    pub fn validate(&self) -> Result<()> {
        if let Some(window) = self.initial_window_size {
            if window > 0x7FFF_FFFF {
                return Err(Error::InvalidSettings(format!(
                    "initial window size {} exceeds 2^31-1",
                    window
                )));
            }
        }
        if let Some(size) = self.max_frame_size {
            if !(16_384..=16_777_215).contains(&size) {
                return Err(Error::InvalidSettings(format!(
                    "max frame size {} outside 16384..=16777215",
                    size
                )));
            }
        }
        Ok(())
    }

    /// Overlay `other` onto this snapshot; set values win.
    pub fn merge(&mut self, other: &Settings) {
        if other.header_table_size.is_some() {
            self.header_table_size = other.header_table_size;
        }
        if other.enable_push.is_some() {
            self.enable_push = other.enable_push;
        }
        if other.max_concurrent_streams.is_some() {
            self.max_concurrent_streams = other.max_concurrent_streams;
        }
        if other.initial_window_size.is_some() {
            self.initial_window_size = other.initial_window_size;
        }
        if other.max_frame_size.is_some() {
            self.max_frame_size = other.max_frame_size;
        }
        if other.max_header_list_size.is_some() {
            self.max_header_list_size = other.max_header_list_size;
        }
    }
}
