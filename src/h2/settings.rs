//! SETTINGS parameters and payload codec (RFC 7540 Section 6.5).

use super::error::Error;
use super::{DEFAULT_HEADER_TABLE_SIZE, DEFAULT_MAX_FRAME_SIZE, DEFAULT_WINDOW_SIZE};

/// Identifiers from RFC 7540 Section 6.5.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SettingsParameter {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
    MaxFrameSize = 0x5,
    MaxHeaderListSize = 0x6,
}

impl SettingsParameter {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x1 => Some(SettingsParameter::HeaderTableSize),
            0x2 => Some(SettingsParameter::EnablePush),
            0x3 => Some(SettingsParameter::MaxConcurrentStreams),
            0x4 => Some(SettingsParameter::InitialWindowSize),
            0x5 => Some(SettingsParameter::MaxFrameSize),
            0x6 => Some(SettingsParameter::MaxHeaderListSize),
            _ => None,
        }
    }
}

/// A set of SETTINGS values. `None` means "not present in this frame";
/// effective values fall back to the RFC defaults via the getters.
#[derive(Debug, Clone, Default, PartialEq)]
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

    pub fn header_table_size(&self) -> u32 {
        self.header_table_size.unwrap_or(DEFAULT_HEADER_TABLE_SIZE)
    }

    pub fn enable_push(&self) -> bool {
        self.enable_push.unwrap_or(true)
    }

    pub fn max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    pub fn initial_window_size(&self) -> u32 {
        self.initial_window_size.unwrap_or(DEFAULT_WINDOW_SIZE)
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size.unwrap_or(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Overlay values present in `other` onto this set.
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

    /// Encode the present parameters as a SETTINGS payload, in identifier
    /// order, 6 bytes per parameter.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut put = |id: SettingsParameter, value: u32| {
            out.extend_from_slice(&id.as_u16().to_be_bytes());
            out.extend_from_slice(&value.to_be_bytes());
        };
        if let Some(v) = self.header_table_size {
            put(SettingsParameter::HeaderTableSize, v);
        }
        if let Some(v) = self.enable_push {
            put(SettingsParameter::EnablePush, v as u32);
        }
        if let Some(v) = self.max_concurrent_streams {
            put(SettingsParameter::MaxConcurrentStreams, v);
        }
        if let Some(v) = self.initial_window_size {
            put(SettingsParameter::InitialWindowSize, v);
        }
        if let Some(v) = self.max_frame_size {
            put(SettingsParameter::MaxFrameSize, v);
        }
        if let Some(v) = self.max_header_list_size {
            put(SettingsParameter::MaxHeaderListSize, v);
        }
        out
    }

    /// Parse a SETTINGS payload. Unknown identifiers are ignored as the RFC
    /// requires; a length that is not a multiple of 6 is a frame size error.
    pub fn parse_payload(payload: &[u8]) -> Result<Settings, Error> {
        if payload.len() % 6 != 0 {
            return Err(Error::FrameSize(format!(
                "SETTINGS payload of {} bytes is not a multiple of 6",
                payload.len()
            )));
        }

        let mut settings = Settings::new();
        for entry in payload.chunks_exact(6) {
            let id = u16::from_be_bytes([entry[0], entry[1]]);
            let value = u32::from_be_bytes([entry[2], entry[3], entry[4], entry[5]]);
            match SettingsParameter::from_u16(id) {
                Some(SettingsParameter::HeaderTableSize) => {
                    settings.header_table_size = Some(value);
                }
                Some(SettingsParameter::EnablePush) => {
                    if value > 1 {
                        return Err(Error::Protocol(format!(
                            "SETTINGS_ENABLE_PUSH must be 0 or 1, got {value}"
                        )));
                    }
                    settings.enable_push = Some(value == 1);
                }
                Some(SettingsParameter::MaxConcurrentStreams) => {
                    settings.max_concurrent_streams = Some(value);
                }
                Some(SettingsParameter::InitialWindowSize) => {
                    if value > 0x7fff_ffff {
                        return Err(Error::FlowControl(format!(
                            "initial window size {value} exceeds 2^31-1"
                        )));
                    }
                    settings.initial_window_size = Some(value);
                }
                Some(SettingsParameter::MaxFrameSize) => {
                    if !(16_384..=16_777_215).contains(&value) {
                        return Err(Error::Protocol(format!(
                            "SETTINGS_MAX_FRAME_SIZE {value} outside 16384..16777215"
                        )));
                    }
                    settings.max_frame_size = Some(value);
                }
                Some(SettingsParameter::MaxHeaderListSize) => {
                    settings.max_header_list_size = Some(value);
                }
                None => {}
            }
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_rfc() {
        let s = Settings::new();
        assert_eq!(s.header_table_size(), 4096);
        assert!(s.enable_push());
        assert_eq!(s.max_concurrent_streams(), None);
        assert_eq!(s.initial_window_size(), 65_535);
        assert_eq!(s.max_frame_size(), 16_384);
    }

    #[test]
    fn payload_round_trip() {
        let mut s = Settings::new();
        s.max_concurrent_streams = Some(100);
        s.initial_window_size = Some(1 << 30);
        s.enable_push = Some(false);

        let payload = s.to_payload();
        assert_eq!(payload.len(), 18);
        let parsed = Settings::parse_payload(&payload).unwrap();
        assert_eq!(parsed, s);
    }

    #[test]
    fn unknown_identifiers_are_ignored() {
        // id 0x9 (not handled here), value 1, then MAX_FRAME_SIZE.
        let mut payload = vec![0x00, 0x09, 0, 0, 0, 1];
        payload.extend_from_slice(&[0x00, 0x05, 0, 0, 0x80, 0x00]);
        let parsed = Settings::parse_payload(&payload).unwrap();
        assert_eq!(parsed.max_frame_size(), 0x8000);
        assert_eq!(parsed.header_table_size, None);
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(Settings::parse_payload(&[0, 1, 0, 0]).is_err());
        // ENABLE_PUSH = 2
        assert!(Settings::parse_payload(&[0, 2, 0, 0, 0, 2]).is_err());
        // window over 2^31-1
        assert!(Settings::parse_payload(&[0, 4, 0x80, 0, 0, 0]).is_err());
        // frame size too small
        assert!(Settings::parse_payload(&[0, 5, 0, 0, 0, 1]).is_err());
    }

    #[test]
    fn merge_overlays_only_present_values() {
        let mut base = Settings::new();
        base.header_table_size = Some(4096);
        base.enable_push = Some(true);

        let mut update = Settings::new();
        update.header_table_size = Some(8192);
        update.max_concurrent_streams = Some(100);

        base.merge(&update);
        assert_eq!(base.header_table_size, Some(8192));
        assert_eq!(base.enable_push, Some(true));
        assert_eq!(base.max_concurrent_streams, Some(100));
    }
}
