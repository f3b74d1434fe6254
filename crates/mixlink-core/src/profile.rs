//! Video recording profiles and encoder/buffering presets.

use serde::{Deserialize, Serialize};

use crate::Error;

// ── VideoProfile ──────────────────────────────────────────────────────────────

/// Encoding profile of the video recorder.
///
/// Each profile selects a codec + muxer pair; the container extension of the
/// produced file follows from the muxer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoProfile {
    H264Standard = 0,
    H264Hq,
    H265Realtime,
    H265Animation,
    ProresStandard,
    ProresHq,
    Vp8,
    JpegMulti,
}

impl VideoProfile {
    pub const ALL: [VideoProfile; 8] = [
        Self::H264Standard,
        Self::H264Hq,
        Self::H265Realtime,
        Self::H265Animation,
        Self::ProresStandard,
        Self::ProresHq,
        Self::Vp8,
        Self::JpegMulti,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::H264Standard => "H264 (Standard)",
            Self::H264Hq => "H264 (High quality)",
            Self::H265Realtime => "H265 (Realtime)",
            Self::H265Animation => "H265 (Animation)",
            Self::ProresStandard => "ProRes (Standard)",
            Self::ProresHq => "ProRes (High quality)",
            Self::Vp8 => "VP8",
            Self::JpegMulti => "Multiple JPEG",
        }
    }

    /// Container extension of the file produced with this profile.
    pub fn extension(self) -> &'static str {
        match self {
            Self::H264Standard | Self::H264Hq => "mov",
            Self::H265Realtime | Self::H265Animation => "mov",
            Self::ProresStandard | Self::ProresHq => "mov",
            Self::Vp8 => "webm",
            Self::JpegMulti => "avi",
        }
    }
}

impl Default for VideoProfile {
    fn default() -> Self {
        Self::H264Standard
    }
}

impl TryFrom<i32> for VideoProfile {
    type Error = Error;

    fn try_from(v: i32) -> Result<Self, Error> {
        Self::ALL
            .get(usize::try_from(v).map_err(|_| Error::UnknownProfile(v))?)
            .copied()
            .ok_or(Error::UnknownProfile(v))
    }
}

// ── Presets ───────────────────────────────────────────────────────────────────

/// Size of the ring buffer between the render thread and an encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferingPreset {
    Minimum,
    Small,
    Medium,
    Large,
    Maximum,
}

impl BufferingPreset {
    /// Ring buffer size in bytes. The minimum holds one 4K frame
    /// (or nine 720p frames).
    pub fn bytes(self) -> u64 {
        match self {
            Self::Minimum => 33_177_600,
            Self::Small => 100 * 1_048_576,
            Self::Medium => 200 * 1_048_576,
            Self::Large => 300 * 1_048_576,
            Self::Maximum => 400 * 1_048_576,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Minimum => "Minimum",
            Self::Small => "100 MB",
            Self::Medium => "200 MB",
            Self::Large => "300 MB",
            Self::Maximum => "400 MB",
        }
    }
}

impl Default for BufferingPreset {
    fn default() -> Self {
        Self::Small
    }
}

/// Recording frame rates offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameratePreset {
    Fps15,
    Fps25,
    Fps30,
    Fps60,
}

impl FrameratePreset {
    pub fn fps(self) -> u32 {
        match self {
            Self::Fps15 => 15,
            Self::Fps25 => 25,
            Self::Fps30 => 30,
            Self::Fps60 => 60,
        }
    }
}

impl Default for FrameratePreset {
    fn default() -> Self {
        Self::Fps30
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_ids_round_trip() {
        for (i, p) in VideoProfile::ALL.iter().enumerate() {
            assert_eq!(VideoProfile::try_from(i as i32), Ok(*p));
        }
        assert!(VideoProfile::try_from(8).is_err());
        assert!(VideoProfile::try_from(-1).is_err());
    }

    #[test]
    fn minimum_buffering_holds_one_4k_frame() {
        assert!(BufferingPreset::Minimum.bytes() >= 3840 * 2160 * 4);
    }
}
