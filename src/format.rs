//! Media formats and capability constraints.
//!
//! Plugins declare what they accept and produce as a list of [`Capability`]
//! values. Negotiation intersects an upstream capability with a downstream
//! one; a non-empty intersection means the two stages can be linked.
//!
//! Each field of a capability is a [`CapsValue`] constraint:
//!
//! ```rust
//! use avtrans::format::CapsValue;
//!
//! let rates: CapsValue<u32> = CapsValue::List(vec![48000, 44100, 16000]);
//! let wanted: CapsValue<u32> = CapsValue::Fixed(44100);
//! assert_eq!(rates.intersect(&wanted), Some(CapsValue::Fixed(44100)));
//! ```

use serde::{Deserialize, Serialize};

/// Well-known MIME types carried by the transport.
pub mod mime {
    /// Raw PCM audio.
    pub const AUDIO_RAW: &str = "audio/raw";
    /// AAC in LATM framing.
    pub const AUDIO_AAC: &str = "audio/mp4a-latm";
    /// Uncompressed video frames.
    pub const VIDEO_RAW: &str = "video/raw";
    /// H.264 elementary stream.
    pub const VIDEO_H264: &str = "video/avc";
    /// H.265 elementary stream.
    pub const VIDEO_H265: &str = "video/hevc";
}

/// Media kind of a buffer or a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    /// Audio samples.
    Audio,
    /// Video frames or bitstream.
    Video,
}

impl MediaType {
    /// Derive the media type from a MIME string.
    pub fn from_mime(mime: &str) -> Option<Self> {
        if mime.starts_with("audio/") {
            Some(Self::Audio)
        } else if mime.starts_with("video/") {
            Some(Self::Video)
        } else {
            None
        }
    }

    /// Wire code used in side-channel metadata.
    pub fn code(self) -> u32 {
        match self {
            Self::Audio => 0,
            Self::Video => 1,
        }
    }

    /// Inverse of [`MediaType::code`].
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Audio),
            1 => Some(Self::Video),
            _ => None,
        }
    }
}

/// PCM sample format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum AudioSampleFormat {
    /// Unsigned 8-bit.
    U8,
    /// Signed 16-bit interleaved.
    #[default]
    S16,
    /// Signed 24-bit interleaved.
    S24,
    /// Signed 32-bit interleaved.
    S32,
    /// 32-bit float planar.
    F32P,
    /// Unknown or unset.
    None,
}

impl AudioSampleFormat {
    /// Translate the integer code used at the engine boundary.
    ///
    /// Unknown codes map to [`AudioSampleFormat::None`].
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::U8,
            1 => Self::S16,
            2 => Self::S24,
            3 => Self::S32,
            4 => Self::F32P,
            _ => Self::None,
        }
    }

    /// Integer code of this format, `-1` for [`AudioSampleFormat::None`].
    pub fn code(self) -> i64 {
        match self {
            Self::U8 => 0,
            Self::S16 => 1,
            Self::S24 => 2,
            Self::S32 => 3,
            Self::F32P => 4,
            Self::None => -1,
        }
    }
}

/// Audio channel layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum AudioChannelLayout {
    /// One channel.
    Mono,
    /// Two channels.
    #[default]
    Stereo,
    /// Anything else.
    Unknown,
}

impl AudioChannelLayout {
    /// Layout for a channel count.
    pub fn from_channels(channels: i64) -> Self {
        match channels {
            1 => Self::Mono,
            2 => Self::Stereo,
            _ => Self::Unknown,
        }
    }
}

/// Video pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum VideoPixelFormat {
    /// Planar YUV 4:2:0.
    Yuv420p,
    /// Semi-planar YUV 4:2:0, UV order.
    #[default]
    Nv12,
    /// Semi-planar YUV 4:2:0, VU order.
    Nv21,
    /// Packed RGBA 8:8:8:8.
    Rgba,
    /// Unknown or unset.
    Unknown,
}

impl VideoPixelFormat {
    /// Parse a pixel format from its name (`"NV12"`) or numeric code (`"1"`).
    pub fn parse(value: &str) -> Option<Self> {
        let format = match value.trim().to_ascii_uppercase().as_str() {
            "YUV420P" | "I420" | "0" => Self::Yuv420p,
            "NV12" | "1" => Self::Nv12,
            "NV21" | "2" => Self::Nv21,
            "RGBA" | "3" => Self::Rgba,
            _ => return None,
        };
        Some(format)
    }

    /// Wire code of this format.
    pub fn code(self) -> u32 {
        match self {
            Self::Yuv420p => 0,
            Self::Nv12 => 1,
            Self::Nv21 => 2,
            Self::Rgba => 3,
            Self::Unknown => u32::MAX,
        }
    }

    /// Inverse of [`VideoPixelFormat::code`].
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Yuv420p,
            1 => Self::Nv12,
            2 => Self::Nv21,
            3 => Self::Rgba,
            _ => Self::Unknown,
        }
    }
}

/// Bitstream framing for compressed video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VideoBitStreamFormat {
    /// Annex B start codes.
    #[default]
    AnnexB,
    /// Length-prefixed NAL units.
    Avcc,
    /// Unknown or unset.
    Unknown,
}

impl VideoBitStreamFormat {
    /// Parse a bitstream format name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ANNEXB" => Some(Self::AnnexB),
            "AVCC" => Some(Self::Avcc),
            _ => None,
        }
    }
}

/// A constraint on a capability field.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum CapsValue<T> {
    /// Exact value.
    Fixed(T),
    /// Inclusive range.
    Range {
        /// Minimum acceptable value.
        min: T,
        /// Maximum acceptable value.
        max: T,
    },
    /// Acceptable values, first is preferred.
    List(Vec<T>),
    /// Unconstrained.
    #[default]
    Any,
}

impl<T: Clone + Ord> CapsValue<T> {
    /// Check if a value is accepted by this constraint.
    pub fn accepts(&self, value: &T) -> bool {
        match self {
            Self::Fixed(v) => v == value,
            Self::Range { min, max } => value >= min && value <= max,
            Self::List(values) => values.contains(value),
            Self::Any => true,
        }
    }

    /// Intersect two constraints, `None` if they have no common value.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Any, other) => Some(other.clone()),
            (this, Self::Any) => Some(this.clone()),

            (Self::Fixed(a), Self::Fixed(b)) => (a == b).then(|| Self::Fixed(a.clone())),

            (Self::Fixed(v), Self::Range { min, max })
            | (Self::Range { min, max }, Self::Fixed(v)) => {
                (v >= min && v <= max).then(|| Self::Fixed(v.clone()))
            }

            (Self::Fixed(v), Self::List(list)) | (Self::List(list), Self::Fixed(v)) => {
                list.contains(v).then(|| Self::Fixed(v.clone()))
            }

            (
                Self::Range {
                    min: min1,
                    max: max1,
                },
                Self::Range {
                    min: min2,
                    max: max2,
                },
            ) => {
                let lo = min1.max(min2);
                let hi = max1.min(max2);
                if lo > hi {
                    None
                } else if lo == hi {
                    Some(Self::Fixed(lo.clone()))
                } else {
                    Some(Self::Range {
                        min: lo.clone(),
                        max: hi.clone(),
                    })
                }
            }

            (Self::Range { min, max }, Self::List(list))
            | (Self::List(list), Self::Range { min, max }) => {
                Self::from_values(list.iter().filter(|v| *v >= min && *v <= max).cloned())
            }

            // Order follows the left-hand list.
            (Self::List(left), Self::List(right)) => {
                Self::from_values(left.iter().filter(|v| right.contains(v)).cloned())
            }
        }
    }

    fn from_values(values: impl Iterator<Item = T>) -> Option<Self> {
        let mut values: Vec<T> = values.collect();
        match values.len() {
            0 => None,
            1 => values.pop().map(Self::Fixed),
            _ => Some(Self::List(values)),
        }
    }

    /// Choose a single value: first of a list, minimum of a range.
    pub fn fixate(&self) -> Option<T> {
        match self {
            Self::Fixed(v) => Some(v.clone()),
            Self::Range { min, .. } => Some(min.clone()),
            Self::List(values) => values.first().cloned(),
            Self::Any => None,
        }
    }

    /// Check if this accepts any value.
    #[inline]
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl<T: Clone + Ord> From<T> for CapsValue<T> {
    fn from(value: T) -> Self {
        Self::Fixed(value)
    }
}

/// Capability declared by a plugin for one of its sides.
#[derive(Clone, Debug, PartialEq)]
pub struct Capability {
    /// MIME type of the stream.
    pub mime: String,
    /// Accepted sample rates (audio).
    pub sample_rates: CapsValue<u32>,
    /// Accepted channel counts (audio).
    pub channels: CapsValue<u32>,
    /// Accepted pixel formats (video).
    pub pixel_formats: CapsValue<VideoPixelFormat>,
}

impl Capability {
    /// Unconstrained capability for a MIME type.
    pub fn new(mime: impl Into<String>) -> Self {
        Self {
            mime: mime.into(),
            sample_rates: CapsValue::Any,
            channels: CapsValue::Any,
            pixel_formats: CapsValue::Any,
        }
    }

    /// Restrict sample rates.
    pub fn with_sample_rates(mut self, rates: impl Into<Vec<u32>>) -> Self {
        self.sample_rates = CapsValue::List(rates.into());
        self
    }

    /// Restrict channel counts to an inclusive range.
    pub fn with_channels(mut self, min: u32, max: u32) -> Self {
        self.channels = CapsValue::Range { min, max };
        self
    }

    /// Restrict pixel formats.
    pub fn with_pixel_formats(mut self, formats: impl Into<Vec<VideoPixelFormat>>) -> Self {
        self.pixel_formats = CapsValue::List(formats.into());
        self
    }

    /// Media type implied by the MIME.
    pub fn media_type(&self) -> Option<MediaType> {
        MediaType::from_mime(&self.mime)
    }

    /// Intersect with another capability of the same MIME.
    pub fn intersect(&self, other: &Capability) -> Option<Capability> {
        if self.mime != other.mime {
            return None;
        }
        Some(Capability {
            mime: self.mime.clone(),
            sample_rates: self.sample_rates.intersect(&other.sample_rates)?,
            channels: self.channels.intersect(&other.channels)?,
            pixel_formats: self.pixel_formats.intersect(&other.pixel_formats)?,
        })
    }
}
