//! Per-buffer metadata and its JSON wire form.
//!
//! Every buffer carries either [`AudioBufferMeta`] or [`VideoBufferMeta`].
//! Before a buffer is sent over a channel the meta is marshalled into a small
//! JSON document that travels beside the payload as side-channel data:
//!
//! ```json
//! {"meta_data_type":1,"meta_timestamp":33,"meta_frame_number":2,
//!  "meta_ext_timestamp":30,"meta_ext_frame_number":1}
//! ```
//!
//! The ext pair is only written when positive. Unmarshalling validates every
//! numeric field against its width and fails closed on anything malformed.

use crate::error::MetaError;
use crate::format::{AudioSampleFormat, MediaType, VideoPixelFormat};
use crate::util::{optional_i64, optional_u32, parse_object, require_i64, require_u32};
use serde_json::{Map, Value, json};

/// Key for [`BufferDataType`].
pub const META_DATA_TYPE: &str = "meta_data_type";
/// Key for the presentation timestamp.
pub const META_TIMESTAMP: &str = "meta_timestamp";
/// Key for the frame number.
pub const META_FRAME_NUMBER: &str = "meta_frame_number";
/// Key for the sync-anchor timestamp.
pub const META_EXT_TIMESTAMP: &str = "meta_ext_timestamp";
/// Key for the sync-anchor frame number.
pub const META_EXT_FRAME_NUMBER: &str = "meta_ext_frame_number";

/// Content carried by a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferDataType {
    /// Audio samples or packets.
    #[default]
    Audio,
    /// Video bitstream or raw frames.
    VideoStream,
    /// Still picture.
    Picture,
    /// Unknown content.
    Unknown,
}

impl BufferDataType {
    /// Wire code.
    pub fn code(self) -> u32 {
        match self {
            Self::Audio => 0,
            Self::VideoStream => 1,
            Self::Picture => 2,
            Self::Unknown => 3,
        }
    }

    /// Inverse of [`BufferDataType::code`]; unrecognised codes are `Unknown`.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Audio,
            1 => Self::VideoStream,
            2 => Self::Picture,
            _ => Self::Unknown,
        }
    }
}

/// Metadata of an audio buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioBufferMeta {
    /// Presentation timestamp.
    pub pts: i64,
    /// Capture timestamp.
    pub cts: i64,
    /// Sample format.
    pub format: AudioSampleFormat,
    /// Content type.
    pub data_type: BufferDataType,
    /// Monotonic frame counter.
    pub frame_num: u32,
    /// Channel count.
    pub channels: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioBufferMeta {
    /// Serialize to the wire document.
    pub fn marshal(&self) -> String {
        json!({
            META_DATA_TYPE: self.data_type.code(),
            META_TIMESTAMP: self.pts,
            META_FRAME_NUMBER: self.frame_num,
        })
        .to_string()
    }

    /// Parse a wire document. Data type, timestamp and frame number are
    /// mandatory.
    pub fn unmarshal(text: &str) -> Result<Self, MetaError> {
        let obj = parse_object(text)?;
        Ok(Self {
            data_type: BufferDataType::from_code(require_u32(&obj, META_DATA_TYPE)?),
            pts: require_i64(&obj, META_TIMESTAMP)?,
            frame_num: require_u32(&obj, META_FRAME_NUMBER)?,
            ..Self::default()
        })
    }
}

/// Metadata of a video buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoBufferMeta {
    /// Presentation timestamp.
    pub pts: i64,
    /// Capture timestamp.
    pub cts: i64,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format of raw frames.
    pub format: VideoPixelFormat,
    /// Content type.
    pub data_type: BufferDataType,
    /// Monotonic frame counter.
    pub frame_num: u32,
    /// Audio clock timestamp this frame is anchored to.
    pub ext_pts: i64,
    /// Audio clock frame number this frame is anchored to.
    pub ext_frame_num: u32,
}

impl Default for VideoBufferMeta {
    fn default() -> Self {
        Self {
            pts: 0,
            cts: 0,
            width: 0,
            height: 0,
            format: VideoPixelFormat::default(),
            data_type: BufferDataType::VideoStream,
            frame_num: 0,
            ext_pts: 0,
            ext_frame_num: 0,
        }
    }
}

impl VideoBufferMeta {
    /// Serialize to the wire document, omitting a non-positive ext pair.
    pub fn marshal(&self) -> String {
        let mut doc = Map::new();
        doc.insert(META_DATA_TYPE.into(), self.data_type.code().into());
        doc.insert(META_TIMESTAMP.into(), self.pts.into());
        doc.insert(META_FRAME_NUMBER.into(), self.frame_num.into());
        if self.ext_pts > 0 {
            doc.insert(META_EXT_TIMESTAMP.into(), self.ext_pts.into());
        }
        if self.ext_frame_num > 0 {
            doc.insert(META_EXT_FRAME_NUMBER.into(), self.ext_frame_num.into());
        }
        Value::Object(doc).to_string()
    }

    /// Parse a wire document. The ext pair is optional and defaults to 0.
    pub fn unmarshal(text: &str) -> Result<Self, MetaError> {
        let obj = parse_object(text)?;
        Ok(Self {
            data_type: BufferDataType::from_code(require_u32(&obj, META_DATA_TYPE)?),
            pts: require_i64(&obj, META_TIMESTAMP)?,
            frame_num: require_u32(&obj, META_FRAME_NUMBER)?,
            ext_pts: optional_i64(&obj, META_EXT_TIMESTAMP)?.unwrap_or_default(),
            ext_frame_num: optional_u32(&obj, META_EXT_FRAME_NUMBER)?.unwrap_or_default(),
            ..Self::default()
        })
    }
}

/// Metadata attached to a buffer, fixed to one media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferMeta {
    /// Audio buffer.
    Audio(AudioBufferMeta),
    /// Video buffer.
    Video(VideoBufferMeta),
}

impl BufferMeta {
    /// Empty meta of the given media type.
    pub fn empty(media_type: MediaType) -> Self {
        match media_type {
            MediaType::Audio => Self::Audio(AudioBufferMeta::default()),
            MediaType::Video => Self::Video(VideoBufferMeta::default()),
        }
    }

    /// Media type of this meta.
    pub fn media_type(&self) -> MediaType {
        match self {
            Self::Audio(_) => MediaType::Audio,
            Self::Video(_) => MediaType::Video,
        }
    }

    /// Presentation timestamp.
    pub fn pts(&self) -> i64 {
        match self {
            Self::Audio(m) => m.pts,
            Self::Video(m) => m.pts,
        }
    }

    /// Frame number.
    pub fn frame_num(&self) -> u32 {
        match self {
            Self::Audio(m) => m.frame_num,
            Self::Video(m) => m.frame_num,
        }
    }

    /// Set the presentation timestamp.
    pub fn set_pts(&mut self, pts: i64) {
        match self {
            Self::Audio(m) => m.pts = pts,
            Self::Video(m) => m.pts = pts,
        }
    }

    /// Set the frame number.
    pub fn set_frame_num(&mut self, frame_num: u32) {
        match self {
            Self::Audio(m) => m.frame_num = frame_num,
            Self::Video(m) => m.frame_num = frame_num,
        }
    }

    /// Serialize to the wire document of the matching variant.
    pub fn marshal(&self) -> String {
        match self {
            Self::Audio(m) => m.marshal(),
            Self::Video(m) => m.marshal(),
        }
    }

    /// Parse a wire document as the given media type.
    pub fn unmarshal(media_type: MediaType, text: &str) -> Result<Self, MetaError> {
        match media_type {
            MediaType::Audio => AudioBufferMeta::unmarshal(text).map(Self::Audio),
            MediaType::Video => VideoBufferMeta::unmarshal(text).map(Self::Video),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_meta_round_trip_with_ext() {
        let meta = VideoBufferMeta {
            pts: 1_700_000_000_123,
            frame_num: 42,
            ext_pts: 1_700_000_000_100,
            ext_frame_num: 40,
            ..VideoBufferMeta::default()
        };
        let text = meta.marshal();
        assert!(text.contains(META_EXT_TIMESTAMP));
        assert_eq!(VideoBufferMeta::unmarshal(&text).unwrap(), meta);
    }

    #[test]
    fn test_video_meta_omits_zero_ext() {
        let meta = VideoBufferMeta {
            pts: 10,
            frame_num: 1,
            ..VideoBufferMeta::default()
        };
        let text = meta.marshal();
        assert!(!text.contains(META_EXT_TIMESTAMP));
        assert!(!text.contains(META_EXT_FRAME_NUMBER));
        let parsed = VideoBufferMeta::unmarshal(&text).unwrap();
        assert_eq!(parsed.ext_pts, 0);
        assert_eq!(parsed.ext_frame_num, 0);
    }

    #[test]
    fn test_video_meta_rejects_bad_fields() {
        let missing = r#"{"meta_data_type":1,"meta_timestamp":5}"#;
        assert_eq!(
            VideoBufferMeta::unmarshal(missing),
            Err(MetaError::MissingField(META_FRAME_NUMBER))
        );
        let wrong_type = r#"{"meta_data_type":1,"meta_timestamp":"5","meta_frame_number":1}"#;
        assert_eq!(
            VideoBufferMeta::unmarshal(wrong_type),
            Err(MetaError::InvalidField(META_TIMESTAMP))
        );
        let overflow = r#"{"meta_data_type":1,"meta_timestamp":5,"meta_frame_number":4294967296}"#;
        assert!(VideoBufferMeta::unmarshal(overflow).is_err());
        let bad_ext =
            r#"{"meta_data_type":1,"meta_timestamp":5,"meta_frame_number":1,"meta_ext_frame_number":-3}"#;
        assert!(VideoBufferMeta::unmarshal(bad_ext).is_err());
        assert_eq!(VideoBufferMeta::unmarshal("[]"), Err(MetaError::NotAnObject));
    }

    #[test]
    fn test_audio_meta_requires_all_fields() {
        let meta = AudioBufferMeta {
            pts: 99,
            frame_num: 3,
            ..AudioBufferMeta::default()
        };
        assert_eq!(AudioBufferMeta::unmarshal(&meta.marshal()).unwrap(), meta);
        assert!(AudioBufferMeta::unmarshal(r#"{"meta_timestamp":1,"meta_frame_number":1}"#).is_err());
    }

    #[test]
    fn test_buffer_meta_dispatch() {
        let mut meta = BufferMeta::empty(MediaType::Video);
        meta.set_pts(7);
        meta.set_frame_num(8);
        assert_eq!(meta.media_type(), MediaType::Video);
        let parsed = BufferMeta::unmarshal(MediaType::Video, &meta.marshal()).unwrap();
        assert_eq!(parsed.pts(), 7);
        assert_eq!(parsed.frame_num(), 8);
    }
}
