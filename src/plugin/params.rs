//! Typed plugin parameters.
//!
//! Every [`Tag`] has exactly one expected [`ParamKind`]. [`ParamMap::set`]
//! rejects values of the wrong kind, so readers never need to guess the
//! payload type behind a key.

use crate::error::{PluginError, PluginResult};
use crate::format::{
    AudioChannelLayout, AudioSampleFormat, MediaType, VideoBitStreamFormat, VideoPixelFormat,
};
use std::collections::HashMap;

/// Parameter keys understood by filters and plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    /// MIME of the stream handled by the plugin.
    Mime,
    /// Audio or video.
    MediaType,
    /// Channel description JSON (`ownerName`, `peerDevId`).
    MediaDescription,
    /// Caller-supplied session name fragment.
    MediaTitle,
    /// Frame width.
    VideoWidth,
    /// Frame height.
    VideoHeight,
    /// Frames per second.
    VideoFrameRate,
    /// Pixel format of raw frames.
    VideoPixelFormat,
    /// Framing of compressed video.
    VideoBitStreamFormat,
    /// Bitrate in bits per second.
    MediaBitrate,
    /// Audio channel count.
    AudioChannels,
    /// Audio sample rate.
    AudioSampleRate,
    /// Audio sample format.
    AudioSampleFormat,
    /// Audio channel layout.
    AudioChannelLayout,
    /// Samples per audio frame.
    AudioSamplePerFrame,
    /// AAC profile level.
    AudioAacLevel,
    /// Start time of the media clock.
    MediaStartTime,
    /// Marshalled shared memory descriptor.
    UserSharedMemoryFd,
}

/// Payload kind expected for a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// Text.
    Str,
    /// Signed integer.
    Int,
    /// [`MediaType`].
    MediaType,
    /// [`VideoPixelFormat`].
    PixelFormat,
    /// [`VideoBitStreamFormat`].
    BitStreamFormat,
    /// [`AudioSampleFormat`].
    SampleFormat,
    /// [`AudioChannelLayout`].
    ChannelLayout,
}

impl Tag {
    /// Kind of value this tag carries.
    pub fn kind(self) -> ParamKind {
        match self {
            Tag::Mime | Tag::MediaDescription | Tag::MediaTitle | Tag::UserSharedMemoryFd => {
                ParamKind::Str
            }
            Tag::MediaType => ParamKind::MediaType,
            Tag::VideoPixelFormat => ParamKind::PixelFormat,
            Tag::VideoBitStreamFormat => ParamKind::BitStreamFormat,
            Tag::AudioSampleFormat => ParamKind::SampleFormat,
            Tag::AudioChannelLayout => ParamKind::ChannelLayout,
            Tag::VideoWidth
            | Tag::VideoHeight
            | Tag::VideoFrameRate
            | Tag::MediaBitrate
            | Tag::AudioChannels
            | Tag::AudioSampleRate
            | Tag::AudioSamplePerFrame
            | Tag::AudioAacLevel
            | Tag::MediaStartTime => ParamKind::Int,
        }
    }
}

/// A parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Text.
    Str(String),
    /// Signed integer.
    Int(i64),
    /// Media type.
    MediaType(MediaType),
    /// Pixel format.
    PixelFormat(VideoPixelFormat),
    /// Bitstream framing.
    BitStreamFormat(VideoBitStreamFormat),
    /// Sample format.
    SampleFormat(AudioSampleFormat),
    /// Channel layout.
    ChannelLayout(AudioChannelLayout),
}

impl ParamValue {
    /// Kind of this value.
    pub fn kind(&self) -> ParamKind {
        match self {
            Self::Str(_) => ParamKind::Str,
            Self::Int(_) => ParamKind::Int,
            Self::MediaType(_) => ParamKind::MediaType,
            Self::PixelFormat(_) => ParamKind::PixelFormat,
            Self::BitStreamFormat(_) => ParamKind::BitStreamFormat,
            Self::SampleFormat(_) => ParamKind::SampleFormat,
            Self::ChannelLayout(_) => ParamKind::ChannelLayout,
        }
    }

    /// Text payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<MediaType> for ParamValue {
    fn from(value: MediaType) -> Self {
        Self::MediaType(value)
    }
}

/// Schema-checked parameter store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamMap {
    values: HashMap<Tag, ParamValue>,
}

impl ParamMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `tag`.
    ///
    /// # Errors
    ///
    /// [`PluginError::InvalidParameter`] if the value kind does not match the
    /// tag's schema.
    pub fn set(&mut self, tag: Tag, value: ParamValue) -> PluginResult {
        if value.kind() != tag.kind() {
            return Err(PluginError::InvalidParameter);
        }
        self.values.insert(tag, value);
        Ok(())
    }

    /// Value under `tag`.
    pub fn get(&self, tag: Tag) -> Option<&ParamValue> {
        self.values.get(&tag)
    }

    /// Owned value under `tag`, [`PluginError::NotExisted`] if absent.
    pub fn require(&self, tag: Tag) -> PluginResult<ParamValue> {
        self.values.get(&tag).cloned().ok_or(PluginError::NotExisted)
    }

    /// Text value under `tag`.
    pub fn str(&self, tag: Tag) -> Option<&str> {
        self.get(tag).and_then(ParamValue::as_str)
    }

    /// Integer value under `tag`.
    pub fn int(&self, tag: Tag) -> Option<i64> {
        self.get(tag).and_then(ParamValue::as_int)
    }

    /// Whether `tag` is set.
    pub fn contains(&self, tag: Tag) -> bool {
        self.values.contains_key(&tag)
    }

    /// Remove `tag`.
    pub fn remove(&mut self, tag: Tag) -> Option<ParamValue> {
        self.values.remove(&tag)
    }

    /// Copy every entry of `other` into `self`, overriding existing keys.
    pub fn merge(&mut self, other: &ParamMap) {
        for (tag, value) in &other.values {
            self.values.insert(*tag, value.clone());
        }
    }

    /// Entries sorted by tag.
    pub fn entries(&self) -> Vec<(Tag, ParamValue)> {
        let mut entries: Vec<_> = self
            .values
            .iter()
            .map(|(tag, value)| (*tag, value.clone()))
            .collect();
        entries.sort_by_key(|(tag, _)| *tag);
        entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_rejects_wrong_kind() {
        let mut params = ParamMap::new();
        assert_eq!(
            params.set(Tag::VideoWidth, "1920".into()),
            Err(PluginError::InvalidParameter)
        );
        assert_eq!(params.set(Tag::Mime, ParamValue::Int(5)), Err(PluginError::InvalidParameter));
        assert!(params.is_empty());
        params.set(Tag::VideoWidth, ParamValue::Int(1920)).unwrap();
        assert_eq!(params.int(Tag::VideoWidth), Some(1920));
    }

    #[test]
    fn test_require_missing_key() {
        let params = ParamMap::new();
        assert_eq!(params.require(Tag::Mime), Err(PluginError::NotExisted));
    }

    #[test]
    fn test_merge_overrides() {
        let mut base = ParamMap::new();
        base.set(Tag::VideoWidth, ParamValue::Int(640)).unwrap();
        base.set(Tag::VideoHeight, ParamValue::Int(480)).unwrap();
        let mut local = ParamMap::new();
        local.set(Tag::VideoWidth, ParamValue::Int(1280)).unwrap();
        base.merge(&local);
        assert_eq!(base.int(Tag::VideoWidth), Some(1280));
        assert_eq!(base.int(Tag::VideoHeight), Some(480));
        assert_eq!(base.entries()[0].0, Tag::VideoWidth);
    }
}
