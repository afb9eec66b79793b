//! Engine-facing enums and the tag translation table.

use crate::error::{EngineError, EngineResult};
use crate::format::{AudioChannelLayout, AudioSampleFormat, MediaType, VideoPixelFormat};
use crate::memory::AvTransSharedMemory;
use crate::plugin::{ParamValue, Tag};

/// Owner name of the distributed microphone.
pub const OWNER_NAME_D_MIC: &str = "ohos.dhardware.daudio.dmic";
/// Owner name of the distributed speaker.
pub const OWNER_NAME_D_SPEAKER: &str = "ohos.dhardware.daudio.dspeaker";
/// Owner name of the distributed camera.
pub const OWNER_NAME_D_CAMERA: &str = "ohos.dhardware.dcamera";
/// Owner name of the distributed screen.
pub const OWNER_NAME_D_SCREEN: &str = "ohos.dhardware.dscreen";

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StateId {
    /// Constructed, nothing bound.
    #[default]
    Idle,
    /// Pipeline built and control listener registered.
    Initialized,
    /// Control channel to the peer is open.
    ChCreated,
    /// Pipeline running.
    Started,
}

/// Which end of the stream an engine is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransRole {
    /// Produces media locally and sends it to the peer.
    AvSender,
    /// Receives media from the peer and hands it to the local service.
    AvReceiver,
}

impl TransRole {
    /// Short name used in logs and session names.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AvSender => "sender",
            Self::AvReceiver => "receiver",
        }
    }
}

/// Distributed device class an owner name stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareType {
    /// Microphone.
    Mic,
    /// Speaker.
    Speaker,
    /// Camera.
    Camera,
    /// Screen.
    Screen,
}

impl HardwareType {
    /// Map an owner name; `None` for owners this crate does not serve.
    pub fn from_owner(owner_name: &str) -> Option<Self> {
        match owner_name {
            OWNER_NAME_D_MIC => Some(Self::Mic),
            OWNER_NAME_D_SPEAKER => Some(Self::Speaker),
            OWNER_NAME_D_CAMERA => Some(Self::Camera),
            OWNER_NAME_D_SCREEN => Some(Self::Screen),
            _ => None,
        }
    }

    /// Media carried for this device class.
    pub fn media_type(self) -> MediaType {
        match self {
            Self::Mic | Self::Speaker => MediaType::Audio,
            Self::Camera | Self::Screen => MediaType::Video,
        }
    }

    /// Title both peers put into the data session name.
    pub fn media_title(self) -> &'static str {
        match self.media_type() {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
        }
    }
}

/// Scheduling hint for the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransStrategy {
    /// Favor latency over throughput.
    #[default]
    LowLatency,
    /// Favor a steady low bitrate.
    LowRate,
}

/// Attributes of a control channel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelAttribute {
    /// Scheduling hint.
    pub strategy: TransStrategy,
}

/// Parameter tags accepted at the engine boundary.
///
/// Values arrive as text and are translated into plugin parameters by
/// [`AvTransTag::translate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AvTransTag {
    /// Placeholder, always rejected.
    Invalid,
    /// Frame width in pixels.
    VideoWidth,
    /// Frame height in pixels.
    VideoHeight,
    /// Frames per second.
    VideoFrameRate,
    /// Video bitrate in bits per second.
    VideoBitRate,
    /// Pixel format name or code.
    VideoPixelFormat,
    /// Video MIME type.
    VideoCodecType,
    /// Audio MIME type.
    AudioCodecType,
    /// Channel count.
    AudioChannelMask,
    /// Sample rate in Hz.
    AudioSampleRate,
    /// Channel layout, given as a channel count.
    AudioChannelLayout,
    /// Sample format code.
    AudioSampleFormat,
    /// Samples per frame.
    AudioFrameSize,
    /// Audio bitrate in bits per second.
    AudioBitRate,
    /// Marshalled shared memory descriptor of the master clock.
    SharedMemoryFd,
}

const TAG_NAMES: &[(AvTransTag, &str)] = &[
    (AvTransTag::Invalid, "invalid"),
    (AvTransTag::VideoWidth, "video_width"),
    (AvTransTag::VideoHeight, "video_height"),
    (AvTransTag::VideoFrameRate, "video_frame_rate"),
    (AvTransTag::VideoBitRate, "video_bit_rate"),
    (AvTransTag::VideoPixelFormat, "video_pixel_format"),
    (AvTransTag::VideoCodecType, "video_codec_type"),
    (AvTransTag::AudioCodecType, "audio_codec_type"),
    (AvTransTag::AudioChannelMask, "audio_channel_mask"),
    (AvTransTag::AudioSampleRate, "audio_sample_rate"),
    (AvTransTag::AudioChannelLayout, "audio_channel_layout"),
    (AvTransTag::AudioSampleFormat, "audio_sample_format"),
    (AvTransTag::AudioFrameSize, "audio_frame_size"),
    (AvTransTag::AudioBitRate, "audio_bit_rate"),
    (AvTransTag::SharedMemoryFd, "shared_memory_fd"),
];

impl AvTransTag {
    /// Name used in `prepare_pipeline` configuration documents.
    pub fn name(self) -> &'static str {
        TAG_NAMES
            .iter()
            .find(|(tag, _)| *tag == self)
            .map_or("invalid", |(_, name)| name)
    }

    /// Inverse of [`AvTransTag::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        TAG_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(tag, _)| *tag)
    }

    /// Translate a textual value into the plugin parameters it sets on an
    /// engine carrying `media_type`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::SetupFailed`] for [`AvTransTag::Invalid`]
    /// - [`EngineError::InvalidParam`] when the value does not parse or a
    ///   codec type belongs to the other media type
    pub fn translate(self, value: &str, media_type: MediaType) -> EngineResult<Vec<(Tag, ParamValue)>> {
        let int = || value.trim().parse::<i64>().map_err(|_| EngineError::InvalidParam);
        let params = match self {
            Self::Invalid => return Err(EngineError::SetupFailed),
            Self::VideoWidth => vec![(Tag::VideoWidth, ParamValue::Int(int()?))],
            Self::VideoHeight => vec![(Tag::VideoHeight, ParamValue::Int(int()?))],
            Self::VideoFrameRate => vec![(Tag::VideoFrameRate, ParamValue::Int(int()?))],
            Self::VideoBitRate | Self::AudioBitRate => {
                vec![(Tag::MediaBitrate, ParamValue::Int(int()?))]
            }
            Self::VideoPixelFormat => {
                let format = VideoPixelFormat::parse(value).ok_or(EngineError::InvalidParam)?;
                vec![(Tag::VideoPixelFormat, ParamValue::PixelFormat(format))]
            }
            Self::VideoCodecType | Self::AudioCodecType => {
                let expected = if self == Self::VideoCodecType {
                    MediaType::Video
                } else {
                    MediaType::Audio
                };
                if media_type != expected || MediaType::from_mime(value) != Some(expected) {
                    return Err(EngineError::InvalidParam);
                }
                vec![(Tag::Mime, ParamValue::Str(value.to_string()))]
            }
            Self::AudioChannelMask => {
                let channels = int()?;
                vec![
                    (Tag::AudioChannels, ParamValue::Int(channels)),
                    (
                        Tag::AudioChannelLayout,
                        ParamValue::ChannelLayout(AudioChannelLayout::from_channels(channels)),
                    ),
                ]
            }
            Self::AudioSampleRate => vec![(Tag::AudioSampleRate, ParamValue::Int(int()?))],
            Self::AudioChannelLayout => vec![(
                Tag::AudioChannelLayout,
                ParamValue::ChannelLayout(AudioChannelLayout::from_channels(int()?)),
            )],
            Self::AudioSampleFormat => vec![(
                Tag::AudioSampleFormat,
                ParamValue::SampleFormat(AudioSampleFormat::from_code(int()?)),
            )],
            Self::AudioFrameSize => vec![(Tag::AudioSamplePerFrame, ParamValue::Int(int()?))],
            Self::SharedMemoryFd => {
                let memory = AvTransSharedMemory::unmarshal(value).map_err(|err| {
                    tracing::warn!(error = %err, "bad shared memory descriptor");
                    EngineError::InvalidParam
                })?;
                vec![(Tag::UserSharedMemoryFd, ParamValue::Str(memory.marshal()))]
            }
        };
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::mime;

    #[test]
    fn test_owner_mapping() {
        assert_eq!(HardwareType::from_owner(OWNER_NAME_D_MIC), Some(HardwareType::Mic));
        assert_eq!(HardwareType::from_owner(OWNER_NAME_D_SCREEN), Some(HardwareType::Screen));
        assert_eq!(HardwareType::from_owner("001"), None);
        assert_eq!(HardwareType::Speaker.media_type(), MediaType::Audio);
        assert_eq!(HardwareType::Camera.media_type(), MediaType::Video);
    }

    #[test]
    fn test_tag_names() {
        for (tag, name) in TAG_NAMES {
            assert_eq!(AvTransTag::from_name(name), Some(*tag));
            assert_eq!(tag.name(), *name);
        }
        assert_eq!(AvTransTag::from_name("video_depth"), None);
    }

    #[test]
    fn test_translate_numeric() {
        assert_eq!(
            AvTransTag::VideoWidth.translate("123", MediaType::Video).unwrap(),
            vec![(Tag::VideoWidth, ParamValue::Int(123))]
        );
        assert_eq!(
            AvTransTag::VideoWidth.translate("abc", MediaType::Video),
            Err(EngineError::InvalidParam)
        );
        assert_eq!(
            AvTransTag::Invalid.translate("1", MediaType::Video),
            Err(EngineError::SetupFailed)
        );
    }

    #[test]
    fn test_translate_codec_type_checks_media() {
        assert!(AvTransTag::VideoCodecType.translate(mime::VIDEO_H265, MediaType::Video).is_ok());
        assert_eq!(
            AvTransTag::VideoCodecType.translate(mime::AUDIO_RAW, MediaType::Video),
            Err(EngineError::InvalidParam)
        );
        assert_eq!(
            AvTransTag::AudioCodecType.translate(mime::AUDIO_RAW, MediaType::Video),
            Err(EngineError::InvalidParam)
        );
    }

    #[test]
    fn test_translate_channel_mask_sets_layout() {
        let params = AvTransTag::AudioChannelMask.translate("1", MediaType::Audio).unwrap();
        assert_eq!(
            params,
            vec![
                (Tag::AudioChannels, ParamValue::Int(1)),
                (Tag::AudioChannelLayout, ParamValue::ChannelLayout(AudioChannelLayout::Mono)),
            ]
        );
    }
}
