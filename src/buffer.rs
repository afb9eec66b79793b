//! Media buffers passed between plugins.

use crate::format::MediaType;
use crate::metadata::{AudioBufferMeta, BufferMeta, VideoBufferMeta};
use bytes::{Bytes, BytesMut};
use smallvec::SmallVec;

/// A media buffer: one or more payload segments plus per-frame metadata.
///
/// Segments are reference-counted [`Bytes`], so cloning a buffer copies the
/// metadata and shares the immutable payload. The media type of the meta is
/// fixed when the buffer is created; only the fields of that variant can be
/// changed afterwards.
///
/// # Example
///
/// ```rust
/// use avtrans::buffer::AvTransBuffer;
/// use avtrans::format::MediaType;
///
/// let mut buffer = AvTransBuffer::with_data(MediaType::Video, &b"frame"[..]);
/// buffer.video_meta_mut().unwrap().frame_num = 1;
/// assert_eq!(buffer.len(), 5);
/// assert!(buffer.audio_meta_mut().is_none());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AvTransBuffer {
    segments: SmallVec<[Bytes; 1]>,
    meta: BufferMeta,
}

impl AvTransBuffer {
    /// Create an empty buffer of the given media type.
    pub fn new(media_type: MediaType) -> Self {
        Self {
            segments: SmallVec::new(),
            meta: BufferMeta::empty(media_type),
        }
    }

    /// Create a buffer holding a single payload segment.
    pub fn with_data(media_type: MediaType, data: impl Into<Bytes>) -> Self {
        let mut buffer = Self::new(media_type);
        buffer.append(data);
        buffer
    }

    /// Create a buffer from existing metadata.
    pub fn from_meta(meta: BufferMeta) -> Self {
        Self {
            segments: SmallVec::new(),
            meta,
        }
    }

    /// Append a payload segment.
    pub fn append(&mut self, data: impl Into<Bytes>) {
        let data = data.into();
        if !data.is_empty() {
            self.segments.push(data);
        }
    }

    /// Number of payload segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Payload segment at `index`.
    pub fn segment(&self, index: usize) -> Option<&Bytes> {
        self.segments.get(index)
    }

    /// Total payload length in bytes.
    pub fn len(&self) -> usize {
        self.segments.iter().map(Bytes::len).sum()
    }

    /// Whether the buffer has no payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The payload as one contiguous slice.
    ///
    /// Single-segment buffers are returned without copying.
    pub fn contiguous(&self) -> Bytes {
        match self.segments.as_slice() {
            [] => Bytes::new(),
            [only] => only.clone(),
            many => {
                let mut joined = BytesMut::with_capacity(self.len());
                for segment in many {
                    joined.extend_from_slice(segment);
                }
                joined.freeze()
            }
        }
    }

    /// Metadata of this buffer.
    pub fn meta(&self) -> &BufferMeta {
        &self.meta
    }

    /// Media type fixed at creation.
    pub fn media_type(&self) -> MediaType {
        self.meta.media_type()
    }

    /// Mutable audio metadata, `None` for video buffers.
    pub fn audio_meta_mut(&mut self) -> Option<&mut AudioBufferMeta> {
        match &mut self.meta {
            BufferMeta::Audio(meta) => Some(meta),
            BufferMeta::Video(_) => None,
        }
    }

    /// Mutable video metadata, `None` for audio buffers.
    pub fn video_meta_mut(&mut self) -> Option<&mut VideoBufferMeta> {
        match &mut self.meta {
            BufferMeta::Video(meta) => Some(meta),
            BufferMeta::Audio(_) => None,
        }
    }

    /// Set pts and frame number regardless of variant.
    pub fn stamp(&mut self, pts: i64, frame_num: u32) {
        self.meta.set_pts(pts);
        self.meta.set_frame_num(frame_num);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_segments() {
        let mut buffer = AvTransBuffer::new(MediaType::Audio);
        assert!(buffer.is_empty());
        buffer.append(&b"abc"[..]);
        buffer.append(Bytes::new());
        buffer.append(&b"de"[..]);
        assert_eq!(buffer.segment_count(), 2);
        assert_eq!(buffer.len(), 5);
        assert_eq!(&buffer.contiguous()[..], b"abcde");
    }

    #[test]
    fn test_clone_copies_meta() {
        let mut original = AvTransBuffer::with_data(MediaType::Video, &b"x"[..]);
        original.video_meta_mut().unwrap().ext_pts = 5;
        let mut copy = original.clone();
        copy.video_meta_mut().unwrap().ext_pts = 9;
        assert_eq!(original.meta().pts(), copy.meta().pts());
        match (original.meta(), copy.meta()) {
            (BufferMeta::Video(a), BufferMeta::Video(b)) => {
                assert_eq!(a.ext_pts, 5);
                assert_eq!(b.ext_pts, 9);
            }
            _ => panic!("meta type changed on clone"),
        }
    }

    #[test]
    fn test_meta_type_is_fixed() {
        let mut buffer = AvTransBuffer::new(MediaType::Audio);
        assert!(buffer.video_meta_mut().is_none());
        buffer.stamp(10, 2);
        assert_eq!(buffer.media_type(), MediaType::Audio);
        assert_eq!(buffer.meta().frame_num(), 2);
    }
}
