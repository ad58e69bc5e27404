//! Collaborator interfaces delegated to outside this crate (spec §1 Scope,
//! spec §6): the movie-encoder sink and the GPU-texture sink. Both are
//! modeled as traits so the capture session can be exercised against an
//! in-memory fake; a real binding to a movie-encoding library or a
//! graphics API lives downstream.

use crate::error::Result;

/// Movie-encoder collaborator (spec §6): `open`/`get_writable_buffer`/
/// `commit_frame`/`finalize`. The encoder sink sees every captured frame
/// in capture order, with no drops, regardless of the consumer path's
/// `dropframes` setting (spec §5 "Ordering guarantees").
pub trait EncoderSink: Send + Sync {
    /// Opens a new movie file. Returns an opaque handle.
    fn open(
        &self,
        path: &str,
        width: u32,
        height: u32,
        fps: f64,
        channels: u32,
        bitdepth: u32,
        codec_spec: &str,
    ) -> Result<u64>;

    /// Returns a writable buffer the caller fills with one frame's pixels
    /// (`data`, sized `width*height*channels*(bitdepth/8)`) before handing
    /// it back to [`EncoderSink::commit_frame`] (spec §6: "get a writable
    /// buffer" / "commit frame").
    fn get_writable_buffer(&self, handle: u64) -> Result<WritableBuffer>;

    /// Commits `buffer` (previously returned by
    /// [`EncoderSink::get_writable_buffer`] and filled with pixel data) as
    /// the next frame, held for `duration` seconds; `flip_y` requests a
    /// vertical flip on write. Rejects a buffer whose shape doesn't match
    /// the movie it was opened with (spec §7 `RecordingError`).
    fn commit_frame(&self, handle: u64, buffer: WritableBuffer, duration: f64, flip_y: bool) -> Result<()>;

    /// Finalizes and closes the movie file.
    fn finalize(&self, handle: u64) -> Result<()>;
}

/// A buffer an [`EncoderSink`] hands back for the caller to fill with one
/// frame's pixels before committing it (spec §6: `get_writable_buffer`'s
/// `(ptr, w, h, channels, bpc)` return value, translated to an owned byte
/// buffer rather than a raw pointer).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WritableBuffer {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub bitdepth: u32,
    pub data: Vec<u8>,
}

impl WritableBuffer {
    /// The byte length `data` must have for this buffer's declared shape.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize * (self.bitdepth as usize / 8).max(1)
    }
}

/// Internal pixel-transfer format chosen for a texture upload (spec §4.4
/// `get_image`'s texture branch): a float format for high-bit-depth
/// sensors when the caller can accept one, otherwise a normalized 16-bit
/// integer format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureInternalFormat {
    Float16,
    Float32,
    NormalizedU16,
}

/// GPU-texture creation collaborator (spec §6). Texture upload itself is
/// delegated entirely; this crate only selects the format and applies the
/// pixel-transfer scale described in spec §4.4 before calling it.
pub trait TextureSink: Send + Sync {
    fn create_texture(&self, spec: &TextureSpec) -> Result<u64>;
}

/// Texture-creation parameters (spec §6 `create_texture`).
#[derive(Clone, Debug, PartialEq)]
pub struct TextureSpec {
    pub width: u32,
    pub height: u32,
    /// `reqlayers * (8 | 16 | 32)` (spec §4.4 `get_image` texture branch).
    pub depth: u32,
    pub internal_format: TextureInternalFormat,
    pub data: Vec<u8>,
}

/// Selects the texture internal format (spec §4.4): a float format when
/// `actual_bitdepth > 11` and the caller advertises floating-texture
/// support, otherwise a normalized 16-bit integer format.
pub fn select_internal_format(
    actual_bitdepth: u32,
    supports_float16: bool,
    supports_float32: bool,
) -> TextureInternalFormat {
    if actual_bitdepth > 11 {
        if supports_float32 {
            return TextureInternalFormat::Float32;
        }
        if supports_float16 {
            return TextureInternalFormat::Float16;
        }
    }
    TextureInternalFormat::NormalizedU16
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory encoder sink used by the session's own test suite
    /// (property 8: "no drop in encoder path").
    #[derive(Default)]
    pub struct FakeEncoderSink {
        inner: Mutex<Inner>,
    }

    #[derive(Default)]
    struct Inner {
        next_handle: u64,
        movies: HashMap<u64, Movie>,
    }

    struct Movie {
        spec: WritableBuffer,
        committed: Vec<Vec<u8>>,
        finalized: bool,
    }

    impl FakeEncoderSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn frames_committed(&self, handle: u64) -> usize {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.movies.get(&handle).map(|m| m.committed.len()).unwrap_or(0)
        }

        pub fn is_finalized(&self, handle: u64) -> bool {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.movies.get(&handle).map(|m| m.finalized).unwrap_or(false)
        }
    }

    impl EncoderSink for FakeEncoderSink {
        fn open(
            &self,
            _path: &str,
            width: u32,
            height: u32,
            _fps: f64,
            channels: u32,
            bitdepth: u32,
            _codec_spec: &str,
        ) -> Result<u64> {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let handle = inner.next_handle;
            inner.next_handle += 1;
            inner.movies.insert(
                handle,
                Movie {
                    spec: WritableBuffer {
                        width,
                        height,
                        channels,
                        bitdepth,
                        data: Vec::new(),
                    },
                    committed: Vec::new(),
                    finalized: false,
                },
            );
            Ok(handle)
        }

        fn get_writable_buffer(&self, handle: u64) -> Result<WritableBuffer> {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let movie = inner
                .movies
                .get(&handle)
                .ok_or_else(|| crate::error::CaptureError::Recording("unknown movie handle".into()))?;
            let mut buffer = movie.spec.clone();
            buffer.data = vec![0u8; buffer.expected_len()];
            Ok(buffer)
        }

        fn commit_frame(&self, handle: u64, buffer: WritableBuffer, _duration: f64, _flip_y: bool) -> Result<()> {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let movie = inner
                .movies
                .get_mut(&handle)
                .ok_or_else(|| crate::error::CaptureError::Recording("unknown movie handle".into()))?;
            if buffer.width != movie.spec.width
                || buffer.height != movie.spec.height
                || buffer.channels != movie.spec.channels
                || buffer.bitdepth != movie.spec.bitdepth
                || buffer.data.len() != buffer.expected_len()
            {
                return Err(crate::error::CaptureError::Recording(
                    "committed buffer shape doesn't match movie".into(),
                ));
            }
            movie.committed.push(buffer.data);
            Ok(())
        }

        fn finalize(&self, handle: u64) -> Result<()> {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let movie = inner
                .movies
                .get_mut(&handle)
                .ok_or_else(|| crate::error::CaptureError::Recording("unknown movie handle".into()))?;
            movie.finalized = true;
            Ok(())
        }
    }

    /// In-memory texture sink: just records the last spec it was asked to
    /// upload.
    #[derive(Default)]
    pub struct FakeTextureSink {
        inner: Mutex<Option<TextureSpec>>,
    }

    impl FakeTextureSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn last_spec(&self) -> Option<TextureSpec> {
            self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }
    }

    impl TextureSink for FakeTextureSink {
        fn create_texture(&self, spec: &TextureSpec) -> Result<u64> {
            *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = Some(spec.clone());
            Ok(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_format_prefers_float32_for_high_bitdepth() {
        assert_eq!(
            select_internal_format(12, true, true),
            TextureInternalFormat::Float32
        );
        assert_eq!(
            select_internal_format(12, true, false),
            TextureInternalFormat::Float16
        );
        assert_eq!(
            select_internal_format(12, false, false),
            TextureInternalFormat::NormalizedU16
        );
    }

    #[test]
    fn internal_format_is_normalized_for_low_bitdepth() {
        assert_eq!(
            select_internal_format(8, true, true),
            TextureInternalFormat::NormalizedU16
        );
    }
}
