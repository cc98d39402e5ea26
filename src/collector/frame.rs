//! Single-frame extraction from a motion-JPEG byte stream.
//!
//! The extractor is fed the stream chunk by chunk and moves through
//! `SeekingStart -> Accumulating -> Done`. Bytes before the first start
//! marker are dropped; the returned frame runs from the start marker through
//! the first end marker that follows it.

use crate::error::CaptureError;

/// Read size used when slicing the network stream.
pub const CHUNK_SIZE: usize = 1024;
/// A frame still open after this many bytes is abandoned.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;
/// Anything shorter is treated as a corrupt frame.
pub const MIN_FRAME_BYTES: usize = 1000;

const JPEG_START: [u8; 2] = [0xFF, 0xD8];
const JPEG_END: [u8; 2] = [0xFF, 0xD9];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorState {
    SeekingStart,
    Accumulating,
    Done,
}

fn find_marker(haystack: &[u8], marker: &[u8; 2], from: usize) -> Option<usize> {
    if haystack.len() < 2 || from > haystack.len() - 2 {
        return None;
    }
    haystack[from..]
        .windows(2)
        .position(|window| window == marker)
        .map(|offset| from + offset)
}

#[derive(Debug)]
pub struct FrameExtractor {
    state: ExtractorState,
    buffer: Vec<u8>,
    /// Offset up to which the active frame has already been searched for
    /// an end marker.
    scanned: usize,
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameExtractor {
    pub fn new() -> Self {
        Self {
            state: ExtractorState::SeekingStart,
            buffer: Vec::with_capacity(CHUNK_SIZE * 2),
            scanned: JPEG_START.len(),
        }
    }

    pub fn state(&self) -> ExtractorState {
        self.state
    }

    /// Bytes currently held: the unmatched tail while seeking, or the
    /// active frame while accumulating.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feeds the next chunk. Returns the frame once an end marker is seen.
    /// Chunks pushed after `Done` are ignored.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, CaptureError> {
        match self.state {
            ExtractorState::Done => return Ok(None),
            ExtractorState::SeekingStart => {
                self.buffer.extend_from_slice(chunk);
                match find_marker(&self.buffer, &JPEG_START, 0) {
                    Some(start) => {
                        self.buffer.drain(..start);
                        self.scanned = JPEG_START.len();
                        self.state = ExtractorState::Accumulating;
                    }
                    None => {
                        // Only a trailing 0xFF can still begin a start marker.
                        let keep = usize::from(self.buffer.last() == Some(&JPEG_START[0]));
                        let cut = self.buffer.len() - keep;
                        self.buffer.drain(..cut);
                        return Ok(None);
                    }
                }
            }
            ExtractorState::Accumulating => self.buffer.extend_from_slice(chunk),
        }

        self.scan_for_end()
    }

    fn scan_for_end(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        // Step back one byte so a marker split across chunks is still found.
        let from = self.scanned.saturating_sub(1).max(JPEG_START.len());
        if let Some(end) = find_marker(&self.buffer, &JPEG_END, from) {
            self.buffer.truncate(end + JPEG_END.len());
            self.state = ExtractorState::Done;
            let frame = std::mem::take(&mut self.buffer);
            if frame.len() < MIN_FRAME_BYTES {
                return Err(CaptureError::FrameTooSmall {
                    size: frame.len(),
                    min: MIN_FRAME_BYTES,
                });
            }
            return Ok(Some(frame));
        }

        self.scanned = self.buffer.len();
        if self.buffer.len() > MAX_FRAME_BYTES {
            self.state = ExtractorState::Done;
            self.buffer = Vec::new();
            return Err(CaptureError::FrameTooLarge {
                limit: MAX_FRAME_BYTES,
            });
        }
        Ok(None)
    }
}

/// Runs an in-memory stream through a fresh extractor in `CHUNK_SIZE` pieces.
pub fn extract_frame(stream: &[u8]) -> Result<Vec<u8>, CaptureError> {
    let mut extractor = FrameExtractor::new();
    for chunk in stream.chunks(CHUNK_SIZE) {
        if let Some(frame) = extractor.push(chunk)? {
            return Ok(frame);
        }
    }
    Err(CaptureError::Incomplete)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// SOI + `body_len` filler bytes (never 0xFF) + EOI.
    fn jpeg(body_len: usize) -> Vec<u8> {
        let mut frame = JPEG_START.to_vec();
        frame.extend((0..body_len).map(|i| (i % 200) as u8));
        frame.extend_from_slice(&JPEG_END);
        frame
    }

    fn multipart(frames: &[Vec<u8>]) -> Vec<u8> {
        let mut stream = Vec::new();
        for frame in frames {
            stream.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
            stream.extend_from_slice(frame);
            stream.extend_from_slice(b"\r\n");
        }
        stream
    }

    #[test]
    fn returns_first_frame_without_leading_bytes() {
        let first = jpeg(5000);
        let stream = multipart(&[first.clone(), jpeg(3000)]);

        let frame = extract_frame(&stream).unwrap();
        assert_eq!(&frame[..2], &JPEG_START);
        assert_eq!(&frame[frame.len() - 2..], &JPEG_END);
        assert_eq!(frame, first);
    }

    #[test]
    fn finds_start_marker_split_across_chunks() {
        let frame = jpeg(4000);
        let mut stream = vec![b'x'; CHUNK_SIZE - 1];
        stream.extend_from_slice(&frame);

        assert_eq!(extract_frame(&stream).unwrap(), frame);
    }

    #[test]
    fn finds_end_marker_split_across_chunks() {
        // 0xFF of the end marker is the last byte of the second chunk.
        let frame = jpeg(2 * CHUNK_SIZE - 3);
        assert_eq!(frame.len() - 2, 2 * CHUNK_SIZE - 1);

        assert_eq!(extract_frame(&frame).unwrap(), frame);
    }

    #[test]
    fn start_and_end_in_one_chunk() {
        let frame = jpeg(MIN_FRAME_BYTES);
        let mut extractor = FrameExtractor::new();
        let mut chunk = b"junk".to_vec();
        chunk.extend_from_slice(&frame);
        chunk.extend_from_slice(b"trailing");

        let out = extractor.push(&chunk).unwrap().unwrap();
        assert_eq!(out, frame);
        assert_eq!(extractor.state(), ExtractorState::Done);
        assert_eq!(extractor.push(b"more").unwrap(), None);
    }

    #[test]
    fn seeking_buffer_stays_small() {
        let mut extractor = FrameExtractor::new();
        for _ in 0..100 {
            assert_eq!(extractor.push(&[0u8; CHUNK_SIZE]).unwrap(), None);
        }
        assert_eq!(extractor.state(), ExtractorState::SeekingStart);
        assert_eq!(extractor.buffered(), 0);

        extractor.push(&[0x00, 0xFF]).unwrap();
        assert_eq!(extractor.buffered(), 1);
    }

    #[test]
    fn oversized_frame_fails_instead_of_truncating() {
        let mut stream = JPEG_START.to_vec();
        stream.extend(std::iter::repeat(0x11).take(MAX_FRAME_BYTES + 10));

        match extract_frame(&stream) {
            Err(CaptureError::FrameTooLarge { limit }) => assert_eq!(limit, MAX_FRAME_BYTES),
            other => panic!("expected FrameTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn tiny_frame_is_rejected() {
        let stream = multipart(&[jpeg(100)]);
        assert!(matches!(
            extract_frame(&stream),
            Err(CaptureError::FrameTooSmall { size: 104, .. })
        ));
    }

    #[test]
    fn frame_at_minimum_size_is_accepted() {
        let frame = jpeg(MIN_FRAME_BYTES - 4);
        assert_eq!(frame.len(), MIN_FRAME_BYTES);
        assert_eq!(extract_frame(&multipart(&[frame.clone()])).unwrap(), frame);
    }

    #[test]
    fn stream_without_end_marker_is_incomplete() {
        let mut stream = b"--frame\r\n\r\n".to_vec();
        stream.extend_from_slice(&JPEG_START);
        stream.extend(std::iter::repeat(0x22).take(5000));
        assert!(matches!(extract_frame(&stream), Err(CaptureError::Incomplete)));
    }
}
