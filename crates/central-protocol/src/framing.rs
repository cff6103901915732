//! Multipart message framing for stream sockets.
//!
//! A message is a big-endian `u32` frame count followed by each frame as a
//! big-endian `u32` length and its bytes. Peers send `[payload]`; the server
//! endpoint prefixes the connection identity before handing the message to
//! its workers and strips it again on the way out.

use std::io::{self, Read, Write};

use thiserror::Error;

/// Maximum number of frames accepted in one message.
pub const MAX_FRAMES: usize = 16;

/// Maximum size of a single frame in bytes.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// One multipart message.
pub type Frames = Vec<Vec<u8>>;

/// Errors raised while reading or writing framed messages.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The underlying stream failed.
    #[error("frame IO error: {0}")]
    Io(#[from] io::Error),
    /// The peer announced more frames than allowed.
    #[error("message has {count} frames, limit is {max}")]
    TooManyFrames { count: usize, max: usize },
    /// A frame exceeded the size limit.
    #[error("frame of {size} bytes exceeds {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },
}

/// Writes one multipart message and flushes the stream.
///
/// The message is assembled in memory first so it reaches the stream in a
/// single `write_all`.
///
/// # Errors
///
/// Returns an error if a limit is exceeded or the stream fails.
pub fn write_frames<W, F>(writer: &mut W, frames: &[F]) -> Result<(), FrameError>
where
    W: Write,
    F: AsRef<[u8]>,
{
    let count = encode_len(frames.len(), MAX_FRAMES, |count, max| {
        FrameError::TooManyFrames { count, max }
    })?;
    let body_len: usize = frames.iter().map(|frame| frame.as_ref().len() + 4).sum();
    let mut buffer = Vec::with_capacity(4 + body_len);
    buffer.extend_from_slice(&count.to_be_bytes());
    for frame in frames {
        let bytes = frame.as_ref();
        let len = encode_len(bytes.len(), MAX_FRAME_BYTES, |size, max| {
            FrameError::FrameTooLarge { size, max }
        })?;
        buffer.extend_from_slice(&len.to_be_bytes());
        buffer.extend_from_slice(bytes);
    }
    writer.write_all(&buffer)?;
    writer.flush()?;
    Ok(())
}

/// Reads one multipart message.
///
/// Returns `Ok(None)` when the stream ends cleanly before a new message
/// begins.
///
/// # Errors
///
/// Returns an error if a limit is exceeded, the stream fails, or it ends in
/// the middle of a message.
pub fn read_frames<R: Read>(reader: &mut R) -> Result<Option<Frames>, FrameError> {
    let Some(count) = read_header(reader)? else {
        return Ok(None);
    };
    let count = decode_len(count);
    if count > MAX_FRAMES {
        return Err(FrameError::TooManyFrames {
            count,
            max: MAX_FRAMES,
        });
    }

    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        let mut len = [0_u8; 4];
        reader.read_exact(&mut len)?;
        let size = decode_len(u32::from_be_bytes(len));
        if size > MAX_FRAME_BYTES {
            return Err(FrameError::FrameTooLarge {
                size,
                max: MAX_FRAME_BYTES,
            });
        }
        let mut frame = vec![0_u8; size];
        reader.read_exact(&mut frame)?;
        frames.push(frame);
    }
    Ok(Some(frames))
}

/// Reads the frame count, distinguishing a clean end of stream from a
/// truncated header.
fn read_header<R: Read>(reader: &mut R) -> Result<Option<u32>, FrameError> {
    let mut header = [0_u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let Some(rest) = header.get_mut(filled..) else {
            break;
        };
        match reader.read(rest) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(FrameError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a frame header",
                )));
            }
            Ok(read) => filled += read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error.into()),
        }
    }
    Ok(Some(u32::from_be_bytes(header)))
}

fn encode_len(
    value: usize,
    max: usize,
    error: impl FnOnce(usize, usize) -> FrameError,
) -> Result<u32, FrameError> {
    if value > max {
        return Err(error(value, max));
    }
    u32::try_from(value).map_err(|_| error(value, max))
}

fn decode_len(value: u32) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Cursor;

    fn encoded(frames: &[&[u8]]) -> Vec<u8> {
        let mut buffer = Vec::new();
        write_frames(&mut buffer, frames).expect("write frames");
        buffer
    }

    #[rstest]
    fn reads_back_written_frames() {
        let bytes = encoded(&[b"identity", b"{\"id\":1}"]);
        let mut cursor = Cursor::new(bytes);
        let frames = read_frames(&mut cursor)
            .expect("read frames")
            .expect("one message");
        assert_eq!(frames, vec![b"identity".to_vec(), b"{\"id\":1}".to_vec()]);
        assert!(read_frames(&mut cursor).expect("clean eof").is_none());
    }

    #[rstest]
    fn zero_frame_messages_are_representable() {
        let mut cursor = Cursor::new(encoded(&[]));
        let frames = read_frames(&mut cursor)
            .expect("read frames")
            .expect("one message");
        assert!(frames.is_empty());
    }

    #[rstest]
    fn reads_consecutive_messages() {
        let mut bytes = encoded(&[b"first"]);
        bytes.extend(encoded(&[b"second"]));
        let mut cursor = Cursor::new(bytes);
        let first = read_frames(&mut cursor).expect("read").expect("message");
        let second = read_frames(&mut cursor).expect("read").expect("message");
        assert_eq!(first, vec![b"first".to_vec()]);
        assert_eq!(second, vec![b"second".to_vec()]);
    }

    #[rstest]
    fn truncated_header_is_an_error() {
        let mut cursor = Cursor::new(vec![0_u8, 0]);
        assert!(matches!(read_frames(&mut cursor), Err(FrameError::Io(_))));
    }

    #[rstest]
    fn truncated_body_is_an_error() {
        let mut bytes = encoded(&[b"payload"]);
        bytes.truncate(bytes.len() - 2);
        let mut cursor = Cursor::new(bytes);
        assert!(matches!(read_frames(&mut cursor), Err(FrameError::Io(_))));
    }

    #[rstest]
    fn rejects_excess_frame_count() {
        let mut cursor = Cursor::new(100_u32.to_be_bytes().to_vec());
        assert!(matches!(
            read_frames(&mut cursor),
            Err(FrameError::TooManyFrames { count: 100, .. })
        ));
    }

    #[rstest]
    fn rejects_oversized_frame() {
        let mut bytes = 1_u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&u32::MAX.to_be_bytes());
        let mut cursor = Cursor::new(bytes);
        assert!(matches!(
            read_frames(&mut cursor),
            Err(FrameError::FrameTooLarge { .. })
        ));
    }

    #[rstest]
    fn refuses_to_write_oversized_frame() {
        let frame = vec![0_u8; MAX_FRAME_BYTES + 1];
        let mut buffer = Vec::new();
        assert!(matches!(
            write_frames(&mut buffer, &[frame]),
            Err(FrameError::FrameTooLarge { .. })
        ));
        assert!(buffer.is_empty());
    }
}
