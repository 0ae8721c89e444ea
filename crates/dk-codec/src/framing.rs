//! Length-prefixed frame helpers shared by the msgpack and pickle codecs.
//!
//! Neither format is self-delimiting over a stream, so both are written as a
//! sequence of `[u32 big-endian length][payload]` frames, one frame per
//! batch of up to `chunk_size` records. Grounded on `parser::input::encoding`'s
//! pattern of layering a framing concern underneath a format concern.

use std::io::{Read, Write};

use crate::CodecError;

pub fn read_frame(reader: &mut dyn Read) -> Result<Option<Vec<u8>>, CodecError> {
    let mut len_buf = [0u8; 4];
    match read_exact_or_eof(reader, &mut len_buf)? {
        false => return Ok(None),
        true => {}
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .map_err(|e| CodecError::Framing(format!("truncated frame body: {e}")))?;
    Ok(Some(payload))
}

/// Like `Read::read_exact`, but returns `Ok(false)` instead of erroring when
/// zero bytes are available at the very start of the buffer (clean EOF
/// between frames, as opposed to a truncated frame).
fn read_exact_or_eof(reader: &mut dyn Read, buf: &mut [u8]) -> Result<bool, CodecError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(CodecError::Framing("truncated frame length prefix".into()));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CodecError::Io(e)),
        }
    }
    Ok(true)
}

pub fn write_frame(writer: &mut dyn Write, payload: &[u8]) -> Result<(), CodecError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| CodecError::Framing("frame payload exceeds u32::MAX bytes".into()))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_frames() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").unwrap();
        write_frame(&mut buf, b"world!").unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(read_frame(&mut cursor).unwrap(), Some(b"world!".to_vec()));
        assert_eq!(read_frame(&mut cursor).unwrap(), None);
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").unwrap();
        buf.truncate(buf.len() - 2);
        let mut cursor = std::io::Cursor::new(buf);
        assert!(read_frame(&mut cursor).is_err());
    }
}
