use bytes::Bytes;
use std::io::{self, ErrorKind, Read};

use super::{parse_modbus_header, HEADER_LEN};

/// Why no response frame could be read.
#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum FrameError {
    /// The first bytes do not start any known response.
    #[display("unrecognised response header {header:02x?}: {reason}")]
    Header {
        header: [u8; HEADER_LEN],
        #[error(not(source))]
        reason: String,
    },
    /// The port itself failed.
    #[display("serial read failed: {_0}")]
    Io(io::Error),
}

/// Largest RTU frame on the wire.
const MAX_FRAME_LEN: usize = 256;

/// Read one RTU response frame.
///
/// Returns `Ok(None)` when the port read timed out before a complete frame
/// arrived; any other I/O failure is an error.
pub fn read_modbus_frame<R: Read + ?Sized>(port: &mut R) -> Result<Option<Bytes>, FrameError> {
    let mut header_buf = [0u8; HEADER_LEN];
    if !read_exact_or_timeout(port, &mut header_buf)? {
        return Ok(None);
    }

    let len = parse_modbus_header(header_buf).map_err(|err| FrameError::Header {
        header: header_buf,
        reason: err.to_string(),
    })?;
    let len = len.clamp(HEADER_LEN, MAX_FRAME_LEN);

    let mut full_buf = vec![0u8; len];
    full_buf[..HEADER_LEN].copy_from_slice(&header_buf);
    if !read_exact_or_timeout(port, &mut full_buf[HEADER_LEN..])? {
        log::warn!(
            "Response body timed out after header {:02x?} (expected {} bytes)",
            header_buf,
            len
        );
        return Ok(None);
    }

    log::debug!(
        "Received Modbus response: {}",
        full_buf
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" "),
    );

    Ok(Some(Bytes::from(full_buf)))
}

fn read_exact_or_timeout<R: Read + ?Sized>(
    port: &mut R,
    buf: &mut [u8],
) -> Result<bool, FrameError> {
    match port.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::UnexpectedEof) => {
            Ok(false)
        }
        Err(err) => Err(FrameError::Io(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_exactly_one_frame() {
        let mut port = Cursor::new(vec![
            0x01, 0x03, 0x02, 0x12, 0x34, 0xb5, 0x33, // frame
            0xff, 0xff, // trailing noise stays unread
        ]);
        let frame = read_modbus_frame(&mut port).unwrap().unwrap();
        assert_eq!(frame.len(), 7);
        assert_eq!(port.position(), 7);
    }

    #[test]
    fn short_input_is_a_timeout() {
        let mut port = Cursor::new(vec![0x01, 0x03]);
        assert!(read_modbus_frame(&mut port).unwrap().is_none());

        let mut port = Cursor::new(vec![0x01, 0x03, 0x04, 0x00]);
        assert!(read_modbus_frame(&mut port).unwrap().is_none());
    }

    struct Unplugged;

    impl Read for Unplugged {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::BrokenPipe, "device removed"))
        }
    }

    #[test]
    fn port_failure_is_an_io_error() {
        match read_modbus_frame(&mut Unplugged) {
            Err(FrameError::Io(err)) => assert_eq!(err.kind(), ErrorKind::BrokenPipe),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
