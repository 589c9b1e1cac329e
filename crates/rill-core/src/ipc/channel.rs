//! Length-prefixed message channel over a duplex byte stream.

use std::io::{ErrorKind, Read, Write};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(unix)]
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

use super::protocol::{decode_message, encode_message};

/// Size of the length prefix.
const HEADER_LEN: usize = 4;

/// Upper bound for a single frame (1 GiB).
pub const MAX_FRAME_LEN: usize = 1 << 30;

/// Bytes requested from the stream per read.
const READ_CHUNK: usize = 64 * 1024;

/// Framed message channel.
///
/// Each frame is a 4-byte little-endian payload length followed by the
/// payload. Received bytes are buffered across calls, so a single read may
/// deliver part of a frame or several frames.
pub struct Channel<S> {
    /// Underlying transport.
    stream: S,
    /// Bytes received but not yet consumed.
    buffer: Vec<u8>,
    /// Largest payload accepted in either direction.
    max_frame_len: usize,
}

#[cfg(unix)]
impl Channel<UnixStream> {
    /// Connect to the governor's Unix domain socket.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|e| {
            Error::Ipc(format!(
                "Failed to connect to governor socket '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self::new(stream))
    }
}

impl<S: Read + Write> Channel<S> {
    /// Wrap a connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    /// Lower the frame size limit. Values above [`MAX_FRAME_LEN`] are capped.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len.min(MAX_FRAME_LEN);
        self
    }

    /// Largest payload this channel sends or accepts.
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Send one message as a single frame.
    pub fn send<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let payload = encode_message(message)?;
        self.send_payload(&payload)
    }

    /// Send an already encoded message as a single frame.
    pub fn send_payload(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_frame_len {
            return Err(Error::Ipc(format!(
                "IPC message too large: {} bytes",
                payload.len()
            )));
        }

        // Header and payload go out in one write so frames never interleave.
        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);

        self.stream
            .write_all(&frame)
            .map_err(|e| Error::Ipc(format!("Failed to write IPC message: {}", e)))?;
        self.stream
            .flush()
            .map_err(|e| Error::Ipc(format!("Failed to flush IPC stream: {}", e)))?;

        Ok(())
    }

    /// Block until a complete frame is available and decode it.
    ///
    /// # Errors
    /// [`Error::ConnectionLost`] if the stream ends before a full frame.
    pub fn receive<T: DeserializeOwned>(&mut self) -> Result<T> {
        loop {
            if let Some(payload) = self.take_frame()? {
                return decode_message(&payload);
            }
            self.fill()?;
        }
    }

    /// Number of buffered bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Give back the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Pop one complete frame from the buffer, if present.
    fn take_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&self.buffer[..HEADER_LEN]);
        let len = u32::from_le_bytes(header) as usize;

        if len > self.max_frame_len {
            return Err(Error::Protocol(format!("IPC message too large: {} bytes", len)));
        }
        if self.buffer.len() < HEADER_LEN + len {
            return Ok(None);
        }

        let payload = self.buffer[HEADER_LEN..HEADER_LEN + len].to_vec();
        self.buffer.drain(..HEADER_LEN + len);
        Ok(Some(payload))
    }

    /// Read at least one more byte into the buffer.
    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    if !self.buffer.is_empty() {
                        tracing::warn!(
                            "Governor closed the channel with {} bytes of a partial frame",
                            self.buffer.len()
                        );
                    }
                    return Err(Error::ConnectionLost);
                }
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                // A peer that closes with unread data resets the connection.
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::ConnectionReset
                            | ErrorKind::ConnectionAborted
                            | ErrorKind::UnexpectedEof
                    ) =>
                {
                    tracing::debug!("Governor channel closed: {}", e);
                    return Err(Error::ConnectionLost);
                }
                Err(e) => {
                    return Err(Error::Ipc(format!("Failed to read IPC stream: {}", e)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::GovernorMessage;
    use crate::spec::ObjectId;
    use std::io::{self, Cursor};

    /// Stream that hands out at most `chunk` bytes per read.
    struct TrickleStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
        chunk: usize,
    }

    impl TrickleStream {
        fn new(input: Vec<u8>, chunk: usize) -> Self {
            Self {
                input: Cursor::new(input),
                output: Vec::new(),
                chunk,
            }
        }
    }

    impl Read for TrickleStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let limit = buf.len().min(self.chunk);
            self.input.read(&mut buf[..limit])
        }
    }

    impl Write for TrickleStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn drop_message(id: i32) -> GovernorMessage {
        GovernorMessage::DropCached {
            objects: vec![ObjectId::new(1, id)],
        }
    }

    fn framed(messages: &[GovernorMessage]) -> Vec<u8> {
        let mut sender = Channel::new(TrickleStream::new(Vec::new(), usize::MAX));
        for message in messages {
            sender.send(message).unwrap();
        }
        sender.into_inner().output
    }

    #[test]
    fn test_frame_layout() {
        let bytes = framed(&[drop_message(1)]);
        let payload = encode_message(&drop_message(1)).unwrap();

        assert_eq!(&bytes[..4], &(payload.len() as u32).to_le_bytes());
        assert_eq!(&bytes[4..], &payload[..]);
    }

    #[test]
    fn test_partial_reads() {
        let bytes = framed(&[drop_message(1), drop_message(2)]);
        let mut channel = Channel::new(TrickleStream::new(bytes, 1));

        let first: GovernorMessage = channel.receive().unwrap();
        let second: GovernorMessage = channel.receive().unwrap();
        assert_eq!(first, drop_message(1));
        assert_eq!(second, drop_message(2));
    }

    #[test]
    fn test_several_frames_in_one_read() {
        let bytes = framed(&[drop_message(1), drop_message(2), drop_message(3)]);
        let mut channel = Channel::new(TrickleStream::new(bytes, usize::MAX));

        let first: GovernorMessage = channel.receive().unwrap();
        assert_eq!(first, drop_message(1));
        assert!(channel.buffered() > 0);

        let second: GovernorMessage = channel.receive().unwrap();
        let third: GovernorMessage = channel.receive().unwrap();
        assert_eq!(second, drop_message(2));
        assert_eq!(third, drop_message(3));
        assert_eq!(channel.buffered(), 0);
    }

    #[test]
    fn test_eof_mid_frame_is_connection_lost() {
        let mut bytes = framed(&[drop_message(1)]);
        bytes.truncate(bytes.len() - 1);
        let mut channel = Channel::new(TrickleStream::new(bytes, 3));

        let result: Result<GovernorMessage> = channel.receive();
        assert!(matches!(result, Err(Error::ConnectionLost)));
    }

    #[test]
    fn test_eof_between_frames_is_connection_lost() {
        let mut channel = Channel::new(TrickleStream::new(Vec::new(), 16));
        let result: Result<GovernorMessage> = channel.receive();
        assert!(matches!(result, Err(Error::ConnectionLost)));
    }

    /// Stream whose reads fail with a fixed error kind.
    struct FailingStream(io::ErrorKind);

    impl Read for FailingStream {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::from(self.0))
        }
    }

    impl Write for FailingStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_reset_is_connection_lost() {
        for kind in [io::ErrorKind::ConnectionReset, io::ErrorKind::UnexpectedEof] {
            let mut channel = Channel::new(FailingStream(kind));
            let result: Result<GovernorMessage> = channel.receive();
            assert!(matches!(result, Err(Error::ConnectionLost)), "{:?}", kind);
        }
    }

    #[test]
    fn test_other_read_errors_are_ipc() {
        let mut channel = Channel::new(FailingStream(io::ErrorKind::PermissionDenied));
        let result: Result<GovernorMessage> = channel.receive();
        assert!(matches!(result, Err(Error::Ipc(_))));
    }

    #[test]
    fn test_custom_frame_limit() {
        let mut channel =
            Channel::new(TrickleStream::new(Vec::new(), 16)).with_max_frame_len(8);
        assert_eq!(channel.max_frame_len(), 8);

        let payload = encode_message(&GovernorMessage::DropCached {
            objects: (0..10).map(|id| ObjectId::new(1, id)).collect(),
        })
        .unwrap();
        assert!(payload.len() > 8);
        assert!(matches!(channel.send_payload(&payload), Err(Error::Ipc(_))));
        assert!(channel.into_inner().output.is_empty());

        let limit = Channel::new(TrickleStream::new(Vec::new(), 16)).with_max_frame_len(usize::MAX);
        assert_eq!(limit.max_frame_len(), MAX_FRAME_LEN);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let bytes = ((MAX_FRAME_LEN + 1) as u32).to_le_bytes().to_vec();
        let mut channel = Channel::new(TrickleStream::new(bytes, 16));

        let result: Result<GovernorMessage> = channel.receive();
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_socket_pair() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut left = Channel::new(a);
        let mut right = Channel::new(b);

        left.send(&drop_message(9)).unwrap();
        let received: GovernorMessage = right.receive().unwrap();
        assert_eq!(received, drop_message(9));
    }
}
