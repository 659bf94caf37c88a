//! JDWP packet framing.
//!
//! Wire format (all integers big-endian):
//! ```text
//! ┌────────────┬──────────┬─────────┬──────────────────────────────┬──────────┐
//! │ Length (4) │ Id (4)   │ Flags   │ CmdSet+Cmd (2) / Error (2)   │ Data     │
//! │ incl. hdr  │          │ (1)     │ reply when flags & 0x80      │          │
//! └────────────┴──────────┴─────────┴──────────────────────────────┴──────────┘
//! ```
//! Packets are relayed whole: the bytes handed out by [`PacketReader`] include
//! the header, and [`PacketWriter`] expects the same.

use std::io::{ErrorKind, Read, Write};

use bytes::{Bytes, BytesMut};

use crate::error::{Result, TransportError};

/// JDWP packet header size.
pub const HEADER_SIZE: usize = 11;

/// Handshake string both ends of a JDWP socket exchange before any packet.
pub const JDWP_HANDSHAKE: &[u8; 14] = b"JDWP-Handshake";

/// Default maximum packet size: 16 MiB.
pub const DEFAULT_MAX_PACKET: usize = 16 * 1024 * 1024;

const REPLY_FLAG: u8 = 0x80;
const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Decoded JDWP header, used for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub length: u32,
    pub id: u32,
    pub flags: u8,
    /// `(command_set, command)` for commands, `error_code` split in two for replies.
    pub code: [u8; 2],
}

impl PacketHeader {
    /// Parse the header of a complete packet.
    pub fn parse(packet: &[u8]) -> Result<Self> {
        if packet.len() < HEADER_SIZE {
            return Err(TransportError::InvalidPacketLength(packet.len()));
        }
        Ok(Self {
            length: u32::from_be_bytes([packet[0], packet[1], packet[2], packet[3]]),
            id: u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
            flags: packet[8],
            code: [packet[9], packet[10]],
        })
    }

    pub fn is_reply(&self) -> bool {
        self.flags & REPLY_FLAG != 0
    }

    /// Error code of a reply packet.
    pub fn error_code(&self) -> Option<u16> {
        self.is_reply().then(|| u16::from_be_bytes(self.code))
    }

    /// `(command_set, command)` of a command packet.
    pub fn command(&self) -> Option<(u8, u8)> {
        (!self.is_reply()).then_some((self.code[0], self.code[1]))
    }
}

/// Decode one packet from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete packet yet.
/// On success, consumes the packet bytes from the buffer.
pub fn decode_packet(src: &mut BytesMut, max_packet_size: usize) -> Result<Option<Bytes>> {
    if src.len() < 4 {
        return Ok(None);
    }

    let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
    if length < HEADER_SIZE {
        return Err(TransportError::InvalidPacketLength(length));
    }
    if length > max_packet_size {
        return Err(TransportError::PacketTooLarge {
            size: length,
            max: max_packet_size,
        });
    }
    if src.len() < length {
        return Ok(None);
    }

    Ok(Some(src.split_to(length).freeze()))
}

/// Reads complete JDWP packets from any `Read` stream.
pub struct PacketReader<T> {
    inner: T,
    buf: BytesMut,
    max_packet_size: usize,
}

impl<T: Read> PacketReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_max_packet_size(inner, DEFAULT_MAX_PACKET)
    }

    pub fn with_max_packet_size(inner: T, max_packet_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_packet_size,
        }
    }

    /// Read the next complete packet (blocking).
    ///
    /// Returns `Err(TransportError::ConnectionClosed)` when EOF is reached.
    pub fn read_packet(&mut self) -> Result<Bytes> {
        loop {
            if let Some(packet) = decode_packet(&mut self.buf, self.max_packet_size)? {
                return Ok(packet);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            };

            if read == 0 {
                return Err(TransportError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// Writes complete JDWP packets to any `Write` stream.
pub struct PacketWriter<T> {
    inner: T,
    max_packet_size: usize,
}

impl<T: Write> PacketWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_max_packet_size(inner, DEFAULT_MAX_PACKET)
    }

    pub fn with_max_packet_size(inner: T, max_packet_size: usize) -> Self {
        Self {
            inner,
            max_packet_size,
        }
    }

    /// Write one packet. The declared length must match the slice.
    pub fn write_packet(&mut self, packet: &[u8]) -> Result<()> {
        let header = PacketHeader::parse(packet)?;
        if header.length as usize != packet.len() {
            return Err(TransportError::InvalidPacketLength(header.length as usize));
        }
        if packet.len() > self.max_packet_size {
            return Err(TransportError::PacketTooLarge {
                size: packet.len(),
                max: self.max_packet_size,
            });
        }

        let mut offset = 0usize;
        while offset < packet.len() {
            match self.inner.write(&packet[offset..]) {
                Ok(0) => return Err(TransportError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }

        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// Perform the JDWP handshake as the connecting side: send, then expect the echo.
pub fn handshake_initiator<S: Read + Write>(stream: &mut S) -> Result<()> {
    stream.write_all(JDWP_HANDSHAKE)?;
    stream.flush()?;
    expect_handshake(stream)
}

/// Perform the JDWP handshake as the accepting side: expect, then echo.
pub fn handshake_acceptor<S: Read + Write>(stream: &mut S) -> Result<()> {
    expect_handshake(stream)?;
    stream.write_all(JDWP_HANDSHAKE)?;
    stream.flush()?;
    Ok(())
}

fn expect_handshake<R: Read>(stream: &mut R) -> Result<()> {
    let mut received = [0u8; JDWP_HANDSHAKE.len()];
    stream.read_exact(&mut received).map_err(|err| {
        if err.kind() == ErrorKind::UnexpectedEof {
            TransportError::ConnectionClosed
        } else {
            TransportError::Io(err)
        }
    })?;
    if &received != JDWP_HANDSHAKE {
        return Err(TransportError::Handshake(format!(
            "unexpected handshake bytes {:?}",
            String::from_utf8_lossy(&received)
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn command_packet(id: u32, command_set: u8, command: u8, data: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HEADER_SIZE + data.len());
    packet.extend_from_slice(&((HEADER_SIZE + data.len()) as u32).to_be_bytes());
    packet.extend_from_slice(&id.to_be_bytes());
    packet.push(0);
    packet.push(command_set);
    packet.push(command);
    packet.extend_from_slice(data);
    packet
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn decode_waits_for_complete_packet() {
        let packet = command_packet(7, 1, 1, b"abc");
        let mut buf = BytesMut::from(&packet[..5]);
        assert!(decode_packet(&mut buf, DEFAULT_MAX_PACKET).unwrap().is_none());

        buf.extend_from_slice(&packet[5..]);
        let decoded = decode_packet(&mut buf, DEFAULT_MAX_PACKET).unwrap().unwrap();
        assert_eq!(decoded.as_ref(), packet.as_slice());
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_rejects_length_below_header() {
        let mut buf = BytesMut::from(&[0u8, 0, 0, 4, 0, 0, 0, 0][..]);
        let err = decode_packet(&mut buf, DEFAULT_MAX_PACKET).unwrap_err();
        assert!(matches!(err, TransportError::InvalidPacketLength(4)));
    }

    #[test]
    fn decode_rejects_oversized_packet() {
        let mut buf = BytesMut::from(&[0u8, 0, 1, 0][..]);
        let err = decode_packet(&mut buf, 64).unwrap_err();
        assert!(matches!(
            err,
            TransportError::PacketTooLarge { size: 256, max: 64 }
        ));
    }

    #[test]
    fn header_distinguishes_command_and_reply() {
        let command = command_packet(1, 1, 7, &[]);
        let header = PacketHeader::parse(&command).unwrap();
        assert_eq!(header.command(), Some((1, 7)));
        assert_eq!(header.error_code(), None);

        let mut reply = command_packet(1, 0, 0, &[]);
        reply[8] = REPLY_FLAG;
        reply[9] = 0;
        reply[10] = 21;
        let header = PacketHeader::parse(&reply).unwrap();
        assert!(header.is_reply());
        assert_eq!(header.error_code(), Some(21));
    }

    #[test]
    fn reader_handles_partial_reads_and_sequences() {
        let mut wire = command_packet(1, 1, 1, b"one");
        wire.extend_from_slice(&command_packet(2, 1, 2, b"two"));
        let mut reader = PacketReader::new(ByteByByteReader {
            bytes: wire,
            pos: 0,
        });

        let first = reader.read_packet().unwrap();
        let second = reader.read_packet().unwrap();
        assert_eq!(PacketHeader::parse(&first).unwrap().id, 1);
        assert_eq!(&second[HEADER_SIZE..], b"two");

        let err = reader.read_packet().unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }

    #[test]
    fn writer_rejects_mismatched_length() {
        let mut packet = command_packet(1, 1, 1, b"data");
        packet.push(0xFF);
        let mut writer = PacketWriter::new(Cursor::new(Vec::<u8>::new()));
        let err = writer.write_packet(&packet).unwrap_err();
        assert!(matches!(err, TransportError::InvalidPacketLength(15)));
    }

    #[test]
    fn writer_output_reads_back() {
        let packet = command_packet(9, 15, 1, b"payload");
        let mut writer = PacketWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.write_packet(&packet).unwrap();

        let wire = writer.into_inner().into_inner();
        let mut reader = PacketReader::new(Cursor::new(wire));
        assert_eq!(reader.read_packet().unwrap().as_ref(), packet.as_slice());
    }

    #[test]
    fn handshake_mismatch_is_rejected() {
        let mut stream = Cursor::new(b"NOT-A-HANDSHAK".to_vec());
        let err = expect_handshake(&mut stream).unwrap_err();
        assert!(matches!(err, TransportError::Handshake(_)));
    }

    #[test]
    fn handshake_on_short_stream_reports_closed() {
        let mut stream = Cursor::new(b"JDWP".to_vec());
        let err = expect_handshake(&mut stream).unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }
}
