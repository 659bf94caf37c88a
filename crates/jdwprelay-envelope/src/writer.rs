use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_envelope, EnvelopeConfig};
use crate::envelope::Envelope;
use crate::error::{EnvelopeError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete envelopes to any `Write` stream.
pub struct EnvelopeWriter<T> {
    inner: T,
    buf: BytesMut,
    config: EnvelopeConfig,
}

impl<T: Write> EnvelopeWriter<T> {
    /// Create a new envelope writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, EnvelopeConfig::default())
    }

    /// Create a new envelope writer with explicit configuration.
    pub fn with_config(inner: T, config: EnvelopeConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and write one envelope (blocking).
    ///
    /// A write that times out (`WouldBlock` or `TimedOut`) surfaces as
    /// [`EnvelopeError::Io`]; the frame may be partially sent and the link
    /// should be dropped.
    pub fn write_envelope(&mut self, envelope: &Envelope) -> Result<()> {
        if envelope.content_len() > self.config.max_content_size {
            return Err(EnvelopeError::ContentTooLarge {
                size: envelope.content_len(),
                max: self.config.max_content_size,
            });
        }

        self.buf.clear();
        encode_envelope(envelope, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(EnvelopeError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(EnvelopeError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(EnvelopeError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl EnvelopeWriter<std::net::TcpStream> {
    /// Create a writer for a TCP stream and apply `config.write_timeout`.
    pub fn with_config_tcp(inner: std::net::TcpStream, config: EnvelopeConfig) -> Result<Self> {
        inner.set_write_timeout(config.write_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::net::{TcpListener, TcpStream};
    use std::time::{Duration, Instant};

    use bytes::Bytes;

    use super::*;
    use crate::codec::decode_envelope;

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct InterruptedOnce {
        interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedOnce {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn written_envelope_decodes() {
        let env = Envelope::data("a", "b", Bytes::from_static(b"bytes"));
        let mut writer = EnvelopeWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.write_envelope(&env).unwrap();

        let mut wire = BytesMut::from(writer.into_inner().into_inner().as_slice());
        let decoded = decode_envelope(&mut wire, &EnvelopeConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(decoded.id, env.id);
    }

    #[test]
    fn content_too_large_rejected() {
        let config = EnvelopeConfig {
            max_content_size: 4,
            ..EnvelopeConfig::default()
        };
        let mut writer = EnvelopeWriter::with_config(Cursor::new(Vec::<u8>::new()), config);
        let err = writer
            .write_envelope(&Envelope::data("a", "b", Bytes::from_static(b"oversized")))
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::ContentTooLarge { .. }));
    }

    #[test]
    fn interrupted_write_is_retried() {
        let mut writer = EnvelopeWriter::new(InterruptedOnce {
            interrupted: false,
            data: Vec::new(),
        });
        writer.write_envelope(&Envelope::heartbeat("a")).unwrap();
        assert!(!writer.into_inner().data.is_empty());
    }

    #[test]
    fn stalled_peer_times_out_the_write() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        // Accepted but never read from.
        let (_stalled, _) = listener.accept().unwrap();

        let config = EnvelopeConfig {
            write_timeout: Some(Duration::from_millis(100)),
            ..EnvelopeConfig::default()
        };
        let mut writer = EnvelopeWriter::with_config_tcp(stream, config).unwrap();
        let content = Bytes::from(vec![0u8; 15 * 1024 * 1024]);

        let started = Instant::now();
        let err = writer
            .write_envelope(&Envelope::data("a", "b", content))
            .unwrap_err();
        match err {
            EnvelopeError::Io(io) => assert!(matches!(
                io.kind(),
                ErrorKind::WouldBlock | ErrorKind::TimedOut
            )),
            other => panic!("expected timed out write, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = EnvelopeWriter::new(ZeroWriter);
        let err = writer.write_envelope(&Envelope::heartbeat("a")).unwrap_err();
        assert!(matches!(err, EnvelopeError::ConnectionClosed));
    }
}
