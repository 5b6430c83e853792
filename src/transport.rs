//! Byte-stream transport – one action out, one response back.
//!
//! ```text
//! Caller thread                 │  Reader thread
//! ─────────────────────────────────────────────────────────────
//!   round_trip(payload)         │   loop {
//!   → write Action frame        │     read_message(stream)
//!   → rx.recv_timeout(timeout)  │     → tx.send(message)
//!                               │   }
//! ```
//!
//! Reads happen on a dedicated thread so that a stalled engine surfaces as
//! [`TransportError::Timeout`] instead of a blocked caller.  After a timeout
//! the transport is failed: a late response could otherwise be taken for the
//! answer to the next request.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, info, warn};

use crate::codec::{read_message, write_message, Message, MessageKind, DEFAULT_MAX_PAYLOAD};
use crate::error::{CodecError, TransportError};

/// A synchronous request/response channel to one engine session.
///
/// At most one request is in flight; callers sharing a transport across
/// threads must serialise access themselves.
pub trait Transport: Send {
    /// Send an action payload and wait for the response payload.
    fn round_trip(&mut self, payload: &[u8]) -> Result<Bytes, TransportError>;

    /// Release the channel.  Never blocks on a failed engine and may be
    /// called more than once.
    fn close(&mut self);

    /// Whether an earlier failure has made the channel unusable.
    fn is_failed(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Pipe transport
// ---------------------------------------------------------------------------

type Incoming = Result<Message, CodecError>;

pub struct PipeTransport {
    writer: Option<Box<dyn Write + Send>>,
    incoming: Receiver<Incoming>,
    timeout: Duration,
    failed: bool,
    _reader: thread::JoinHandle<()>,
}

impl PipeTransport {
    pub fn new<R, W>(reader: R, writer: W, timeout: Duration) -> Result<Self, TransportError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded::<Incoming>(1);
        let handle = thread::Builder::new()
            .name("sim-control-reader".into())
            .spawn(move || {
                let mut reader = reader;
                loop {
                    match read_message(&mut reader, DEFAULT_MAX_PAYLOAD) {
                        Ok(Some(msg)) => {
                            if tx.send(Ok(msg)).is_err() {
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!("[pipe] engine closed the stream");
                            break;
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            break;
                        }
                    }
                }
            })?;
        Ok(Self {
            writer: Some(Box::new(writer)),
            incoming: rx,
            timeout,
            failed: false,
            _reader: handle,
        })
    }

    /// Both directions over one connected socket.
    pub fn from_unix_stream(stream: UnixStream, timeout: Duration) -> Result<Self, TransportError> {
        let reader = stream.try_clone()?;
        Self::new(reader, stream, timeout)
    }

    /// Open a FIFO pair created by the engine host.  The host opens
    /// `to_engine` for reading first, so it is opened here for writing first.
    pub fn open_fifos(
        to_engine: &Path,
        from_engine: &Path,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let writer = OpenOptions::new().write(true).open(to_engine)?;
        let reader = File::open(from_engine)?;
        info!(
            "[pipe] connected via {} / {}",
            to_engine.display(),
            from_engine.display()
        );
        Self::new(reader, writer, timeout)
    }

    fn fail(&mut self, err: TransportError) -> TransportError {
        warn!("[pipe] transport failed: {}", err);
        self.failed = true;
        err
    }
}

impl Transport for PipeTransport {
    fn round_trip(&mut self, payload: &[u8]) -> Result<Bytes, TransportError> {
        if self.failed {
            return Err(TransportError::Closed);
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(TransportError::Closed);
        };
        if let Err(e) = write_message(writer, MessageKind::Action, payload) {
            return Err(self.fail(e.into()));
        }

        match self.incoming.recv_timeout(self.timeout) {
            Ok(Ok(msg)) => match msg.kind {
                MessageKind::Response => Ok(msg.payload),
                MessageKind::Quit => Err(self.fail(TransportError::Closed)),
                other => Err(self.fail(TransportError::UnexpectedMessage(other.label()))),
            },
            Ok(Err(e)) => Err(self.fail(e.into())),
            Err(RecvTimeoutError::Timeout) => Err(self.fail(TransportError::Timeout(self.timeout))),
            Err(RecvTimeoutError::Disconnected) => Err(self.fail(TransportError::Closed)),
        }
    }

    fn close(&mut self) {
        let Some(mut writer) = self.writer.take() else {
            return;
        };
        if !self.failed {
            if let Err(e) = write_message(&mut writer, MessageKind::Quit, &[]) {
                debug!("[pipe] quit not delivered: {}", e);
            }
        }
        // The reader thread is left to exit when the engine closes its end.
        drop(writer);
        info!("[pipe] closed");
    }

    fn is_failed(&self) -> bool {
        self.failed
    }
}

impl Drop for PipeTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::read_message;

    #[test]
    fn round_trip_over_socket_pair() {
        let (client, server) = UnixStream::pair().unwrap();
        let engine = thread::spawn(move || {
            let mut reader = server.try_clone().unwrap();
            let mut writer = server;
            let msg = read_message(&mut reader, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
            assert_eq!(msg.kind, MessageKind::Action);
            write_message(&mut writer, MessageKind::Response, &msg.payload).unwrap();
            let quit = read_message(&mut reader, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
            assert_eq!(quit.kind, MessageKind::Quit);
        });

        let mut t = PipeTransport::from_unix_stream(client, Duration::from_secs(5)).unwrap();
        assert_eq!(&t.round_trip(b"hello").unwrap()[..], b"hello");
        t.close();
        engine.join().unwrap();
    }

    #[test]
    fn silent_engine_times_out_and_fails() {
        let (client, _server) = UnixStream::pair().unwrap();
        let mut t = PipeTransport::from_unix_stream(client, Duration::from_millis(50)).unwrap();
        let err = t.round_trip(b"{}").unwrap_err();
        assert!(err.is_timeout());
        assert!(t.is_failed());
        assert!(matches!(t.round_trip(b"{}"), Err(TransportError::Closed)));
        t.close();
        t.close();
    }

    #[test]
    fn unexpected_kind_is_reported() {
        let (client, server) = UnixStream::pair().unwrap();
        let engine = thread::spawn(move || {
            let mut s = server;
            let _ = read_message(&mut s, DEFAULT_MAX_PAYLOAD).unwrap();
            write_message(&mut s, MessageKind::Action, b"{}").unwrap();
        });
        let mut t = PipeTransport::from_unix_stream(client, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            t.round_trip(b"{}"),
            Err(TransportError::UnexpectedMessage("action"))
        ));
        engine.join().unwrap();
    }
}
