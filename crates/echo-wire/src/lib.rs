//! Length-prefixed wire protocol shared by every connection-handling engine.
//!
//! ```text
//! frame      ::= size:u32 payload:byte[size]
//! terminator ::= size:u32 where size == 0
//! ```
//!
//! The length prefix is written and read in the host's native byte order.
//! This only matters for interop between machines of differing endianness;
//! `echo-server` and `echo-client` always agree because they link the same
//! crate. See DESIGN.md for the rationale.

use std::io::{self, Read, Write};

use tracing::trace;

/// Size in bytes of the frame length prefix.
pub const HEADER_SIZE: usize = core::mem::size_of::<u32>();

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("wire io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, WireError>;

/// Encodes a frame length prefix in host byte order.
#[inline]
pub fn encode_len(len: u32) -> [u8; HEADER_SIZE] {
    len.to_ne_bytes()
}

/// Decodes a frame length prefix in host byte order.
#[inline]
pub fn decode_len(bytes: [u8; HEADER_SIZE]) -> u32 {
    u32::from_ne_bytes(bytes)
}

/// Writes up to `buf.len()` bytes to `w`, looping on short writes.
///
/// Returns the number of bytes actually written. A would-block or an
/// interrupted call simply stops the loop and returns the partial count;
/// only a genuine I/O failure is propagated as [`WireError`].
pub fn send_all_or_would_block<W: Write>(w: &mut W, buf: &[u8]) -> Result<usize> {
    let mut sent = 0;
    while sent < buf.len() {
        match w.write(&buf[sent..]) {
            Ok(0) => break,
            Ok(n) => sent += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    trace!(requested = buf.len(), sent, "send_all_or_would_block");
    Ok(sent)
}

/// Reads up to `buf.len()` bytes from `r`, looping on short reads.
///
/// Returns `(bytes_read, peer_closed)`. `peer_closed` is set when a `read`
/// returned `0` before `buf` was filled, meaning the peer shut down its
/// write half mid-frame. A would-block or interrupted call stops the loop
/// and returns the partial count with `peer_closed = false`; only a genuine
/// I/O failure is propagated as [`WireError`].
pub fn recv_all_or_would_block<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<(usize, bool)> {
    let mut read = 0;
    while read < buf.len() {
        match r.read(&mut buf[read..]) {
            Ok(0) => {
                trace!(read, "recv_all_or_would_block: peer closed mid-frame");
                return Ok((read, true));
            }
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok((read, false))
}
