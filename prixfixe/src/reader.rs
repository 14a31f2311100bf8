//! Line framing, kept separate from [`crate::connection::Connection`] so a
//! STARTTLS upgrade can discard whatever the client already pushed onto the
//! wire by dropping this buffer, rather than relying on the transport to
//! have never buffered ahead of the command boundary in the first place.

use bytes::BytesMut;
use prixfixe_common::error::ConnectionError;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection::Connection;

const CRLF: &[u8] = b"\r\n";
const READ_CHUNK: usize = 4096;

#[derive(Debug, PartialEq, Eq)]
pub enum LineOutcome {
    /// A complete line, without the trailing CRLF.
    Line(Vec<u8>),
    /// No CRLF was found within the configured line-length cap.
    TooLong,
    /// The peer closed the connection with no further line pending.
    Eof,
}

/// Accumulates bytes read off a [`Connection`] and slices them into
/// CRLF-terminated lines. One instance per session, reused across both
/// command-line reads and `DATA` body-line reads (with different length
/// caps for each).
pub struct LineReader {
    pending: BytesMut,
}

impl LineReader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Discards any bytes already read from the transport but not yet
    /// consumed into a line. Called immediately before a STARTTLS upgrade so
    /// post-handshake reads start from the TLS record stream, never from
    /// plaintext the client raced onto the wire ahead of the handshake.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Reads one line, up to `max_len` bytes (the CRLF included in that
    /// count). Bytes beyond a too-long line are left buffered; the caller is
    /// expected to close the connection rather than keep parsing, per the
    /// "a too-long line rejects the command but does not require discarding
    /// unread bytes before closing" framing.
    pub async fn read_line<S>(
        &mut self,
        conn: &mut Connection<S>,
        max_len: usize,
    ) -> Result<LineOutcome, ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        loop {
            if let Some(idx) = find_crlf(&self.pending) {
                if idx + CRLF.len() > max_len {
                    let _ = self.pending.split_to(idx + CRLF.len());
                    return Ok(LineOutcome::TooLong);
                }
                let line = self.pending.split_to(idx).to_vec();
                // drop the CRLF itself
                let _ = self.pending.split_to(CRLF.len());
                return Ok(LineOutcome::Line(line));
            }

            if self.pending.len() >= max_len {
                return Ok(LineOutcome::TooLong);
            }

            let mut chunk = [0_u8; READ_CHUNK];
            let n = conn.read(&mut chunk).await?;
            if n == 0 {
                return Ok(LineOutcome::Eof);
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(CRLF.len()).position(|w| w == CRLF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn reads_a_single_line() {
        let (mut client, server) = duplex(64);
        let mut conn = Connection::plain(server);
        let mut reader = LineReader::new();

        client.write_all_owned(b"HELO there\r\n").await;

        let line = reader.read_line(&mut conn, 512).await.unwrap();
        assert_eq!(line, LineOutcome::Line(b"HELO there".to_vec()));
    }

    #[tokio::test]
    async fn reads_pipelined_lines_one_at_a_time() {
        let (mut client, server) = duplex(64);
        let mut conn = Connection::plain(server);
        let mut reader = LineReader::new();

        client.write_all_owned(b"MAIL FROM:<a@b>\r\nRCPT TO:<c@d>\r\n").await;

        assert_eq!(
            reader.read_line(&mut conn, 512).await.unwrap(),
            LineOutcome::Line(b"MAIL FROM:<a@b>".to_vec())
        );
        assert_eq!(
            reader.read_line(&mut conn, 512).await.unwrap(),
            LineOutcome::Line(b"RCPT TO:<c@d>".to_vec())
        );
    }

    #[tokio::test]
    async fn line_over_cap_is_too_long() {
        let (mut client, server) = duplex(4096);
        let mut conn = Connection::plain(server);
        let mut reader = LineReader::new();

        let long = vec![b'a'; 600];
        client.write_all_owned(&long).await;
        client.write_all_owned(b"\r\n").await;

        assert_eq!(
            reader.read_line(&mut conn, 512).await.unwrap(),
            LineOutcome::TooLong
        );
    }

    #[tokio::test]
    async fn oversized_line_whose_crlf_arrives_in_the_same_read_is_still_too_long() {
        // The whole line, CRLF included, lands in one TCP segment (the
        // common case): the too-long check must not be skipped just
        // because a terminator happened to already be present.
        let (mut client, server) = duplex(4096);
        let mut conn = Connection::plain(server);
        let mut reader = LineReader::new();

        let mut wire = vec![b'a'; 600];
        wire.extend_from_slice(b"\r\n");
        client.write_all_owned(&wire).await;

        assert_eq!(
            reader.read_line(&mut conn, 512).await.unwrap(),
            LineOutcome::TooLong
        );
    }

    #[tokio::test]
    async fn line_of_exactly_max_len_bytes_including_crlf_is_accepted() {
        let (mut client, server) = duplex(4096);
        let mut conn = Connection::plain(server);
        let mut reader = LineReader::new();

        // 510 bytes of content + CRLF == 512 bytes total, the configured cap.
        let mut wire = vec![b'a'; 510];
        wire.extend_from_slice(b"\r\n");
        client.write_all_owned(&wire).await;

        match reader.read_line(&mut conn, 512).await.unwrap() {
            LineOutcome::Line(line) => assert_eq!(line.len(), 510),
            other => panic!("expected Line, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn clear_drops_buffered_bytes() {
        let (mut client, server) = duplex(64);
        let mut conn = Connection::plain(server);
        let mut reader = LineReader::new();

        client.write_all_owned(b"EHLO x\r\nMAIL FROM:<a@b>\r\n").await;
        assert_eq!(
            reader.read_line(&mut conn, 512).await.unwrap(),
            LineOutcome::Line(b"EHLO x".to_vec())
        );

        // Simulate a STARTTLS boundary: whatever else the client pushed
        // ahead of the handshake must not survive into the TLS session.
        reader.clear();

        client.write_all_owned(b"EHLO y\r\n").await;
        assert_eq!(
            reader.read_line(&mut conn, 512).await.unwrap(),
            LineOutcome::Line(b"EHLO y".to_vec())
        );
    }

    #[tokio::test]
    async fn eof_with_no_pending_line() {
        let (client, server) = duplex(64);
        let mut conn = Connection::plain(server);
        let mut reader = LineReader::new();

        drop(client);

        assert_eq!(
            reader.read_line(&mut conn, 512).await.unwrap(),
            LineOutcome::Eof
        );
    }

    trait WriteAllOwned {
        async fn write_all_owned(&mut self, bytes: &[u8]);
    }

    impl<T: tokio::io::AsyncWrite + Unpin> WriteAllOwned for T {
        async fn write_all_owned(&mut self, bytes: &[u8]) {
            use tokio::io::AsyncWriteExt;
            self.write_all(bytes).await.unwrap();
        }
    }
}
