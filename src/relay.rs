use std::fmt::{Display, Formatter};
use std::io::Write;

use anyhow::Context;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::source::{PollableSource, ReadOutcome};

/// Why the relay loop stopped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RelayEnd {
    /// The socket peer closed the connection.
    PeerClosed,
    /// Standard input reached end-of-stream.
    InputClosed,
}

impl Display for RelayEnd {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayEnd::PeerClosed => write!(f, "connection closed by peer"),
            RelayEnd::InputClosed => write!(f, "input reached end-of-stream"),
        }
    }
}

/// Writes `data` to the output sink and flushes it right away.
pub(crate) fn write_out<O: Write + ?Sized>(output: &mut O, data: &[u8]) -> anyhow::Result<()> {
    output
        .write_all(data)
        .with_context(|| format!("Failed to write {} bytes to output", data.len()))?;
    output.flush().with_context(|| "Failed to flush output")
}

/// Copies bytes between the socket and the input/output pair until either side reaches
/// end-of-stream.
///
/// Socket data goes to `output`, flushed after every chunk. Input data is written to the
/// socket in full before the loop waits again, so a slow peer stalls the loop instead of
/// growing a queue.
pub async fn relay<S, I, O>(
    socket: &mut S,
    input: &mut I,
    output: &mut O,
    chunk_size: usize,
) -> anyhow::Result<RelayEnd>
where
    S: PollableSource + AsyncWrite + Unpin + ?Sized,
    I: PollableSource + ?Sized,
    O: Write + ?Sized,
{
    let mut socket_buf = vec![0u8; chunk_size];
    let mut input_buf = vec![0u8; chunk_size];

    loop {
        tokio::select! {
            read = socket.read_ready(&mut socket_buf) => {
                match read.with_context(|| "Failed to read from socket")? {
                    ReadOutcome::Data(size) => {
                        trace!("Forwarding {} bytes from socket to output", size);
                        write_out(output, &socket_buf[..size])?;
                    }
                    ReadOutcome::WouldBlock => continue,
                    ReadOutcome::Closed => return Ok(RelayEnd::PeerClosed),
                }
            }
            read = input.read_ready(&mut input_buf) => {
                match read.with_context(|| "Failed to read from input")? {
                    ReadOutcome::Data(size) => {
                        trace!("Forwarding {} bytes from input to socket", size);
                        socket
                            .write_all(&input_buf[..size])
                            .await
                            .with_context(|| format!("Failed to send {} bytes to socket", size))?;
                    }
                    ReadOutcome::WouldBlock => continue,
                    ReadOutcome::Closed => return Ok(RelayEnd::InputClosed),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::tests::ScriptedSource;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixStream;

    #[tokio::test]
    async fn test_peer_close_ends_relay() {
        let (mut socket, mut peer) = UnixStream::pair().unwrap();
        let mut input = ScriptedSource::new(vec![]);
        let mut output = Vec::new();

        peer.write_all(b"hello ").await.unwrap();
        peer.write_all(b"world").await.unwrap();
        drop(peer);

        let end = relay(&mut socket, &mut input, &mut output, 4096)
            .await
            .unwrap();
        assert_eq!(end, RelayEnd::PeerClosed);
        assert_eq!(output, b"hello world");
    }

    #[tokio::test]
    async fn test_input_close_ends_relay() {
        let (mut socket, mut peer) = UnixStream::pair().unwrap();
        let mut input = ScriptedSource::new(vec![
            ScriptedSource::data(b"abc"),
            ScriptedSource::would_block(),
            ScriptedSource::data(b"def"),
            ScriptedSource::closed(),
        ]);
        let mut output = Vec::new();

        let end = relay(&mut socket, &mut input, &mut output, 4096)
            .await
            .unwrap();
        assert_eq!(end, RelayEnd::InputClosed);
        assert!(output.is_empty());

        drop(socket);
        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"abcdef");
    }

    #[tokio::test]
    async fn test_both_directions() {
        let (mut socket, mut peer) = UnixStream::pair().unwrap();
        let (mut input, mut input_writer) = UnixStream::pair().unwrap();

        input_writer.write_all(b"from input").await.unwrap();
        peer.write_all(b"from peer").await.unwrap();

        let far_end = async move {
            let mut buf = [0u8; 10];
            peer.read_exact(&mut buf).await.unwrap();
            drop(peer);
            (buf, input_writer)
        };
        let proxy = async move {
            let mut output = Vec::new();
            let end = relay(&mut socket, &mut input, &mut output, 4096).await;
            (end, output)
        };

        let ((end, output), (received, _input_writer)) = tokio::join!(proxy, far_end);
        assert_eq!(end.unwrap(), RelayEnd::PeerClosed);
        assert_eq!(output, b"from peer");
        assert_eq!(&received, b"from input");
    }

    #[tokio::test]
    async fn test_chunks_are_bounded() {
        let (mut socket, mut peer) = UnixStream::pair().unwrap();
        let mut input = ScriptedSource::new(vec![]);

        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        peer.write_all(&payload).await.unwrap();
        drop(peer);

        let mut output = ChunkRecorder::default();
        relay(&mut socket, &mut input, &mut output, 16).await.unwrap();
        assert!(output.writes.iter().all(|w| w.len() <= 16));
        assert_eq!(output.writes.concat(), payload);
        assert_eq!(output.flushes, output.writes.len());
    }

    #[derive(Default)]
    struct ChunkRecorder {
        writes: Vec<Vec<u8>>,
        flushes: usize,
    }

    impl Write for ChunkRecorder {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.writes.push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }
}
