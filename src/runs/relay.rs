use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Child;

use crate::error::{Result, RunnerError};
use crate::notify::{LogLevel, Notifier};

/// Longest chunk forwarded as one notification. Longer lines are split.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Forward a child's stdout (as info) and stderr (as error) to `notifier`,
/// then wait for it to exit.
///
/// Both streams are drained concurrently and line by line. The exit code is
/// `None` when the process was terminated by a signal.
pub async fn relay(notifier: &dyn Notifier, mut child: Child) -> Result<Option<i32>> {
    let stdout = child.stdout.take().ok_or_else(|| {
        RunnerError::StreamFailure(std::io::Error::other("child stdout was not captured"))
    })?;
    let stderr = child.stderr.take().ok_or_else(|| {
        RunnerError::StreamFailure(std::io::Error::other("child stderr was not captured"))
    })?;

    tokio::try_join!(
        relay_stream(notifier, stdout, LogLevel::Info),
        relay_stream(notifier, stderr, LogLevel::Error),
    )?;

    let status = child.wait().await.map_err(RunnerError::StreamFailure)?;
    Ok(status.code())
}

/// Forward every line of `reader` until end of stream. Returns the number of
/// notifications sent.
///
/// At most [`MAX_LINE_BYTES`] are buffered: a line longer than that is
/// forwarded in several chunks.
pub async fn relay_stream<R>(notifier: &dyn Notifier, reader: R, level: LogLevel) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut lines = 0;

    loop {
        buf.clear();
        let n = (&mut reader)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut buf)
            .await
            .map_err(RunnerError::StreamFailure)?;
        if n == 0 {
            break;
        }

        let line = strip_newline(&buf);
        notifier
            .notify(&String::from_utf8_lossy(line), level)
            .await;
        lines += 1;
    }

    Ok(lines)
}

fn strip_newline(buf: &[u8]) -> &[u8] {
    match buf.strip_suffix(b"\n") {
        Some(line) => line.strip_suffix(b"\r").unwrap_or(line),
        None => buf,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChannelNotifier;

    #[test]
    fn strip_newline_variants() {
        assert_eq!(strip_newline(b"abc\n"), b"abc");
        assert_eq!(strip_newline(b"abc\r\n"), b"abc");
        assert_eq!(strip_newline(b"abc"), b"abc");
        assert_eq!(strip_newline(b"\n"), b"");
        // A split chunk keeps its carriage return
        assert_eq!(strip_newline(b"abc\r"), b"abc\r");
    }

    #[tokio::test]
    async fn relay_stream_splits_overlong_lines() {
        let (notifier, mut rx) = ChannelNotifier::new();
        let mut input = vec![b'x'; 3 * MAX_LINE_BYTES + 10];
        input.extend_from_slice(b"\nshort\n");

        let sent = relay_stream(&notifier, &input[..], LogLevel::Info)
            .await
            .unwrap();
        assert_eq!(sent, 5);

        for expected_len in [MAX_LINE_BYTES, MAX_LINE_BYTES, MAX_LINE_BYTES, 10] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.text.len(), expected_len);
            assert!(event.text.bytes().all(|b| b == b'x'));
        }
        assert_eq!(rx.recv().await.unwrap().text, "short");
    }

    #[tokio::test]
    async fn relay_stream_forwards_each_line_in_order() {
        let (notifier, mut rx) = ChannelNotifier::new();
        let input: &[u8] = b"one\ntwo\r\nthree";

        let lines = relay_stream(&notifier, input, LogLevel::Info).await.unwrap();
        assert_eq!(lines, 3);

        for expected in ["one", "two", "three"] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.text, expected);
            assert_eq!(event.level, LogLevel::Info);
        }
    }

    #[tokio::test]
    async fn relay_stream_decodes_invalid_utf8_lossily() {
        let (notifier, mut rx) = ChannelNotifier::new();
        let input: &[u8] = b"bad \xff byte\n";

        relay_stream(&notifier, input, LogLevel::Error).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.text, "bad \u{fffd} byte");
        assert_eq!(event.level, LogLevel::Error);
    }

    #[tokio::test]
    async fn relay_stream_surfaces_read_errors() {
        let (notifier, _rx) = ChannelNotifier::new();
        let reader = failing_reader();

        let err = relay_stream(&notifier, reader, LogLevel::Info)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::StreamFailure(_)));
    }

    /// A reader that yields one line and then fails.
    fn failing_reader() -> impl AsyncRead + Unpin {
        use std::pin::Pin;
        use std::task::{Context, Poll};
        use tokio::io::ReadBuf;

        struct FailingReader {
            sent: bool,
        }

        impl AsyncRead for FailingReader {
            fn poll_read(
                mut self: Pin<&mut Self>,
                _cx: &mut Context<'_>,
                buf: &mut ReadBuf<'_>,
            ) -> Poll<std::io::Result<()>> {
                if self.sent {
                    return Poll::Ready(Err(std::io::Error::other("pipe broke")));
                }
                self.sent = true;
                buf.put_slice(b"partial\n");
                Poll::Ready(Ok(()))
            }
        }

        FailingReader { sent: false }
    }
}
