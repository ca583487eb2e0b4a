use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::debug;

/// What the stderr pump observed
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Line(String),
    Closed,
}

/// Newline-delimited decoder that never fails on invalid UTF-8
struct LossyLinesCodec;

impl Decoder for LossyLinesCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(newline) = src.iter().position(|b| *b == b'\n') else {
            return Ok(None);
        };
        let line = src.split_to(newline + 1);
        Ok(Some(to_line(&line[..newline])))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split();
        Ok(Some(to_line(&rest)))
    }
}

fn to_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Read `stderr` line by line until it closes.
///
/// Lines are published on the returned channel and, with `dumpio`, copied to
/// this process's stderr. The pump keeps draining after the receiver is
/// dropped so the child never blocks on a full pipe.
pub(crate) fn pump_stderr<R>(stderr: R, dumpio: bool) -> mpsc::UnboundedReceiver<StreamEvent>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pump_lines(stderr, dumpio.then(tokio::io::stderr))
}

/// Forwarding to `out` stops at its first write error; publishing never does
fn pump_lines<R, W>(input: R, mut out: Option<W>) -> mpsc::UnboundedReceiver<StreamEvent>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut frames = FramedRead::with_capacity(input, LossyLinesCodec, 1024);

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(line) => {
                    if let Some(writer) = out.as_mut() {
                        let written = writer.write_all(format!("{line}\n").as_bytes()).await;
                        if let Err(e) = written {
                            debug!("Browser stderr forwarding stopped: {}", e);
                            out = None;
                        }
                    }
                    let _ = tx.send(StreamEvent::Line(line));
                }
                Err(e) => {
                    debug!("Browser stderr read failed: {}", e);
                    break;
                }
            }
        }
        let _ = tx.send(StreamEvent::Closed);
    });
    rx
}

/// Copy the child's stdout to this process's stdout until it closes
pub(crate) fn forward_stdout<R>(mut stdout: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = tokio::io::copy(&mut stdout, &mut tokio::io::stdout()).await {
            debug!("Browser stdout forwarding stopped: {}", e);
        }
    });
}
