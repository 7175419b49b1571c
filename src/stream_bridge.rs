// Copyright 2020 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! `StreamBridge`: adapt a `Stream`/`Sink` pair of byte chunks (the shape a
//! libp2p transport speaks) to `futures::io::AsyncRead`/`AsyncWrite` (the
//! shape a TLS engine wants), and back.
//!
//! This is the local realization of the `rw-stream-sink` pattern used
//! elsewhere in this workspace for the same purpose: there is no native
//! "async-iterable duplex" type in Rust, so the two directions are each a
//! thin adapter struct rather than a single trait object.

use bytes::{Buf, Bytes, BytesMut};
use futures::io::{AsyncRead, AsyncWrite};
use futures::{ready, Sink, Stream};
use log::trace;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The "libp2p duplex" side: a byte-chunk source plus a byte-chunk sink,
/// combined. Anything satisfying both halves (e.g. a multiplexed substream)
/// can be driven through [`byte_stream`].
pub trait DuplexStream:
    Stream<Item = io::Result<Bytes>> + Sink<Bytes, Error = io::Error>
{
}

impl<T> DuplexStream for T where T: Stream<Item = io::Result<Bytes>> + Sink<Bytes, Error = io::Error>
{}

/// `duplexToByteStream`: wrap a [`DuplexStream`] as `AsyncRead + AsyncWrite`.
///
/// Reads pull chunks from the `Stream` half, buffering whatever part of a
/// chunk the caller didn't consume across calls (`poll_read` may be handed
/// a buffer smaller than one chunk). Writes push straight through the
/// `Sink` half; `poll_write` reports `Pending` exactly when the sink's
/// `poll_ready` does, which is the only backpressure signal this type needs
/// to honor.
pub fn byte_stream<D: DuplexStream + Unpin>(duplex: D) -> ByteStream<D> {
    ByteStream {
        duplex,
        read_buf: BytesMut::new(),
        eof: false,
    }
}

pub struct ByteStream<D> {
    duplex: D,
    read_buf: BytesMut,
    eof: bool,
}

impl<D: DuplexStream + Unpin> AsyncRead for ByteStream<D> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        if this.read_buf.is_empty() {
            if this.eof {
                return Poll::Ready(Ok(0));
            }
            match ready!(Pin::new(&mut this.duplex).poll_next(cx)) {
                Some(Ok(chunk)) => {
                    trace!("stream bridge pulled {} bytes from the source", chunk.len());
                    this.read_buf = BytesMut::from(&chunk[..]);
                }
                Some(Err(e)) => return Poll::Ready(Err(e)),
                None => {
                    trace!("stream bridge source reached EOF");
                    this.eof = true;
                    return Poll::Ready(Ok(0));
                }
            }
        }
        let n = std::cmp::min(buf.len(), this.read_buf.len());
        buf[..n].copy_from_slice(&this.read_buf[..n]);
        this.read_buf.advance(n);
        Poll::Ready(Ok(n))
    }
}

impl<D: DuplexStream + Unpin> AsyncWrite for ByteStream<D> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        ready!(Pin::new(&mut this.duplex).poll_ready(cx))?;
        trace!("stream bridge pushing {} bytes into the sink", buf.len());
        Pin::new(&mut this.duplex).start_send(Bytes::copy_from_slice(buf))?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.duplex).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.duplex).poll_close(cx)
    }
}

/// `byteStreamToDuplex`: split an `AsyncRead + AsyncWrite` into a
/// `(Stream, Sink)` pair of fixed-size byte chunks.
///
/// Half-open is preserved: shutting down the write half (`poll_close` on
/// the returned sink) does not force the read half to observe end-of-stream
/// — each direction's EOF is independent, matching the invariant that a
/// half-closed connection can still drain in the other direction.
pub fn duplex_stream<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
) -> (ReadHalfStream<S>, WriteHalfSink<S>) {
    let (r, w) = futures::io::AsyncReadExt::split(stream);
    (
        ReadHalfStream { inner: r, buf: vec![0u8; 64 * 1024] },
        WriteHalfSink { inner: w, pending: None },
    )
}

pub struct ReadHalfStream<S: AsyncRead + AsyncWrite> {
    inner: futures::io::ReadHalf<S>,
    buf: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Stream for ReadHalfStream<S> {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match ready!(Pin::new(&mut this.inner).poll_read(cx, &mut this.buf)) {
            Ok(0) => Poll::Ready(None),
            Ok(n) => {
                trace!("duplex stream read {} bytes off the wire", n);
                Poll::Ready(Some(Ok(Bytes::copy_from_slice(&this.buf[..n]))))
            }
            Err(e) => Poll::Ready(Some(Err(e))),
        }
    }
}

pub struct WriteHalfSink<S: AsyncRead + AsyncWrite> {
    inner: futures::io::WriteHalf<S>,
    pending: Option<Bytes>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> WriteHalfSink<S> {
    /// Drain `self.pending` into the underlying writer. `poll_ready` only
    /// reports ready once this returns with no bytes left outstanding,
    /// which is the backpressure signal `duplex_stream`'s sink half relies
    /// on — a caller that ignores a `Pending` result and sends again would
    /// otherwise silently reorder writes.
    fn poll_drain_pending(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let this = &mut *self;
            match &mut this.pending {
                None => return Poll::Ready(Ok(())),
                Some(chunk) => {
                    let n = ready!(Pin::new(&mut this.inner).poll_write(cx, chunk))?;
                    chunk.advance(n);
                    if chunk.is_empty() {
                        this.pending = None;
                    }
                }
            }
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Sink<Bytes> for WriteHalfSink<S> {
    type Error = io::Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_drain_pending(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Bytes) -> io::Result<()> {
        debug_assert!(self.pending.is_none(), "start_send called before poll_ready resolved");
        self.get_mut().pending = Some(item);
        Ok(())
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        ready!(self.as_mut().poll_drain_pending(cx))?;
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        ready!(self.as_mut().poll_drain_pending(cx))?;
        Pin::new(&mut self.get_mut().inner).poll_close(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::{AsyncReadExt, AsyncWriteExt};
    use futures::{sink::SinkExt, stream::StreamExt};
    use std::collections::VecDeque;

    struct ChannelDuplex {
        inbound: VecDeque<Bytes>,
        outbound: Vec<Bytes>,
    }

    impl Stream for ChannelDuplex {
        type Item = io::Result<Bytes>;
        fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            match self.inbound.pop_front() {
                Some(chunk) => Poll::Ready(Some(Ok(chunk))),
                None => Poll::Ready(None),
            }
        }
    }

    impl Sink<Bytes> for ChannelDuplex {
        type Error = io::Error;
        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn start_send(self: Pin<&mut Self>, item: Bytes) -> io::Result<()> {
            self.get_mut().outbound.push(item);
            Ok(())
        }
        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn reads_split_across_smaller_buffers() {
        futures::executor::block_on(async {
            let duplex = ChannelDuplex {
                inbound: VecDeque::from([Bytes::from_static(b"hello world")]),
                outbound: Vec::new(),
            };
            let mut bs = byte_stream(duplex);
            let mut first = [0u8; 5];
            let n = bs.read(&mut first).await.unwrap();
            assert_eq!(&first[..n], b"hello");
            let mut rest = [0u8; 16];
            let n = bs.read(&mut rest).await.unwrap();
            assert_eq!(&rest[..n], b" world");
        });
    }

    #[test]
    fn writes_are_forwarded_to_the_sink() {
        futures::executor::block_on(async {
            let duplex = ChannelDuplex {
                inbound: VecDeque::new(),
                outbound: Vec::new(),
            };
            let mut bs = byte_stream(duplex);
            bs.write_all(b"payload").await.unwrap();
            bs.flush().await.unwrap();
            assert_eq!(bs.duplex.outbound, vec![Bytes::from_static(b"payload")]);
        });
    }

    #[test]
    fn eof_on_empty_source_yields_zero_read() {
        futures::executor::block_on(async {
            let duplex = ChannelDuplex {
                inbound: VecDeque::new(),
                outbound: Vec::new(),
            };
            let mut bs = byte_stream(duplex);
            let mut buf = [0u8; 8];
            assert_eq!(bs.read(&mut buf).await.unwrap(), 0);
        });
    }

    #[test]
    fn duplex_stream_round_trips_a_write() {
        futures::executor::block_on(async {
            let (a, b) = futures_ringbuf::Endpoint::pair(64, 64);
            let (_reader_a, mut writer_a) = duplex_stream(a);
            let (mut reader_b, _writer_b) = duplex_stream(b);
            writer_a.send(Bytes::from_static(b"ping")).await.unwrap();
            let chunk = reader_b.next().await.unwrap().unwrap();
            assert_eq!(&chunk[..], b"ping");
        });
    }
}
