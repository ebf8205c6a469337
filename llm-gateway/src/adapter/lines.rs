//! Line splitting for streamed backend bodies (NDJSON or SSE).

use std::fmt::Display;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::stream::{BoxStream, Stream};
use futures_util::StreamExt;

use crate::error::{Error, Result};

/// Longest line accepted from a backend before the stream is abandoned.
pub(crate) const MAX_LINE_BYTES: usize = 1024 * 1024;

/// State threaded through the `unfold` stream.
struct LineState<E> {
    body: BoxStream<'static, std::result::Result<Bytes, E>>,
    buf: BytesMut,
    idle_timeout: Duration,
    eof: bool,
    failed: bool,
}

/// Split a streamed body into trimmed, non-empty lines.
///
/// A read that produces nothing for `idle_timeout` ends the stream with
/// [`Error::StreamInterrupted`], as does a transport error or a line longer
/// than [`MAX_LINE_BYTES`]. Bytes after the last newline are emitted as a
/// final line at end of body.
pub(crate) fn split_lines<S, E>(body: S, idle_timeout: Duration) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = LineState {
        body: body.boxed(),
        buf: BytesMut::new(),
        idle_timeout,
        eof: false,
        failed: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        if st.failed {
            return None;
        }

        loop {
            if let Some(pos) = st.buf.iter().position(|&b| b == b'\n') {
                let line = st.buf.split_to(pos + 1);
                let text = String::from_utf8_lossy(&line).trim().to_string();
                if text.is_empty() {
                    continue;
                }
                return Some((Ok(text), st));
            }

            if st.buf.len() > MAX_LINE_BYTES {
                tracing::warn!(
                    "Backend line exceeds {} bytes without a newline, giving up",
                    MAX_LINE_BYTES
                );
                st.failed = true;
                st.buf.clear();
                return Some((
                    Err(Error::StreamInterrupted(format!(
                        "backend line longer than {} bytes",
                        MAX_LINE_BYTES
                    ))),
                    st,
                ));
            }

            if st.eof {
                if st.buf.is_empty() {
                    return None;
                }
                let rest = st.buf.split();
                let text = String::from_utf8_lossy(&rest).trim().to_string();
                if text.is_empty() {
                    return None;
                }
                return Some((Ok(text), st));
            }

            match tokio::time::timeout(st.idle_timeout, st.body.next()).await {
                Ok(Some(Ok(chunk))) => st.buf.extend_from_slice(&chunk),
                Ok(Some(Err(e))) => {
                    tracing::warn!("Backend stream error: {}", e);
                    st.failed = true;
                    return Some((Err(Error::StreamInterrupted(e.to_string())), st));
                }
                Ok(None) => st.eof = true,
                Err(_) => {
                    tracing::warn!(
                        "Backend stream idle for {:?}, giving up",
                        st.idle_timeout
                    );
                    st.failed = true;
                    return Some((
                        Err(Error::StreamInterrupted(format!(
                            "no data from backend for {:?}",
                            st.idle_timeout
                        ))),
                        st,
                    ));
                }
            }
        }
    })
    .boxed()
}
