use std::io;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Forward `body` in `chunk_size` pieces, stopping silently before `max_bytes`
/// would be exceeded.
///
/// The returned stream owns `body`; dropping it (for example when the client
/// disconnects) drops the upstream connection. At most one chunk is buffered.
pub fn relay<S>(
    mut body: S,
    chunk_size: usize,
    max_bytes: u64,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static
where
    S: Stream<Item = io::Result<Bytes>> + Send + Unpin + 'static,
{
    let chunk_size = chunk_size.max(1);

    async_stream::stream! {
        let mut pending = BytesMut::with_capacity(chunk_size);
        let mut sent: u64 = 0;

        loop {
            let next = body.next().await;
            let finished = next.is_none();

            match next {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => pending.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    warn!("Upstream read failed after {} bytes: {}", sent, e);
                    yield Err(e);
                    return;
                }
                None => {}
            }

            while pending.len() >= chunk_size || (finished && !pending.is_empty()) {
                let take = pending.len().min(chunk_size);
                let out = pending.split_to(take).freeze();

                sent += out.len() as u64;
                if sent > max_bytes {
                    warn!("Segment exceeded {} bytes, truncating", max_bytes);
                    return;
                }
                yield Ok(out);
            }

            if finished {
                debug!("Relayed {} bytes", sent);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn source(parts: Vec<Vec<u8>>) -> impl Stream<Item = io::Result<Bytes>> + Send + Unpin {
        stream::iter(parts.into_iter().map(|p| Ok::<_, io::Error>(Bytes::from(p))))
    }

    async fn collect<S: Stream<Item = io::Result<Bytes>>>(s: S) -> Vec<io::Result<Bytes>> {
        s.collect().await
    }

    #[tokio::test]
    async fn test_rechunks_to_fixed_size() {
        let out = collect(relay(source(vec![vec![1; 3], vec![2; 6], vec![3; 2]]), 4, 1024)).await;
        let sizes: Vec<usize> = out.iter().map(|c| c.as_ref().unwrap().len()).collect();
        assert_eq!(sizes, vec![4, 4, 3]);

        let bytes: Vec<u8> = out.into_iter().flat_map(|c| c.unwrap().to_vec()).collect();
        assert_eq!(bytes, [vec![1; 3], vec![2; 6], vec![3; 2]].concat());
    }

    #[tokio::test]
    async fn test_empty_chunks_skipped() {
        let out = collect(relay(source(vec![vec![], vec![7; 2], vec![]]), 4, 1024)).await;
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].as_ref().unwrap()[..], &[7u8, 7]);
    }

    #[tokio::test]
    async fn test_truncates_at_largest_chunk_multiple() {
        // 10 chunks of 4 bytes against a 15 byte ceiling: 3 chunks fit.
        let out = collect(relay(source(vec![vec![0; 40]]), 4, 15)).await;
        let total: usize = out.iter().map(|c| c.as_ref().unwrap().len()).sum();
        assert_eq!(total, 12);
        assert!(out.iter().all(|c| c.is_ok()));
    }

    #[tokio::test]
    async fn test_exact_ceiling_is_kept() {
        let out = collect(relay(source(vec![vec![0; 8]]), 4, 8)).await;
        let total: usize = out.iter().map(|c| c.as_ref().unwrap().len()).sum();
        assert_eq!(total, 8);
    }

    #[tokio::test]
    async fn test_read_error_ends_stream() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"abcd")),
            Err(io::Error::new(io::ErrorKind::TimedOut, "stalled")),
            Ok(Bytes::from_static(b"never")),
        ]);
        let out = collect(relay(body, 4, 1024)).await;
        assert_eq!(out.len(), 2);
        assert_eq!(&out[0].as_ref().unwrap()[..], b"abcd");
        assert_eq!(out[1].as_ref().unwrap_err().kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_stops_pulling_after_truncation() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let body = stream::iter(0..100).map(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, io::Error>(Bytes::from_static(b"xxxx"))
        });

        let out = collect(relay(body, 4, 8)).await;
        assert_eq!(out.len(), 2);
        assert_eq!(pulled.load(Ordering::SeqCst), 3);
    }
}
