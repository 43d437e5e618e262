use bytes::Bytes;
use futures::StreamExt;
use std::future::Future;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;

use crate::domain::errors::DomainError;
use crate::domain::ports::storage_service::ByteStream;

/// Run ``stream_producer`` on its own task and expose what it sends as a stream.
///
/// The producer stops as soon as its ``send`` fails, which happens once the
/// returned stream is dropped.
pub fn create_byte_stream<F, Fut>(
    capacity: usize,
    stream_producer: F,
) -> (ByteStream, JoinHandle<()>)
where
    F: FnOnce(mpsc::Sender<Result<Bytes, DomainError>>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<Bytes, DomainError>>(capacity.max(1));

    let handle = tokio::spawn(async move {
        stream_producer(tx).await;
    });
    (ReceiverStream::new(rx).boxed(), handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_yields_in_order() {
        let (stream, handle) = create_byte_stream(2, |tx| async move {
            for i in 0..5u8 {
                if tx.send(Ok(Bytes::from(vec![i]))).await.is_err() {
                    break;
                }
            }
        });
        let items: Vec<u8> = stream.map(|item| item.unwrap()[0]).collect().await;
        handle.await.unwrap();
        assert_eq!(items, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_producer_stops_when_stream_dropped() {
        let (stream, handle) = create_byte_stream(1, |tx| async move {
            while tx.send(Ok(Bytes::from_static(b"x"))).await.is_ok() {}
        });
        drop(stream);
        handle.await.unwrap();
    }
}
