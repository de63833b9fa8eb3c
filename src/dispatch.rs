use crate::error::{Result, TransferError};
use futures::{FutureExt, Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

// `admit` sees the number of futures in flight; an empty set is always refilled.
pub async fn dispatch_concurrent<S, F, T, E, A>(
    stream: S,
    mut admit: A,
) -> std::result::Result<Vec<std::result::Result<T, E>>, E>
where
    S: Stream<Item = std::result::Result<F, E>>,
    F: Future<Output = std::result::Result<T, E>> + Unpin,
    A: FnMut(usize) -> bool,
{
    futures::pin_mut!(stream);

    let mut stream = stream.fuse();
    let mut futures = Vec::new();
    let mut outputs = Vec::new();
    let mut error = None;

    futures::future::poll_fn(|cx| loop {
        while error.is_none() && (futures.is_empty() || admit(futures.len())) {
            match stream.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(future))) => futures.push(future),
                Poll::Ready(Some(Err(e))) => error = Some(e),
                _ => break,
            }
        }

        let a = futures.len();

        let mut i = 0;
        while i < futures.len() {
            if let Poll::Ready(output) = futures[i].poll_unpin(cx) {
                futures.swap_remove(i);
                outputs.push(output);
            } else {
                i += 1;
            }
        }

        let b = futures.len();

        if (stream.is_done() || error.is_some()) && futures.is_empty() {
            break Poll::Ready(());
        } else if a == b {
            break Poll::Pending;
        }
    })
    .await;

    match error {
        Some(e) => Err(e),
        None => Ok(outputs),
    }
}

pub struct Task<T>(JoinHandle<Result<T>>);

pub fn spawn<F, T>(future: F) -> Task<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    Task(tokio::spawn(future))
}

impl<T> Future for Task<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.0
            .poll_unpin(cx)
            .map(|joined| joined.map_err(TransferError::from).and_then(|output| output))
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::{dispatch_concurrent, spawn};
    use futures::channel::oneshot;
    use futures::{FutureExt, StreamExt};
    use std::cell::{Cell, RefCell};
    use std::future::Future;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};

    #[test]
    fn test_admit_gates_pulls() {
        let gate = Cell::new(false);
        let asked = RefCell::new(Vec::new());
        let pulled = Cell::new(0);

        let (mut senders, receivers): (Vec<_>, Vec<_>) = (0..4)
            .map(|_| {
                let (tx, rx) = oneshot::channel::<usize>();
                (Some(tx), rx)
            })
            .unzip();
        let stream = futures::stream::iter(receivers).map(|rx| {
            pulled.set(pulled.get() + 1);
            Ok::<_, ()>(rx.map(|output| output.map_err(|_| ())))
        });

        let future = dispatch_concurrent(stream, |in_flight| {
            asked.borrow_mut().push(in_flight);
            gate.get()
        });
        futures::pin_mut!(future);
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());

        // Closed gate: only the empty set gets filled.
        assert_eq!(future.as_mut().poll(&mut cx), Poll::Pending);
        assert_eq!(pulled.get(), 1);
        assert_eq!(*asked.borrow(), [1]);

        // A finished future empties the set, which is refilled at once.
        senders[0].take().unwrap().send(10).unwrap();
        assert_eq!(future.as_mut().poll(&mut cx), Poll::Pending);
        assert_eq!(pulled.get(), 2);
        assert_eq!(*asked.borrow(), [1, 1, 1]);

        gate.set(true);
        assert_eq!(future.as_mut().poll(&mut cx), Poll::Pending);
        assert_eq!(pulled.get(), 4);
        assert_eq!(*asked.borrow(), [1, 1, 1, 1, 2, 3]);

        senders[3].take().unwrap().send(13).unwrap();
        assert_eq!(future.as_mut().poll(&mut cx), Poll::Pending);
        senders[1].take().unwrap().send(11).unwrap();
        assert_eq!(future.as_mut().poll(&mut cx), Poll::Pending);

        // A failed future settles like any other.
        senders.clear();
        assert_eq!(
            future.as_mut().poll(&mut cx),
            Poll::Ready(Ok(vec![Ok(10), Ok(13), Ok(11), Err(())]))
        );
    }

    #[tokio::test]
    async fn test_stream_error_settles_in_flight() {
        let done = Arc::new(AtomicBool::new(false));
        let items = vec![
            Ok({
                let done = done.clone();
                Box::pin(async move {
                    tokio::task::yield_now().await;
                    done.store(true, Ordering::SeqCst);
                    Ok::<_, &str>(0)
                })
            }),
            Err("map failed"),
        ];

        let result = dispatch_concurrent(futures::stream::iter(items), |_| true).await;
        assert_eq!(result, Err("map failed"));
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_admit_refills_empty_set() {
        let items = (0..3).map(|i| Ok::<_, ()>(futures::future::ready(Ok(i))));
        let outputs = dispatch_concurrent(futures::stream::iter(items), |_| false)
            .await
            .unwrap();
        assert_eq!(outputs, vec![Ok(0), Ok(1), Ok(2)]);
    }

    #[tokio::test]
    async fn test_task_aborts_on_drop() {
        let finished = Arc::new(AtomicBool::new(false));
        let task = spawn({
            let finished = finished.clone();
            async move {
                futures::future::pending::<()>().await;
                finished.store(true, Ordering::SeqCst);
                Ok(())
            }
        });
        drop(task);
        tokio::task::yield_now().await;
        assert!(!finished.load(Ordering::SeqCst));

        assert_eq!(spawn(async { Ok(7) }).await.unwrap(), 7);
    }
}
