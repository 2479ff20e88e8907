use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use futures::stream::{BoxStream, Stream, StreamExt};
use futures::task::{self, ArcWake};

/// Fork `source` into two branches that each observe every item in order.
///
/// Whichever branch reads first pulls from the source and queues a clone of
/// the item for its sibling. Dropping a branch detaches it: nothing more is
/// queued for it, and once both branches are gone the source itself is dropped.
pub fn tee<T>(source: BoxStream<'static, T>) -> (TeeBranch<T>, TeeBranch<T>)
where
    T: Clone + Send + 'static,
{
    let shared = Arc::new(Mutex::new(TeeState {
        source: Some(source),
        queues: [VecDeque::new(), VecDeque::new()],
        attached: [true, true],
    }));
    let wakers = Arc::new(SideWakers::default());

    let left = TeeBranch {
        shared: Arc::clone(&shared),
        wakers: Arc::clone(&wakers),
        side: 0,
    };
    let right = TeeBranch {
        shared,
        wakers,
        side: 1,
    };
    (left, right)
}

/// Fork `source` into exactly `count` branches.
///
/// Branches are produced by teeing the tail of the previous fork. A count of
/// one hands the source back untouched; zero drops it.
pub fn split<T>(source: BoxStream<'static, T>, count: usize) -> Vec<BoxStream<'static, T>>
where
    T: Clone + Send + 'static,
{
    match count {
        0 => {
            drop(source);
            Vec::new()
        }
        1 => vec![source],
        _ => {
            let mut branches = Vec::with_capacity(count);
            let mut tail = source;
            for _ in 1..count {
                let (head, rest) = tee(tail);
                branches.push(head.boxed());
                tail = rest.boxed();
            }
            branches.push(tail);
            branches
        }
    }
}

struct TeeState<T> {
    // `None` once the source has ended or both branches are gone.
    source: Option<BoxStream<'static, T>>,
    queues: [VecDeque<T>; 2],
    attached: [bool; 2],
}

/// Wakes both sides whenever the source becomes ready, regardless of which
/// side happened to poll it last.
#[derive(Default)]
struct SideWakers {
    slots: Mutex<[Option<Waker>; 2]>,
}

impl SideWakers {
    fn register(&self, side: usize, waker: &Waker) {
        let mut slots = self.slots.lock().expect("poisoned lock");
        match &slots[side] {
            Some(existing) if existing.will_wake(waker) => {}
            _ => slots[side] = Some(waker.clone()),
        }
    }

    fn wake_side(&self, side: usize) {
        let waker = self.slots.lock().expect("poisoned lock")[side].take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn clear(&self, side: usize) {
        self.slots.lock().expect("poisoned lock")[side] = None;
    }
}

impl ArcWake for SideWakers {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let taken = std::mem::take(&mut *arc_self.slots.lock().expect("poisoned lock"));
        for waker in taken.into_iter().flatten() {
            waker.wake();
        }
    }
}

/// One side of a [`tee`].
pub struct TeeBranch<T> {
    shared: Arc<Mutex<TeeState<T>>>,
    wakers: Arc<SideWakers>,
    side: usize,
}

impl<T> fmt::Debug for TeeBranch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeeBranch").field("side", &self.side).finish()
    }
}

impl<T: Clone> Stream for TeeBranch<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        let side = this.side;
        let other = 1 - side;

        let mut state = this.shared.lock().expect("poisoned lock");
        if let Some(item) = state.queues[side].pop_front() {
            return Poll::Ready(Some(item));
        }

        this.wakers.register(side, cx.waker());
        let shared_waker = task::waker(Arc::clone(&this.wakers));
        let mut source_cx = Context::from_waker(&shared_waker);

        let Some(source) = state.source.as_mut() else {
            return Poll::Ready(None);
        };

        match source.poll_next_unpin(&mut source_cx) {
            Poll::Ready(Some(item)) => {
                if state.attached[other] {
                    state.queues[other].push_back(item.clone());
                    drop(state);
                    this.wakers.wake_side(other);
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                state.source = None;
                drop(state);
                this.wakers.wake_side(other);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for TeeBranch<T> {
    fn drop(&mut self) {
        let released = {
            let Ok(mut state) = self.shared.lock() else {
                return;
            };
            state.attached[self.side] = false;
            state.queues[self.side].clear();
            if state.attached[1 - self.side] {
                None
            } else {
                state.source.take()
            }
        };
        self.wakers.clear(self.side);
        drop(released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn numbers(n: u32) -> BoxStream<'static, u32> {
        stream::iter(0..n).boxed()
    }

    #[tokio::test]
    async fn test_tee_both_sides_see_everything() {
        let (left, right) = tee(numbers(5));
        let left: Vec<u32> = left.collect().await;
        let right: Vec<u32> = right.collect().await;
        assert_eq!(left, vec![0, 1, 2, 3, 4]);
        assert_eq!(right, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_tee_interleaved_reads() {
        let (mut left, mut right) = tee(numbers(3));
        assert_eq!(right.next().await, Some(0));
        assert_eq!(left.next().await, Some(0));
        assert_eq!(left.next().await, Some(1));
        assert_eq!(left.next().await, Some(2));
        assert_eq!(left.next().await, None);
        assert_eq!(right.next().await, Some(1));
        assert_eq!(right.next().await, Some(2));
        assert_eq!(right.next().await, None);
    }

    #[tokio::test]
    async fn test_dropped_side_does_not_block_other() {
        let (left, right) = tee(numbers(4));
        drop(left);
        let right: Vec<u32> = right.collect().await;
        assert_eq!(right, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_split_counts() {
        assert!(split(numbers(3), 0).is_empty());
        assert_eq!(split(numbers(3), 1).len(), 1);

        let branches = split(numbers(3), 4);
        assert_eq!(branches.len(), 4);
        for branch in branches {
            let items: Vec<u32> = branch.collect().await;
            assert_eq!(items, vec![0, 1, 2]);
        }
    }

    #[tokio::test]
    async fn test_split_concurrent_consumers() {
        let branches = split(numbers(100), 3);
        let handles: Vec<_> = branches
            .into_iter()
            .map(|branch| tokio::spawn(async move { branch.collect::<Vec<u32>>().await }))
            .collect();

        for handle in handles {
            let items = handle.await.unwrap();
            assert_eq!(items, (0..100).collect::<Vec<u32>>());
        }
    }

    #[tokio::test]
    async fn test_pending_source_wakes_both_sides() {
        let (tx, rx) = futures::channel::mpsc::unbounded::<u32>();
        let (left, right) = tee(rx.boxed());

        let left = tokio::spawn(async move { left.collect::<Vec<u32>>().await });
        let right = tokio::spawn(async move { right.collect::<Vec<u32>>().await });

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        tx.unbounded_send(7).unwrap();
        tx.unbounded_send(8).unwrap();
        drop(tx);

        assert_eq!(left.await.unwrap(), vec![7, 8]);
        assert_eq!(right.await.unwrap(), vec![7, 8]);
    }
}
