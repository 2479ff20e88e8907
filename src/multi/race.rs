use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures::FutureExt as _;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::stream::{AbortableBranch, Branch, ByteStream, split};
use crate::{AbortController, AbortSignal, Error, Result};

/// Everything a backend gets for one race.
#[derive(Debug)]
pub struct RunArgs<B> {
    /// The backend being run.
    pub backend: Arc<B>,
    /// This backend's private copy of the source stream.
    pub branch: Branch,
    /// Priority of the backend; lower wins.
    pub index: usize,
    /// Fires when the race no longer needs this backend.
    pub signal: AbortSignal,
}

type RunFn<B, O> = Box<dyn Fn(RunArgs<B>) -> BoxFuture<'static, Result<O>> + Send + Sync>;
type PickFn<B, O, W> = Box<dyn Fn(&B, &O, usize) -> Option<W> + Send + Sync>;
type ErrorHook<B> = Arc<dyn Fn(&B, &Error, usize) + Send + Sync>;
type DeclineHook<B, O> = Arc<dyn Fn(&B, &O, usize) + Send + Sync>;
type AbortReasonFn = Box<dyn Fn(usize) -> Error + Send + Sync>;

/// Races backends over forks of one stream and picks a winner by priority.
///
/// Every backend starts immediately, but outcomes are judged strictly in index
/// order: a slow backend at index 0 beats a fast one at index 1 if both are
/// accepted by `pick_winner`. Once a winner is found, every backend ranked
/// below it is aborted with [`loser_abort_reason`](Self::loser_abort_reason)
/// and its outcome is settled in the background, feeding only the observer
/// hooks.
///
/// ```
/// # use replicast::multi::{PriorityRace, RunArgs};
/// # use replicast::stream::{self, collect_bytes};
/// # use bytes::Bytes;
/// # async fn example() {
/// let race = PriorityRace::new(
///     |args: RunArgs<&'static str>| async move {
///         collect_bytes(args.branch).await.map(|body| body.len())
///     },
///     |name: &&'static str, len: &usize, _index| (*len > 0).then(|| format!("{name}:{len}")),
/// );
///
/// let winner = race
///     .run(vec!["primary", "replica"], stream::from_bytes(vec![Bytes::from("hi")]))
///     .await;
/// assert_eq!(winner.as_deref(), Some("primary:2"));
/// # }
/// ```
pub struct PriorityRace<B, O, W> {
    run: RunFn<B, O>,
    pick_winner: PickFn<B, O, W>,
    on_error: ErrorHook<B>,
    on_decline: DeclineHook<B, O>,
    loser_abort_reason: AbortReasonFn,
    signal: Option<AbortSignal>,
}

impl<B, O, W> PriorityRace<B, O, W>
where
    B: Send + Sync + 'static,
    O: Send + 'static,
{
    /// Create a race from the per-backend worker and the acceptance rule.
    pub fn new<R, Fut, P>(run: R, pick_winner: P) -> Self
    where
        R: Fn(RunArgs<B>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
        P: Fn(&B, &O, usize) -> Option<W> + Send + Sync + 'static,
    {
        Self {
            run: Box::new(move |args: RunArgs<B>| run(args).boxed()),
            pick_winner: Box::new(pick_winner),
            on_error: Arc::new(|_: &B, _: &Error, _: usize| {}),
            on_decline: Arc::new(|_: &B, _: &O, _: usize| {}),
            loser_abort_reason: Box::new(|winner: usize| {
                Error::Canceled(format!("lost race to backend {winner}"))
            }),
            signal: None,
        }
    }

    /// Observe backends whose run failed.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&B, &Error, usize) + Send + Sync + 'static,
    {
        self.on_error = Arc::new(hook);
        self
    }

    /// Observe backends that succeeded but were not accepted as the winner.
    pub fn on_decline<F>(mut self, hook: F) -> Self
    where
        F: Fn(&B, &O, usize) + Send + Sync + 'static,
    {
        self.on_decline = Arc::new(hook);
        self
    }

    /// Set the reason losers are aborted with, given the winner's index.
    pub fn loser_abort_reason<F>(mut self, reason: F) -> Self
    where
        F: Fn(usize) -> Error + Send + Sync + 'static,
    {
        self.loser_abort_reason = Box::new(reason);
        self
    }

    /// Tie every backend to an external signal (default: none).
    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Run the race and return the winner, or `None` if no backend was accepted.
    pub async fn run(self, backends: Vec<B>, source: ByteStream) -> Option<W> {
        let count = backends.len();
        if count == 0 {
            tracing::debug!("No backends to race, releasing source");
            drop(source);
            return None;
        }

        let mut guard = AbortOnDrop::new(
            (0..count)
                .map(|_| match &self.signal {
                    Some(parent) => AbortController::child_of(parent),
                    None => AbortController::new(),
                })
                .collect(),
        );
        let controllers = &guard.controllers;
        let backends: Vec<Arc<B>> = backends.into_iter().map(Arc::new).collect();

        tracing::debug!(backends = count, "Starting race");
        let handles: Vec<JoinHandle<Result<O>>> = split(source, count)
            .into_iter()
            .zip(controllers)
            .zip(&backends)
            .enumerate()
            .map(|(index, ((branch, controller), backend))| {
                let signal = controller.signal();
                let args = RunArgs {
                    backend: Arc::clone(backend),
                    branch: AbortableBranch::new(branch, signal.clone()),
                    index,
                    signal,
                };
                tokio::spawn((self.run)(args))
            })
            .collect();

        let observers = Observers {
            on_error: Arc::clone(&self.on_error),
            on_decline: Arc::clone(&self.on_decline),
        };

        let mut pending = handles.into_iter().enumerate();
        while let Some((index, handle)) = pending.next() {
            let backend = &backends[index];
            let outcome = match settle(handle, index).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    tracing::warn!(backend_index = index, error = ?error, "Backend failed");
                    observers.error(backend, &error, index);
                    continue;
                }
            };

            match (self.pick_winner)(backend, &outcome, index) {
                Some(winner) => {
                    let reason = (self.loser_abort_reason)(index);
                    for controller in &controllers[index + 1..] {
                        controller.abort(reason.clone());
                    }
                    tracing::info!(
                        backend_index = index,
                        aborted = count - index - 1,
                        "Winner selected"
                    );

                    guard.disarm();

                    let losers: Vec<(usize, JoinHandle<Result<O>>)> = pending.collect();
                    if !losers.is_empty() {
                        tokio::spawn(settle_losers(losers, backends, observers));
                    }
                    return Some(winner);
                }
                None => {
                    tracing::debug!(backend_index = index, "Outcome declined");
                    observers.decline(backend, &outcome, index);
                }
            }
        }

        guard.disarm();
        tracing::debug!(backends = count, "No backend produced an acceptable outcome");
        None
    }
}

impl<B, O, W> std::fmt::Debug for PriorityRace<B, O, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityRace")
            .field("signal", &self.signal)
            .finish_non_exhaustive()
    }
}

/// Aborts every backend if the race is dropped before judging finishes.
struct AbortOnDrop {
    controllers: Vec<AbortController>,
    armed: bool,
}

impl AbortOnDrop {
    fn new(controllers: Vec<AbortController>) -> Self {
        Self {
            controllers,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::debug!(backends = self.controllers.len(), "Race dropped, aborting backends");
        let reason = Error::Canceled("race dropped before a winner was chosen".to_string());
        for controller in &self.controllers {
            controller.abort(reason.clone());
        }
    }
}

/// Await a backend task, turning a panic or lost task into an error.
async fn settle<O>(handle: JoinHandle<Result<O>>, index: usize) -> Result<O> {
    match handle.await {
        Ok(outcome) => outcome,
        Err(join_error) => {
            let message = if join_error.is_panic() {
                format!("panicked: {}", panic_message(join_error.into_panic()))
            } else {
                "task was cancelled".to_string()
            };
            Err(Error::Backend { index, message })
        }
    }
}

async fn settle_losers<B, O>(
    losers: Vec<(usize, JoinHandle<Result<O>>)>,
    backends: Vec<Arc<B>>,
    observers: Observers<B, O>,
) {
    for (index, handle) in losers {
        let backend = &backends[index];
        match settle(handle, index).await {
            Ok(outcome) => observers.decline(backend, &outcome, index),
            Err(error) => {
                tracing::debug!(backend_index = index, error = ?error, "Loser settled with error");
                observers.error(backend, &error, index);
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct Observers<B, O> {
    on_error: ErrorHook<B>,
    on_decline: DeclineHook<B, O>,
}

impl<B, O> Observers<B, O> {
    fn error(&self, backend: &B, error: &Error, index: usize) {
        guard("on_error", index, || (self.on_error)(backend, error, index));
    }

    fn decline(&self, backend: &B, outcome: &O, index: usize) {
        guard("on_decline", index, || (self.on_decline)(backend, outcome, index));
    }
}

// Observer hooks must not be able to take the race down with them.
fn guard(hook: &'static str, index: usize, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        tracing::warn!(
            backend_index = index,
            hook,
            panic = %panic_message(payload),
            "Observer hook panicked"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{self, collect_bytes};
    use bytes::Bytes;
    use std::sync::Mutex;
    use std::time::Duration;

    fn source() -> ByteStream {
        stream::from_bytes(vec![Bytes::from_static(b"payload")])
    }

    #[tokio::test]
    async fn test_single_backend_wins() {
        let race = PriorityRace::new(
            |args: RunArgs<u8>| async move { collect_bytes(args.branch).await },
            |_: &u8, body: &Vec<u8>, _| Some(body.clone()),
        );
        assert_eq!(race.run(vec![1], source()).await, Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn test_decline_falls_through_to_next() {
        let declined = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&declined);

        let race = PriorityRace::new(
            |args: RunArgs<u32>| async move { Ok(*args.backend) },
            |_: &u32, value: &u32, _| (*value > 10).then_some(*value),
        )
        .on_decline(move |_, value, index| seen.lock().unwrap().push((index, *value)));

        assert_eq!(race.run(vec![5, 20, 30], source()).await, Some(20));
        assert_eq!(*declined.lock().unwrap(), vec![(0, 5)]);
    }

    #[tokio::test]
    async fn test_panicking_backend_becomes_error() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&errors);

        let race = PriorityRace::new(
            |args: RunArgs<u8>| async move {
                if args.index == 0 {
                    panic!("backend exploded");
                }
                Ok(args.index)
            },
            |_: &u8, index: &usize, _| Some(*index),
        )
        .on_error(move |_, error, index| seen.lock().unwrap().push((index, error.to_string())));

        assert_eq!(race.run(vec![0, 1], source()).await, Some(1));
        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, 0);
        assert!(errors[0].1.contains("backend exploded"));
    }

    #[tokio::test]
    async fn test_panicking_observer_is_swallowed() {
        let race = PriorityRace::new(
            |_: RunArgs<u8>| async move { Err::<u8, _>(Error::Generic("nope".into())) },
            |_: &u8, value: &u8, _| Some(*value),
        )
        .on_error(|_, _, _| panic!("observer bug"));

        assert_eq!(race.run(vec![0, 1, 2], source()).await, None);
    }

    #[tokio::test]
    async fn test_default_loser_reason_names_winner() {
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&reasons);

        let race = PriorityRace::new(
            move |args: RunArgs<u8>| {
                let seen = Arc::clone(&seen);
                async move {
                    if args.index == 0 {
                        return Ok(0u8);
                    }
                    let reason = args.signal.aborted().await;
                    seen.lock().unwrap().push(reason.to_string());
                    Err(reason)
                }
            },
            |_: &u8, value: &u8, _| Some(*value),
        );

        assert_eq!(race.run(vec![0, 1], source()).await, Some(0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            *reasons.lock().unwrap(),
            vec!["Operation canceled: lost race to backend 0".to_string()]
        );
    }
}
