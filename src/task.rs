use std::mem;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::admission::{
    AdmissionControl, Clock, Debouncer, ThrottleAdmission, Throttler, TokioClock,
};
use crate::client::TransportClient;
use crate::config::{DEFAULT_SUCCESS_MESSAGE, TaskOptions};
use crate::descriptor::{Fingerprint, RequestDescriptor};
use crate::error::{ApiError, ConfigError};
use crate::util::lock_unpoisoned;

pub type DescriptorFactory<A> = Arc<dyn Fn(&A) -> RequestDescriptor + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskPhase {
    Idle,
    Loading,
    Succeeded,
    Failed,
}

/// Observable state of one [`RequestTask`].
#[derive(Clone, Debug, PartialEq)]
pub struct RequestState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<ApiError>,
    pub success: bool,
}

impl<T> Default for RequestState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
            success: false,
        }
    }
}

impl<T> RequestState<T> {
    pub fn phase(&self) -> TaskPhase {
        if self.loading {
            TaskPhase::Loading
        } else if self.success {
            TaskPhase::Succeeded
        } else if self.error.is_some() {
            TaskPhase::Failed
        } else {
            TaskPhase::Idle
        }
    }
}

type Waiter<T> = oneshot::Sender<Result<T, ApiError>>;

enum Gate {
    Immediate,
    Debounce(Debouncer),
    Throttle(Throttler),
}

#[derive(Clone, Copy)]
enum Timer {
    Debounce { epoch: u64, deadline: Instant },
    Throttle { epoch: u64, fire_at: Instant },
}

impl Timer {
    fn deadline(self) -> Instant {
        match self {
            Self::Debounce { deadline, .. } => deadline,
            Self::Throttle { fire_at, .. } => fire_at,
        }
    }
}

enum Admitted<A, T> {
    Now(A),
    Queued {
        receiver: oneshot::Receiver<Result<T, ApiError>>,
        timer: Option<Timer>,
    },
}

/// Mutable per-task call state; only touched under the task's mutex.
struct TaskRuntime<A, T> {
    last_args: Option<A>,
    pending_args: Option<A>,
    waiters: Vec<Waiter<T>>,
    generation: u64,
    active_fingerprint: Option<Fingerprint>,
    gate: Gate,
    deps: Vec<Value>,
    refresh_deps: Vec<Value>,
}

impl<A, T> TaskRuntime<A, T> {
    fn enqueue(&mut self, args: A) -> oneshot::Receiver<Result<T, ApiError>> {
        let (sender, receiver) = oneshot::channel();
        self.pending_args = Some(args);
        self.waiters.push(sender);
        receiver
    }
}

struct TaskInner<A, T> {
    client: TransportClient,
    factory: DescriptorFactory<A>,
    options: TaskOptions<A, T>,
    clock: Arc<dyn Clock>,
    state: watch::Sender<RequestState<T>>,
    runtime: Mutex<TaskRuntime<A, T>>,
}

/// A reusable, stateful request bound to a descriptor factory.
///
/// Each run builds a descriptor from the arguments, sends it through the
/// client, and folds the outcome into [`RequestState`]. Only the most recent
/// run may write state; older runs that settle late are discarded.
pub struct RequestTask<A, T> {
    inner: Arc<TaskInner<A, T>>,
}

impl<A, T> Clone for RequestTask<A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, T> std::fmt::Debug for RequestTask<A, T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RequestTask")
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

impl<A, T> RequestTask<A, T>
where
    A: Clone + Default + Send + Sync + 'static,
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Unless `options.manual` is set, the first run is spawned immediately,
    /// so this must be called inside a tokio runtime.
    pub fn new<F>(
        client: TransportClient,
        factory: F,
        options: TaskOptions<A, T>,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&A) -> RequestDescriptor + Send + Sync + 'static,
    {
        Self::with_clock(client, factory, options, Arc::new(TokioClock))
    }

    pub fn with_clock<F>(
        client: TransportClient,
        factory: F,
        options: TaskOptions<A, T>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&A) -> RequestDescriptor + Send + Sync + 'static,
    {
        let gate = match options.admission()? {
            AdmissionControl::Immediate => Gate::Immediate,
            AdmissionControl::Debounce(wait) => Gate::Debounce(Debouncer::new(wait)),
            AdmissionControl::Throttle(wait) => Gate::Throttle(Throttler::new(wait)),
        };
        let (state, _) = watch::channel(RequestState {
            data: options.default_data.clone(),
            loading: !options.manual,
            error: None,
            success: false,
        });
        let runtime = TaskRuntime {
            last_args: None,
            pending_args: None,
            waiters: Vec::new(),
            generation: 0,
            active_fingerprint: None,
            gate,
            deps: options.deps.clone(),
            refresh_deps: options.refresh_deps.clone(),
        };
        let task = Self {
            inner: Arc::new(TaskInner {
                client,
                factory: Arc::new(factory),
                options,
                clock,
                state,
                runtime: Mutex::new(runtime),
            }),
        };

        if !task.inner.options.manual {
            task.spawn_run(task.default_args());
        }
        Ok(task)
    }

    /// Runs and folds any failure into state.
    pub async fn run(&self, args: A) -> Option<T> {
        self.run_async(args).await.ok()
    }

    /// Runs through debounce/throttle admission and returns the final outcome.
    pub async fn run_async(&self, args: A) -> Result<T, ApiError> {
        let admitted = {
            let mut guard = lock_unpoisoned(&self.inner.runtime);
            let runtime = &mut *guard;
            let now = self.inner.clock.now();
            match &mut runtime.gate {
                Gate::Immediate => Admitted::Now(args),
                Gate::Debounce(debouncer) => {
                    let ticket = debouncer.submit(now);
                    Admitted::Queued {
                        receiver: runtime.enqueue(args),
                        timer: Some(Timer::Debounce {
                            epoch: ticket.epoch,
                            deadline: ticket.deadline,
                        }),
                    }
                }
                Gate::Throttle(throttler) => match throttler.submit(now) {
                    ThrottleAdmission::Leading => Admitted::Now(args),
                    ThrottleAdmission::Trailing {
                        fire_at,
                        epoch,
                        schedule,
                    } => Admitted::Queued {
                        receiver: runtime.enqueue(args),
                        timer: schedule.then_some(Timer::Throttle { epoch, fire_at }),
                    },
                },
            }
        };

        match admitted {
            Admitted::Now(args) => {
                let result = self.execute(args).await;
                self.finish_gate();
                result
            }
            Admitted::Queued { receiver, timer } => {
                if let Some(timer) = timer {
                    self.schedule(timer);
                }
                receiver.await.unwrap_or_else(|_| Err(ApiError::cancelled()))
            }
        }
    }

    /// Re-runs with the last arguments; `None` if the task never ran.
    pub async fn refresh(&self) -> Option<T> {
        let last_args = lock_unpoisoned(&self.inner.runtime).last_args.clone();
        match last_args {
            Some(args) => self.run(args).await,
            None => None,
        }
    }

    /// Aborts the in-flight call and any queued debounce/throttle callers.
    /// `data` and `error` are left as they were.
    pub fn cancel(&self) {
        let fingerprint = {
            let mut runtime = lock_unpoisoned(&self.inner.runtime);
            runtime.generation = runtime.generation.wrapping_add(1);
            match &mut runtime.gate {
                Gate::Immediate => {}
                Gate::Debounce(debouncer) => debouncer.cancel(),
                Gate::Throttle(throttler) => throttler.cancel(),
            }
            runtime.pending_args = None;
            runtime.waiters.clear();
            self.inner.state.send_modify(|state| state.loading = false);
            runtime.active_fingerprint.take()
        };
        if let Some(fingerprint) = fingerprint {
            debug!(fingerprint = %fingerprint, "cancelling task request");
            self.inner.client.cancel(&fingerprint);
        }
    }

    pub fn mutate(&self, data: T) {
        self.inner.state.send_modify(|state| {
            state.data = Some(data);
            state.success = true;
        });
    }

    pub fn mutate_with<F>(&self, update: F)
    where
        F: FnOnce(Option<T>) -> T,
    {
        self.inner.state.send_modify(|state| {
            state.data = Some(update(state.data.take()));
            state.success = true;
        });
    }

    /// Re-runs with the default arguments when `deps` differs from the last list.
    pub fn set_deps(&self, deps: Vec<Value>) -> bool {
        let changed = {
            let mut runtime = lock_unpoisoned(&self.inner.runtime);
            if runtime.deps == deps {
                false
            } else {
                runtime.deps = deps;
                true
            }
        };
        if changed && !self.inner.options.manual {
            self.spawn_run(self.default_args());
        }
        changed
    }

    /// Refreshes when `refresh_deps` differs from the last list.
    pub fn set_refresh_deps(&self, refresh_deps: Vec<Value>) -> bool {
        let changed = {
            let mut runtime = lock_unpoisoned(&self.inner.runtime);
            if runtime.refresh_deps == refresh_deps {
                false
            } else {
                runtime.refresh_deps = refresh_deps;
                true
            }
        };
        if changed && !self.inner.options.manual {
            let task = self.clone();
            tokio::spawn(async move {
                task.refresh().await;
            });
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<RequestState<T>> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> RequestState<T> {
        self.inner.state.borrow().clone()
    }

    pub fn data(&self) -> Option<T> {
        self.inner.state.borrow().data.clone()
    }

    pub fn error(&self) -> Option<ApiError> {
        self.inner.state.borrow().error.clone()
    }

    pub fn loading(&self) -> bool {
        self.inner.state.borrow().loading
    }

    pub fn phase(&self) -> TaskPhase {
        self.inner.state.borrow().phase()
    }

    pub fn client(&self) -> &TransportClient {
        &self.inner.client
    }

    pub(crate) fn spawn_run(&self, args: A) -> JoinHandle<Option<T>> {
        let task = self.clone();
        tokio::spawn(async move { task.run(args).await })
    }

    fn default_args(&self) -> A {
        self.inner.options.default_args.clone().unwrap_or_default()
    }

    fn schedule(&self, timer: Timer) {
        let task = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(timer.deadline()).await;
            task.fire(timer).await;
        });
    }

    async fn fire(&self, timer: Timer) {
        let (args, waiters) = {
            let mut guard = lock_unpoisoned(&self.inner.runtime);
            let runtime = &mut *guard;
            let admitted = match (&mut runtime.gate, timer) {
                (Gate::Debounce(debouncer), Timer::Debounce { epoch, .. }) => debouncer.fire(epoch),
                (Gate::Throttle(throttler), Timer::Throttle { epoch, .. }) => {
                    throttler.fire_trailing(epoch, self.inner.clock.now())
                }
                _ => false,
            };
            if !admitted {
                return;
            }
            (runtime.pending_args.take(), mem::take(&mut runtime.waiters))
        };

        let Some(args) = args else {
            self.finish_gate();
            return;
        };
        let result = self.execute(args).await;
        self.finish_gate();
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    fn finish_gate(&self) {
        let mut runtime = lock_unpoisoned(&self.inner.runtime);
        match &mut runtime.gate {
            Gate::Immediate => {}
            Gate::Debounce(debouncer) => debouncer.finish(),
            Gate::Throttle(throttler) => throttler.finish(),
        }
    }

    async fn execute(&self, args: A) -> Result<T, ApiError> {
        let options = &self.inner.options;
        let mut descriptor = (self.inner.factory)(&args);
        if descriptor.retry_policy().is_none() {
            descriptor = descriptor.with_retry_policy(options.retry_policy());
        }
        if let Some(timeout) = options.timeout
            && descriptor.timeout().is_none()
        {
            descriptor = descriptor.with_timeout(timeout);
        }

        let generation = {
            let mut runtime = lock_unpoisoned(&self.inner.runtime);
            runtime.generation = runtime.generation.wrapping_add(1);
            runtime.last_args = Some(args.clone());
            runtime.active_fingerprint = Some(descriptor.fingerprint().clone());
            self.inner.state.send_modify(|state| state.loading = true);
            runtime.generation
        };
        if options.show_loading {
            self.inner.client.notifier().loading(true);
        }

        let result = self.inner.client.execute::<T>(descriptor).await;

        if options.show_loading {
            self.inner.client.notifier().loading(false);
        }
        self.settle(generation, &args, &result);
        result
    }

    fn settle(&self, generation: u64, args: &A, result: &Result<T, ApiError>) {
        {
            let mut runtime = lock_unpoisoned(&self.inner.runtime);
            if runtime.generation != generation {
                debug!("discarding result of superseded task run");
                return;
            }
            runtime.active_fingerprint = None;
            self.inner.state.send_modify(|state| {
                state.loading = false;
                match result {
                    Ok(data) => {
                        state.data = Some(data.clone());
                        state.error = None;
                        state.success = true;
                    }
                    Err(error) if error.is_cancelled() => {}
                    Err(error) => {
                        state.error = Some(error.clone());
                        state.success = false;
                    }
                }
            });
        }

        let options = &self.inner.options;
        let notifier = self.inner.client.notifier();
        match result {
            Ok(data) => {
                if let Some(on_success) = &options.on_success {
                    on_success(data, args);
                }
                if options.show_success {
                    notifier.success(
                        options
                            .success_message
                            .as_deref()
                            .unwrap_or(DEFAULT_SUCCESS_MESSAGE),
                    );
                }
            }
            Err(error) if error.is_cancelled() => {}
            Err(error) => {
                if let Some(on_error) = &options.on_error {
                    on_error(error, args);
                }
                if options.show_error && !error.silent() {
                    notifier.error(error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RequestState, TaskPhase};
    use crate::error::{ApiError, ErrorKind};

    #[test]
    fn phase_prefers_loading_then_success() {
        let mut state = RequestState::<u32>::default();
        assert_eq!(state.phase(), TaskPhase::Idle);

        state.loading = true;
        assert_eq!(state.phase(), TaskPhase::Loading);

        state.loading = false;
        state.error = Some(ApiError::new(ErrorKind::Business, 10_001, "closed"));
        assert_eq!(state.phase(), TaskPhase::Failed);

        state.success = true;
        state.data = Some(1);
        assert_eq!(state.phase(), TaskPhase::Succeeded);
    }
}
