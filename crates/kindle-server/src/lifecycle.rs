//! Ownership of the single engine instance.
//!
//! [`EngineLifecycle`] builds the engine on first use, warms it up, hands out
//! [`EngineHandle`]s and publishes a [`Readiness`] for health probes. It is
//! the only writer of that readiness.
//!
//! ```text
//! Uninitialized ──acquire──▶ Initializing ──ok──▶ Ready ──invalidate──▶ Unavailable
//!       ▲                         │                 │                        │
//!       │                         └──err──▶ Unavailable ◀────────────────────┘
//!       └──────────── ShuttingDown ◀──shutdown── (any)         (acquire re-initializes)
//! ```
//!
//! Initialization is single-flight: callers arriving while it runs await the
//! same shared future, so at most one engine is ever under construction.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::StreamExt;
use kindle_engine::{EngineFactory, GenerationRequest, InferenceEngine, ModelSpec};
use kindle_sampling::SamplingConfig;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::ServerError;

/// Fixed inputs to every initialization.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub model: ModelSpec,
    /// Prompt generated once with the warmup preset before declaring readiness.
    pub warmup_prompt: String,
    /// Upper bound on build plus warmup.
    pub init_timeout: Duration,
}

impl LifecycleSettings {
    pub fn new(model: ModelSpec) -> Self {
        Self {
            model,
            warmup_prompt: "hello".to_string(),
            init_timeout: Duration::from_secs(600),
        }
    }

    pub fn with_warmup_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.warmup_prompt = prompt.into();
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }
}

/// Coarse readiness reported to probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    Starting,
    Ready,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub state: ReadinessState,
    pub reason: String,
}

impl Readiness {
    fn starting(reason: impl Into<String>) -> Self {
        Self {
            state: ReadinessState::Starting,
            reason: reason.into(),
        }
    }

    fn ready() -> Self {
        Self {
            state: ReadinessState::Ready,
            reason: "engine ready".to_string(),
        }
    }

    fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            state: ReadinessState::Unavailable,
            reason: reason.into(),
        }
    }
}

/// Observable lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Uninitialized,
    Initializing,
    Ready,
    Unavailable,
    ShuttingDown,
}

/// A borrowed view of the current engine, valid for one generation.
///
/// The epoch identifies which initialization produced the engine, so a
/// stale handle can never invalidate its replacement.
#[derive(Clone)]
pub struct EngineHandle {
    engine: Arc<dyn InferenceEngine>,
    epoch: u64,
}

impl EngineHandle {
    pub fn engine(&self) -> &Arc<dyn InferenceEngine> {
        &self.engine
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

type InitFuture = Shared<BoxFuture<'static, Result<EngineHandle, String>>>;

enum Slot {
    Uninitialized,
    Initializing(InitFuture),
    Ready(EngineHandle),
    Unavailable,
    ShuttingDown,
}

struct Inner {
    slot: Slot,
    readiness: Readiness,
    /// Bumped on every initialization start and on shutdown.
    epoch: u64,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of the engine and its readiness.
pub struct EngineLifecycle {
    factory: Arc<dyn EngineFactory>,
    settings: Arc<LifecycleSettings>,
    inner: Arc<Mutex<Inner>>,
}

impl EngineLifecycle {
    pub fn new(factory: Arc<dyn EngineFactory>, settings: LifecycleSettings) -> Self {
        Self {
            factory,
            settings: Arc::new(settings),
            inner: Arc::new(Mutex::new(Inner {
                slot: Slot::Uninitialized,
                readiness: Readiness::starting("engine not initialized"),
                epoch: 0,
            })),
        }
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// Return the ready engine, building it first if needed.
    ///
    /// Does not suspend when the engine is ready. Concurrent callers during
    /// initialization all observe the same outcome.
    pub async fn acquire(&self) -> Result<EngineHandle, ServerError> {
        let pending = {
            let mut guard = lock(&self.inner);
            let inner = &mut *guard;
            match inner.slot {
                Slot::Ready(ref handle) => return Ok(handle.clone()),
                Slot::Initializing(ref pending) => pending.clone(),
                Slot::ShuttingDown => {
                    return Err(ServerError::EngineInit("engine is shutting down".to_string()))
                }
                Slot::Uninitialized | Slot::Unavailable => self.begin_init(inner),
            }
        };
        pending.await.map_err(ServerError::EngineInit)
    }

    fn begin_init(&self, inner: &mut Inner) -> InitFuture {
        inner.epoch += 1;
        let epoch = inner.epoch;
        inner.readiness = Readiness::starting("engine initializing");
        info!(epoch, model = %self.settings.model.path, "initializing engine");

        // The build runs detached so that an abandoned request cannot stall it.
        let task = tokio::spawn(initialize(
            self.factory.clone(),
            self.settings.clone(),
            self.inner.clone(),
            epoch,
        ));
        let state = self.inner.clone();
        let pending = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(join) => {
                    let reason = format!("initialization task failed: {join}");
                    match commit(&state, epoch, Err(reason)) {
                        Commit::Done(outcome) => outcome,
                        Commit::Superseded(_) => Err(superseded()),
                    }
                }
            }
        }
        .boxed()
        .shared();
        inner.slot = Slot::Initializing(pending.clone());
        pending
    }

    /// Mark `handle`'s engine as stale so the next `acquire` rebuilds it.
    ///
    /// No-op unless `handle` is the engine currently published as ready.
    pub fn invalidate(&self, handle: &EngineHandle) {
        let mut inner = lock(&self.inner);
        let current = matches!(&inner.slot, Slot::Ready(h) if h.epoch == handle.epoch);
        if !current {
            debug!(epoch = handle.epoch, "ignoring invalidation of a superseded engine");
            return;
        }
        inner.slot = Slot::Unavailable;
        inner.readiness = Readiness::unavailable("engine lost; reconnecting on next request");
        warn!(epoch = handle.epoch, "engine invalidated");
    }

    /// Stop the engine and release it. Idempotent.
    ///
    /// Readiness flips to unavailable before the engine is asked to stop. An
    /// initialization still in flight is superseded and its engine released
    /// as soon as it finishes building.
    pub async fn shutdown(&self) {
        let engine = {
            let mut inner = lock(&self.inner);
            inner.readiness = Readiness::unavailable("engine shut down");
            match std::mem::replace(&mut inner.slot, Slot::ShuttingDown) {
                Slot::Ready(handle) => Some(handle.engine),
                Slot::Initializing(_) => {
                    inner.epoch += 1;
                    None
                }
                // Another caller is already stopping the engine.
                Slot::ShuttingDown => return,
                Slot::Uninitialized | Slot::Unavailable => {
                    inner.slot = Slot::Uninitialized;
                    return;
                }
            }
        };

        if let Some(engine) = engine {
            info!("stopping engine");
            if let Err(e) = engine.shutdown().await {
                warn!(error = %e, "engine shutdown reported an error");
            }
        }

        let mut inner = lock(&self.inner);
        if matches!(inner.slot, Slot::ShuttingDown) {
            inner.slot = Slot::Uninitialized;
        }
        info!("engine shut down");
    }

    /// True iff the engine is ready.
    pub fn is_ready(&self) -> bool {
        lock(&self.inner).readiness.state == ReadinessState::Ready
    }

    pub fn readiness(&self) -> Readiness {
        lock(&self.inner).readiness.clone()
    }

    pub fn phase(&self) -> LifecyclePhase {
        match lock(&self.inner).slot {
            Slot::Uninitialized => LifecyclePhase::Uninitialized,
            Slot::Initializing(_) => LifecyclePhase::Initializing,
            Slot::Ready(_) => LifecyclePhase::Ready,
            Slot::Unavailable => LifecyclePhase::Unavailable,
            Slot::ShuttingDown => LifecyclePhase::ShuttingDown,
        }
    }
}

impl fmt::Debug for EngineLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineLifecycle")
            .field("phase", &self.phase())
            .field("model", &self.settings.model.path)
            .finish()
    }
}

fn superseded() -> String {
    "initialization superseded by shutdown".to_string()
}

enum Commit {
    Done(Result<EngineHandle, String>),
    /// The slot moved on while building; the engine belongs to nobody.
    Superseded(Option<Arc<dyn InferenceEngine>>),
}

/// Publish the outcome of initialization `epoch`.
fn commit(
    state: &Mutex<Inner>,
    epoch: u64,
    outcome: Result<Arc<dyn InferenceEngine>, String>,
) -> Commit {
    let mut inner = lock(state);
    let current = inner.epoch == epoch && matches!(inner.slot, Slot::Initializing(_));
    if !current {
        return Commit::Superseded(outcome.ok());
    }
    match outcome {
        Ok(engine) => {
            let handle = EngineHandle { engine, epoch };
            inner.slot = Slot::Ready(handle.clone());
            inner.readiness = Readiness::ready();
            Commit::Done(Ok(handle))
        }
        Err(reason) => {
            inner.slot = Slot::Unavailable;
            inner.readiness = Readiness::unavailable(reason.clone());
            Commit::Done(Err(reason))
        }
    }
}

async fn initialize(
    factory: Arc<dyn EngineFactory>,
    settings: Arc<LifecycleSettings>,
    state: Arc<Mutex<Inner>>,
    epoch: u64,
) -> Result<EngineHandle, String> {
    let started = Instant::now();
    let outcome = match tokio::time::timeout(settings.init_timeout, build(&*factory, &settings)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(format!(
            "initialization timed out after {:?}",
            settings.init_timeout
        )),
    };

    match commit(&state, epoch, outcome) {
        Commit::Done(Ok(handle)) => {
            info!(epoch, elapsed_ms = started.elapsed().as_millis() as u64, "engine ready");
            Ok(handle)
        }
        Commit::Done(Err(reason)) => {
            error!(epoch, %reason, "engine initialization failed");
            Err(reason)
        }
        Commit::Superseded(engine) => {
            if let Some(engine) = engine {
                info!(epoch, "releasing engine built during shutdown");
                if let Err(e) = engine.shutdown().await {
                    warn!(error = %e, "engine shutdown reported an error");
                }
            }
            Err(superseded())
        }
    }
}

/// Construct the engine and run one warmup generation on it.
async fn build(
    factory: &dyn EngineFactory,
    settings: &LifecycleSettings,
) -> Result<Arc<dyn InferenceEngine>, String> {
    let engine = factory
        .create(&settings.model)
        .await
        .map_err(|e| e.to_string())?;

    if let Err(reason) = warm_up(engine.as_ref(), &settings.warmup_prompt).await {
        if let Err(e) = engine.shutdown().await {
            warn!(error = %e, "failed to release engine after warmup failure");
        }
        return Err(format!("warmup failed: {reason}"));
    }
    Ok(engine)
}

async fn warm_up(engine: &dyn InferenceEngine, prompt: &str) -> Result<(), String> {
    let request = GenerationRequest::new(prompt, SamplingConfig::warmup());
    debug!(request_id = %request.id, "warming up engine");
    let mut deltas = engine.generate(&request).await.map_err(|e| e.to_string())?;
    while let Some(delta) = deltas.next().await {
        if delta.map_err(|e| e.to_string())?.is_final {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindle_engine::EngineError;
    use kindle_runtime::{MockEngineFactory, MockReply};

    fn lifecycle(factory: &MockEngineFactory) -> EngineLifecycle {
        EngineLifecycle::new(
            Arc::new(factory.clone()),
            LifecycleSettings::new(ModelSpec::new("/models/test")),
        )
    }

    #[tokio::test]
    async fn starts_uninitialized_and_not_ready() {
        let lc = lifecycle(&MockEngineFactory::new());
        assert_eq!(lc.phase(), LifecyclePhase::Uninitialized);
        assert_eq!(lc.readiness().state, ReadinessState::Starting);
        assert!(!lc.is_ready());
    }

    #[tokio::test]
    async fn warmup_uses_the_warmup_preset() {
        let factory = MockEngineFactory::new();
        let lc = lifecycle(&factory);
        lc.acquire().await.unwrap();
        let warmups = factory.generations_for("hello");
        assert_eq!(warmups.len(), 1);
        assert_eq!(warmups[0].sampling, SamplingConfig::warmup());
    }

    #[tokio::test]
    async fn warmup_failure_leaves_engine_unavailable() {
        let factory = MockEngineFactory::new();
        factory.script(
            "hello",
            MockReply::RejectStart(EngineError::Inference("cuda error".into())),
        );
        let lc = lifecycle(&factory);
        let err = lc.acquire().await.unwrap_err();
        assert!(matches!(err, ServerError::EngineInit(ref m) if m.contains("cuda error")));
        assert_eq!(lc.phase(), LifecyclePhase::Unavailable);
        assert_eq!(factory.shutdowns(), 1);
    }

    #[tokio::test]
    async fn init_timeout_is_enforced() {
        let factory = MockEngineFactory::new().with_create_delay(Duration::from_millis(200));
        let lc = EngineLifecycle::new(
            Arc::new(factory),
            LifecycleSettings::new(ModelSpec::new("m"))
                .with_init_timeout(Duration::from_millis(20)),
        );
        let err = lc.acquire().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert_eq!(lc.readiness().state, ReadinessState::Unavailable);
    }
}
