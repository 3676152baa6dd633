//! Fixed-size pool of engine workers.
//!
//! A worker is either idle in the pool or checked out to exactly one
//! [`PooledWorker`] guard. The semaphore counts idle workers, so a caller
//! holding a permit is guaranteed to find one in the idle set.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;

use crate::{AnalysisEngine, EngineError, EngineEvaluation, EngineFactory, EngineOptions, SearchLimits};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub size: usize,
    pub acquire_timeout: Duration,
    pub options: EngineOptions,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 2,
            acquire_timeout: Duration::from_secs(30),
            options: EngineOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub size: usize,
    pub live: usize,
    pub idle: usize,
    pub busy: usize,
    pub generation: u64,
    pub restarts: u64,
    pub shut_down: bool,
}

struct Slot<E> {
    engine: E,
    /// Configuration generation this engine was last configured with
    generation: u64,
}

struct PoolState<E> {
    idle: VecDeque<Slot<E>>,
    /// Idle plus checked-out workers, plus spawns in progress
    live: usize,
    options: EngineOptions,
    generation: u64,
    next_id: usize,
    restarts: u64,
}

pub struct WorkerPool<F: EngineFactory> {
    factory: F,
    size: usize,
    acquire_timeout: Duration,
    state: Mutex<PoolState<F::Engine>>,
    available: Semaphore,
    shut_down: AtomicBool,
}

impl<F: EngineFactory> WorkerPool<F> {
    /// Spawn and configure `config.size` workers.
    ///
    /// Succeeds with reduced capacity if some workers fail to start; fails
    /// only when none could.
    #[tracing::instrument(level = "info", skip(factory, config), fields(size = config.size))]
    pub async fn start(factory: F, config: PoolConfig) -> Result<Arc<Self>, EngineError> {
        let size = config.size.max(1);
        let pool = Arc::new(Self {
            factory,
            size,
            acquire_timeout: config.acquire_timeout,
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(size),
                live: 0,
                options: config.options,
                generation: 0,
                next_id: 0,
                restarts: 0,
            }),
            available: Semaphore::new(0),
            shut_down: AtomicBool::new(false),
        });

        let mut last_error = None;
        for _ in 0..size {
            match pool.spawn_worker().await {
                Ok(slot) => pool.push_idle(slot).await,
                Err(e) => {
                    tracing::warn!("Failed to start engine worker: {}", e);
                    last_error = Some(e);
                }
            }
        }

        let live = pool.lock().live;
        if live == 0 {
            let reason = last_error.map_or_else(|| "no workers".to_string(), |e| e.to_string());
            return Err(EngineError::Unavailable(format!(
                "no engine worker could be started: {reason}"
            )));
        }
        tracing::info!(live, size, "Worker pool started");
        Ok(pool)
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<F::Engine>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Check out an idle worker, waiting at most the acquire timeout.
    ///
    /// A worker configured under an older generation is reconfigured before
    /// it is handed out.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledWorker<F>, EngineError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(EngineError::Unavailable("worker pool is shut down".to_string()));
        }
        self.replenish().await;

        let permit = match tokio::time::timeout(self.acquire_timeout, self.available.acquire()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => {
                return Err(EngineError::Unavailable("worker pool is shut down".to_string()))
            }
            Err(_elapsed) => {
                return Err(EngineError::Unavailable(format!(
                    "no engine worker free within {:?}",
                    self.acquire_timeout
                )))
            }
        };
        // The permit now belongs to the checked-out worker; checkin adds it back.
        permit.forget();

        let (slot, generation, options) = {
            let mut state = self.lock();
            let slot = state.idle.pop_front();
            (slot, state.generation, state.options.clone())
        };
        let Some(mut slot) = slot else {
            return Err(EngineError::Unavailable("idle set out of sync".to_string()));
        };

        if slot.generation != generation {
            if let Err(e) = slot.engine.configure(&options).await {
                tracing::warn!(worker_id = slot.engine.id(), "Reconfiguration failed: {}", e);
                // The dead-worker path of checkin replaces it
                let _ = self.checkin(slot).await;
                return Err(e);
            }
            slot.generation = generation;
        }

        tracing::debug!(worker_id = slot.engine.id(), "Worker checked out");
        Ok(PooledWorker {
            id: slot.engine.id(),
            pool: Arc::clone(self),
            slot: Some(slot),
        })
    }

    /// Acquire a worker, evaluate, release. A crash is retried once on a
    /// fresh worker; timeouts are not retried.
    pub async fn evaluate(
        self: &Arc<Self>,
        fen: &str,
        limits: &SearchLimits,
    ) -> Result<EngineEvaluation, EngineError> {
        let mut retried = false;
        loop {
            let mut worker = self.acquire().await?;
            let result = worker.evaluate(fen, limits).await;
            // Respawn failures are logged by checkin; the evaluation stands on its own
            let _ = worker.release().await;
            match result {
                Err(EngineError::Crashed(reason)) if !retried => {
                    tracing::warn!(fen, "Engine crashed during evaluation, retrying: {}", reason);
                    retried = true;
                }
                other => return other,
            }
        }
    }

    /// Broadcast new options. Idle workers are reconfigured now; checked-out
    /// workers pick them up when released. Returns the new generation.
    pub async fn reconfigure(&self, options: EngineOptions) -> u64 {
        let generation = {
            let mut state = self.lock();
            state.options = options;
            state.generation += 1;
            state.generation
        };
        tracing::info!(generation, "Reconfiguring worker pool");

        // Take stale idle workers out one at a time under a permit, so
        // concurrent acquirers never see a missing worker.
        loop {
            let Ok(permit) = self.available.try_acquire() else {
                break;
            };
            let stale = {
                let mut state = self.lock();
                let current = state.generation;
                let position = state.idle.iter().position(|s| s.generation != current);
                position.and_then(|p| state.idle.remove(p))
            };
            permit.forget();
            match stale {
                Some(slot) => {
                    let _ = self.checkin(slot).await;
                }
                None => {
                    self.available.add_permits(1);
                    break;
                }
            }
        }
        generation
    }

    /// Return a worker to the pool.
    ///
    /// Dead workers are replaced before this returns; if the replacement
    /// cannot be spawned the pool runs with one worker fewer and the error
    /// is returned.
    async fn checkin(&self, mut slot: Slot<F::Engine>) -> Result<(), EngineError> {
        let id = slot.engine.id();

        if self.shut_down.load(Ordering::Acquire) {
            slot.engine.shutdown().await;
            self.lock().live -= 1;
            return Ok(());
        }

        if slot.engine.is_healthy() {
            let (generation, options) = {
                let state = self.lock();
                (state.generation, state.options.clone())
            };
            if slot.generation == generation {
                self.push_idle(slot).await;
                return Ok(());
            }
            match slot.engine.configure(&options).await {
                Ok(()) => {
                    slot.generation = generation;
                    self.push_idle(slot).await;
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(worker_id = id, "Pending reconfiguration failed: {}", e);
                }
            }
        }

        tracing::warn!(worker_id = id, "Engine worker died, respawning");
        slot.engine.shutdown().await;
        {
            let mut state = self.lock();
            state.live -= 1;
            state.restarts += 1;
        }

        match self.spawn_worker().await {
            Ok(replacement) => {
                self.push_idle(replacement).await;
                Ok(())
            }
            Err(e) => {
                tracing::error!(worker_id = id, "Failed to respawn engine worker: {}", e);
                Err(EngineError::Unavailable(format!("respawn failed: {e}")))
            }
        }
    }

    /// Spawn workers until the pool is back at full size.
    async fn replenish(&self) {
        while self.below_capacity() {
            match self.spawn_worker().await {
                Ok(slot) => {
                    tracing::info!(worker_id = slot.engine.id(), "Restored pool capacity");
                    self.push_idle(slot).await;
                }
                Err(e) => {
                    tracing::warn!("Pool still below capacity: {}", e);
                    break;
                }
            }
        }
    }

    fn below_capacity(&self) -> bool {
        !self.shut_down.load(Ordering::Acquire) && self.lock().live < self.size
    }

    /// Spawn and configure one worker, reserving its place in `live`.
    async fn spawn_worker(&self) -> Result<Slot<F::Engine>, EngineError> {
        let (id, generation, options) = {
            let mut state = self.lock();
            if state.live >= self.size {
                return Err(EngineError::Unavailable("pool is at capacity".to_string()));
            }
            state.live += 1;
            let id = state.next_id;
            state.next_id += 1;
            (id, state.generation, state.options.clone())
        };

        let spawned = async {
            let mut engine = self.factory.spawn(id).await?;
            if let Err(e) = engine.configure(&options).await {
                engine.shutdown().await;
                return Err(e);
            }
            Ok(engine)
        }
        .await;

        match spawned {
            Ok(engine) => Ok(Slot { engine, generation }),
            Err(e) => {
                self.lock().live -= 1;
                Err(e)
            }
        }
    }

    async fn push_idle(&self, slot: Slot<F::Engine>) {
        let rejected = {
            let mut state = self.lock();
            if self.shut_down.load(Ordering::Acquire) {
                state.live -= 1;
                Some(slot)
            } else {
                state.idle.push_back(slot);
                None
            }
        };
        match rejected {
            Some(slot) => slot.engine.shutdown().await,
            None => self.available.add_permits(1),
        }
    }

    /// Account for a worker whose guard was dropped outside a runtime.
    fn discard(&self) {
        self.lock().live -= 1;
    }

    /// Terminate idle workers and refuse further checkouts. Workers still
    /// checked out are terminated when released. Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.available.close();
        let idle: Vec<Slot<F::Engine>> = {
            let mut state = self.lock();
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.live -= drained.len();
            drained
        };
        tracing::info!(workers = idle.len(), "Shutting down worker pool");
        for slot in idle {
            slot.engine.shutdown().await;
        }
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.lock();
        PoolStatus {
            size: self.size,
            live: state.live,
            idle: state.idle.len(),
            busy: state.live.saturating_sub(state.idle.len()),
            generation: state.generation,
            restarts: state.restarts,
            shut_down: self.shut_down.load(Ordering::Acquire),
        }
    }
}

/// Exclusive handle on one checked-out worker.
///
/// Dropping the guard without [`PooledWorker::release`] schedules the
/// return on the current runtime.
pub struct PooledWorker<F: EngineFactory> {
    id: usize,
    pool: Arc<WorkerPool<F>>,
    slot: Option<Slot<F::Engine>>,
}

impl<F: EngineFactory> PooledWorker<F> {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Configuration generation the worker currently runs.
    pub fn generation(&self) -> Option<u64> {
        self.slot.as_ref().map(|s| s.generation)
    }

    pub async fn evaluate(
        &mut self,
        fen: &str,
        limits: &SearchLimits,
    ) -> Result<EngineEvaluation, EngineError> {
        match self.slot.as_mut() {
            Some(slot) => slot.engine.evaluate(fen, limits).await,
            None => Err(EngineError::Unavailable("worker already released".to_string())),
        }
    }

    /// Hand the worker back, replacing it first if it died.
    pub async fn release(mut self) -> Result<(), EngineError> {
        match self.slot.take() {
            Some(slot) => self.pool.checkin(slot).await,
            None => Ok(()),
        }
    }
}

impl<F: EngineFactory> Drop for PooledWorker<F> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        let pool = Arc::clone(&self.pool);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = pool.checkin(slot).await;
                });
            }
            Err(_) => {
                tracing::warn!(worker_id = self.id, "Worker dropped outside a runtime");
                drop(slot);
                pool.discard();
            }
        }
    }
}
