//! Engine lifecycle state machine
//!
//! Sequences provisioning, native engine construction, and readiness for
//! one engine. Every failure lands in a `Failed` state that is left only by
//! an explicit user-triggered retry; there is no automatic retry because
//! re-downloading a multi-gigabyte model behind the user's back is costly.

use crate::provision::{AssetProvisioner, AssetSpec, ProvisioningProgress};
use crate::{PatterError, Result};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq)]
pub enum EngineState {
    Idle,
    CheckingAssets,
    Downloading(ProvisioningProgress),
    Initializing,
    Ready,
    Failed(String),
}

impl EngineState {
    pub fn is_ready(&self) -> bool {
        matches!(self, EngineState::Ready)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, EngineState::Failed(_))
    }
}

pub type InitFn<E> = Box<dyn Fn() -> BoxFuture<'static, Result<E>> + Send + Sync>;

/// One lifecycle per engine (generation and transcription each own one).
pub struct EngineLifecycle<E> {
    name: &'static str,
    assets: Vec<AssetSpec>,
    provisioner: AssetProvisioner,
    init: InitFn<E>,
    init_timeout: Duration,
    engine: Mutex<Option<E>>,
    state_tx: watch::Sender<EngineState>,
    // Startup attempts are serialized; a reset bumps the epoch so the
    // attempt it supersedes discards its own result.
    run_lock: tokio::sync::Mutex<()>,
    epoch: AtomicU64,
}

impl<E: Clone + Send + 'static> EngineLifecycle<E> {
    pub fn new(
        name: &'static str,
        assets: Vec<AssetSpec>,
        provisioner: AssetProvisioner,
        init: InitFn<E>,
        init_timeout: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(EngineState::Idle);
        Self {
            name,
            assets,
            provisioner,
            init,
            init_timeout,
            engine: Mutex::new(None),
            state_tx,
            run_lock: tokio::sync::Mutex::new(()),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state_tx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    /// The constructed engine, once `Ready`.
    pub fn engine(&self) -> Option<E> {
        self.engine.lock().clone()
    }

    /// Drive `Idle` through provisioning and construction to `Ready`.
    pub async fn start(&self) -> Result<()> {
        if !matches!(self.state(), EngineState::Idle) {
            warn!(engine = self.name, "start ignored: not idle");
            return Ok(());
        }
        self.run().await
    }

    /// User-triggered retry; only leaves `Failed`.
    pub async fn retry(&self) -> Result<()> {
        if !self.state().is_failed() {
            warn!(engine = self.name, "retry ignored: not failed");
            return Ok(());
        }
        self.run().await
    }

    /// Tear down back to `Idle`; the next `start` walks the whole chain
    /// again. A startup attempt still in flight is superseded: it stops
    /// publishing states and its result is discarded.
    pub fn reset(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *self.engine.lock() = None;
        self.set_state(EngineState::Idle);
        info!(engine = self.name, "lifecycle reset");
    }

    async fn run(&self) -> Result<()> {
        let _guard = self.run_lock.lock().await;
        // A queued attempt may find the work already done by the one it
        // waited on
        if !matches!(self.state(), EngineState::Idle | EngineState::Failed(_)) {
            return Ok(());
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let result = self.run_chain(epoch).await;

        if self.superseded(epoch) {
            debug!(engine = self.name, "startup superseded by reset, discarding");
            return Ok(());
        }

        match result {
            Ok(engine) => {
                *self.engine.lock() = Some(engine);
                self.set_state(EngineState::Ready);
                info!(engine = self.name, "engine ready");
                Ok(())
            }
            Err(e) => {
                warn!(engine = self.name, error = %e, "engine startup failed");
                self.set_state(EngineState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn run_chain(&self, epoch: u64) -> Result<E> {
        self.publish(epoch, EngineState::CheckingAssets);

        for spec in &self.assets {
            if self.provisioner.is_present(spec) {
                continue;
            }
            self.publish(
                epoch,
                EngineState::Downloading(ProvisioningProgress::starting(spec)),
            );
            self.provisioner
                .ensure(spec, |progress| {
                    self.publish(epoch, EngineState::Downloading(progress));
                })
                .await?;
            if self.superseded(epoch) {
                return Err(PatterError::EngineInit(format!(
                    "{} startup superseded by reset",
                    self.name
                )));
            }
        }

        self.publish(epoch, EngineState::Initializing);
        match tokio::time::timeout(self.init_timeout, (self.init)()).await {
            Ok(engine) => engine,
            // The abandoned construction may still be outstanding in the
            // native layer; that leak is bounded by process lifetime.
            Err(_) => Err(PatterError::EngineInit(format!(
                "{} engine initialization timed out after {:?}",
                self.name, self.init_timeout
            ))),
        }
    }

    fn superseded(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) != epoch
    }

    /// Store a state on behalf of one startup attempt. A superseded attempt
    /// must not clobber the post-reset state.
    fn publish(&self, epoch: u64, state: EngineState) {
        if !self.superseded(epoch) {
            self.set_state(state);
        }
    }

    fn set_state(&self, state: EngineState) {
        // send_replace stores the state even with no subscriber; a plain
        // send would silently drop it
        self.state_tx.send_replace(state);
    }
}
