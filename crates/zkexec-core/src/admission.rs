//! Cluster-wide admission control for a single command.
//!
//! A command is admitted when fewer than `capacity` reservation nodes exist
//! under `R/proc`. The check-and-reserve sequence is serialized through the
//! ephemeral `R/lock` node; the lock is released right after the decision, so
//! it never spans a wait cycle or the command run. A reservation lives as long
//! as the session: closing the session after the run is the release.
//!
//! ```text
//! FetchCapacity ──► AcquireLock ──► HoldingLock ──► Admitted ──► Terminated
//!       │               │   ▲            │
//!       │               ▼   │            ▼
//!       │            Waiting ◄───────────┘
//!       ▼               │
//!  FallingBack ◄────────┘ ──► Terminated
//! ```
//!
//! Waiters are not ordered. Whoever sees free capacity first wins.
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};
use zkexec_model::{Capacity, CapacityError, CommandLine, CreateMode, NodeLayout};

use crate::{
    coord::{Connect, CoordinationClient},
    error::{AdmissionError, CoordError, CoordResult},
    queue::EventQueue,
    runner::ProcessRunner,
};

/// Why the command runs without admission control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// The control node is missing or holds no valid capacity.
    Configuration(CapacityError),
    /// The coordination service failed underneath us.
    Coordination(CoordError),
}

/// Position of a controller in the admission state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Read capacity and ACL from the control node, arming a data watch.
    FetchCapacity,
    /// Try to create the lock node if the last known membership leaves room.
    AcquireLock,
    /// Lock held: count reservations, maybe reserve, always release the lock.
    HoldingLock,
    /// Block until capacity, membership or the lock changes, or the session dies.
    Waiting,
    /// A reservation node exists for this session.
    Admitted { reservation: String },
    FallingBack(FallbackReason),
    Terminated { exit_code: i32 },
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::FetchCapacity => "fetch_capacity",
            Phase::AcquireLock => "acquire_lock",
            Phase::HoldingLock => "holding_lock",
            Phase::Waiting => "waiting",
            Phase::Admitted { .. } => "admitted",
            Phase::FallingBack(_) => "falling_back",
            Phase::Terminated { .. } => "terminated",
        }
    }
}

/// Coordination half of the state machine, bound to one open session.
///
/// Drives every transition up to `Admitted` or `FallingBack`; running the
/// command is left to [`AdmissionController`].
pub struct Reconciler<K: CoordinationClient> {
    client: K,
    events: Arc<EventQueue>,
    layout: NodeLayout,
    capacity: Option<Capacity>,
    acl: Vec<K::Acl>,
    /// Reservation count seen by the last children read, `None` before the first one.
    running: Option<usize>,
}

impl<K: CoordinationClient> Reconciler<K> {
    pub fn new(client: K, events: Arc<EventQueue>, layout: NodeLayout) -> Self {
        Self {
            client,
            events,
            layout,
            capacity: None,
            acl: Vec::new(),
            running: None,
        }
    }

    pub fn capacity(&self) -> Option<Capacity> {
        self.capacity
    }

    pub fn running(&self) -> Option<usize> {
        self.running
    }

    /// Perform one transition.
    ///
    /// `Admitted`, `FallingBack` and `Terminated` are returned unchanged.
    /// An `Err` is a coordination failure the caller must turn into a fallback.
    pub async fn step(&mut self, phase: Phase) -> CoordResult<Phase> {
        match phase {
            Phase::FetchCapacity => self.on_fetch_capacity().await,
            Phase::AcquireLock => self.on_acquire_lock().await,
            Phase::HoldingLock => self.on_holding_lock().await,
            Phase::Waiting => self.on_waiting().await,
            other => Ok(other),
        }
    }

    /// Close the session, logging instead of failing.
    pub async fn close_quietly(&self) {
        if let Err(e) = self.client.close().await {
            warn!(target: "zkexec.admission", error = %e, "closing session failed");
        }
    }

    async fn on_fetch_capacity(&mut self) -> CoordResult<Phase> {
        match self.fetch_capacity().await? {
            Ok(capacity) => {
                self.capacity = Some(capacity);
                Ok(Phase::AcquireLock)
            }
            Err(e) => Ok(Phase::FallingBack(FallbackReason::Configuration(e))),
        }
    }

    async fn on_acquire_lock(&mut self) -> CoordResult<Phase> {
        let Some(capacity) = self.capacity else {
            return Ok(Phase::FetchCapacity);
        };
        if let Some(running) = self.running
            && !capacity.admits(running)
        {
            debug!(target: "zkexec.admission", running, %capacity, "no free slot");
            return Ok(Phase::Waiting);
        }

        let lock = self.layout.lock();
        info!(target: "zkexec.admission", path = lock, "creating ephemeral znode");
        match self
            .client
            .create(lock, &[], &self.acl, CreateMode::Ephemeral)
            .await
        {
            Ok(_) => Ok(Phase::HoldingLock),
            Err(CoordError::NodeExists) => {
                warn!(target: "zkexec.admission", path = lock, "lock held by another instance");
                // Watch the holder's lock so its release wakes us up.
                match self.client.get_data(lock, true).await {
                    Ok(_) => Ok(Phase::Waiting),
                    Err(CoordError::NoNode) => Ok(Phase::AcquireLock),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn on_holding_lock(&mut self) -> CoordResult<Phase> {
        let Some(capacity) = self.capacity else {
            self.release_lock().await?;
            return Ok(Phase::FetchCapacity);
        };

        let reserved = self.reserve(capacity).await;
        let released = self.release_lock().await;
        let reservation = reserved?;
        released?;

        Ok(match reservation {
            Some(reservation) => Phase::Admitted { reservation },
            None => Phase::Waiting,
        })
    }

    async fn on_waiting(&mut self) -> CoordResult<Phase> {
        let wake = self.events.wait_for(&self.layout).await;
        if wake.session_lost {
            warn!(target: "zkexec.admission", "session lost while waiting");
            return Err(CoordError::SessionExpired);
        }

        if wake.capacity_changed {
            info!(target: "zkexec.admission", path = self.layout.root(), "detected data change");
            match self.fetch_capacity().await? {
                Ok(capacity) => self.capacity = Some(capacity),
                Err(e) => return Ok(Phase::FallingBack(FallbackReason::Configuration(e))),
            }
        }
        if wake.membership_changed {
            info!(target: "zkexec.admission", path = self.layout.proc(), "detected children change");
        }
        if wake.lock_released {
            info!(target: "zkexec.admission", path = self.layout.lock(), "detected lock release");
        }

        self.running = Some(self.read_children().await?.len());
        Ok(Phase::AcquireLock)
    }

    /// Read ACL and capacity of the control node and re-arm its data watch.
    async fn fetch_capacity(&mut self) -> CoordResult<Result<Capacity, CapacityError>> {
        let root = self.layout.root();

        debug!(target: "zkexec.admission", path = root, "getting acl");
        let acl = match self.client.get_acl(root).await {
            Ok(acl) => acl,
            Err(CoordError::NoNode) => return Ok(Err(CapacityError::Missing(root.to_string()))),
            Err(e) => return Err(e),
        };

        debug!(target: "zkexec.admission", path = root, "getting data");
        let data = match self.client.get_data(root, true).await {
            Ok(data) => data,
            Err(CoordError::NoNode) => return Ok(Err(CapacityError::Missing(root.to_string()))),
            Err(e) => return Err(e),
        };
        self.acl = acl;

        let capacity = Capacity::parse(root, &data);
        if let Ok(capacity) = capacity {
            info!(target: "zkexec.admission", %capacity, "capacity");
        }
        Ok(capacity)
    }

    /// List reservations with a children watch, creating the container on demand.
    async fn read_children(&self) -> CoordResult<Vec<String>> {
        let proc = self.layout.proc();
        loop {
            debug!(target: "zkexec.admission", path = proc, "getting children");
            match self.client.get_children(proc, true).await {
                Ok(children) => {
                    debug!(target: "zkexec.admission", path = proc, ?children, "children");
                    return Ok(children);
                }
                Err(CoordError::NoNode) => {
                    info!(target: "zkexec.admission", path = proc, "creating persistent znode");
                    match self
                        .client
                        .create(proc, &[], &self.acl, CreateMode::Persistent)
                        .await
                    {
                        Ok(_) | Err(CoordError::NodeExists) => {}
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn reserve(&mut self, capacity: Capacity) -> CoordResult<Option<String>> {
        let running = self.read_children().await?.len();
        self.running = Some(running);
        if !capacity.admits(running) {
            debug!(target: "zkexec.admission", running, %capacity, "no free slot under lock");
            return Ok(None);
        }

        let prefix = self.layout.process_prefix();
        info!(target: "zkexec.admission", path = prefix, "creating ephemeral sequential znode");
        let reservation = self
            .client
            .create(prefix, &[], &self.acl, CreateMode::EphemeralSequential)
            .await?;
        self.running = Some(running + 1);
        info!(target: "zkexec.admission", path = %reservation, "created znode");
        Ok(Some(reservation))
    }

    async fn release_lock(&self) -> CoordResult<()> {
        let lock = self.layout.lock();
        info!(target: "zkexec.admission", path = lock, "deleting znode");
        match self.client.delete(lock, None).await {
            Ok(()) => Ok(()),
            Err(CoordError::NoNode) => {
                warn!(target: "zkexec.admission", path = lock, "lock vanished before release");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Runs a command once a cluster-wide slot is granted, or unconditionally
/// when admission control is unavailable.
pub struct AdmissionController<C, R> {
    connector: C,
    runner: R,
    layout: NodeLayout,
    command: CommandLine,
}

impl<C, R> AdmissionController<C, R>
where
    C: Connect,
    R: ProcessRunner,
{
    pub fn new(connector: C, runner: R, layout: NodeLayout, command: CommandLine) -> Self {
        Self {
            connector,
            runner,
            layout,
            command,
        }
    }

    /// Returns the command's exit code.
    ///
    /// `Err` only when the command itself could not be run; coordination
    /// problems fall back to running the command without admission control.
    #[instrument(level = "debug", skip(self), fields(root = self.layout.root()))]
    pub async fn run(&self) -> Result<i32, AdmissionError> {
        let events = Arc::new(EventQueue::new());
        let client = match self.connector.connect(Arc::clone(&events)).await {
            Ok(client) => client,
            Err(e) => {
                self.report(&FallbackReason::Coordination(e));
                return self.execute().await;
            }
        };

        let mut reconciler = Reconciler::new(client, events, self.layout.clone());
        let mut phase = Phase::FetchCapacity;
        loop {
            debug!(target: "zkexec.admission", phase = phase.as_str(), "transition");
            phase = match phase {
                Phase::Admitted { reservation } => {
                    debug!(target: "zkexec.admission", %reservation, "slot granted");
                    let status = self.execute().await;
                    reconciler.close_quietly().await;
                    Phase::Terminated { exit_code: status? }
                }
                Phase::FallingBack(reason) => {
                    self.report(&reason);
                    reconciler.close_quietly().await;
                    Phase::Terminated {
                        exit_code: self.execute().await?,
                    }
                }
                Phase::Terminated { exit_code } => return Ok(exit_code),
                phase => reconciler
                    .step(phase)
                    .await
                    .unwrap_or_else(|e| Phase::FallingBack(FallbackReason::Coordination(e))),
            };
        }
    }

    async fn execute(&self) -> Result<i32, AdmissionError> {
        info!(target: "zkexec.admission", command = %self.command, "running");
        let code = self.runner.run(&self.command).await?;
        debug!(target: "zkexec.admission", code, "command finished");
        Ok(code)
    }

    fn report(&self, reason: &FallbackReason) {
        match reason {
            FallbackReason::Configuration(e) => {
                error!(target: "zkexec.admission", "{e}");
            }
            FallbackReason::Coordination(e) => {
                error!(target: "zkexec.admission", label = e.as_label(), "{e}");
            }
        }
    }
}
