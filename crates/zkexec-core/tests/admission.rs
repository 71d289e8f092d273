use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc};
use zkexec_core::{
    AdmissionController, AdmissionError, MemoryEnsemble, ProcessRunner, RunnerError,
};
use zkexec_model::{CommandLine, NodeLayout};

const ROOT: &str = "/gate";
const PROC: &str = "/gate/proc";
const LOCK: &str = "/gate/lock";

fn command() -> CommandLine {
    CommandLine::new(vec!["job".to_string(), "--flag".to_string()]).unwrap()
}

fn controller<R: ProcessRunner>(
    ensemble: &MemoryEnsemble,
    runner: R,
) -> AdmissionController<MemoryEnsemble, R> {
    AdmissionController::new(
        ensemble.clone(),
        runner,
        NodeLayout::new(ROOT).unwrap(),
        command(),
    )
}

fn reservations(ensemble: &MemoryEnsemble) -> usize {
    ensemble.children(PROC).map(|c| c.len()).unwrap_or(0)
}

/// Records how many reservations existed while the command ran.
#[derive(Clone)]
struct ProbeRunner {
    ensemble: MemoryEnsemble,
    code: i32,
    seen: Arc<Mutex<Vec<usize>>>,
}

impl ProbeRunner {
    fn new(ensemble: &MemoryEnsemble, code: i32) -> Self {
        Self {
            ensemble: ensemble.clone(),
            code,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn seen(&self) -> Vec<usize> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessRunner for ProbeRunner {
    async fn run(&self, command: &CommandLine) -> Result<i32, RunnerError> {
        assert_eq!(command.program(), "job");
        self.seen.lock().unwrap().push(reservations(&self.ensemble));
        Ok(self.code)
    }
}

/// Reports start, then blocks until the test hands out a permit.
struct HeldRunner {
    started: mpsc::UnboundedSender<()>,
    release: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl ProcessRunner for HeldRunner {
    async fn run(&self, _command: &CommandLine) -> Result<i32, RunnerError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _ = self.started.send(());

        let permit = self
            .release
            .acquire()
            .await
            .map_err(|e| RunnerError::Internal(e.to_string()))?;
        permit.forget();
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(0)
    }
}

struct Held {
    ensemble: MemoryEnsemble,
    started: mpsc::UnboundedReceiver<()>,
    started_tx: mpsc::UnboundedSender<()>,
    release: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Held {
    fn new(ensemble: &MemoryEnsemble) -> Self {
        let (started_tx, started) = mpsc::unbounded_channel();
        Self {
            ensemble: ensemble.clone(),
            started,
            started_tx,
            release: Arc::new(Semaphore::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn runner(&self) -> HeldRunner {
        HeldRunner {
            started: self.started_tx.clone(),
            release: Arc::clone(&self.release),
            active: Arc::clone(&self.active),
            peak: Arc::clone(&self.peak),
        }
    }

    fn spawn(&self) -> tokio::task::JoinHandle<Result<i32, AdmissionError>> {
        let controller = controller(&self.ensemble, self.runner());
        tokio::spawn(async move { controller.run().await })
    }

    async fn expect_start(&mut self) {
        tokio::time::timeout(Duration::from_secs(5), self.started.recv())
            .await
            .expect("an instance should have been admitted")
            .expect("runner channel closed");
    }

    async fn expect_no_start(&mut self) {
        let res = tokio::time::timeout(Duration::from_millis(100), self.started.recv()).await;
        assert!(res.is_err(), "no instance should be admitted yet");
    }
}

async fn join(handle: tokio::task::JoinHandle<Result<i32, AdmissionError>>) -> i32 {
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("controller should finish")
        .expect("controller task panicked")
        .expect("controller failed")
}

#[tokio::test]
async fn admitted_run_releases_its_slot() {
    let ensemble = MemoryEnsemble::new();
    ensemble.create_persistent(ROOT, b"2\n").unwrap();
    let runner = ProbeRunner::new(&ensemble, 7);

    let code = controller(&ensemble, runner.clone()).run().await.unwrap();

    assert_eq!(code, 7);
    assert_eq!(runner.seen(), vec![1]);
    assert_eq!(reservations(&ensemble), 0);
    assert!(!ensemble.exists(LOCK));
    assert_eq!(ensemble.session_count(), 0);
}

#[tokio::test]
async fn missing_root_runs_without_admission() {
    let ensemble = MemoryEnsemble::new();
    let runner = ProbeRunner::new(&ensemble, 3);

    let code = controller(&ensemble, runner.clone()).run().await.unwrap();

    assert_eq!(code, 3);
    assert_eq!(runner.seen(), vec![0]);
    assert!(!ensemble.exists(ROOT));
    assert!(!ensemble.exists(PROC));
    assert_eq!(ensemble.session_count(), 0);
}

#[tokio::test]
async fn unparsable_capacity_runs_without_admission() {
    for data in [&b""[..], b"abc", b"-", b" 2"] {
        let ensemble = MemoryEnsemble::new();
        ensemble.create_persistent(ROOT, data).unwrap();
        let runner = ProbeRunner::new(&ensemble, 0);

        let code = controller(&ensemble, runner.clone()).run().await.unwrap();

        assert_eq!(code, 0);
        assert_eq!(runner.seen(), vec![0], "data {data:?}");
        assert!(!ensemble.exists(PROC));
        assert!(!ensemble.exists(LOCK));
    }
}

#[tokio::test]
async fn fallbacks_do_not_accumulate_state() {
    let ensemble = MemoryEnsemble::new();
    ensemble.create_persistent(ROOT, b"abc").unwrap();

    for _ in 0..3 {
        let runner = ProbeRunner::new(&ensemble, 0);
        controller(&ensemble, runner).run().await.unwrap();
    }
    assert_eq!(ensemble.session_count(), 0);
    assert!(!ensemble.exists(PROC));
}

#[tokio::test]
async fn unavailable_ensemble_runs_without_admission() {
    let ensemble = MemoryEnsemble::new();
    ensemble.create_persistent(ROOT, b"1").unwrap();
    ensemble.set_available(false);
    let runner = ProbeRunner::new(&ensemble, 5);

    let code = controller(&ensemble, runner.clone()).run().await.unwrap();

    assert_eq!(code, 5);
    assert_eq!(runner.seen(), vec![0]);
}

#[tokio::test]
async fn waits_at_capacity_until_a_holder_finishes() {
    let ensemble = MemoryEnsemble::new();
    ensemble.create_persistent(ROOT, b"1").unwrap();
    let mut held = Held::new(&ensemble);

    let first = held.spawn();
    held.expect_start().await;
    assert_eq!(reservations(&ensemble), 1);

    let second = held.spawn();
    held.expect_no_start().await;
    assert_eq!(reservations(&ensemble), 1);
    assert!(!ensemble.exists(LOCK));

    held.release.add_permits(1);
    assert_eq!(join(first).await, 0);
    held.expect_start().await;

    held.release.add_permits(1);
    assert_eq!(join(second).await, 0);
    assert_eq!(held.peak.load(Ordering::SeqCst), 1);
    assert_eq!(reservations(&ensemble), 0);
    assert_eq!(ensemble.session_count(), 0);
}

#[tokio::test]
async fn raising_capacity_wakes_a_waiter() {
    let ensemble = MemoryEnsemble::new();
    ensemble.create_persistent(ROOT, b"1").unwrap();
    let mut held = Held::new(&ensemble);

    let first = held.spawn();
    held.expect_start().await;
    let second = held.spawn();
    held.expect_no_start().await;

    ensemble.set_data(ROOT, b"2").unwrap();
    held.expect_start().await;
    assert_eq!(reservations(&ensemble), 2);

    held.release.add_permits(2);
    assert_eq!(join(first).await, 0);
    assert_eq!(join(second).await, 0);
}

#[tokio::test]
async fn zero_capacity_blocks_until_raised() {
    let ensemble = MemoryEnsemble::new();
    ensemble.create_persistent(ROOT, b"0").unwrap();
    let mut held = Held::new(&ensemble);

    let handle = held.spawn();
    held.expect_no_start().await;
    assert!(ensemble.exists(PROC));
    assert_eq!(reservations(&ensemble), 0);

    ensemble.set_data(ROOT, b"1").unwrap();
    held.expect_start().await;
    held.release.add_permits(1);
    assert_eq!(join(handle).await, 0);
}

#[tokio::test]
async fn negative_capacity_blocks_until_raised() {
    let ensemble = MemoryEnsemble::new();
    ensemble.create_persistent(ROOT, b"-1").unwrap();
    let mut held = Held::new(&ensemble);

    let handle = held.spawn();
    held.expect_no_start().await;
    assert_eq!(reservations(&ensemble), 0);
    assert!(!handle.is_finished());

    ensemble.set_data(ROOT, b"1").unwrap();
    held.expect_start().await;
    held.release.add_permits(1);
    assert_eq!(join(handle).await, 0);
}

#[tokio::test]
async fn expired_session_while_waiting_runs_the_command() {
    let ensemble = MemoryEnsemble::new();
    ensemble.create_persistent(ROOT, b"0").unwrap();
    let runner = ProbeRunner::new(&ensemble, 9);

    let handle = {
        let controller = controller(&ensemble, runner.clone());
        tokio::spawn(async move { controller.run().await })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while !ensemble.exists(PROC) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("instance should reach the wait");
    assert!(runner.seen().is_empty());

    // First and only session opened on this ensemble.
    ensemble.expire(1);

    assert_eq!(join(handle).await, 9);
    assert_eq!(runner.seen(), vec![0]);
    assert_eq!(ensemble.session_count(), 0);
}

#[tokio::test]
async fn three_instances_share_two_slots() {
    let ensemble = MemoryEnsemble::new();
    ensemble.create_persistent(ROOT, b"2").unwrap();
    let mut held = Held::new(&ensemble);

    let handles: Vec<_> = (0..3).map(|_| held.spawn()).collect();
    held.expect_start().await;
    held.expect_start().await;
    held.expect_no_start().await;
    assert_eq!(reservations(&ensemble), 2);

    held.release.add_permits(1);
    held.expect_start().await;
    held.release.add_permits(2);

    for handle in handles {
        assert_eq!(join(handle).await, 0);
    }
    assert_eq!(held.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn invalid_capacity_while_waiting_falls_back() {
    let ensemble = MemoryEnsemble::new();
    ensemble.create_persistent(ROOT, b"1").unwrap();
    let mut held = Held::new(&ensemble);

    let first = held.spawn();
    held.expect_start().await;
    let second = held.spawn();
    held.expect_no_start().await;

    ensemble.set_data(ROOT, b"many").unwrap();
    held.expect_start().await;
    assert_eq!(held.active.load(Ordering::SeqCst), 2);

    held.release.add_permits(2);
    assert_eq!(join(first).await, 0);
    assert_eq!(join(second).await, 0);
    assert_eq!(ensemble.session_count(), 0);
}

#[tokio::test]
async fn lost_connection_while_waiting_falls_back() {
    let ensemble = MemoryEnsemble::new();
    ensemble.create_persistent(ROOT, b"1").unwrap();
    let mut held = Held::new(&ensemble);

    let first = held.spawn();
    held.expect_start().await;
    let second = held.spawn();
    held.expect_no_start().await;

    ensemble.set_available(false);
    ensemble.set_data(ROOT, b"1").unwrap();
    held.expect_start().await;

    held.release.add_permits(2);
    assert_eq!(join(first).await, 0);
    assert_eq!(join(second).await, 0);
}

#[tokio::test]
async fn runner_failure_is_fatal_and_closes_the_session() {
    struct Broken;

    #[async_trait]
    impl ProcessRunner for Broken {
        async fn run(&self, _command: &CommandLine) -> Result<i32, RunnerError> {
            Err(RunnerError::Spawn("no such file".to_string()))
        }
    }

    let ensemble = MemoryEnsemble::new();
    ensemble.create_persistent(ROOT, b"1").unwrap();

    let err = controller(&ensemble, Broken).run().await.unwrap_err();

    assert!(matches!(err, AdmissionError::Runner(RunnerError::Spawn(_))));
    assert_eq!(ensemble.session_count(), 0);
    assert_eq!(reservations(&ensemble), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contention_never_exceeds_capacity() {
    let ensemble = MemoryEnsemble::new();
    ensemble.create_persistent(ROOT, b"3").unwrap();
    let mut held = Held::new(&ensemble);

    let handles: Vec<_> = (0..10).map(|_| held.spawn()).collect();
    for _ in 0..10 {
        held.expect_start().await;
        assert!(held.active.load(Ordering::SeqCst) <= 3);
        held.release.add_permits(1);
    }

    for handle in handles {
        assert_eq!(join(handle).await, 0);
    }
    assert!(held.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(reservations(&ensemble), 0);
    assert_eq!(ensemble.session_count(), 0);
}
