use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProbeError;
use crate::registry::Registry;
use crate::types::{CameraId, CameraRecord};

/// Endpoint of one camera, as seen by a liveness check
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub id: CameraId,
    pub ip_address: String,
    pub port: u16,
}

impl ProbeTarget {
    /// `host:port`, bracketing IPv6 literals
    pub fn authority(&self) -> String {
        if self.ip_address.contains(':') && !self.ip_address.starts_with('[') {
            format!("[{}]:{}", self.ip_address, self.port)
        } else {
            format!("{}:{}", self.ip_address, self.port)
        }
    }
}

impl From<&CameraRecord> for ProbeTarget {
    fn from(record: &CameraRecord) -> Self {
        Self {
            id: record.id,
            ip_address: record.ip_address.clone(),
            port: record.port,
        }
    }
}

/// Reachability check for a single endpoint. The prober bounds every call
/// with its own timeout, so implementations need not.
#[async_trait]
pub trait LivenessCheck: Send + Sync {
    async fn probe(&self, target: &ProbeTarget) -> Result<bool, ProbeError>;
}

/// Reachable means a TCP connection to the camera's port is accepted
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpLivenessCheck;

#[async_trait]
impl LivenessCheck for TcpLivenessCheck {
    async fn probe(&self, target: &ProbeTarget) -> Result<bool, ProbeError> {
        tokio::net::TcpStream::connect(target.authority()).await?;
        Ok(true)
    }
}

/// Coin-flip liveness for demo deployments without real cameras
#[derive(Debug, Clone, Copy)]
pub struct SimulatedLivenessCheck {
    online_probability: f64,
}

impl SimulatedLivenessCheck {
    pub fn new(online_probability: f64) -> Self {
        Self {
            online_probability: online_probability.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl LivenessCheck for SimulatedLivenessCheck {
    async fn probe(&self, _target: &ProbeTarget) -> Result<bool, ProbeError> {
        Ok(rand::thread_rng().gen_bool(self.online_probability))
    }
}

#[derive(Debug, Clone)]
pub struct ProberSettings {
    pub interval: Duration,
    pub timeout: Duration,
    pub max_concurrent_probes: usize,
    /// Consecutive failed probes before a camera is marked offline
    pub offline_after_failures: u32,
}

impl Default for ProberSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            max_concurrent_probes: 64,
            offline_after_failures: 2,
        }
    }
}

/// What happened to one camera during a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Online,
    Offline,
    /// Failed, but below the offline threshold; status left unchanged
    Suspect,
    /// Camera removed while its probe was in flight
    Vanished,
    /// Result arrived after stop was requested
    Discarded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub probed: usize,
    pub online: usize,
    pub offline: usize,
    pub suspect: usize,
    pub vanished: usize,
    pub discarded: usize,
    /// Still being probed from an earlier tick
    pub skipped: usize,
}

impl TickReport {
    fn record(&mut self, outcome: ProbeOutcome) {
        self.probed += 1;
        match outcome {
            ProbeOutcome::Online => self.online += 1,
            ProbeOutcome::Offline => self.offline += 1,
            ProbeOutcome::Suspect => self.suspect += 1,
            ProbeOutcome::Vanished => self.vanished += 1,
            ProbeOutcome::Discarded => self.discarded += 1,
        }
    }
}

/// Periodically probes every registered camera and writes liveness back
/// into the registry.
pub struct Prober {
    registry: Arc<Registry>,
    check: Arc<dyn LivenessCheck>,
    settings: ProberSettings,
    concurrency: Semaphore,
    in_flight: Mutex<HashSet<CameraId>>,
    failures: Mutex<HashMap<CameraId, u32>>,
    cancel: CancellationToken,
    // Results are applied under a read guard; stop() takes the write guard.
    apply_gate: RwLock<()>,
}

impl Prober {
    pub fn new(registry: Arc<Registry>, check: Arc<dyn LivenessCheck>, settings: ProberSettings) -> Self {
        let permits = settings.max_concurrent_probes.max(1);
        Self {
            registry,
            check,
            settings,
            concurrency: Semaphore::new(permits),
            in_flight: Mutex::new(HashSet::new()),
            failures: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            apply_gate: RwLock::new(()),
        }
    }

    /// Start ticking. The first tick fires immediately.
    pub fn start(self: Arc<Self>) -> ProberHandle {
        info!(
            "🩺 Starting liveness prober (interval {:?}, timeout {:?})",
            self.settings.interval, self.settings.timeout
        );
        let prober = self.clone();
        let task = tokio::spawn(async move { prober.run_loop().await });
        ProberHandle { prober: self, task }
    }

    async fn run_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    // Each tick runs detached so a slow one never delays the next.
                    let prober = self.clone();
                    tokio::spawn(async move {
                        let report = prober.run_tick().await;
                        debug!(?report, "liveness tick finished");
                    });
                }
            }
        }

        info!("🛑 Liveness prober stopped");
    }

    /// Probe every camera in the current snapshot once and wait for all
    /// results.
    #[instrument(skip(self))]
    pub async fn run_tick(self: &Arc<Self>) -> TickReport {
        let mut report = TickReport::default();
        if self.is_stopped() {
            return report;
        }

        let cameras = self.registry.list().await;
        self.forget_removed(&cameras).await;

        let mut handles: Vec<(CameraId, JoinHandle<ProbeOutcome>)> = Vec::with_capacity(cameras.len());
        for record in &cameras {
            if !self.in_flight.lock().await.insert(record.id) {
                debug!(camera_id = %record.id, "previous probe still running, skipping");
                report.skipped += 1;
                continue;
            }

            let prober = self.clone();
            let target = ProbeTarget::from(record);
            handles.push((record.id, tokio::spawn(async move { prober.probe_one(target).await })));
        }

        for (id, handle) in handles {
            match handle.await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    error!(camera_id = %id, "Probe task failed: {}", e);
                    self.in_flight.lock().await.remove(&id);
                    report.record(ProbeOutcome::Discarded);
                }
            }
        }

        report
    }

    async fn probe_one(self: Arc<Self>, target: ProbeTarget) -> ProbeOutcome {
        let id = target.id;
        let outcome = match self.reachable(&target).await {
            Some(reachable) => self.apply(id, reachable).await,
            None => ProbeOutcome::Discarded,
        };
        self.in_flight.lock().await.remove(&id);
        outcome
    }

    /// `None` if the prober was stopped before the probe could run.
    async fn reachable(&self, target: &ProbeTarget) -> Option<bool> {
        let _permit = tokio::select! {
            permit = self.concurrency.acquire() => permit.ok()?,
            _ = self.cancel.cancelled() => return None,
        };

        // The check runs in its own task so a panicking implementation
        // counts as a failed probe.
        let check = self.check.clone();
        let probe_target = target.clone();
        let mut task = tokio::spawn(async move { check.probe(&probe_target).await });
        let result = match tokio::time::timeout(self.settings.timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ProbeError::Aborted(e.to_string())),
            Err(_) => {
                task.abort();
                Err(ProbeError::Timeout(self.settings.timeout))
            }
        };

        match result {
            Ok(reachable) => Some(reachable),
            Err(e) => {
                debug!(camera_id = %target.id, endpoint = %target.authority(), error = %e, "probe failed");
                Some(false)
            }
        }
    }

    async fn apply(&self, id: CameraId, reachable: bool) -> ProbeOutcome {
        let _gate = self.apply_gate.read().await;
        if self.is_stopped() {
            return ProbeOutcome::Discarded;
        }

        let next = {
            let mut failures = self.failures.lock().await;
            if reachable {
                failures.remove(&id);
                Some(true)
            } else {
                let count = failures.entry(id).or_insert(0);
                *count = count.saturating_add(1);
                (*count >= self.settings.offline_after_failures).then_some(false)
            }
        };

        let Some(is_online) = next else {
            return ProbeOutcome::Suspect;
        };

        match self.registry.set_liveness(id, is_online).await {
            None => {
                debug!(camera_id = %id, "camera removed during probe, result dropped");
                self.failures.lock().await.remove(&id);
                ProbeOutcome::Vanished
            }
            Some(previous) => {
                if previous != is_online {
                    if is_online {
                        info!(camera_id = %id, "📷 camera is back online");
                    } else {
                        warn!(camera_id = %id, "📴 camera went offline");
                    }
                }
                if is_online {
                    ProbeOutcome::Online
                } else {
                    ProbeOutcome::Offline
                }
            }
        }
    }

    async fn forget_removed(&self, cameras: &[CameraRecord]) {
        let live: HashSet<CameraId> = cameras.iter().map(|c| c.id).collect();
        self.failures.lock().await.retain(|id, _| live.contains(id));
    }

    /// Cancel all future ticks. Once this returns no further liveness
    /// write happens; in-flight probes may still finish but their results
    /// are discarded.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let _barrier = self.apply_gate.write().await;
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Owner of a running prober loop
pub struct ProberHandle {
    prober: Arc<Prober>,
    task: JoinHandle<()>,
}

impl ProberHandle {
    #[cfg(test)]
    pub fn prober(&self) -> &Arc<Prober> {
        &self.prober
    }

    pub async fn stop(self) {
        self.prober.stop().await;
        if let Err(e) = self.task.await {
            error!("Prober loop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use chrono::Duration as ChronoDuration;
    use tokio::sync::{mpsc, Notify};

    use crate::registry::tests::{main_entrance, ManualClock};
    use crate::registry::Clock;
    use crate::types::NewCamera;

    /// Canned per-camera answers; unknown cameras are unreachable
    #[derive(Default)]
    struct StubCheck {
        answers: StdMutex<HashMap<CameraId, bool>>,
    }

    impl StubCheck {
        fn set(&self, id: CameraId, reachable: bool) {
            self.answers.lock().unwrap().insert(id, reachable);
        }
    }

    #[async_trait]
    impl LivenessCheck for StubCheck {
        async fn probe(&self, target: &ProbeTarget) -> Result<bool, ProbeError> {
            Ok(self.answers.lock().unwrap().get(&target.id).copied().unwrap_or(false))
        }
    }

    /// Reports when a probe starts, then waits for permission to answer
    struct GatedCheck {
        started: mpsc::UnboundedSender<CameraId>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl LivenessCheck for GatedCheck {
        async fn probe(&self, target: &ProbeTarget) -> Result<bool, ProbeError> {
            let _ = self.started.send(target.id);
            self.release.notified().await;
            Ok(true)
        }
    }

    /// Hangs on one camera, answers immediately for the rest
    struct HangingCheck {
        hang_on: CameraId,
    }

    #[async_trait]
    impl LivenessCheck for HangingCheck {
        async fn probe(&self, target: &ProbeTarget) -> Result<bool, ProbeError> {
            if target.id == self.hang_on {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(true)
        }
    }

    struct FailingCheck;

    #[async_trait]
    impl LivenessCheck for FailingCheck {
        async fn probe(&self, _target: &ProbeTarget) -> Result<bool, ProbeError> {
            Err(ProbeError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )))
        }
    }

    /// Panics on its first call, reachable afterwards
    #[derive(Default)]
    struct PanicOnceCheck {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LivenessCheck for PanicOnceCheck {
        async fn probe(&self, _target: &ProbeTarget) -> Result<bool, ProbeError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("camera driver crashed");
            }
            Ok(true)
        }
    }

    fn settings(offline_after_failures: u32) -> ProberSettings {
        ProberSettings {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(60),
            max_concurrent_probes: 8,
            offline_after_failures,
        }
    }

    #[tokio::test]
    async fn test_reachable_camera_goes_online() {
        let clock = Arc::new(ManualClock::new());
        let registry = Arc::new(Registry::with_clock(clock.clone()));
        let camera = registry.create(main_entrance()).await.unwrap();
        assert!(!camera.is_online);

        let check = Arc::new(StubCheck::default());
        check.set(camera.id, true);
        let prober = Arc::new(Prober::new(registry.clone(), check, settings(1)));

        clock.advance(ChronoDuration::seconds(30));
        let report = prober.run_tick().await;
        assert_eq!(report.probed, 1);
        assert_eq!(report.online, 1);

        let after = registry.get(camera.id).await.unwrap();
        assert!(after.is_online);
        assert!(after.last_seen > camera.last_seen);
        assert_eq!(after.last_seen, clock.now());

        registry.remove(camera.id).await.unwrap();
        assert!(registry.get(camera.id).await.is_err());
    }

    #[tokio::test]
    async fn test_offline_after_consecutive_failures() {
        let registry = Arc::new(Registry::new());
        let camera = registry.create(main_entrance()).await.unwrap();
        let check = Arc::new(StubCheck::default());
        let prober = Arc::new(Prober::new(registry.clone(), check.clone(), settings(2)));

        check.set(camera.id, true);
        prober.run_tick().await;
        assert!(registry.get(camera.id).await.unwrap().is_online);

        check.set(camera.id, false);
        let report = prober.run_tick().await;
        assert_eq!(report.suspect, 1);
        assert!(registry.get(camera.id).await.unwrap().is_online);

        let report = prober.run_tick().await;
        assert_eq!(report.offline, 1);
        assert!(!registry.get(camera.id).await.unwrap().is_online);

        // a single success recovers and resets the counter
        check.set(camera.id, true);
        prober.run_tick().await;
        check.set(camera.id, false);
        let report = prober.run_tick().await;
        assert_eq!(report.suspect, 1);
        assert!(registry.get(camera.id).await.unwrap().is_online);
    }

    #[tokio::test]
    async fn test_probe_errors_count_as_offline() {
        let registry = Arc::new(Registry::new());
        let camera = registry.create(main_entrance()).await.unwrap();
        registry.set_liveness(camera.id, true).await;

        let prober = Arc::new(Prober::new(registry.clone(), Arc::new(FailingCheck), settings(1)));
        let report = prober.run_tick().await;

        assert_eq!(report.offline, 1);
        assert!(!registry.get(camera.id).await.unwrap().is_online);
    }

    #[tokio::test]
    async fn test_panicking_check_counts_as_failure_and_keeps_probing() {
        let registry = Arc::new(Registry::new());
        let camera = registry.create(main_entrance()).await.unwrap();
        registry.set_liveness(camera.id, true).await;

        let check = Arc::new(PanicOnceCheck::default());
        let prober = Arc::new(Prober::new(registry.clone(), check.clone(), settings(1)));

        let report = prober.run_tick().await;
        assert_eq!(report.offline, 1);
        assert_eq!(report.skipped, 0);
        assert!(!registry.get(camera.id).await.unwrap().is_online);

        let report = prober.run_tick().await;
        assert_eq!(report.online, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(check.calls.load(Ordering::SeqCst), 2);
        assert!(registry.get(camera.id).await.unwrap().is_online);
    }

    #[tokio::test]
    async fn test_hanging_probe_times_out_without_affecting_others() {
        let registry = Arc::new(Registry::new());
        let stuck = registry.create(main_entrance()).await.unwrap();
        let healthy = registry
            .create(NewCamera {
                name: "Parkiran Depan".to_string(),
                ip_address: "192.168.1.101".to_string(),
                ..main_entrance()
            })
            .await
            .unwrap();
        registry.set_liveness(stuck.id, true).await;

        let check = Arc::new(HangingCheck { hang_on: stuck.id });
        let mut quick = settings(1);
        quick.timeout = Duration::from_millis(100);
        let prober = Arc::new(Prober::new(registry.clone(), check, quick));

        let report = tokio::time::timeout(Duration::from_secs(5), prober.run_tick())
            .await
            .expect("tick must be bounded by the probe timeout");

        assert_eq!(report.online, 1);
        assert_eq!(report.offline, 1);
        assert!(!registry.get(stuck.id).await.unwrap().is_online);
        assert!(registry.get(healthy.id).await.unwrap().is_online);
    }

    #[tokio::test]
    async fn test_removed_camera_is_silent_noop() {
        let registry = Arc::new(Registry::new());
        let camera = registry.create(main_entrance()).await.unwrap();

        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let release = Arc::new(Notify::new());
        let check = Arc::new(GatedCheck {
            started: started_tx,
            release: release.clone(),
        });
        let prober = Arc::new(Prober::new(registry.clone(), check, settings(1)));

        let tick = {
            let prober = prober.clone();
            tokio::spawn(async move { prober.run_tick().await })
        };
        assert_eq!(started_rx.recv().await, Some(camera.id));

        registry.remove(camera.id).await.unwrap();
        release.notify_one();

        let report = tick.await.unwrap();
        assert_eq!(report.vanished, 1);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_stop_discards_in_flight_results() {
        let registry = Arc::new(Registry::new());
        let camera = registry.create(main_entrance()).await.unwrap();

        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let release = Arc::new(Notify::new());
        let check = Arc::new(GatedCheck {
            started: started_tx,
            release: release.clone(),
        });
        let prober = Arc::new(Prober::new(registry.clone(), check, settings(1)));

        let tick = {
            let prober = prober.clone();
            tokio::spawn(async move { prober.run_tick().await })
        };
        assert_eq!(started_rx.recv().await, Some(camera.id));

        prober.stop().await;
        assert!(prober.is_stopped());
        release.notify_one();

        let report = tick.await.unwrap();
        assert_eq!(report.discarded, 1);
        assert!(!registry.get(camera.id).await.unwrap().is_online);

        // later ticks are no-ops
        assert_eq!(prober.run_tick().await, TickReport::default());
    }

    #[tokio::test]
    async fn test_slow_camera_skipped_by_overlapping_tick() {
        let registry = Arc::new(Registry::new());
        let camera = registry.create(main_entrance()).await.unwrap();

        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let release = Arc::new(Notify::new());
        let check = Arc::new(GatedCheck {
            started: started_tx,
            release: release.clone(),
        });
        let prober = Arc::new(Prober::new(registry.clone(), check, settings(1)));

        let first = {
            let prober = prober.clone();
            tokio::spawn(async move { prober.run_tick().await })
        };
        assert_eq!(started_rx.recv().await, Some(camera.id));

        let second = prober.run_tick().await;
        assert_eq!(second.skipped, 1);
        assert_eq!(second.probed, 0);

        release.notify_one();
        assert_eq!(first.await.unwrap().online, 1);
    }

    #[tokio::test]
    async fn test_started_loop_probes_and_stops() {
        let registry = Arc::new(Registry::new());
        let camera = registry.create(main_entrance()).await.unwrap();
        let check = Arc::new(StubCheck::default());
        check.set(camera.id, true);

        let handle = Arc::new(Prober::new(registry.clone(), check, settings(1))).start();

        let mut online = false;
        for _ in 0..50 {
            if registry.get(camera.id).await.unwrap().is_online {
                online = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(online, "first tick fires immediately");

        let prober = handle.prober().clone();
        handle.stop().await;
        assert!(prober.is_stopped());
    }

    #[test]
    fn test_authority_brackets_ipv6() {
        let target = ProbeTarget {
            id: CameraId(1),
            ip_address: "fe80::1".to_string(),
            port: 554,
        };
        assert_eq!(target.authority(), "[fe80::1]:554");

        let target = ProbeTarget {
            ip_address: "192.168.1.100".to_string(),
            ..target
        };
        assert_eq!(target.authority(), "192.168.1.100:554");
    }

    #[tokio::test]
    async fn test_simulated_check_extremes() {
        let target = ProbeTarget {
            id: CameraId(1),
            ip_address: "203.45.67.89".to_string(),
            port: 554,
        };
        for _ in 0..20 {
            assert!(SimulatedLivenessCheck::new(1.0).probe(&target).await.unwrap());
            assert!(!SimulatedLivenessCheck::new(0.0).probe(&target).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_tcp_check_against_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let target = ProbeTarget {
            id: CameraId(1),
            ip_address: "127.0.0.1".to_string(),
            port,
        };
        tokio_test::assert_ok!(TcpLivenessCheck.probe(&target).await);

        drop(listener);
        assert!(TcpLivenessCheck.probe(&target).await.is_err());
    }
}
