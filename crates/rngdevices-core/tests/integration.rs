//! Integration tests for rngdevices-core.
//!
//! These exercise the full request path:
//! registry → device → serializer worker → source, plus the async gateway's
//! cancellation behaviour against instrumented fake devices.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rand::RngCore;
use rngdevices_core::{
    CancelToken, Device, EntropySource, ErrorKind, HandleState, Registry, Result, RngConfig,
    SourceInfo, SourceKind,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ─── Instrumented fake device ──────────────────────────────────────────────

static FAKE_INFO: SourceInfo = SourceInfo {
    name: "fake",
    description: "instrumented fake device",
    kind: SourceKind::Software,
};

/// Concurrency bookkeeping shared between fakes.
#[derive(Default)]
struct Tracker {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

struct FakeDevice {
    latency: Duration,
    /// Hold each read open until another read is in flight (bounded wait).
    wait_for_peer: bool,
    tracker: Arc<Tracker>,
    reads: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl FakeDevice {
    fn new(latency_ms: u64) -> Arc<Self> {
        Self::tracked(latency_ms, Arc::new(Tracker::default()), false)
    }

    fn tracked(latency_ms: u64, tracker: Arc<Tracker>, wait_for_peer: bool) -> Arc<Self> {
        Arc::new(Self {
            latency: Duration::from_millis(latency_ms),
            wait_for_peer,
            tracker,
            reads: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        })
    }

    fn device(self: &Arc<Self>) -> Device {
        let source: Arc<dyn EntropySource> = self.clone();
        Device::new(source, &RngConfig::default())
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl EntropySource for FakeDevice {
    fn info(&self) -> &SourceInfo {
        &FAKE_INFO
    }

    fn probe(&self) -> bool {
        true
    }

    fn raw_read(&self, n_bytes: usize) -> Result<Vec<u8>> {
        let now = self.tracker.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.tracker.peak.fetch_max(now, Ordering::SeqCst);
        if self.wait_for_peer {
            let deadline = Instant::now() + Duration::from_secs(2);
            while self.tracker.peak.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
        } else {
            std::thread::sleep(self.latency);
        }
        let mut buf = vec![0u8; n_bytes];
        rand::rng().fill_bytes(&mut buf);
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.tracker.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(buf)
    }

    fn shutdown(&self) -> Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Poll `cond` for up to two seconds.
fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

// ─── Software source scenarios ─────────────────────────────────────────────

#[test]
fn software_get_bytes_returns_requested_length() {
    init_logging();
    let registry = Registry::default();
    let device = registry.device(SourceKind::Software);
    assert!(device.is_device_available());
    for n in [1, 32, 1000] {
        assert_eq!(device.get_bytes(n).unwrap().len(), n);
    }
    registry.close_all().unwrap();
}

#[test]
fn get_bits_rounds_up_to_whole_bytes() {
    let registry = Registry::default();
    let device = registry.device(SourceKind::Software);
    assert_eq!(device.get_bits(5).unwrap().len(), 1);
    assert_eq!(device.get_bits(9).unwrap().len(), 2);
}

#[test]
fn get_exact_bits_rejects_unaligned_counts() {
    let fake = FakeDevice::new(0);
    let device = fake.device();
    assert_eq!(device.get_exact_bits(12).unwrap_err().kind(), ErrorKind::InvalidArgument);
    assert_eq!(device.get_exact_bits(0).unwrap_err().kind(), ErrorKind::InvalidArgument);
    assert_eq!(fake.reads(), 0);
    assert_eq!(device.get_exact_bits(16).unwrap().len(), 2);
}

#[test]
fn random_int_is_uniform_over_100k_draws() {
    let registry = Registry::default();
    let device = registry.device(SourceKind::Software);
    let mut counts = [0u64; 100];
    let mut values = Vec::with_capacity(100_000);
    for _ in 0..100_000 {
        let v = device.random_int(0, 100).unwrap();
        assert!((0..100).contains(&v), "out of range: {v}");
        counts[v as usize] += 1;
        values.push(v);
    }

    let chi = rngdevices_tests::chi_square_uniform(&counts);
    assert!(chi.p_value.unwrap() > 1e-4, "{chi}");

    let mean = rngdevices_tests::mean_within(&values, 49.5, rngdevices_tests::uniform_variance(100));
    assert!(mean.p_value.unwrap() > 1e-4, "{mean}");
}

#[test]
fn random_int_handles_negative_and_wide_ranges() {
    let device = Registry::default().device(SourceKind::Software);
    for _ in 0..1000 {
        let v = device.random_int(-5, 5).unwrap();
        assert!((-5..5).contains(&v));
    }
    let v = device.random_int(i64::MIN, i64::MAX).unwrap();
    assert!(v < i64::MAX);
    assert_eq!(device.random_int(7, 8).unwrap(), 7);
    assert_eq!(device.random_int(3, 3).unwrap_err().kind(), ErrorKind::InvalidArgument);
}

#[test]
fn software_stream_passes_battery() {
    let device = Registry::default().device(SourceKind::Software);
    let data = device.get_bytes(20_000).unwrap();
    let results = rngdevices_tests::run_all_tests(&data);
    let passed = results.iter().filter(|r| r.passed).count();
    assert!(passed >= 2, "{results:#?}");
}

// ─── Serialization ─────────────────────────────────────────────────────────

#[test]
fn same_device_reads_never_overlap() {
    init_logging();
    let fake = FakeDevice::new(2);
    let device = Arc::new(fake.device());
    let threads: Vec<_> = (0..4)
        .map(|_| {
            let device = Arc::clone(&device);
            std::thread::spawn(move || {
                for _ in 0..10 {
                    assert_eq!(device.get_bytes(16).unwrap().len(), 16);
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(fake.reads(), 40);
    assert_eq!(fake.tracker.peak.load(Ordering::SeqCst), 1);
}

#[test]
fn distinct_devices_read_concurrently() {
    let tracker = Arc::new(Tracker::default());
    let a = FakeDevice::tracked(0, Arc::clone(&tracker), true);
    let b = FakeDevice::tracked(0, Arc::clone(&tracker), true);
    let (da, db) = (a.device(), b.device());
    std::thread::scope(|s| {
        s.spawn(|| da.get_bytes(8).unwrap());
        s.spawn(|| db.get_bytes(8).unwrap());
    });
    assert_eq!(tracker.peak.load(Ordering::SeqCst), 2);
}

#[test]
fn failed_device_is_unavailable_not_fatal() {
    let mut config = RngConfig::default();
    config.bitbabbler.stream_path = "/nonexistent/bitbabbler-stream".into();
    config.bitbabbler.folds = 1;
    let registry = Registry::new(config);
    let device = registry.device(SourceKind::BitBabbler);
    let err = device.get_bytes(4).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
    assert_eq!(device.state(), HandleState::Closed);
    // Other devices are unaffected.
    assert_eq!(registry.device(SourceKind::Software).get_bytes(4).unwrap().len(), 4);
}

// ─── Cancellation ──────────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_before_start_has_no_side_effects() {
    let fake = FakeDevice::new(0);
    let device = fake.device();
    let token = CancelToken::new();
    token.cancel();
    let err = device.get_bytes_async(32, &token).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(fake.reads(), 0);
    assert_eq!(fake.shutdowns(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_while_queued_withdraws_request() {
    let fake = FakeDevice::new(200);
    let device = Arc::new(fake.device());

    let first = {
        let device = Arc::clone(&device);
        tokio::spawn(async move { device.get_bytes_async(4, &CancelToken::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let token = CancelToken::new();
    let second = {
        let device = Arc::clone(&device);
        let token = token.clone();
        tokio::spawn(async move { device.get_bytes_async(4, &token).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    assert!(second.await.unwrap().unwrap_err().is_cancelled());
    assert_eq!(first.await.unwrap().unwrap().len(), 4);
    device.close_async().await.unwrap();
    assert_eq!(fake.reads(), 1);
    // Only the explicit close; the withdrawn request never reached the device.
    assert_eq!(fake.shutdowns(), 1);
}

#[tokio::test]
async fn cancel_after_start_reads_once_then_shuts_down() {
    let fake = FakeDevice::new(200);
    let device = fake.device();
    let token = CancelToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });
    let err = device.get_bytes_async(64, &token).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(fake.reads(), 1);
    assert_eq!(fake.shutdowns(), 1);
    assert_eq!(device.state(), HandleState::Closed);
}

#[tokio::test]
async fn large_slow_read_cancelled_after_10ms() {
    init_logging();
    let fake = FakeDevice::new(500);
    let device = fake.device();
    let token = CancelToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });
    let started = Instant::now();
    let err = device.get_bytes_async(1_000_000, &token).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    // The read runs to completion before cleanup.
    assert!(started.elapsed() >= Duration::from_millis(450));
    assert_eq!(fake.reads(), 1);
    assert_eq!(fake.shutdowns(), 1);
    assert_eq!(device.state(), HandleState::Closed);
}

#[tokio::test]
async fn dropping_future_triggers_deferred_cleanup() {
    let fake = FakeDevice::new(100);
    let device = fake.device();
    let token = CancelToken::new();
    let timed_out =
        tokio::time::timeout(Duration::from_millis(10), device.get_bytes_async(16, &token)).await;
    assert!(timed_out.is_err());
    let watched = Arc::clone(&fake);
    let cleaned = tokio::task::spawn_blocking(move || eventually(|| watched.shutdowns() == 1))
        .await
        .unwrap();
    assert!(cleaned);
    assert_eq!(fake.reads(), 1);
}

#[tokio::test]
async fn random_int_async_matches_sync_contract() {
    let registry = Registry::default();
    let device = registry.device(SourceKind::Software);
    let token = CancelToken::new();
    for _ in 0..1000 {
        let v = device.random_int_async(-10, 10, &token).await.unwrap();
        assert!((-10..10).contains(&v));
    }
    registry.close_all_async().await.unwrap();
    assert_eq!(device.state(), HandleState::Closed);
}

// ─── Configuration ─────────────────────────────────────────────────────────

#[test]
fn registry_from_config_file() {
    use std::io::Write;

    let mut stream = tempfile::NamedTempFile::new().unwrap();
    stream.write_all(&[0xAA; 64]).unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"bitbabbler": {{"stream_path": {:?}, "folds": 1}}}}"#,
        stream.path().display().to_string()
    )
    .unwrap();

    let config = RngConfig::from_path(file.path()).unwrap();
    let registry = Registry::new(config);
    let device = registry.device(SourceKind::BitBabbler);
    // 0xAA ^ 0xAA after one fold.
    assert_eq!(device.get_bytes(8).unwrap(), vec![0; 8]);
    registry.close_all().unwrap();
}
