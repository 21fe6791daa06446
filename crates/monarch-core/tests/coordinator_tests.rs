//! Coordinator tests against real Unix domain sockets.
//!
//! Each test plays both roles: a "primary" coordinator that wins the endpoint
//! and serves the launch channel, and later launches against the same handle.

#![cfg(unix)]

use async_trait::async_trait;
use monarch_core::{
    CoordinateRequest, Coordinator, CoordinatorOutcome, EndpointId, EndpointListener,
    HostPlatform, InstanceHandle, IpcServer, IpcServerHandle, LaunchDispatcher, LaunchService,
    LocalListener, LocalTransport, MainProcessInfo, ProcessItem, ProcessTreeCollector, ReportSink,
    Result, StartRequest, SystemSnapshot, Transport, WindowInfo,
};
use std::io;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::net::UnixStream;
use tokio::sync::oneshot;

#[derive(Default)]
struct RecordingPrimary {
    starts: Mutex<Vec<StartRequest>>,
    info_calls: Mutex<usize>,
}

#[async_trait]
impl LaunchService for RecordingPrimary {
    async fn main_process_info(&self) -> Result<MainProcessInfo> {
        *self.info_calls.lock().unwrap() += 1;
        Ok(MainProcessInfo {
            main_pid: self.main_process_id(),
            windows: vec![WindowInfo {
                pid: self.main_process_id(),
                title: "Welcome".to_string(),
            }],
        })
    }

    async fn start(&self, request: StartRequest) -> Result<()> {
        self.starts.lock().unwrap().push(request);
        Ok(())
    }
}

/// Single-node tree; the host process table is not needed here.
struct RootOnlyCollector;

#[async_trait]
impl ProcessTreeCollector for RootOnlyCollector {
    async fn collect(&self, root_pid: u32) -> Result<ProcessItem> {
        Ok(ProcessItem {
            pid: root_pid,
            name: "monarch".to_string(),
            cmd: "monarch".to_string(),
            cpu_load_percent: 0.0,
            mem_percent: 0.5,
            children: vec![],
        })
    }
}

#[derive(Default)]
struct BufferSink(Mutex<String>);

impl ReportSink for BufferSink {
    fn emit(&self, report: &str) -> io::Result<()> {
        self.0.lock().unwrap().push_str(report);
        Ok(())
    }
}

fn snapshot() -> SystemSnapshot {
    SystemSnapshot {
        os_type: "Linux".to_string(),
        arch: "x86_64".to_string(),
        os_release: "6.1.0".to_string(),
        cpu_model: "Test CPU".to_string(),
        cpu_speed_mhz: 2400,
        cpu_count: 4,
        total_memory: 8 * 1024 * 1024 * 1024,
        free_memory: 2 * 1024 * 1024 * 1024,
        load_average: Some([0.5, 0.25, 0.1]),
        virtualization_likelihood: 0.0,
        screen_reader: false,
    }
}

fn coordinator(handle: &InstanceHandle) -> Coordinator<LocalTransport> {
    Coordinator::new(
        handle.clone(),
        LocalTransport,
        Arc::new(HostPlatform),
        Arc::new(RootOnlyCollector),
    )
    .with_system_snapshot(snapshot())
}

fn test_handle(dir: &TempDir) -> InstanceHandle {
    InstanceHandle::for_user_data_dir(dir.path(), "0.0.1")
}

/// Become primary on `handle` and serve the launch channel.
async fn start_primary(handle: &InstanceHandle) -> (IpcServerHandle, Arc<RecordingPrimary>) {
    let outcome = coordinator(handle).coordinate(&CoordinateRequest::default()).await;
    let listener = match outcome {
        CoordinatorOutcome::Primary(listener) => listener,
        other => panic!("expected primary, got {:?}", other),
    };
    let primary = Arc::new(RecordingPrimary::default());
    let server = IpcServer::start(listener, Arc::new(LaunchDispatcher::new(primary.clone())));
    (server, primary)
}

#[tokio::test]
async fn test_fresh_handle_returns_primary_bound_to_handle() {
    let dir = TempDir::new().unwrap();
    let handle = test_handle(&dir);

    let outcome = coordinator(&handle).coordinate(&CoordinateRequest::default()).await;

    match outcome {
        CoordinatorOutcome::Primary(listener) => {
            assert_eq!(listener.handle(), &handle);
            assert!(handle.as_path().exists());
        }
        other => panic!("expected primary, got {:?}", other),
    }
}

#[tokio::test]
async fn test_live_primary_receives_forwarded_launch() {
    let dir = TempDir::new().unwrap();
    let handle = test_handle(&dir);
    let (server, primary) = start_primary(&handle).await;

    let request = CoordinateRequest {
        start: StartRequest::new(["--open", "/tmp/x"], [("A", "1")]),
        ..Default::default()
    };
    let outcome = coordinator(&handle).coordinate(&request).await;

    assert!(matches!(outcome, CoordinatorOutcome::ForwardedToExisting));
    assert_eq!(
        *primary.starts.lock().unwrap(),
        vec![StartRequest::new(["--open", "/tmp/x"], [("A", "1")])]
    );

    server.stop().await;
}

#[tokio::test]
async fn test_each_secondary_delivers_its_own_start() {
    let dir = TempDir::new().unwrap();
    let handle = test_handle(&dir);
    let (server, primary) = start_primary(&handle).await;

    for arg in ["one", "two"] {
        let request = CoordinateRequest {
            start: StartRequest::new([arg], Vec::<(String, String)>::new()),
            ..Default::default()
        };
        let outcome = coordinator(&handle).coordinate(&request).await;
        assert!(matches!(outcome, CoordinatorOutcome::ForwardedToExisting));
    }

    let args: Vec<Vec<String>> = primary
        .starts
        .lock()
        .unwrap()
        .iter()
        .map(|s| s.args.clone())
        .collect();
    assert_eq!(args, vec![vec!["one".to_string()], vec!["two".to_string()]]);

    server.stop().await;
}

#[tokio::test]
async fn test_diagnostic_mode_never_sends_start() {
    let dir = TempDir::new().unwrap();
    let handle = test_handle(&dir);
    let (server, primary) = start_primary(&handle).await;
    let sink = Arc::new(BufferSink::default());

    let request = CoordinateRequest {
        start: StartRequest::new(["--status"], Vec::<(String, String)>::new()),
        diagnostic: true,
        ..Default::default()
    };
    let outcome = coordinator(&handle)
        .with_report_sink(sink.clone())
        .coordinate(&request)
        .await;

    assert!(matches!(outcome, CoordinatorOutcome::DiagnosticPrinted));
    assert!(primary.starts.lock().unwrap().is_empty());
    assert_eq!(*primary.info_calls.lock().unwrap(), 1);

    let report = sink.0.lock().unwrap();
    assert!(report.contains("CPU %\tMem MB\t   PID\tProcess\n"));
    assert!(report.contains("monarch main\n"));
    assert!(report.contains("Load (avg):       1, 0, 0\n"));

    server.stop().await;
}

#[tokio::test]
async fn test_stale_socket_is_recovered_once() {
    let dir = TempDir::new().unwrap();
    let handle = test_handle(&dir);
    // a listener that went away without unlinking its socket
    drop(std::os::unix::net::UnixListener::bind(handle.as_path()).unwrap());
    assert!(handle.as_path().exists());

    let outcome = coordinator(&handle).coordinate(&CoordinateRequest::default()).await;

    assert!(matches!(outcome, CoordinatorOutcome::Primary(_)));
}

#[tokio::test]
async fn test_stale_socket_without_retry_fails() {
    let dir = TempDir::new().unwrap();
    let handle = test_handle(&dir);
    drop(std::os::unix::net::UnixListener::bind(handle.as_path()).unwrap());

    let outcome = coordinator(&handle)
        .coordinate_with_retry(&CoordinateRequest::default(), false)
        .await;

    match outcome {
        CoordinatorOutcome::Failed(e) => assert!(e.to_string().contains("nothing is listening")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(handle.as_path().exists());
}

#[tokio::test]
async fn test_stopped_primary_releases_handle() {
    let dir = TempDir::new().unwrap();
    let handle = test_handle(&dir);
    let (server, _primary) = start_primary(&handle).await;

    server.stop().await;

    let outcome = coordinator(&handle).coordinate(&CoordinateRequest::default()).await;
    assert!(matches!(outcome, CoordinatorOutcome::Primary(_)));
}

/// `LocalTransport` whose first stale removal waits until the test lets it
/// continue, so another launch can run in between.
struct GatedTransport {
    paused: Mutex<Option<oneshot::Sender<()>>>,
    resume: tokio::sync::Mutex<Option<oneshot::Receiver<()>>>,
}

impl GatedTransport {
    fn new() -> (Self, oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (paused_tx, paused_rx) = oneshot::channel();
        let (resume_tx, resume_rx) = oneshot::channel();
        let transport = Self {
            paused: Mutex::new(Some(paused_tx)),
            resume: tokio::sync::Mutex::new(Some(resume_rx)),
        };
        (transport, paused_rx, resume_tx)
    }
}

#[async_trait]
impl Transport for GatedTransport {
    type Listener = LocalListener;
    type Stream = UnixStream;

    async fn bind(&self, handle: &InstanceHandle) -> io::Result<LocalListener> {
        LocalTransport.bind(handle).await
    }

    async fn connect(&self, handle: &InstanceHandle) -> io::Result<UnixStream> {
        LocalTransport.connect(handle).await
    }

    async fn identify(&self, handle: &InstanceHandle) -> io::Result<Option<EndpointId>> {
        LocalTransport.identify(handle).await
    }

    async fn remove_stale(&self, handle: &InstanceHandle, expected: EndpointId) -> io::Result<bool> {
        let paused = self.paused.lock().unwrap().take();
        if let Some(paused) = paused {
            let _ = paused.send(());
            if let Some(resume) = self.resume.lock().await.take() {
                let _ = resume.await;
            }
        }
        LocalTransport.remove_stale(handle, expected).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_stale_recovery_yields_one_primary() {
    let dir = TempDir::new().unwrap();
    let handle = test_handle(&dir);
    drop(std::os::unix::net::UnixListener::bind(handle.as_path()).unwrap());
    // a second link keeps the stale inode from being reused by the new socket
    std::fs::hard_link(handle.as_path(), handle.as_path().with_extension("pin")).unwrap();

    // launch A observes the stale socket and stops just before removing it
    let (transport, paused, resume) = GatedTransport::new();
    let slow = Coordinator::new(
        handle.clone(),
        transport,
        Arc::new(HostPlatform),
        Arc::new(RootOnlyCollector),
    )
    .with_system_snapshot(snapshot());
    let slow_request = CoordinateRequest {
        start: StartRequest::new(["from-a"], Vec::<(String, String)>::new()),
        ..Default::default()
    };
    let slow_task = tokio::spawn(async move { slow.coordinate(&slow_request).await });
    paused.await.unwrap();

    // launch B removes the same stale socket and becomes primary
    let (server, primary) = start_primary(&handle).await;

    resume.send(()).unwrap();
    let slow_outcome = slow_task.await.unwrap();

    assert!(
        matches!(slow_outcome, CoordinatorOutcome::ForwardedToExisting),
        "second launch must hand off, got {:?}",
        slow_outcome
    );
    assert!(handle.as_path().exists());
    let args: Vec<Vec<String>> = primary
        .starts
        .lock()
        .unwrap()
        .iter()
        .map(|s| s.args.clone())
        .collect();
    assert_eq!(args, vec![vec!["from-a".to_string()]]);

    server.stop().await;
}
