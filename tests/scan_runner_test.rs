//! Integration tests for the scan acquisition state machine.
//!
//! All tests run against the mock drivers with zero delays unless a test
//! needs time to observe an intermediate state.

use nfs_scanner::hardware::mock::{MockInstrument, MockMotion};
use nfs_scanner::scan::{
    JsonTaskLedger, ScanEvent, ScanJob, ScanParams, ScanRunner, ScanState, TaskDir, TaskLedger,
    TaskStatus, TraceInfo,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::time::timeout;

fn area(x_max: f64, y_max: f64) -> ScanParams {
    ScanParams {
        x_min: 0.0,
        x_max,
        y_min: 0.0,
        y_max,
        step: 1.0,
        ..Default::default()
    }
}

fn t1() -> Vec<TraceInfo> {
    vec![TraceInfo::new("T1")]
}

fn finished(events: &[ScanEvent]) -> (bool, String) {
    let finals: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::Finished { ok, message, .. } => Some((*ok, message.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(finals.len(), 1, "exactly one Finished event");
    assert!(matches!(events.last(), Some(ScanEvent::Finished { .. })));
    finals[0].clone()
}

fn statuses(events: &[ScanEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::Status(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_end_to_end_constant_trace() {
    let scans = tempdir().unwrap();
    let motion = Arc::new(MockMotion::instant());
    let instrument = Arc::new(MockInstrument::constant(t1(), 5.0));
    let job = ScanJob::new(area(2.0, 2.0), t1(), scans.path()).with_task_id("e2e");

    let handle = ScanRunner::new(job, motion.clone(), instrument.clone()).spawn(64);
    let (events, outcome) = handle.finish().await.unwrap();

    assert!(outcome.ok, "{}", outcome.message);
    assert_eq!(finished(&events), (true, "OK".to_string()));
    assert_eq!(
        statuses(&events),
        vec!["Connecting drivers...", "Homing...", "Scanning...", "Saving..."]
    );

    let dir = TaskDir::open(scans.path(), "e2e").unwrap();
    assert!(dir.is_complete());
    let manifest = dir.read_manifest().unwrap();
    assert_eq!(manifest.trace_names().collect::<Vec<_>>(), vec!["T1"]);
    assert_eq!(manifest.params, area(2.0, 2.0));

    let grid = dir.trace_store().unwrap().load("T1").unwrap();
    assert_eq!(grid.xs, vec![0.0, 1.0, 2.0]);
    assert_eq!(grid.ys, vec![0.0, 1.0, 2.0]);
    assert_eq!(grid.shape(), [3, 3, 1]);
    assert!(grid.values().iter().all(|&v| v == 5.0));
    assert_eq!(grid.unit, "dB");

    // Row-major sweep, y outer.
    let moves = motion.moves();
    assert_eq!(moves.len(), 9);
    assert_eq!(moves[0][..2], [0.0, 0.0]);
    assert_eq!(moves[1][..2], [1.0, 0.0]);
    assert_eq!(moves[3][..2], [0.0, 1.0]);
    assert_eq!(instrument.counts().disconnect.load(Ordering::SeqCst), 1);
    assert_eq!(motion.counts().disconnect.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_progress_cadence() {
    let scans = tempdir().unwrap();
    // 4 x 3 = 12 points
    let job = ScanJob::new(area(3.0, 2.0), t1(), scans.path());
    let handle = ScanRunner::new(
        job,
        Arc::new(MockMotion::instant()),
        Arc::new(MockInstrument::constant(t1(), 1.0)),
    )
    .spawn(64);
    let (events, _) = handle.finish().await.unwrap();

    let progress: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::Progress { done, total } => Some((*done, *total)),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![(5, 12), (10, 12), (12, 12)]);
}

#[tokio::test]
async fn test_stop_before_any_move() {
    let scans = tempdir().unwrap();
    let motion = Arc::new(MockMotion::instant());
    let instrument = Arc::new(MockInstrument::constant(t1(), 5.0));
    let job = ScanJob::new(area(2.0, 2.0), t1(), scans.path()).with_task_id("stopped");

    let runner = ScanRunner::new(job, motion.clone(), instrument.clone());
    runner.control().request_stop();
    let handle = runner.spawn(64);
    let control = handle.control.clone();
    let (events, outcome) = handle.finish().await.unwrap();

    assert!(!outcome.ok);
    assert_eq!(finished(&events), (false, "User stopped".to_string()));
    assert_eq!(control.state(), ScanState::Finished { ok: false });
    assert!(motion.moves().is_empty());
    assert_eq!(motion.counts().home.load(Ordering::SeqCst), 0);
    assert_eq!(motion.counts().disconnect.load(Ordering::SeqCst), 1);
    assert_eq!(instrument.counts().disconnect.load(Ordering::SeqCst), 1);
    assert!(!TaskDir::locate(scans.path(), "stopped").is_complete());
}

#[tokio::test]
async fn test_pause_blocks_motion_until_resumed() {
    let scans = tempdir().unwrap();
    let motion = Arc::new(MockMotion::instant());
    let job = ScanJob::new(area(1.0, 1.0), t1(), scans.path());
    let runner = ScanRunner::new(job, motion.clone(), Arc::new(MockInstrument::constant(t1(), 2.0)))
        .with_pause_poll(Duration::from_millis(5));
    runner.control().request_pause(true);
    let mut handle = runner.spawn(256);

    // Wait for two heartbeats so the run is known to be parked.
    let mut paused_seen = 0;
    while paused_seen < 2 {
        let event = timeout(Duration::from_secs(5), handle.events.recv())
            .await
            .expect("runner stalled")
            .expect("channel closed early");
        if event == ScanEvent::Status("Paused".to_string()) {
            paused_seen += 1;
        }
    }
    assert_eq!(handle.control.state(), ScanState::Paused);
    assert!(motion.moves().is_empty());

    handle.control.request_pause(false);
    let (_, outcome) = handle.finish().await.unwrap();
    assert!(outcome.ok, "{}", outcome.message);
    assert_eq!(motion.moves().len(), 4);
}

#[tokio::test]
async fn test_stop_while_paused() {
    let scans = tempdir().unwrap();
    let motion = Arc::new(MockMotion::instant());
    let job = ScanJob::new(area(1.0, 1.0), t1(), scans.path());
    let runner = ScanRunner::new(job, motion.clone(), Arc::new(MockInstrument::constant(t1(), 2.0)))
        .with_pause_poll(Duration::from_millis(5));
    runner.control().request_pause(true);
    let mut handle = runner.spawn(256);

    loop {
        let event = timeout(Duration::from_secs(5), handle.events.recv())
            .await
            .expect("runner stalled")
            .expect("channel closed early");
        if event == ScanEvent::Status("Paused".to_string()) {
            break;
        }
    }
    handle.control.request_stop();
    let outcome = handle.wait().await.unwrap();

    assert!(!outcome.ok);
    assert_eq!(outcome.message, "User stopped");
    assert!(motion.moves().is_empty());
}

#[tokio::test]
async fn test_driver_failure_still_disconnects() {
    let scans = tempdir().unwrap();
    let motion = Arc::new(MockMotion::instant().failing_on_move(3));
    let instrument = Arc::new(MockInstrument::constant(t1(), 1.0));
    let ledger = Arc::new(JsonTaskLedger::open(scans.path().join("tasks.json")).unwrap());
    let job = ScanJob::new(area(2.0, 2.0), t1(), scans.path()).with_task_id("broken");

    let handle = ScanRunner::new(job, motion.clone(), instrument.clone())
        .with_ledger(ledger.clone())
        .spawn(64);
    let (events, outcome) = handle.finish().await.unwrap();

    assert!(!outcome.ok);
    let (_, message) = finished(&events);
    assert!(message.contains("move_to"), "{message}");
    assert_eq!(motion.counts().disconnect.load(Ordering::SeqCst), 1);
    assert_eq!(instrument.counts().disconnect.load(Ordering::SeqCst), 1);
    assert!(!TaskDir::locate(scans.path(), "broken").is_complete());
    assert_eq!(
        ledger.get_task("broken").unwrap().unwrap().status,
        TaskStatus::Failed
    );
}

#[tokio::test]
async fn test_disconnect_failure_does_not_mask_success() {
    let scans = tempdir().unwrap();
    let job = ScanJob::new(area(1.0, 0.0), t1(), scans.path());
    let handle = ScanRunner::new(
        job,
        Arc::new(MockMotion::instant().failing_disconnect()),
        Arc::new(MockInstrument::constant(t1(), 1.0)),
    )
    .spawn(64);
    let (_, outcome) = handle.finish().await.unwrap();
    assert!(outcome.ok, "{}", outcome.message);
}

#[tokio::test]
async fn test_ledger_records_success() {
    let scans = tempdir().unwrap();
    let ledger = Arc::new(JsonTaskLedger::open(scans.path().join("tasks.json")).unwrap());
    let job = ScanJob::new(area(2.0, 2.0), t1(), scans.path())
        .with_task_id("ok-task")
        .with_name("Scan A");

    let handle = ScanRunner::new(
        job,
        Arc::new(MockMotion::instant()),
        Arc::new(MockInstrument::constant(t1(), 1.0)),
    )
    .with_ledger(ledger.clone())
    .spawn(64);
    handle.finish().await.unwrap();

    let task = ledger.get_task("ok-task").unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.name, "Scan A");
    assert_eq!(ledger.count_points("ok-task").unwrap(), 9);
    assert_eq!(task.config["trace_list"][0]["name"], "T1");
}

#[tokio::test]
async fn test_point_timeout_fails_run() {
    let scans = tempdir().unwrap();
    let instrument = MockInstrument::constant(t1(), 1.0).with_measure_delay(Duration::from_millis(500));
    let job = ScanJob::new(area(1.0, 1.0), t1(), scans.path());
    let handle = ScanRunner::new(job, Arc::new(MockMotion::instant()), Arc::new(instrument))
        .with_point_timeout(Some(Duration::from_millis(20)))
        .spawn(64);
    let (_, outcome) = handle.finish().await.unwrap();

    assert!(!outcome.ok);
    assert!(outcome.message.contains("timed out"), "{}", outcome.message);
}

#[tokio::test]
async fn test_no_traces_cannot_start() {
    let scans = tempdir().unwrap();
    let motion = Arc::new(MockMotion::instant());
    let job = ScanJob::new(area(1.0, 1.0), vec![], scans.path());
    let handle = ScanRunner::new(job, motion.clone(), Arc::new(MockInstrument::new())).spawn(8);
    let (events, outcome) = handle.finish().await.unwrap();

    assert!(!outcome.ok);
    assert!(outcome.message.contains("no traces"));
    assert_eq!(motion.counts().connect.load(Ordering::SeqCst), 0);
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_colliding_trace_names_refused_before_connect() {
    let scans = tempdir().unwrap();
    let traces = vec![TraceInfo::new("S 21"), TraceInfo::new("S_21")];
    let motion = Arc::new(MockMotion::instant());
    let instrument = Arc::new(MockInstrument::constant(traces.clone(), 1.0));
    let job = ScanJob::new(area(1.0, 1.0), traces, scans.path()).with_task_id("clash");

    let handle = ScanRunner::new(job, motion.clone(), instrument.clone()).spawn(8);
    let (events, outcome) = handle.finish().await.unwrap();

    assert!(!outcome.ok);
    assert!(outcome.message.contains("both store as 'S_21'"), "{}", outcome.message);
    assert_eq!(events.len(), 1);
    assert_eq!(motion.counts().connect.load(Ordering::SeqCst), 0);
    assert_eq!(instrument.counts().measure.load(Ordering::SeqCst), 0);
    assert!(!TaskDir::locate(scans.path(), "clash").root().exists());
}

#[tokio::test]
async fn test_unstartable_job_leaves_no_ledger_row() {
    let scans = tempdir().unwrap();
    let ledger = Arc::new(JsonTaskLedger::open(scans.path().join("tasks.json")).unwrap());
    let job = ScanJob::new(area(1.0, 1.0), vec![], scans.path()).with_task_id("empty");

    let handle = ScanRunner::new(
        job,
        Arc::new(MockMotion::instant()),
        Arc::new(MockInstrument::new()),
    )
    .with_ledger(ledger.clone())
    .spawn(8);
    let (_, outcome) = handle.finish().await.unwrap();

    assert!(!outcome.ok);
    assert!(ledger.get_task("empty").unwrap().is_none());
    assert!(ledger.list_tasks(10).unwrap().is_empty());
}
