//! End-to-end restart cycles through the public API

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use warmstart_restart::{
    FnEntryPoint, LaunchContext, RESTARTED_THREAD_NAME, RestartError, Restarter, WatchSettings,
};

fn restarter() -> Restarter {
    Restarter::with_fatal_handler(Arc::new(|message: &str| panic!("fatal: {message}")))
}

#[test]
fn test_manual_restart_cycles_generations() {
    let stops = Arc::new(Mutex::new(Vec::new()));
    let threads = Arc::new(Mutex::new(Vec::new()));
    let (s, t) = (Arc::clone(&stops), Arc::clone(&threads));

    let restarter = restarter();
    let result = restarter.initialize(
        vec!["demo".to_string()],
        FnEntryPoint::new("app", move |ctx: LaunchContext| {
            t.lock()
                .unwrap()
                .push(thread::current().name().map(str::to_string));
            let stops = Arc::clone(&s);
            let generation = ctx.generation();
            ctx.session()
                .add_listener(move || stops.lock().unwrap().push(generation));
            Ok(())
        }),
    );
    assert!(matches!(result, Err(RestartError::ImmediateRestart { .. })));

    restarter.restart().unwrap();
    restarter.restart().unwrap();

    let session = restarter.session().unwrap();
    assert_eq!(session.generation(), 3);
    assert_eq!(*stops.lock().unwrap(), vec![1, 2]);
    assert!(
        threads
            .lock()
            .unwrap()
            .iter()
            .all(|name| name.as_deref() == Some(RESTARTED_THREAD_NAME))
    );

    session.request_exit();
    assert_eq!(*stops.lock().unwrap(), vec![1, 2, 3]);
}

#[test]
fn test_relaunch_failure_then_recovery() {
    let broken = Arc::new(AtomicUsize::new(0));
    let b = Arc::clone(&broken);

    let restarter = restarter();
    let _ = restarter.initialize(
        Vec::new(),
        FnEntryPoint::new("app", move |_| {
            if b.load(Ordering::SeqCst) > 0 {
                anyhow::bail!("syntax error");
            }
            Ok(())
        }),
    );

    broken.store(1, Ordering::SeqCst);
    assert!(matches!(
        restarter.restart(),
        Err(RestartError::LaunchFailed { generation: 2, .. })
    ));

    broken.store(0, Ordering::SeqCst);
    restarter.restart().unwrap();
    assert_eq!(restarter.session().unwrap().generation(), 3);
}

#[test]
fn test_source_change_restarts_after_trailing_delay() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("greeting.txt");
    std::fs::write(&file, "hello").unwrap();

    let delay = Duration::from_millis(500);
    let settings = WatchSettings::new(delay, vec![temp_dir.path().to_path_buf()]);
    let launched = Arc::new(AtomicU64::new(0));
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let l = Arc::clone(&launched);

    let restarter = restarter();
    let _ = restarter.initialize(
        Vec::new(),
        FnEntryPoint::new("app", move |ctx: LaunchContext| {
            l.store(ctx.generation(), Ordering::SeqCst);
            let _ = tx.lock().unwrap().send((ctx.generation(), Instant::now()));
            ctx.session().watch(settings.clone())?;
            Ok(())
        }),
    );
    let (first, _) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(first, 1);
    thread::sleep(Duration::from_millis(100));

    let t0 = Instant::now();
    std::fs::write(&file, "hello again").unwrap();
    thread::sleep(Duration::from_millis(200));
    std::fs::write(&file, "hello for real").unwrap();

    let (generation, at) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(generation, 2);
    assert!(at.duration_since(t0) >= Duration::from_millis(700));
    assert!(rx.recv_timeout(Duration::from_millis(1000)).is_err());

    // The new generation re-armed the watcher.
    std::fs::write(&file, "third").unwrap();
    let (generation, _) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(generation, 3);

    restarter.session().unwrap().request_exit();
    assert_eq!(launched.load(Ordering::SeqCst), 3);
}
