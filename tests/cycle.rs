use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use mandelpool::kernel::kernel;
use mandelpool::planes::PlaneMapper;
use mandelpool::{
    divide_into_ranges, ExecutionKind, FrameBuffer, Kernel, Orchestrator, Phase, PoolConfig,
    PoolManager, Reconcile, Update, Viewport,
};
use num::Complex;

const KINDS: [ExecutionKind; 2] = [ExecutionKind::Thread, ExecutionKind::Process];
const DEADLINE: Duration = Duration::from_secs(20);

fn config(kind: ExecutionKind, width: usize, height: usize, workers: usize) -> PoolConfig {
    PoolConfig {
        workers,
        kind,
        poll_interval: Duration::from_millis(1),
        ..PoolConfig::new(width, height)
    }
}

/// Tick until a live frame comes back, and copy it out.
fn next_frame(viz: &mut Orchestrator) -> Vec<u32> {
    let deadline = Instant::now() + DEADLINE;
    loop {
        viz.update().unwrap();
        if let Some(frame) = viz.get_frame() {
            if !frame.is_placeholder() {
                return frame.pixels().to_vec();
            }
        }
        assert!(Instant::now() < deadline, "no frame arrived");
        sleep(Duration::from_millis(1));
    }
}

/// Tick until the workers are parked on a finished frame, and return
/// how many cycles they have completed.
fn wait_until_done(viz: &mut Orchestrator) -> u64 {
    let deadline = Instant::now() + DEADLINE;
    loop {
        viz.update().unwrap();
        let status = viz.status();
        if status.phase == Some(Phase::Done) {
            return status.completed_cycles;
        }
        assert!(Instant::now() < deadline, "workers never finished a cycle");
        sleep(Duration::from_millis(1));
    }
}

/// Packs both coordinates into the color, so a pixel shows where it
/// was computed.
fn coordinate_kernel() -> Kernel {
    kernel(|re, im, _| {
        let re = ((re + 4.0) * 1000.0) as u32;
        let im = ((im + 4.0) * 1000.0) as u32;
        re * 10_000 + im
    })
}

#[test]
fn two_workers_fill_a_ten_by_four_frame() {
    assert_eq!(divide_into_ranges(4, 2).unwrap(), vec![0..2, 2..4]);

    let mapper = PlaneMapper::new(10, 4, &Viewport::new(Complex::new(0.0, 0.0), 2.0).unwrap());
    let mut re = vec![0.0; 10];
    let mut im = vec![0.0; 4];
    mapper.fill_coords(&mut re, &mut im);
    let pack = coordinate_kernel();
    let mut expected = Vec::new();
    for y in 0..4 {
        for x in 0..10 {
            expected.push((pack)(re[x], im[y], 80));
        }
    }

    for kind in KINDS.iter() {
        let mut viz = Orchestrator::new(config(*kind, 10, 4, 2), coordinate_kernel()).unwrap();
        assert_eq!(next_frame(&mut viz), expected, "{} workers", kind);
        assert!(viz.shutdown(DEADLINE));
    }
}

#[test]
fn frames_are_never_torn() {
    for kind in KINDS.iter() {
        let mut viz = Orchestrator::new(config(*kind, 16, 16, 3), kernel(|_, _, n| n)).unwrap();
        let deadline = Instant::now() + DEADLINE;
        let mut frames = 0;
        let mut tick = 0u32;
        while frames < 20 {
            // Ask for a different budget on every tick; a frame mixing
            // two budgets would not be uniform.
            tick += 1;
            viz.controls_mut().max_iters = if tick % 2 == 0 { 80 } else { 120 };
            viz.update().unwrap();
            if let Some(frame) = viz.get_frame() {
                if !frame.is_placeholder() {
                    let first = frame.pixels()[0];
                    assert!(first == 80 || first == 120);
                    assert!(frame.pixels().iter().all(|p| *p == first), "torn frame");
                    frames += 1;
                }
            }
            assert!(Instant::now() < deadline, "{} workers stopped producing", kind);
            sleep(Duration::from_millis(1));
        }
        assert!(viz.shutdown(DEADLINE));
    }
}

#[test]
fn a_new_budget_lands_in_the_second_frame_after_it_is_set() {
    for kind in KINDS.iter() {
        let mut viz = Orchestrator::new(config(*kind, 8, 6, 2), kernel(|_, _, n| n)).unwrap();
        assert!(next_frame(&mut viz).iter().all(|p| *p == 80));

        // The workers were released when that frame was dropped, and
        // they started the next cycle with the old budget.
        viz.controls_mut().max_iters = 120;
        assert!(next_frame(&mut viz).iter().all(|p| *p == 80));
        assert!(next_frame(&mut viz).iter().all(|p| *p == 120));
        assert!(next_frame(&mut viz).iter().all(|p| *p == 120));
        assert_eq!(viz.status_lines()[1], "Iters: 120");
        assert!(viz.shutdown(DEADLINE));
    }
}

#[test]
fn placeholder_only_until_the_first_live_frame() {
    for kind in KINDS.iter() {
        let mut viz = Orchestrator::new(config(*kind, 4, 4, 2), kernel(|_, _, _| 7)).unwrap();
        assert!(viz.get_frame().unwrap().is_placeholder());
        next_frame(&mut viz);
        for _ in 0..50 {
            viz.update().unwrap();
            if let Some(frame) = viz.get_frame() {
                assert!(!frame.is_placeholder());
                assert!(frame.pixels().iter().all(|p| *p == 7));
            }
            sleep(Duration::from_millis(1));
        }
        assert!(viz.shutdown(DEADLINE));
    }
}

#[test]
fn switching_kinds_keeps_producing_frames() {
    let mut viz =
        Orchestrator::new(config(ExecutionKind::Process, 12, 9, 3), kernel(|_, _, n| n)).unwrap();
    for round in 0..4 {
        let expected = if round % 2 == 0 {
            ExecutionKind::Process
        } else {
            ExecutionKind::Thread
        };
        assert!(next_frame(&mut viz).iter().all(|p| *p == 80));
        let status = viz.status();
        assert_eq!(status.kind, Some(expected));
        assert!(!status.draining);
        assert_eq!(status.live_workers, 3);
        viz.controls_mut().switch_kind();
    }
    assert_eq!(viz.status_lines()[0], "process workers");
    assert!(viz.shutdown(DEADLINE));
}

#[test]
fn a_switch_waits_for_the_old_generation_to_drain() {
    let frame = Arc::new(FrameBuffer::new(1, 2, 80).unwrap());
    let slow = kernel(|_, _, n| {
        sleep(Duration::from_millis(300));
        n
    });
    let mut pool = PoolManager::new(2, Duration::from_millis(1));
    assert_eq!(
        pool.select_kind(ExecutionKind::Process, &frame, &slow).unwrap(),
        Reconcile::Started
    );

    let deadline = Instant::now() + DEADLINE;
    while !pool.active_synchronizer().unwrap().is_busy() {
        assert!(Instant::now() < deadline, "processes never started a cycle");
        sleep(Duration::from_millis(1));
    }

    // Both processes are still inside their first, slow cycle.
    assert_eq!(
        pool.select_kind(ExecutionKind::Thread, &frame, &slow).unwrap(),
        Reconcile::Deferred
    );
    assert_eq!(pool.active_kind(), None);
    assert!(pool.is_draining());

    let outcome = loop {
        let outcome = pool.select_kind(ExecutionKind::Thread, &frame, &slow).unwrap();
        if outcome != Reconcile::Deferred {
            break outcome;
        }
        assert!(pool.active_kind().is_none());
        assert!(Instant::now() < deadline, "processes never drained");
        sleep(Duration::from_millis(5));
    };
    assert_eq!(outcome, Reconcile::Started);
    assert_eq!(pool.active_kind(), Some(ExecutionKind::Thread));
    assert!(!pool.is_draining());
    assert!(pool.shutdown(DEADLINE));
}

#[test]
fn threads_outliving_a_shutdown_still_block_the_next_generation() {
    let frame = Arc::new(FrameBuffer::new(1, 2, 80).unwrap());
    let slow = kernel(|_, _, n| {
        sleep(Duration::from_millis(800));
        n
    });
    let mut pool = PoolManager::new(2, Duration::from_millis(1));
    pool.select_kind(ExecutionKind::Thread, &frame, &slow).unwrap();

    let deadline = Instant::now() + DEADLINE;
    while !pool.active_synchronizer().unwrap().is_busy() {
        assert!(Instant::now() < deadline, "threads never started a cycle");
        sleep(Duration::from_millis(1));
    }

    // The threads are inside the kernel and cannot be killed.
    assert!(!pool.shutdown(Duration::from_millis(10)));
    assert!(pool.is_draining());
    assert_eq!(
        pool.select_kind(ExecutionKind::Thread, &frame, &slow).unwrap(),
        Reconcile::Deferred
    );

    let outcome = loop {
        let outcome = pool.select_kind(ExecutionKind::Thread, &frame, &slow).unwrap();
        if outcome != Reconcile::Deferred {
            break outcome;
        }
        assert!(Instant::now() < deadline, "threads never drained");
        sleep(Duration::from_millis(5));
    };
    assert_eq!(outcome, Reconcile::Started);
    assert!(pool.shutdown(DEADLINE));
}

#[test]
fn parked_workers_leave_promptly_on_shutdown() {
    for kind in KINDS.iter() {
        let frame = Arc::new(FrameBuffer::new(6, 6, 80).unwrap());
        let mut pool = PoolManager::new(3, Duration::from_millis(1));
        pool.select_kind(*kind, &frame, &kernel(|_, _, n| n)).unwrap();

        let deadline = Instant::now() + DEADLINE;
        while !pool.active_synchronizer().unwrap().is_parked() {
            assert!(Instant::now() < deadline, "{} workers never parked", kind);
            sleep(Duration::from_millis(1));
        }
        let started = Instant::now();
        assert!(pool.shutdown(DEADLINE));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!pool.is_draining());
        assert_eq!(pool.active_kind(), None);
    }
}

#[test]
fn busy_ticks_change_nothing() {
    let slow = kernel(|_, _, n| {
        sleep(Duration::from_millis(50));
        n
    });
    let mut viz = Orchestrator::new(config(ExecutionKind::Thread, 2, 2, 2), slow).unwrap();
    assert_eq!(viz.update().unwrap(), Update::Applied(Reconcile::Started));
    viz.controls_mut().max_iters = 300;
    assert_eq!(viz.update().unwrap(), Update::Waiting);
    assert_eq!(viz.status_lines()[1], "Iters: 80");
    assert!(viz.shutdown(DEADLINE));
}

static PANICKED: AtomicBool = AtomicBool::new(false);

#[test]
fn a_stalled_generation_can_be_restarted() {
    let flaky = kernel(|_, _, n| {
        if !PANICKED.swap(true, Ordering::SeqCst) {
            panic!("first pixel fails");
        }
        n
    });
    let mut viz = Orchestrator::new(config(ExecutionKind::Thread, 4, 4, 2), flaky).unwrap();
    viz.update().unwrap();

    let deadline = Instant::now() + DEADLINE;
    while !viz.status().stalled {
        assert!(Instant::now() < deadline, "the panic was never noticed");
        viz.update().unwrap();
        sleep(Duration::from_millis(1));
    }
    viz.restart();
    assert!(next_frame(&mut viz).iter().all(|p| *p == 80));
    assert!(viz.shutdown(DEADLINE));
}

fn first_pixel_unless_default(viz: &Orchestrator) -> Result<u32, String> {
    let frame = viz.get_frame().ok_or("no frame")?;
    let pixel = frame.get(0, 0);
    if pixel == 80 {
        return Err("default budget".to_string());
    }
    Ok(pixel)
}

#[test]
fn a_consumer_that_panics_still_releases_the_workers() {
    for kind in KINDS.iter() {
        let mut viz = Orchestrator::new(config(*kind, 6, 4, 2), kernel(|_, _, n| n)).unwrap();
        let before = wait_until_done(&mut viz);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let frame = viz.get_frame().unwrap();
            assert!(!frame.is_placeholder());
            panic!("consumer failed while drawing");
        }));
        assert!(outcome.is_err());

        // Without the release the workers would stay parked on the same
        // cycle forever.
        assert!(wait_until_done(&mut viz) > before, "{} workers stayed parked", kind);
        assert!(viz.shutdown(DEADLINE));
    }
}

#[test]
fn a_consumer_that_returns_early_still_releases_the_workers() {
    for kind in KINDS.iter() {
        let mut viz = Orchestrator::new(config(*kind, 6, 4, 2), kernel(|_, _, n| n)).unwrap();
        let before = wait_until_done(&mut viz);
        assert_eq!(
            first_pixel_unless_default(&viz),
            Err("default budget".to_string())
        );
        let after = wait_until_done(&mut viz);
        assert_eq!(after, before + 1, "{} workers released more than once", kind);
        assert!(viz.shutdown(DEADLINE));
    }
}
