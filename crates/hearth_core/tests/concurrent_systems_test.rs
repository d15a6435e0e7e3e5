//! Integration tests for concurrent Systems and the frame barrier.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use hearth_core::{
    ComponentType, EngineConfig, EngineError, Entity, EntityId, FrameScheduler, System, SystemContext, SystemError,
    SystemMode, TimestepConfig,
};
use parking_lot::Mutex;

const GATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Blocks in `update` until its gate is opened, then logs its name.
struct Gated {
    name: String,
    gate: Receiver<()>,
    log: Arc<Mutex<Vec<String>>>,
    only_frame: Option<u64>,
}

impl System for Gated {
    fn name(&self) -> &str {
        &self.name
    }

    fn interests(&self) -> Vec<ComponentType> {
        Vec::new()
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<(), SystemError> {
        if self.only_frame.map_or(true, |f| f == ctx.frame) {
            self.gate
                .recv_timeout(GATE_TIMEOUT)
                .map_err(|_| SystemError::new("gate never opened"))?;
        }
        self.log.lock().push(self.name.clone());
        Ok(())
    }
}

fn gated(name: &str, log: &Arc<Mutex<Vec<String>>>, only_frame: Option<u64>) -> (Gated, Sender<()>) {
    let (tx, rx) = unbounded();
    let system = Gated {
        name: name.to_owned(),
        gate: rx,
        log: Arc::clone(log),
        only_frame,
    };
    (system, tx)
}

#[test]
fn test_frame_exits_strictly_after_last_completion() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut engine = FrameScheduler::default();

    let mut gates = Vec::new();
    for name in ["a", "b", "c"] {
        let (system, gate) = gated(name, &log, None);
        engine.add_system(system, SystemMode::Concurrent).unwrap();
        gates.push(gate);
    }

    let done = Arc::new(AtomicBool::new(false));
    let frame = {
        let log = Arc::clone(&log);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let result = engine.tick(0.016);
            log.lock().push("frame".to_owned());
            done.store(true, Ordering::SeqCst);
            (engine, result)
        })
    };

    // Release the systems out of registration order; the frame must not
    // finish until the last one has.
    for (i, idx) in [2usize, 0, 1].into_iter().enumerate() {
        thread::sleep(Duration::from_millis(30));
        assert!(!done.load(Ordering::SeqCst), "frame finished with {} system(s) still gated", 3 - i);
        gates[idx].send(()).unwrap();
    }

    let (engine, result) = frame.join().unwrap();
    let stats = result.unwrap();
    assert_eq!(stats.concurrent_systems, 3);
    assert_eq!(*log.lock(), vec!["c", "a", "b", "frame"]);
    drop(engine);
}

#[test]
fn test_sync_systems_run_while_concurrent_ones_work() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut engine = FrameScheduler::default();

    let (background, gate) = gated("background", &log, None);
    engine.add_system(background, SystemMode::Concurrent).unwrap();
    let (inline, inline_gate) = gated("inline", &log, None);
    engine.add_system(inline, SystemMode::Synchronous).unwrap();

    // The inline system can only finish if the scheduler did not wait for
    // the background one first.
    inline_gate.send(()).unwrap();
    let opener = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        gate.send(()).unwrap();
    });

    let stats = engine.tick(0.016).unwrap();
    opener.join().unwrap();
    assert_eq!(stats.sync_systems, 1);
    assert_eq!(stats.concurrent_systems, 1);
    assert_eq!(*log.lock(), vec!["inline", "background"]);
}

/// Fails in frame 1 by returning an error or by panicking.
struct Faulty {
    name: &'static str,
    panic: bool,
}

impl System for Faulty {
    fn name(&self) -> &str {
        self.name
    }

    fn interests(&self) -> Vec<ComponentType> {
        Vec::new()
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<(), SystemError> {
        if ctx.frame != 1 {
            return Ok(());
        }
        if self.panic {
            panic!("boom in frame {}", ctx.frame);
        }
        Err(SystemError::new("nan velocity"))
    }
}

#[test]
fn test_failing_concurrent_systems_release_barrier() {
    let mut engine = FrameScheduler::default();
    engine
        .add_system(Faulty { name: "erroring", panic: false }, SystemMode::Concurrent)
        .unwrap();
    engine
        .add_system(Faulty { name: "panicking", panic: true }, SystemMode::Concurrent)
        .unwrap();

    let Err(EngineError::SystemFaults { frame, mut faults }) = engine.tick(0.016) else {
        panic!("expected system faults");
    };
    faults.sort_by(|a, b| a.system.cmp(&b.system));

    assert_eq!(frame, 1);
    assert_eq!(faults.len(), 2);
    assert_eq!((faults[0].system.as_str(), faults[0].panicked), ("erroring", false));
    assert_eq!(faults[0].reason, "nan velocity");
    assert_eq!((faults[1].system.as_str(), faults[1].panicked), ("panicking", true));
    assert_eq!(faults[1].reason, "boom in frame 1");

    // Both threads survived and the next frame runs normally.
    let stats = engine.tick(0.016).unwrap();
    assert_eq!(stats.frame, 2);
    assert_eq!(stats.concurrent_systems, 2);
}

#[test]
fn test_failing_sync_system_surfaces_fault() {
    let mut engine = FrameScheduler::default();
    engine
        .add_system(Faulty { name: "inline", panic: false }, SystemMode::Synchronous)
        .unwrap();

    let err = engine.tick(0.016).unwrap_err();
    assert!(matches!(err, EngineError::SystemFaults { frame: 1, ref faults } if faults.len() == 1));
    assert!(engine.tick(0.016).is_ok());
}

#[test]
fn test_barrier_timeout_holds_next_frame() {
    let config = EngineConfig {
        barrier_timeout_ms: Some(50),
        ..EngineConfig::default()
    };
    let mut engine = FrameScheduler::new(config).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let (slow, gate) = gated("slow", &log, Some(1));
    engine.add_system(slow, SystemMode::Concurrent).unwrap();

    assert!(matches!(
        engine.tick(0.016),
        Err(EngineError::BarrierTimeout { pending: 1, .. })
    ));

    // Still stalled: no phase of frame 2 runs, so the addition stays queued.
    engine.commands().add_entity(Entity::new(EntityId::new(1))).unwrap();
    assert!(matches!(
        engine.tick(0.016),
        Err(EngineError::BarrierTimeout { pending: 1, .. })
    ));
    assert_eq!(engine.frame(), 1);
    assert!(!engine.scene().contains(EntityId::new(1)));

    gate.send(()).unwrap();
    let stats = engine.tick(0.016).unwrap();
    assert_eq!(stats.frame, 2);
    assert!(engine.scene().contains(EntityId::new(1)));
    assert_eq!(*log.lock(), vec!["slow", "slow"]);
}

/// Waits for its gate in frame 1, then fails.
struct LateFailure {
    gate: Receiver<()>,
}

impl System for LateFailure {
    fn name(&self) -> &str {
        "late"
    }

    fn interests(&self) -> Vec<ComponentType> {
        Vec::new()
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<(), SystemError> {
        if ctx.frame != 1 {
            return Ok(());
        }
        self.gate
            .recv_timeout(GATE_TIMEOUT)
            .map_err(|_| SystemError::new("gate never opened"))?;
        Err(SystemError::new("finished late"))
    }
}

#[test]
fn test_fault_after_timeout_keeps_its_frame() {
    let config = EngineConfig {
        barrier_timeout_ms: Some(50),
        ..EngineConfig::default()
    };
    let mut engine = FrameScheduler::new(config).unwrap();
    let (tx, rx) = unbounded();
    engine.add_system(LateFailure { gate: rx }, SystemMode::Concurrent).unwrap();

    assert!(matches!(engine.tick(0.016), Err(EngineError::BarrierTimeout { .. })));
    tx.send(()).unwrap();

    let Err(EngineError::SystemFaults { frame, faults }) = engine.tick(0.016) else {
        panic!("expected the late fault to surface");
    };
    assert_eq!(frame, 2);
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].system, "late");
    assert_eq!(faults[0].frame, 1);
    assert_eq!(faults[0].reason, "finished late");

    assert_eq!(engine.tick(0.016).unwrap().frame, 3);
}

#[test]
fn test_run_frames_counts_and_tolerates_faults() {
    let config = EngineConfig {
        timestep: TimestepConfig::Fixed {
            tick_rate: 1000,
            max_catch_up: 4,
        },
        ..EngineConfig::default()
    };
    let mut engine = FrameScheduler::new(config).unwrap();
    engine
        .add_system(Faulty { name: "flaky", panic: false }, SystemMode::Synchronous)
        .unwrap();

    assert_eq!(engine.run_frames(5), Ok(5));
    assert_eq!(engine.frame(), 5);
}

#[test]
fn test_run_halts_on_fault_when_configured() {
    let config = EngineConfig {
        timestep: TimestepConfig::Variable { max_delta_ms: 50 },
        halt_on_system_error: true,
        ..EngineConfig::default()
    };
    let mut engine = FrameScheduler::new(config).unwrap();
    engine
        .add_system(Faulty { name: "fatal", panic: false }, SystemMode::Concurrent)
        .unwrap();

    assert!(matches!(engine.run(), Err(EngineError::SystemFaults { frame: 1, .. })));
    assert_eq!(engine.frame(), 1);
}

#[test]
fn test_stop_handle_ends_run() {
    let config = EngineConfig {
        timestep: TimestepConfig::Fixed {
            tick_rate: 500,
            max_catch_up: 2,
        },
        ..EngineConfig::default()
    };
    let mut engine = FrameScheduler::new(config).unwrap();
    let stop = engine.stop_handle();

    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        stop.stop();
    });

    let frames = engine.run().unwrap();
    stopper.join().unwrap();
    assert!(frames > 0);
    assert_eq!(engine.frame(), frames);
}
