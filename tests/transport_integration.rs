//! End-to-end transport behavior against the real clock thread.

use std::time::{Duration, Instant};

use groove::{Transport, TransportSignal};

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn time_advances_while_playing() {
    init_logging();
    let transport = Transport::new("integration").unwrap();
    transport.set_tempo(600);

    transport.play();
    wait_until(|| transport.time().ticks() > 10);
    transport.pause();

    // Let the listener drain any pulses already in flight.
    std::thread::sleep(Duration::from_millis(10));
    let paused_at = transport.time().ticks();
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(transport.time().ticks(), paused_at, "time moved while paused");

    transport.play();
    wait_until(|| transport.time().ticks() > paused_at);
    transport.stop();
}

#[test]
fn lifecycle_signals_carry_times() {
    init_logging();
    let transport = Transport::new("integration").unwrap();
    transport.set_tempo(600);
    let signals = transport.subscribe();

    transport.play();
    wait_until(|| transport.time().ticks() > 5);
    transport.pause();

    match signals.recv_timeout(Duration::from_secs(1)).unwrap() {
        TransportSignal::DidStart { time } => assert_eq!(time.ticks(), 0),
        other => panic!("expected DidStart, got {other:?}"),
    }
    match signals.recv_timeout(Duration::from_secs(1)).unwrap() {
        TransportSignal::DidPause { time, ticks } => {
            assert!(time.ticks() > 0);
            assert!(ticks > 0);
        }
        other => panic!("expected DidPause, got {other:?}"),
    }

    transport.stop();
}

#[test]
fn jog_while_paused_stages_then_commits() {
    init_logging();
    let transport = Transport::new("integration").unwrap();
    transport.set_tempo(600);

    transport.play();
    wait_until(|| transport.time().ticks() > 20);
    transport.pause();
    std::thread::sleep(Duration::from_millis(10));
    let committed = transport.time().current();

    transport.begin_jog().unwrap();
    transport.jog(-1.0).unwrap();
    assert_eq!(transport.time().current(), committed, "commit before end_jog");
    transport.end_jog().unwrap();

    assert!(transport.time().current() < committed);
    // Still paused: the clock must not have resumed.
    assert!(transport.is_paused());
    assert!(!transport.clock().is_running());
}

#[test]
fn reset_rewinds_clock_and_time() {
    init_logging();
    let transport = Transport::new("integration").unwrap();
    transport.set_tempo(600);
    let signals = transport.subscribe();

    transport.play();
    wait_until(|| transport.time().ticks() > 10);
    transport.reset();

    assert_eq!(transport.time().ticks(), 0);
    assert_eq!(transport.clock().ticks(), 0);
    assert!(transport.state().is_empty());

    let mut saw_reset = false;
    while let Ok(signal) = signals.try_recv() {
        if let TransportSignal::DidReset { time } = signal {
            assert_eq!(time.ticks(), 0);
            saw_reset = true;
        }
    }
    assert!(saw_reset);
}
