//! Unlock sequence and touch-match loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fingerlock::error::Error;
use fingerlock::rpc::codec::Command;
use fingerlock::signals::{self, EventFlags};
use fingerlock::unlock::{MatchLoop, UnlockSequencer, UnlockTiming};

use super::mock_hw::Rig;

fn sequencer(rig: &Rig) -> Arc<UnlockSequencer> {
    Arc::new(UnlockSequencer::new(
        rig.link.clone(),
        rig.power.clone(),
        rig.flags.clone(),
        UnlockTiming::from(&rig.config),
    ))
}

/// Set `mask` once the radio has notified a frame of type `kind`.
fn answer_when_sent(rig: &Rig, kind: u8, mask: u32) -> thread::JoinHandle<()> {
    let radio = rig.radio.clone();
    let flags: Arc<EventFlags> = rig.flags.clone();
    thread::spawn(move || {
        let until = Instant::now() + Duration::from_secs(5);
        while Instant::now() < until {
            if radio.notified().iter().any(|f| f[0] == kind) {
                flags.set(mask);
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
    })
}

#[test]
fn second_request_is_rejected_while_busy() {
    let rig = Rig::new();
    let unlock = sequencer(&rig);

    unlock.request().unwrap();
    assert!(unlock.is_busy());
    assert!(matches!(unlock.request(), Err(Error::Busy)));
}

#[test]
fn no_connection_times_out_and_frees_the_slot() {
    let rig = Rig::new();
    let unlock = sequencer(&rig);
    unlock.request().unwrap();

    assert!(matches!(unlock.serve_next(), Err(Error::Timeout("connection"))));
    assert!(!unlock.is_busy());
    assert!(!rig.power.sleep_prevented());
    assert_eq!(rig.radio.wake_keys(), 0);

    unlock.request().unwrap();
}

#[test]
fn connect_during_wait_continues_the_sequence() {
    let rig = Rig::new();
    let unlock = sequencer(&rig);
    unlock.request().unwrap();

    let link = rig.link.clone();
    let flags = rig.flags.clone();
    let host = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        link.on_connect(super::mock_hw::PEER);
        thread::sleep(Duration::from_millis(20));
        flags.set(signals::SUBSCRIBED);
    });

    unlock.serve_next().unwrap();
    host.join().unwrap();
    assert_eq!(rig.radio.wake_keys(), 1);
    assert_eq!(rig.sent(), vec![(Command::Search as u8, vec![1])]);
}

#[test]
fn missing_subscription_times_out_after_wake_key() {
    let rig = Rig::new();
    rig.connect();
    let unlock = sequencer(&rig);
    unlock.request().unwrap();

    assert!(matches!(unlock.serve_next(), Err(Error::Timeout("subscription"))));
    assert_eq!(rig.radio.wake_keys(), 1);
    assert!(rig.sent().is_empty());
}

#[test]
fn subscribed_host_is_asked_for_lock_screen_state() {
    let rig = Rig::new();
    rig.connect();
    rig.link.enable_notifications();
    let unlock = Arc::new(UnlockSequencer::new(
        rig.link.clone(),
        rig.power.clone(),
        rig.flags.clone(),
        UnlockTiming {
            lock_screen_query: Duration::from_secs(5),
            ..UnlockTiming::from(&rig.config)
        },
    ));
    unlock.request().unwrap();
    let host = answer_when_sent(&rig, Command::LockScreenStatus as u8, signals::SCREEN_LOCK);

    let started = Instant::now();
    unlock.serve_next().unwrap();
    host.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(rig.radio.wake_keys(), 1);
    assert_eq!(
        rig.sent(),
        vec![
            (Command::LockScreenStatus as u8, vec![1]),
            (Command::Search as u8, vec![1]),
        ]
    );
}

#[test]
fn silent_host_gets_a_second_wake_key() {
    let rig = Rig::new();
    rig.connect();
    rig.link.enable_notifications();
    let unlock = sequencer(&rig);
    unlock.request().unwrap();

    unlock.serve_next().unwrap();
    assert_eq!(rig.radio.wake_keys(), 2);
    let kinds: Vec<u8> = rig.sent().into_iter().map(|(k, _)| k).collect();
    assert_eq!(kinds, [Command::LockScreenStatus as u8, Command::Search as u8]);
}

#[test]
fn sequence_holds_sleep_off_while_running() {
    let rig = Rig::new();
    let unlock = sequencer(&rig);
    unlock.request().unwrap();

    let worker = {
        let unlock = unlock.clone();
        thread::spawn(move || unlock.serve_next())
    };
    thread::sleep(Duration::from_millis(100));
    assert!(rig.power.sleep_prevented());
    assert!(worker.join().unwrap().is_err());
    assert!(!rig.power.sleep_prevented());
}

// ── Match loop ────────────────────────────────────────────────

fn match_loop(rig: &Rig, unlock: &Arc<UnlockSequencer>) -> MatchLoop {
    MatchLoop::new(rig.sensor.clone(), rig.power.clone(), unlock.clone(), rig.touch, &rig.config)
}

#[test]
fn no_touch_means_no_attempt() {
    let rig = Rig::new();
    let unlock = sequencer(&rig);
    let matcher = match_loop(&rig, &unlock);

    assert!(!matcher.step(10));
    assert_eq!(rig.sim.lock().unwrap().captures, 0);
}

#[test]
fn matched_touch_requests_unlock() {
    let rig = Rig::new();
    rig.sim.lock().unwrap().match_id = Some(3);
    let unlock = sequencer(&rig);
    let matcher = match_loop(&rig, &unlock);

    rig.touch.fire();
    assert!(matcher.step(10));
    assert!(unlock.is_busy());
    assert!(!rig.touch.is_pending());
    assert_eq!(rig.sim.lock().unwrap().searches, 1);
}

#[test]
fn unmatched_touch_is_dropped() {
    let rig = Rig::new();
    let unlock = sequencer(&rig);
    let matcher = match_loop(&rig, &unlock);

    rig.touch.fire();
    assert!(matcher.step(10));
    assert!(!unlock.is_busy());
    assert!(!rig.touch.is_pending());
}

#[test]
fn identify_retries_bad_captures() {
    let rig = Rig::new();
    {
        let mut sim = rig.sim.lock().unwrap();
        sim.capture_failures = 2;
        sim.match_id = Some(7);
    }
    let unlock = sequencer(&rig);
    let matcher = match_loop(&rig, &unlock);

    assert_eq!(matcher.identify(), Some(7));
    assert_eq!(rig.sim.lock().unwrap().captures, 3);
}

#[test]
fn identify_gives_up_after_five_captures() {
    let rig = Rig::new();
    {
        let mut sim = rig.sim.lock().unwrap();
        sim.capture_failures = 10;
        sim.match_id = Some(7);
    }
    let unlock = sequencer(&rig);
    let matcher = match_loop(&rig, &unlock);

    assert_eq!(matcher.identify(), None);
    let sim = rig.sim.lock().unwrap();
    assert_eq!(sim.captures, 5);
    assert_eq!(sim.searches, 0);
}

#[test]
fn match_during_running_unlock_is_not_queued_twice() {
    let rig = Rig::new();
    rig.sim.lock().unwrap().match_id = Some(0);
    let unlock = sequencer(&rig);
    let matcher = match_loop(&rig, &unlock);

    unlock.request().unwrap();
    rig.touch.fire();
    assert!(matcher.step(10));
    assert!(unlock.is_busy());

    assert!(unlock.serve_next().is_err());
    assert!(!unlock.is_busy());
}
