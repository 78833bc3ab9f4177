//! Button gestures and factory reset.

use fingerlock::adapters::nvs::NAMESPACE;
use fingerlock::app::actions::Unpair;
use fingerlock::app::labels::LabelStore;
use fingerlock::app::ports::Indication;
use fingerlock::drivers::button::ButtonEvent;
use fingerlock::link::ADDRESS_KEY;

use super::mock_hw::Rig;

#[test]
fn press_and_release_toggle_the_button_hold() {
    let rig = Rig::new();
    rig.actions.on_button(ButtonEvent::Press);
    assert!(rig.power.sleep_prevented());
    rig.actions.on_button(ButtonEvent::Release);
    assert!(!rig.power.sleep_prevented());
}

#[test]
fn three_second_hold_forgets_the_host() {
    let rig = Rig::new();
    rig.connect();
    assert!(rig.storage.lock().unwrap().exists(NAMESPACE, ADDRESS_KEY));

    rig.actions.on_button(ButtonEvent::Hold3s);

    assert_eq!(rig.radio.disconnects(), 1);
    assert_eq!(rig.link.snapshot().bonded_peers, 0);
    assert!(!rig.storage.lock().unwrap().exists(NAMESPACE, ADDRESS_KEY));
    assert_eq!(rig.lights.last(), Some(Indication::Pairing));
}

#[test]
fn release_after_hold_restarts_advertising() {
    let rig = Rig::new();
    rig.actions.on_button(ButtonEvent::Hold3s);
    rig.actions.on_button(ButtonEvent::ReleaseAfter3s);

    assert!(rig.link.is_advertising());
    assert!(rig.radio.is_advertising());
    assert!(rig.link.in_pairing_mode());
}

#[test]
fn ten_second_hold_wipes_everything() {
    let rig = Rig::new();
    rig.connect();
    rig.sim.lock().unwrap().library.extend([0u16, 5]);
    LabelStore::new(rig.storage.clone()).set(5, "Thumb").unwrap();
    rig.power.set_sleep_timeout(120);

    rig.actions.on_button(ButtonEvent::Hold10s);

    assert!(rig.sim.lock().unwrap().library.is_empty());
    assert_eq!(LabelStore::new(rig.storage.clone()).get(5).unwrap(), None);
    assert_eq!(rig.power.sleep_timeout_secs(), 10);
    assert_eq!(rig.link.snapshot().bonded_peers, 0);
    assert_eq!(rig.lights.last(), Some(Indication::Off));
}

#[test]
fn factory_reset_reports_sensor_failure_but_finishes() {
    let rig = Rig::new();
    rig.connect();
    rig.sim.lock().unwrap().powered = false;
    LabelStore::new(rig.storage.clone()).set(1, "Thumb").unwrap();

    assert!(rig.actions.factory_reset(Unpair::Now).is_err());
    assert_eq!(LabelStore::new(rig.storage.clone()).get(1).unwrap(), None);
    assert_eq!(rig.link.snapshot().bonded_peers, 0);
}

#[test]
fn deferred_reset_keeps_the_bond_until_poll() {
    let rig = Rig::new();
    rig.connect();

    rig.actions.factory_reset(Unpair::Deferred).unwrap();
    assert_eq!(rig.link.snapshot().bonded_peers, 1);
    assert!(rig.link.is_connected());

    rig.link.poll();
    assert_eq!(rig.link.snapshot().bonded_peers, 0);
    assert_eq!(rig.radio.disconnects(), 1);
}
