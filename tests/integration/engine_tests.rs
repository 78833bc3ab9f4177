//! Command engine end to end: raw host writes in, notified frames out.

use std::thread;
use std::time::Duration;

use fingerlock::adapters::nvs::NvsConfig;
use fingerlock::adapters::ota_partition::SimPartition;
use fingerlock::adapters::sensor::SimSensor;
use fingerlock::app::labels::LabelStore;
use fingerlock::app::ports::{ConfigPort, Indication};
use fingerlock::rpc::codec::{Command, CommandFrame, DEVICE_INFO_LEN, LABEL_LEN, Reply};
use fingerlock::rpc::crc32;
use fingerlock::rpc::engine::CommandEngine;
use fingerlock::signals;

use super::mock_hw::{Rig, fast_config};

const SUCCESS: u8 = Reply::Success as u8;
const FAILURE: u8 = Reply::Failure as u8;
const EXECUTE: u8 = Reply::Execute as u8;
const CANCEL: u8 = Reply::Cancel as u8;

fn write(kind: Command, payload: &[u8]) -> CommandFrame {
    CommandFrame::new(kind as u8, payload).unwrap()
}

fn acks(rig: &Rig, kind: Command) -> Vec<u8> {
    rig.sent()
        .into_iter()
        .filter(|(k, _)| *k == kind as u8)
        .map(|(_, p)| p[0])
        .collect()
}

// ── Enrollment ────────────────────────────────────────────────

#[test]
fn register_walks_five_rounds_then_stores() {
    let rig = Rig::new();
    rig.connect();
    let mut engine = rig.engine();

    engine.handle(write(Command::Register, &[4]));

    let sent = rig.sent();
    let round = [
        (Command::PutFinger as u8, vec![EXECUTE]),
        (Command::PutFinger as u8, vec![SUCCESS]),
        (Command::RemoveFinger as u8, vec![SUCCESS]),
    ];
    let mut expected: Vec<(u8, Vec<u8>)> = round.iter().cloned().cycle().take(15).collect();
    expected.push((Command::Register as u8, vec![SUCCESS]));
    assert_eq!(sent, expected);

    assert!(rig.sim.lock().unwrap().library.contains(&4));
    let label = LabelStore::new(rig.storage.clone()).get(4).unwrap();
    assert_eq!(label.as_deref(), Some("Finger 5"));

    let log = rig.platform.log();
    assert_eq!((log.detaches, log.attaches), (1, 1));
    assert!(!rig.power.sleep_prevented());
}

#[test]
fn register_reports_failed_captures_and_retries() {
    let mut sim = SimSensor::auto();
    sim.capture_failures = 1;
    let rig = Rig::with(fast_config(), sim);
    rig.connect();
    let mut engine = rig.engine();

    engine.handle(write(Command::Register, &[0]));

    let put = acks(&rig, Command::PutFinger);
    assert_eq!(&put[..3], &[EXECUTE, FAILURE, EXECUTE]);
    assert!(rig.sim.lock().unwrap().library.contains(&0));
}

#[test]
fn register_out_of_range_id_fails_without_capturing() {
    let rig = Rig::new();
    rig.connect();
    let mut engine = rig.engine();

    engine.handle(write(Command::Register, &[50]));
    assert_eq!(rig.sent(), vec![(Command::Register as u8, vec![FAILURE])]);
    assert_eq!(rig.sim.lock().unwrap().captures, 0);
}

#[test]
fn cancel_ends_registration_with_cancel_reply() {
    let rig = Rig::with(fast_config(), SimSensor::new());
    rig.connect();
    let mut engine = rig.engine();

    let cancel = rig.cancel.clone();
    let host = thread::spawn(move || {
        thread::sleep(Duration::from_millis(250));
        cancel.raise();
    });
    engine.handle(write(Command::Register, &[1]));
    host.join().unwrap();

    assert_eq!(
        rig.sent(),
        vec![
            (Command::PutFinger as u8, vec![EXECUTE]),
            (Command::Register as u8, vec![CANCEL]),
        ]
    );
    assert!(rig.sim.lock().unwrap().library.is_empty());
    assert!(rig.platform.log().irq_attached);
    assert!(!rig.power.sleep_prevented());
}

// ── Library and labels ────────────────────────────────────────

#[test]
fn delete_removes_template_and_label() {
    let rig = Rig::new();
    rig.connect();
    let labels = LabelStore::new(rig.storage.clone());
    rig.sim.lock().unwrap().library.insert(9);
    labels.set(9, "Index").unwrap();
    let mut engine = rig.engine();

    engine.handle(write(Command::Delete, &[9]));

    assert_eq!(acks(&rig, Command::Delete), [SUCCESS]);
    assert!(rig.sim.lock().unwrap().library.is_empty());
    assert_eq!(labels.get(9).unwrap(), None);
}

#[test]
fn names_list_enrolled_templates_with_labels() {
    let rig = Rig::new();
    rig.connect();
    rig.sim.lock().unwrap().library.extend([2u16, 11]);
    let mut engine = rig.engine();

    engine.handle(write(Command::SetFingerName, b"\x02Left thumb\0"));
    engine.handle(write(Command::RenameFinger, b"\x0BRight index"));
    assert_eq!(
        rig.sent(),
        vec![
            (Command::SetFingerName as u8, vec![SUCCESS]),
            (Command::RenameFinger as u8, vec![SUCCESS]),
        ]
    );

    engine.handle(write(Command::GetFingerNames, &[]));
    let sent = rig.sent();
    assert_eq!(sent.len(), 1);
    let (kind, body) = &sent[0];
    assert_eq!(*kind, Command::GetFingerNames as u8);
    assert_eq!(body.len(), 1 + 2 * (1 + LABEL_LEN));
    assert_eq!(body[0], 2);
    assert_eq!(body[1], 2);
    assert_eq!(&body[2..12], b"Left thumb");
    assert!(body[12..1 + 1 + LABEL_LEN].iter().all(|&b| b == 0));
    assert_eq!(body[1 + 1 + LABEL_LEN], 11);
    assert_eq!(&body[2 + 1 + LABEL_LEN..2 + 1 + LABEL_LEN + 11], b"Right index");
}

#[test]
fn names_listing_longer_than_one_frame_is_paged() {
    let rig = Rig::new();
    rig.connect();
    rig.sim.lock().unwrap().library.extend(0u16..12);
    let labels = LabelStore::new(rig.storage.clone());
    for id in 0u8..12 {
        labels.set(id, &format!("Finger {}", id + 1)).unwrap();
    }
    let mut engine = rig.engine();

    engine.handle(write(Command::GetFingerNames, &[]));

    let pages: Vec<Vec<u8>> = rig
        .sent()
        .into_iter()
        .filter(|(k, _)| *k == Command::GetFingerNames as u8)
        .map(|(_, p)| p)
        .collect();
    assert_eq!(pages.len(), 2);
    assert!(pages.iter().all(|p| p.len() <= 300));

    let record = 1 + LABEL_LEN;
    let ids: Vec<u8> = pages
        .iter()
        .flat_map(|p| {
            assert_eq!(p.len(), 1 + p[0] as usize * record);
            (0..p[0] as usize).map(move |i| p[1 + i * record])
        })
        .collect();
    assert_eq!(ids, (0u8..12).collect::<Vec<_>>());
    assert_eq!(&pages[1][2..11], b"Finger 10");
}

#[test]
fn names_report_read_failure_marker() {
    let rig = Rig::new();
    rig.connect();
    rig.sim.lock().unwrap().powered = false;
    let mut engine = rig.engine();

    engine.handle(write(Command::GetFingerNames, &[]));
    assert_eq!(rig.sent(), vec![(Command::GetFingerNames as u8, vec![0xFF])]);
}

// ── Settings ──────────────────────────────────────────────────

#[test]
fn sleep_time_is_applied_and_persisted() {
    let rig = Rig::new();
    rig.connect();
    let mut engine = rig.engine();

    engine.handle(write(Command::SetSleepTime, &30u32.to_le_bytes()));

    assert_eq!(acks(&rig, Command::SetSleepTime), [SUCCESS]);
    assert_eq!(engine.config().sleep_timeout_secs, 30);
    assert_eq!(rig.power.sleep_timeout_secs(), 30);
    let stored = NvsConfig::new(rig.storage.clone()).load().unwrap();
    assert_eq!(stored.sleep_timeout_secs, 30);
}

#[test]
fn short_payload_is_rejected() {
    let rig = Rig::new();
    rig.connect();
    let mut engine = rig.engine();

    engine.handle(write(Command::SetSleepTime, &[1, 2]));
    assert_eq!(acks(&rig, Command::SetSleepTime), [FAILURE]);
    assert_eq!(rig.power.sleep_timeout_secs(), 10);
}

#[test]
fn unknown_type_gets_no_reply() {
    let rig = Rig::new();
    rig.connect();
    let mut engine = rig.engine();

    engine.handle(CommandFrame::new(0x55, &[1, 2, 3]).unwrap());
    assert!(rig.sent().is_empty());
}

#[test]
fn info_carries_timeout_and_identity() {
    let rig = Rig::new();
    rig.connect();
    let mut engine = rig.engine();

    engine.handle(write(Command::GetInfo, &[]));

    let sent = rig.sent();
    let (kind, body) = &sent[0];
    assert_eq!(*kind, Command::GetInfo as u8);
    assert_eq!(body.len(), DEVICE_INFO_LEN);
    assert_eq!(&body[..4], &10u32.to_le_bytes());
    assert_eq!(&body[4..13], b"FL-EFCAFE");
    assert_eq!(body[13], 0);
}

#[test]
fn info_during_pending_touch_counts_as_subscription() {
    let rig = Rig::new();
    rig.connect();
    let mut engine = rig.engine();

    rig.touch.fire();
    engine.handle(write(Command::GetInfo, &[]));
    assert!(rig.flags.is_set(signals::SUBSCRIBED));
}

#[test]
fn host_notifications_update_link_and_signals() {
    let rig = Rig::new();
    rig.connect();
    let mut engine = rig.engine();

    engine.handle(write(Command::DeviceNotify, &[]));
    assert!(rig.link.notifications_enabled());
    assert!(rig.flags.is_set(signals::SUBSCRIBED));
    assert_eq!(rig.lights.last(), Some(Indication::Subscribed));

    engine.handle(write(Command::LockScreenStatus, &[0]));
    assert!(rig.flags.is_set(signals::SCREEN_LOCK));

    engine.handle(write(Command::CheckSleep, &[1]));
    assert_eq!(engine.sleep_vote(), Some(true));
    assert!(rig.flags.is_set(signals::SLEEP_CHECK));

    assert!(rig.sent().is_empty());
}

#[test]
fn host_can_block_and_release_sleep() {
    let rig = Rig::new();
    rig.connect();
    let mut engine = rig.engine();

    engine.handle(write(Command::EnableSleep, &[0]));
    assert!(rig.power.sleep_prevented());
    engine.handle(write(Command::EnableSleep, &[1]));
    assert!(!rig.power.sleep_prevented());
}

#[test]
fn reset_all_acknowledges_before_unpairing() {
    let rig = Rig::new();
    rig.connect();
    rig.sim.lock().unwrap().library.insert(3);
    LabelStore::new(rig.storage.clone()).set(3, "Thumb").unwrap();
    let mut engine = rig.engine();
    engine.handle(write(Command::SetSleepTime, &60u32.to_le_bytes()));
    rig.sent();

    engine.handle(write(Command::ResetAll, &[]));

    assert_eq!(acks(&rig, Command::ResetAll), [SUCCESS]);
    assert!(rig.sim.lock().unwrap().library.is_empty());
    assert_eq!(LabelStore::new(rig.storage.clone()).get(3).unwrap(), None);
    assert_eq!(engine.config().sleep_timeout_secs, 10);
    assert_eq!(rig.power.sleep_timeout_secs(), 10);
    assert_eq!(rig.radio.disconnects(), 0);

    rig.link.poll();
    assert_eq!(rig.radio.disconnects(), 1);
    assert_eq!(rig.link.snapshot().bonded_peers, 0);
}

// ── Firmware update ───────────────────────────────────────────

fn firmware_image() -> Vec<u8> {
    (0..150_000u32)
        .map(|i| (i.wrapping_mul(2_654_435_761) >> 24) as u8 ^ (i / 1_000) as u8)
        .collect()
}

/// Raw DEFLATE the image and stream it in link-sized chunks.
fn send_update(engine: &mut CommandEngine<SimPartition>, image: &[u8]) {
    let compressed = miniz_oxide::deflate::compress_to_vec(image, 6);
    engine.handle(write(Command::OtaStart, &(compressed.len() as u32).to_le_bytes()));
    for chunk in compressed.chunks(240) {
        engine.handle(write(Command::OtaChunk, chunk));
    }
}

#[test]
fn update_inflates_verifies_and_restarts() {
    let rig = Rig::new();
    rig.connect();
    let mut engine = rig.engine();
    let image = firmware_image();

    send_update(&mut engine, &image);
    assert!(rig.power.sleep_prevented());

    let crc = format!("{:08x}", crc32::update(0, &image));
    engine.handle(write(Command::OtaEnd, crc.as_bytes()));

    let sent = rig.sent();
    assert!(sent.iter().all(|(_, p)| p == &[SUCCESS]));
    assert_eq!(sent.last().map(|(k, _)| *k), Some(Command::OtaEnd as u8));
    assert_eq!(engine.ota().target().boot_image(), Some(image.as_slice()));
    assert_eq!(rig.platform.log().restarts, 1);
    assert!(!rig.power.sleep_prevented());
}

#[test]
fn update_with_wrong_checksum_is_discarded() {
    let rig = Rig::new();
    rig.connect();
    let mut engine = rig.engine();
    let image = firmware_image();

    send_update(&mut engine, &image);
    let wrong = format!("{:08X}", crc32::update(0, &image) ^ 1);
    engine.handle(write(Command::OtaEnd, wrong.as_bytes()));

    assert_eq!(acks(&rig, Command::OtaEnd), [FAILURE]);
    assert_eq!(engine.ota().target().boot_image(), None);
    assert!(!engine.ota().target().is_open());
    assert_eq!(rig.platform.log().restarts, 0);
    assert!(!rig.power.sleep_prevented());
}

#[test]
fn update_end_without_digits_aborts_session() {
    let rig = Rig::new();
    rig.connect();
    let mut engine = rig.engine();

    send_update(&mut engine, &firmware_image());
    engine.handle(write(Command::OtaEnd, b"zz"));

    assert_eq!(acks(&rig, Command::OtaEnd), [FAILURE]);
    assert!(!engine.ota().is_active());
    assert!(!engine.ota().target().is_open());
}

#[test]
fn chunk_without_session_fails() {
    let rig = Rig::new();
    rig.connect();
    let mut engine = rig.engine();

    engine.handle(write(Command::OtaChunk, &[1, 2, 3]));
    assert_eq!(acks(&rig, Command::OtaChunk), [FAILURE]);
    assert!(!engine.ota().is_active());
}

#[test]
fn zero_size_update_is_rejected() {
    let rig = Rig::new();
    rig.connect();
    let mut engine = rig.engine();

    engine.handle(write(Command::OtaStart, &0u32.to_le_bytes()));
    assert_eq!(acks(&rig, Command::OtaStart), [FAILURE]);
    assert!(!rig.power.sleep_prevented());
}
