//! Extend-on-demand mailbox served while SPM.

use spm_coordinator::ExtendRequest;
use spm_core::effects::MAILBOX_MESSAGE_SIZE;
use spm_core::{DomainId, HostId, ImageId, JobSpec, VolumeId};
use spm_testkit::{wait_until, SpmTestHarness, TEST_TIMEOUT};

fn request(new_size: u64) -> ExtendRequest {
    ExtendRequest {
        domain: DomainId::new(),
        image: ImageId::new(),
        volume: VolumeId::new(),
        new_size,
    }
}

#[test]
fn extension_requests_are_served_and_acknowledged() {
    let harness = SpmTestHarness::builder().block_backed(true).build();
    let spm = harness.coordinator();
    spm.start(&harness.start_request()).unwrap();
    assert!(spm.mailbox_running());

    let host = HostId::new(2);
    let extend = request(8 << 30);
    let message = extend.encode();
    harness.mailbox().post(host, 0, message);

    assert!(wait_until(TEST_TIMEOUT, || harness.mailbox().ack(host, 0).is_some()));
    assert_eq!(harness.mailbox().ack(host, 0), Some(message));
    assert_eq!(harness.jobs.completed(), vec![extend.to_job()]);
    assert!(matches!(
        harness.jobs.completed()[0],
        JobSpec::ExtendVolume { new_size, .. } if new_size == 8 << 30
    ));

    spm.stop().unwrap();
    assert!(!spm.mailbox_running());
}

#[test]
fn malformed_slots_are_skipped() {
    let harness = SpmTestHarness::builder().block_backed(true).build();
    let spm = harness.coordinator();
    spm.start(&harness.start_request()).unwrap();

    let host = HostId::new(3);
    let mut garbage = [0xabu8; MAILBOX_MESSAGE_SIZE];
    garbage[0] = b'x';
    harness.mailbox().post(host, 0, garbage);
    let valid = request(1 << 30).encode();
    harness.mailbox().post(host, 1, valid);

    assert!(wait_until(TEST_TIMEOUT, || harness.mailbox().ack(host, 1).is_some()));
    assert_eq!(harness.mailbox().ack(host, 0), None);
    assert_eq!(harness.mailbox().ack_count(), 1);

    spm.stop().unwrap();
}

#[test]
fn a_slot_is_served_again_only_when_it_changes() {
    let harness = SpmTestHarness::builder().block_backed(true).build();
    let spm = harness.coordinator();
    spm.start(&harness.start_request()).unwrap();

    let host = HostId::new(1);
    harness.mailbox().post(host, 0, request(1 << 30).encode());
    assert!(wait_until(TEST_TIMEOUT, || harness.jobs.completed().len() == 1));

    let second = request(2 << 30).encode();
    harness.mailbox().post(host, 0, second);
    assert!(wait_until(TEST_TIMEOUT, || harness.mailbox().ack(host, 0) == Some(second)));
    assert_eq!(harness.jobs.completed().len(), 2);

    spm.stop().unwrap();
}

#[test]
fn slow_extension_does_not_hold_up_other_hosts() {
    let harness = SpmTestHarness::builder().block_backed(true).build();
    let spm = harness.coordinator();
    spm.start(&harness.start_request()).unwrap();
    let gate = harness.jobs.gate();
    gate.close();

    let slow = HostId::new(1);
    harness.mailbox().post(slow, 0, request(1 << 30).encode());
    assert!(gate.wait_for_waiters(1, TEST_TIMEOUT));

    let other = HostId::new(2);
    harness.mailbox().post(other, 0, request(2 << 30).encode());
    assert!(gate.wait_for_waiters(2, TEST_TIMEOUT));
    assert_eq!(harness.mailbox().ack_count(), 0);

    gate.open();
    assert!(wait_until(TEST_TIMEOUT, || harness.mailbox().ack_count() == 2));
    assert!(harness.mailbox().ack(slow, 0).is_some());
    assert!(harness.mailbox().ack(other, 0).is_some());

    spm.stop().unwrap();
}

#[test]
fn mailbox_disabled_by_config() {
    let harness = SpmTestHarness::builder()
        .block_backed(true)
        .extend_on_demand(false)
        .build();
    let spm = harness.coordinator();
    spm.start(&harness.start_request()).unwrap();
    assert!(!spm.mailbox_running());
    spm.stop().unwrap();
}

#[test]
fn file_backed_pool_has_no_mailbox() {
    let harness = SpmTestHarness::new();
    let spm = harness.coordinator();
    spm.start(&harness.start_request()).unwrap();
    assert!(!spm.mailbox_running());
    spm.stop().unwrap();
}
