//! Upgrade campaigns: master first, dependents by connectivity.

use assert_matches::assert_matches;
use std::thread;

use spm_coordinator::{SpmCoordinator, StartRequest, UpgradeStarted};
use spm_core::effects::DomainHandle;
use spm_core::types::{upgrade_resource, STORAGE_NAMESPACE};
use spm_core::{DomainClass, Role, SpmError};
use spm_testkit::{init_tracing, wait_until, SpmTestHarness, TEST_TIMEOUT};

fn wait_idle(spm: &SpmCoordinator) -> bool {
    wait_until(TEST_TIMEOUT, || {
        spm.upgrade_status()
            .map(|s| s.pending.is_empty())
            .unwrap_or(false)
    })
}

#[test]
fn master_is_upgraded_before_dependents() {
    init_tracing();
    let harness = SpmTestHarness::builder()
        .master_version(3)
        .data_domain(3, true)
        .data_domain(3, true)
        .build();
    let spm = harness.coordinator();
    spm.start(&harness.start_request()).unwrap();
    assert!(wait_idle(&spm));

    let started = spm.upgrade_pool(4).unwrap();
    assert_eq!(
        started,
        UpgradeStarted {
            status: "started".to_string(),
            target: 4,
        }
    );
    assert!(wait_idle(&spm));
    assert_eq!(spm.upgrade_status().unwrap().target, None);

    let log = harness.domains.upgrade_log();
    let events = log.events();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].domain, harness.master.id());
    for member in &harness.members {
        assert_eq!(member.current_version(), 4);
        assert!(log.position(member.id()) > log.position(harness.master.id()));
    }
    assert_eq!(harness.connectivity.subscriber_count(), 0);

    spm.stop().unwrap();
}

#[test]
fn unreachable_domains_upgrade_on_connect() {
    let harness = SpmTestHarness::builder()
        .master_version(3)
        .domain(DomainClass::Iso, 3, false)
        .data_domain(3, false)
        .build();
    let iso = harness.members[0].clone();
    let data = harness.members[1].clone();

    let spm = harness.coordinator();
    let request = StartRequest {
        expected_domain_version: Some(4),
        ..harness.start_request()
    };
    spm.start(&request).unwrap();

    assert_eq!(harness.master.current_version(), 4);
    let status = spm.upgrade_status().unwrap();
    assert_eq!(status.target, Some(4));
    assert_eq!(status.pending.len(), 2);
    assert_eq!(harness.connectivity.subscriber_count(), 1);

    harness.connectivity.set_valid(iso.id(), true);
    assert!(wait_until(TEST_TIMEOUT, || {
        !spm.upgrade_status().unwrap().pending.contains(&iso.id())
    }));
    assert_eq!(iso.current_version(), 3);

    harness.connectivity.set_valid(data.id(), true);
    assert!(wait_idle(&spm));
    assert_eq!(data.current_version(), 4);

    let log = harness.domains.upgrade_log();
    assert_eq!(log.position(iso.id()), None);
    assert!(log.position(data.id()) > log.position(harness.master.id()));
    assert_eq!(harness.connectivity.subscriber_count(), 0);

    spm.stop().unwrap();
}

#[test]
fn concurrent_upgrade_requests_are_rejected() {
    let harness = SpmTestHarness::builder().data_domain(3, true).build();
    let spm = harness.coordinator();
    spm.start(&harness.start_request()).unwrap();
    assert!(wait_idle(&spm));

    let gate = harness.master.upgrade_gate();
    gate.close();
    thread::scope(|s| {
        let first = s.spawn(|| spm.upgrade_pool(4));
        assert!(gate.wait_for_waiters(1, TEST_TIMEOUT));

        assert_matches!(
            spm.upgrade_pool(4),
            Err(SpmError::UpgradeInProgress { .. })
        );

        gate.open();
        first.join().unwrap().expect("first campaign runs");
    });

    assert!(wait_idle(&spm));
    assert_eq!(harness.members[0].current_version(), 4);
    spm.stop().unwrap();
}

#[test]
fn pending_campaign_blocks_new_request() {
    let harness = SpmTestHarness::builder().data_domain(3, false).build();
    let spm = harness.coordinator();
    let request = StartRequest {
        expected_domain_version: Some(4),
        ..harness.start_request()
    };
    spm.start(&request).unwrap();

    assert_matches!(
        spm.upgrade_pool(5),
        Err(SpmError::UpgradeInProgress { .. })
    );
    spm.stop().unwrap();
}

#[test]
fn target_below_current_version_is_rejected() {
    let harness = SpmTestHarness::builder().master_version(4).build();
    let spm = harness.coordinator();
    spm.start(&harness.start_request()).unwrap();

    let err = spm.upgrade_pool(3).unwrap_err();
    assert_matches!(
        err,
        SpmError::VersionTooAdvanced {
            current: 4,
            requested: 3,
            ..
        }
    );
    assert!(harness.domains.upgrade_log().events().is_empty());
    spm.stop().unwrap();
}

#[test]
fn unsupported_target_is_rejected() {
    let harness = SpmTestHarness::builder()
        .supported_versions(vec![3, 4])
        .build();
    let spm = harness.coordinator();
    spm.start(&harness.start_request()).unwrap();

    assert_matches!(
        spm.upgrade_pool(5),
        Err(SpmError::UnsupportedVersion { version: 5 })
    );
    spm.upgrade_pool(4).unwrap();
    assert_eq!(harness.master.current_version(), 4);
    spm.stop().unwrap();
}

#[test]
fn failed_dependent_stays_pending_until_retried() {
    let harness = SpmTestHarness::builder().data_domain(3, true).build();
    let member = harness.members[0].clone();
    let spm = harness.coordinator();
    spm.start(&harness.start_request()).unwrap();
    assert!(wait_idle(&spm));

    member.set_fail_upgrade(true);
    spm.upgrade_pool(4).unwrap();
    assert!(wait_until(TEST_TIMEOUT, || member.upgrade_gate().passed() >= 1));
    assert_eq!(spm.upgrade_status().unwrap().pending, vec![member.id()]);

    member.set_fail_upgrade(false);
    assert!(wait_until(TEST_TIMEOUT, || {
        harness.connectivity.set_valid(member.id(), true);
        member.current_version() == 4
    }));
    assert!(wait_idle(&spm));
    spm.stop().unwrap();
}

#[test]
fn stop_abandons_pending_domains() {
    let harness = SpmTestHarness::builder().data_domain(3, false).build();
    let spm = harness.coordinator();
    let request = StartRequest {
        expected_domain_version: Some(4),
        ..harness.start_request()
    };
    spm.start(&request).unwrap();
    assert_eq!(harness.connectivity.subscriber_count(), 1);

    spm.stop().unwrap();
    assert_eq!(harness.connectivity.subscriber_count(), 0);

    harness
        .connectivity
        .set_valid(harness.members[0].id(), true);
    assert_eq!(harness.members[0].current_version(), 3);
}

#[test]
fn upgrade_authorized_before_stop_is_refused_after_it() {
    let harness = SpmTestHarness::builder()
        .master_version(3)
        .data_domain(3, true)
        .build();
    let spm = harness.coordinator();
    spm.start(&harness.start_request()).unwrap();
    assert!(wait_idle(&spm));

    let campaign = harness
        .resources
        .park_next(STORAGE_NAMESPACE, &upgrade_resource(harness.pool_id));
    thread::scope(|s| {
        let request = s.spawn(|| spm.upgrade_pool(4));
        assert!(campaign.wait_for_waiters(1, TEST_TIMEOUT));

        spm.stop().unwrap();
        assert_eq!(spm.role(), Role::Free);
        assert_eq!(harness.cluster_lock.holder(harness.pool_id), None);

        campaign.open();
        assert_matches!(
            request.join().unwrap(),
            Err(SpmError::Authorization { .. })
        );
    });

    assert_eq!(harness.master.current_version(), 3);
    assert!(harness.domains.upgrade_log().events().is_empty());
    assert_eq!(harness.connectivity.subscriber_count(), 0);

    spm.start(&harness.start_request()).unwrap();
    assert!(wait_idle(&spm));
    spm.upgrade_pool(4).unwrap();
    assert!(wait_idle(&spm));
    assert_eq!(harness.master.current_version(), 4);
    spm.stop().unwrap();
}
