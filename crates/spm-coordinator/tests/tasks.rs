//! Task scheduling, release blocking and recovery through the coordinator.

use assert_matches::assert_matches;

use spm_coordinator::{SpmCoordinator, TaskStore};
use spm_core::types::{image_namespace, SPM_TASK_TAG};
use spm_core::{DomainId, ImageId, JobSpec, Role, SpmError, TaskId, TaskRecord, TaskStatus, VolumeId};
use spm_testkit::{init_tracing, wait_until, SpmTestHarness, TEST_TIMEOUT};

fn delete_job(domain: DomainId, image: ImageId) -> JobSpec {
    JobSpec::DeleteVolume {
        domain,
        image,
        volumes: vec![VolumeId::new()],
        post_zero: false,
    }
}

fn wait_for_status(spm: &SpmCoordinator, task: TaskId, status: TaskStatus) -> bool {
    wait_until(TEST_TIMEOUT, || {
        spm.task_status(task)
            .map(|r| r.status == status)
            .unwrap_or(false)
    })
}

#[test]
fn stop_waits_for_running_delete() {
    init_tracing();
    let harness = SpmTestHarness::new();
    let spm = harness.coordinator();
    spm.start(&harness.start_request()).unwrap();
    assert_eq!(spm.lver(), 1);

    let domain = DomainId::new();
    let image = ImageId::new();
    harness.jobs.gate().close();
    let task = spm
        .schedule("deleteVolume", delete_job(domain, image))
        .expect("scheduled");
    assert!(harness.jobs.gate().wait_for_waiters(1, TEST_TIMEOUT));

    let record = spm.task_status(task).unwrap();
    assert_eq!(record.status, TaskStatus::Running);
    assert_eq!(record.lver, 1);
    assert!(!harness
        .resources
        .is_free(&image_namespace(domain), &image.to_string()));

    let err = spm.stop().unwrap_err();
    assert_matches!(err, SpmError::TaskInProgress { ref tasks, .. } if tasks == &vec![task]);
    assert_eq!(spm.role(), Role::Acquired);

    harness.jobs.gate().open();
    assert!(wait_for_status(&spm, task, TaskStatus::Done));
    assert!(harness
        .resources
        .is_free(&image_namespace(domain), &image.to_string()));

    spm.stop().expect("no tasks left");
    assert_eq!(spm.role(), Role::Free);
}

#[test]
fn mutation_operations_become_tasks() {
    let harness = SpmTestHarness::new();
    let spm = harness.coordinator();
    spm.start(&harness.start_request()).unwrap();

    let domain = DomainId::new();
    let image = ImageId::new();
    let volume = VolumeId::new();
    let ids = vec![
        spm.create_volume(domain, image, volume, 1 << 30, None, "root disk")
            .unwrap(),
        spm.extend_volume(domain, image, volume, 2 << 30).unwrap(),
        spm.copy_image(
            domain,
            image,
            volume,
            DomainId::new(),
            ImageId::new(),
            VolumeId::new(),
        )
        .unwrap(),
        spm.move_image(domain, DomainId::new(), image, true).unwrap(),
        spm.merge_snapshots(domain, image, volume, VolumeId::new())
            .unwrap(),
        spm.attach_domain(domain).unwrap(),
        spm.activate_domain(domain).unwrap(),
        spm.deactivate_domain(domain).unwrap(),
        spm.detach_domain(domain).unwrap(),
    ];

    for id in &ids {
        assert!(wait_for_status(&spm, *id, TaskStatus::Done));
    }
    let names: Vec<String> = ids
        .iter()
        .map(|id| spm.task_status(*id).unwrap().name)
        .collect();
    assert!(names.contains(&"create_volume".to_string()));
    assert!(names.contains(&"detach_domain".to_string()));
    assert_eq!(harness.jobs.completed().len(), ids.len());
    assert_eq!(spm.list_tasks(Some(SPM_TASK_TAG)).unwrap().len(), ids.len());
    assert!(spm.list_tasks(Some("other")).unwrap().is_empty());

    spm.stop().unwrap();
}

#[test]
fn failed_job_marks_task_failed() {
    let harness = SpmTestHarness::new();
    let spm = harness.coordinator();
    spm.start(&harness.start_request()).unwrap();
    harness.jobs.fail_kind("merge_snapshots");

    let task = spm
        .merge_snapshots(DomainId::new(), ImageId::new(), VolumeId::new(), VolumeId::new())
        .unwrap();
    assert!(wait_for_status(&spm, task, TaskStatus::Failed));
    let record = spm.task_status(task).unwrap();
    assert!(record.error.unwrap().contains("merge_snapshots"));

    spm.stop().expect("failed tasks do not block release");
}

#[test]
fn abort_only_affects_pending_tasks() {
    let harness = SpmTestHarness::builder().task_workers(1).build();
    let spm = harness.coordinator();
    spm.start(&harness.start_request()).unwrap();

    harness.jobs.gate().close();
    let running = spm
        .schedule("first", delete_job(DomainId::new(), ImageId::new()))
        .unwrap();
    assert!(harness.jobs.gate().wait_for_waiters(1, TEST_TIMEOUT));
    let queued = spm
        .schedule("second", delete_job(DomainId::new(), ImageId::new()))
        .unwrap();

    assert_eq!(spm.abort_task(running).unwrap(), TaskStatus::Running);
    assert_eq!(spm.abort_task(queued).unwrap(), TaskStatus::Pending);
    assert_matches!(
        spm.clear_task(running),
        Err(SpmError::TaskNotFinished { .. })
    );

    harness.jobs.gate().open();
    assert!(wait_for_status(&spm, running, TaskStatus::Done));
    assert!(wait_for_status(&spm, queued, TaskStatus::Aborted));
    assert_eq!(harness.jobs.started().len(), 1);

    spm.clear_task(running).unwrap();
    assert_matches!(
        spm.task_status(running),
        Err(SpmError::UnknownTask { .. })
    );
    assert_matches!(
        spm.abort_task(TaskId::new()),
        Err(SpmError::UnknownTask { .. })
    );

    spm.stop().unwrap();
}

#[test]
fn unfinished_tasks_resume_on_next_election() {
    let harness = SpmTestHarness::new();
    let store = TaskStore::open(harness.tasks_dir()).unwrap();

    let mut interrupted = TaskRecord::new(
        "extend",
        SPM_TASK_TAG,
        harness.pool_id,
        1,
        JobSpec::ExtendVolume {
            domain: DomainId::new(),
            image: ImageId::new(),
            volume: VolumeId::new(),
            new_size: 4 << 30,
        },
    );
    interrupted.status = TaskStatus::Running;
    store.save(&interrupted).unwrap();

    let mut finished = TaskRecord::new(
        "delete",
        SPM_TASK_TAG,
        harness.pool_id,
        1,
        delete_job(DomainId::new(), ImageId::new()),
    );
    finished.status = TaskStatus::Done;
    store.save(&finished).unwrap();

    let spm = harness.coordinator();
    spm.start(&harness.start_request()).unwrap();

    assert!(wait_for_status(&spm, interrupted.id, TaskStatus::Done));
    assert_eq!(harness.jobs.completed(), vec![interrupted.job.clone()]);
    assert_eq!(
        spm.task_status(finished.id).unwrap().status,
        TaskStatus::Done
    );

    let persisted = store.load_all().unwrap();
    let resumed = persisted.iter().find(|r| r.id == interrupted.id).unwrap();
    assert_eq!(resumed.status, TaskStatus::Done);

    spm.clear_task(finished.id).unwrap();
    assert_eq!(store.load_all().unwrap().len(), 1);
    spm.stop().unwrap();
}

#[test]
fn finished_tasks_survive_release() {
    let harness = SpmTestHarness::new();
    let spm = harness.coordinator();
    spm.start(&harness.start_request()).unwrap();
    let task = spm
        .schedule("delete", delete_job(DomainId::new(), ImageId::new()))
        .unwrap();
    assert!(wait_for_status(&spm, task, TaskStatus::Done));
    spm.stop().unwrap();

    assert_matches!(spm.task_status(task), Err(SpmError::Authorization { .. }));

    let successor = harness.coordinator();
    successor.start(&harness.start_request()).unwrap();
    assert_eq!(
        successor.task_status(task).unwrap().status,
        TaskStatus::Done
    );
    assert_eq!(harness.jobs.completed().len(), 1);
    successor.stop().unwrap();
}
