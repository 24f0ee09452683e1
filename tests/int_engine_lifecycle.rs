#![cfg(unix)]

mod support;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use als_exec::engine::{ContainerLifecycleManager, ImagePuller};
use als_exec::{ContainerEngine, EnginePreference, Error, PullPolicy};
use support::{FakeEngine, IMAGE, IMAGE_ID};

#[test]
fn int_missing_policy_pulls_once_then_reuses_image() {
    let td = tempfile::tempdir().expect("tmpdir");
    let fe = FakeEngine::install(td.path(), ContainerEngine::Podman);
    let engine = fe.engine();
    let puller = ImagePuller::new(Duration::from_secs(10));

    let first = puller
        .ensure_image(&engine, IMAGE, PullPolicy::Missing)
        .expect("first ensure");
    assert!(!first.image_present);
    assert!(first.pull_required);
    assert!(first.pulled);

    let second = puller
        .ensure_image(&engine, IMAGE, PullPolicy::Missing)
        .expect("second ensure");
    assert!(second.image_present);
    assert!(!second.pull_required);
    assert!(!second.pulled);

    let pulls = fe.calls().iter().filter(|c| c.starts_with("pull ")).count();
    assert_eq!(pulls, 1, "calls: {:?}", fe.calls());
}

#[test]
fn int_failed_pull_names_image_and_engine() {
    let td = tempfile::tempdir().expect("tmpdir");
    let fe = FakeEngine::install(td.path(), ContainerEngine::Docker);
    fe.fail_pulls();
    let err = ImagePuller::new(Duration::from_secs(10))
        .ensure_image(&fe.engine(), IMAGE, PullPolicy::Always)
        .expect_err("pull must fail");
    assert!(matches!(err, Error::ImagePull { .. }), "got {err:?}");
    let msg = err.to_string();
    assert!(msg.contains(IMAGE) && msg.contains("docker"), "msg: {msg}");
    assert!(err.is_setup_failure());
}

#[test]
fn int_never_policy_with_absent_image_has_no_identity() {
    let td = tempfile::tempdir().expect("tmpdir");
    let fe = FakeEngine::install(td.path(), ContainerEngine::Podman);
    let puller = ImagePuller::new(Duration::from_secs(10));
    let outcome = puller
        .ensure_image(&fe.engine(), IMAGE, PullPolicy::Never)
        .expect("never policy does not fail");
    assert!(!outcome.pulled);
    let err = puller.identity(&fe.engine(), IMAGE).expect_err("absent");
    assert!(matches!(err, Error::ImageNotPresent { .. }), "got {err:?}");

    fe.set_image_present();
    let id = puller.identity(&fe.engine(), IMAGE).expect("identity");
    assert_eq!(id.content_id, IMAGE_ID);
    assert_eq!(id.reference, IMAGE);
}

#[test]
fn int_selector_uses_controlled_search_path() {
    let td = tempfile::tempdir().expect("tmpdir");
    let fe = FakeEngine::install(td.path(), ContainerEngine::Docker);
    let sel = fe.selector();
    let engine = sel.select(EnginePreference::Auto).expect("auto");
    assert_eq!(engine.kind(), ContainerEngine::Docker);
    let err = sel
        .select(EnginePreference::Podman)
        .expect_err("podman is not installed");
    assert!(err.to_string().contains("podman"), "err: {err}");
}

#[test]
fn int_container_removed_after_failing_body() {
    let td = tempfile::tempdir().expect("tmpdir");
    let fe = FakeEngine::install(td.path(), ContainerEngine::Podman);
    let engine = fe.engine();
    let lifecycle = ContainerLifecycleManager::new(Duration::from_secs(10));

    let res: Result<(), Error> = lifecycle.with_container(&engine, IMAGE, "doc_fetch_1", |h| {
        assert!(lifecycle.is_running(&engine, h.name()));
        Err(Error::Settings("body failed".into()))
    });
    assert!(matches!(res, Err(Error::Settings(_))));
    assert!(!lifecycle.is_running(&engine, "doc_fetch_1"));
    assert!(fe.running_containers().is_empty());
    assert!(fe.calls().iter().any(|c| c == "stop doc_fetch_1"));
}

#[test]
fn int_container_removed_after_panicking_body() {
    let td = tempfile::tempdir().expect("tmpdir");
    let fe = FakeEngine::install(td.path(), ContainerEngine::Podman);
    let engine = fe.engine();
    let lifecycle = ContainerLifecycleManager::new(Duration::from_secs(10));

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        lifecycle.with_container(&engine, IMAGE, "doc_fetch_2", |_h| -> als_exec::Result<()> {
            panic!("body panicked")
        })
    }));
    assert!(outcome.is_err());
    assert!(!lifecycle.is_running(&engine, "doc_fetch_2"));
}

#[test]
fn int_start_failure_is_fatal_and_body_never_runs() {
    let td = tempfile::tempdir().expect("tmpdir");
    let fe = FakeEngine::install(td.path(), ContainerEngine::Podman);
    fe.fail_runs();
    let lifecycle = ContainerLifecycleManager::new(Duration::from_secs(10));
    let mut ran = false;
    let err = lifecycle
        .with_container(&fe.engine(), IMAGE, "doc_fetch_3", |_h| {
            ran = true;
            Ok(())
        })
        .expect_err("start must fail");
    assert!(!ran);
    assert!(matches!(err, Error::ContainerStart { .. }), "got {err:?}");
    assert!(err.to_string().contains(IMAGE));
}

#[test]
fn int_pre_cleanup_runs_before_start() {
    let td = tempfile::tempdir().expect("tmpdir");
    let fe = FakeEngine::install(td.path(), ContainerEngine::Podman);
    let lifecycle = ContainerLifecycleManager::new(Duration::from_secs(10));
    lifecycle
        .with_container(&fe.engine(), IMAGE, "doc_fetch_4", |_h| Ok(()))
        .expect("body ok");
    let calls = fe.calls();
    let first_stop = calls.iter().position(|c| c == "stop doc_fetch_4").expect("stop");
    let run = calls.iter().position(|c| c.starts_with("run ")).expect("run");
    assert!(first_stop < run, "calls: {calls:?}");
    assert_eq!(
        calls[run],
        format!("run --rm -i -d --name doc_fetch_4 {IMAGE} bash")
    );
}
