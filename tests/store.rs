//! Integration tests for the file-backed service store driven by tasks.

#[path = "common/documents.rs"]
mod documents;

use std::sync::Arc;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use stratadm::exec::ExecOptions;
use stratadm::task::steps::Engine;
use stratadm::test_support::ScriptedExecutor;
use stratadm::{
    ContainerState, Context, DeployConfig, DeployItems, FileServiceStore, Ops, ServiceStore,
    TaskError, TaskOutcome, parse_topology,
};
use tempfile::TempDir;

use documents::MDS_PAIR_TOPOLOGY;

struct Scratch {
    _dir: TempDir,
    path: Utf8PathBuf,
}

#[fixture]
fn scratch() -> Scratch {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = Utf8PathBuf::from_path_buf(dir.path().join("services.json"))
        .unwrap_or_else(|path| panic!("non-utf8 path: {}", path.display()));
    Scratch { _dir: dir, path }
}

#[fixture]
fn mds() -> DeployConfig {
    parse_topology(
        MDS_PAIR_TOPOLOGY,
        &Context::new(),
        &Arc::new(DeployItems::new()),
    )
    .unwrap_or_else(|err| panic!("topology: {err}"))
    .into_iter()
    .next()
    .expect("first mds")
}

fn ops(path: &Utf8PathBuf) -> Ops {
    let store: Arc<dyn ServiceStore> = Arc::new(FileServiceStore::new(path.clone()));
    Ops::new(
        "cluster1",
        store,
        Engine::new("docker", ExecOptions::default()),
    )
}

#[rstest]
fn removal_survives_a_restart(scratch: Scratch, mds: DeployConfig) {
    let executor = ScriptedExecutor::new();
    executor.push_output("c0ffee\n");
    let created = ops(&scratch.path)
        .create_task(&mds)
        .expect("create task")
        .execute(&executor);
    assert_eq!(created, Ok(TaskOutcome::Completed));

    let cleaned = ops(&scratch.path)
        .clean_task(&mds)
        .expect("clean task")
        .execute(&executor);
    assert_eq!(cleaned, Ok(TaskOutcome::Completed));

    let reopened = FileServiceStore::new(scratch.path.clone());
    assert_eq!(reopened.container_state(mds.id()), Ok(ContainerState::Removed));
    let started = ops(&scratch.path)
        .start_task(&mds)
        .expect("start task")
        .execute(&executor);
    assert_eq!(
        started,
        Err(TaskError::ContainerMissing {
            service_id: mds.id().to_owned(),
            removed: true,
        })
    );
}

#[rstest]
fn recreating_a_removed_service_records_the_new_container(scratch: Scratch, mds: DeployConfig) {
    let store = FileServiceStore::new(scratch.path.clone());
    store
        .insert_service("cluster1", mds.id(), "-")
        .unwrap_or_else(|err| panic!("seed: {err}"));
    let executor = ScriptedExecutor::new();
    executor.push_output("beef\n");

    let outcome = ops(&scratch.path)
        .create_task(&mds)
        .expect("create task")
        .execute(&executor);

    assert_eq!(outcome, Ok(TaskOutcome::Completed));
    assert_eq!(
        store.container_state(mds.id()),
        Ok(ContainerState::Created(String::from("beef")))
    );
}

#[rstest]
fn services_are_listed_per_cluster(scratch: Scratch) {
    let store = FileServiceStore::new(scratch.path.clone());
    for (cluster, service, container) in [("c1", "b", "2"), ("c2", "x", "9"), ("c1", "a", "1")] {
        store
            .insert_service(cluster, service, container)
            .unwrap_or_else(|err| panic!("insert: {err}"));
    }
    store
        .delete_service("b")
        .unwrap_or_else(|err| panic!("delete: {err}"));

    let listed = store
        .services("c1")
        .unwrap_or_else(|err| panic!("list: {err}"));
    let ids: Vec<_> = listed
        .iter()
        .map(|record| record.service_id.as_str())
        .collect();
    assert_eq!(ids, ["a"]);
    assert_eq!(store.get_container_id("b"), Ok(String::new()));
}
