//! Unit tests for task steps.

use std::collections::BTreeMap;
use std::sync::Arc;

use rstest::{fixture, rstest};

use super::*;
use crate::exec::RemoteTarget;
use crate::test_support::ScriptedExecutor;

const CONTAINER: Slot = Slot::new("container_id");
const OUTPUT: Slot = Slot::new("output");
const SUCCESS: Slot = Slot::new("success");

#[fixture]
fn engine() -> Engine {
    Engine::new(
        "docker",
        ExecOptions {
            sudo: true,
            ..ExecOptions::default()
        },
    )
}

#[fixture]
fn target() -> RemoteTarget {
    RemoteTarget {
        host: String::from("host1"),
        hostname: String::from("10.0.0.1"),
        user: None,
        ssh_port: 22,
    }
}

fn seeded(id: &str) -> BTreeMap<Slot, String> {
    BTreeMap::from([(CONTAINER, id.to_owned())])
}

#[rstest]
fn create_command_uses_host_network(engine: Engine) {
    let spec = ContainerSpec {
        name: String::from("dingofs-mds-abc"),
        image: String::from("dingodatabase/dingofs"),
        mounts: vec![Mount {
            host: String::from("/data/mds"),
            container: String::from("/dingofs/mds/data"),
        }],
        restart_policy: String::from("always"),
        args: vec![String::from("--role"), String::from("mds")],
        ..ContainerSpec::default()
    };

    let command = spec.create_command(&engine);

    assert!(
        command.starts_with("docker create --name dingofs-mds-abc --network host --restart always"),
        "unexpected command: {command}"
    );
    assert!(command.contains("--volume"));
    assert!(command.ends_with("dingodatabase/dingofs --role mds"));
}

#[rstest]
fn create_container_records_the_id(engine: Engine, target: RemoteTarget) {
    let executor = ScriptedExecutor::new();
    executor.push_output("f00dfeed\n");
    let mut ctx = TaskContext::new(&executor, Some(&target), BTreeMap::new());
    let step = CreateContainer::new(
        engine,
        ContainerSpec {
            name: String::from("svc"),
            image: String::from("busybox"),
            ..ContainerSpec::default()
        },
        CONTAINER,
    );

    assert_eq!(step.execute(&mut ctx), StepOutcome::Continue);
    assert_eq!(ctx.try_get(CONTAINER), Some("f00dfeed"));
    let invocations = executor.invocations();
    let first = invocations.first().expect("one call");
    assert_eq!(first.host.as_deref(), Some("host1"));
    assert!(first.options.sudo);
}

#[rstest]
fn lifecycle_steps_read_the_container_slot(engine: Engine, target: RemoteTarget) {
    let executor = ScriptedExecutor::new();
    let mut ctx = TaskContext::new(&executor, Some(&target), seeded("abc123"));

    let start = StartContainer::new(engine.clone(), CONTAINER);
    let stop = StopContainer::new(engine.clone(), CONTAINER);
    let remove = RemoveContainer::new(engine, ContainerRef::Id(String::from("named")));

    assert_eq!(start.reads(), vec![CONTAINER]);
    assert!(remove.reads().is_empty());
    for step in [&start as &dyn Step, &stop, &remove] {
        assert_eq!(step.execute(&mut ctx), StepOutcome::Continue);
    }
    assert_eq!(
        executor.commands(),
        [
            "docker start abc123",
            "docker stop abc123",
            "docker rm named"
        ]
    );
}

#[rstest]
fn missing_slot_values_fail_the_step(engine: Engine, target: RemoteTarget) {
    let executor = ScriptedExecutor::new();
    let mut ctx = TaskContext::new(&executor, Some(&target), BTreeMap::new());

    let outcome = StartContainer::new(engine, CONTAINER).execute(&mut ctx);

    assert_eq!(
        outcome,
        StepOutcome::Fail(TaskError::EmptySlot {
            step: String::from("start container"),
            slot: String::from("container_id"),
        })
    );
    assert!(executor.commands().is_empty());
}

#[rstest]
fn bound_output_absorbs_failures(target: RemoteTarget) {
    let executor = ScriptedExecutor::new();
    executor.push_error(ExecError::Failed {
        host: String::from("host1"),
        status: Some(1),
        status_text: String::from("1"),
        output: String::from("no such file"),
    });
    let mut ctx = TaskContext::new(&executor, Some(&target), BTreeMap::new());
    let step = RemoteCommand::new("probe", "ls /missing", ExecOptions::default())
        .output(OUTPUT)
        .success(SUCCESS);

    assert_eq!(step.writes(), vec![OUTPUT, SUCCESS]);
    assert_eq!(step.execute(&mut ctx), StepOutcome::Continue);
    assert_eq!(ctx.try_get(OUTPUT), Some("no such file"));
    assert_eq!(ctx.try_get(SUCCESS), Some("false"));
}

#[rstest]
#[case::timeout(
    ExecError::TimedOut {
        host: String::from("host1"),
        command: String::from("sleep 9"),
        timeout_secs: 1,
    },
    true
)]
#[case::failure(
    ExecError::Failed {
        host: String::from("host1"),
        status: Some(2),
        status_text: String::from("2"),
        output: String::from("boom"),
    },
    false
)]
fn unbound_failures_are_classified(
    target: RemoteTarget,
    #[case] error: ExecError,
    #[case] timed_out: bool,
) {
    let executor = ScriptedExecutor::new();
    executor.push_error(error);
    let mut ctx = TaskContext::new(&executor, Some(&target), BTreeMap::new());

    let outcome = RemoteCommand::new("mkdir", "mkdir -p /x", ExecOptions::default())
        .code(ErrorCode::CREATE_DIRECTORY)
        .execute(&mut ctx);

    let StepOutcome::Fail(err) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    if timed_out {
        assert!(matches!(err, TaskError::TimedOut { .. }));
    } else {
        assert_eq!(
            err,
            TaskError::Command {
                code: ErrorCode::CREATE_DIRECTORY,
                output: String::from("boom"),
            }
        );
    }
}

#[rstest]
fn sync_file_rewrites_through_a_temp_file(engine: Engine, target: RemoteTarget) {
    let executor = ScriptedExecutor::new();
    executor.push_output("");
    executor.push_output("port=1\nname=x\n");
    let mut ctx = TaskContext::new(&executor, Some(&target), seeded("abc123"));
    let mutator: LineMutator = Arc::new(|line: &str| {
        if line.starts_with("port=") {
            String::from("port=6700")
        } else {
            line.to_owned()
        }
    });
    let step = SyncFile::new(
        engine,
        CONTAINER,
        "/dingofs/conf/mds.template",
        "/dingofs/conf/mds.conf",
        "/tmp/stratadm-sync",
        mutator,
    );

    assert_eq!(step.execute(&mut ctx), StepOutcome::Continue);
    let commands = executor.commands();
    assert_eq!(commands.len(), 4);
    assert_eq!(
        commands.get(1).map(String::as_str),
        Some("cat /tmp/stratadm-sync")
    );
    let write = commands.get(2).expect("write command");
    assert!(write.contains("port=6700"), "unexpected write: {write}");
    assert!(write.contains("name=x"));
    assert!(write.ends_with("> /tmp/stratadm-sync"));
}

#[rstest]
fn sync_file_writes_large_files_in_bounded_chunks(engine: Engine, target: RemoteTarget) {
    let template: String = (0..12_000)
        .map(|index| format!("key_{index:05}=value\n"))
        .collect();
    assert!(template.len() > 128 * 1024);
    let executor = ScriptedExecutor::new();
    executor.push_output("");
    executor.push_output(template.clone());
    let mut ctx = TaskContext::new(&executor, Some(&target), seeded("abc123"));
    let step = SyncFile::new(
        engine,
        CONTAINER,
        "/dingofs/conf/mds.template",
        "/dingofs/conf/mds.conf",
        "/tmp/stratadm-sync",
        Arc::new(|line: &str| line.to_owned()),
    );

    assert_eq!(step.execute(&mut ctx), StepOutcome::Continue);
    let commands = executor.commands();
    assert!(commands.iter().all(|command| command.len() < 128 * 1024));
    let writes: Vec<&str> = commands
        .iter()
        .map(String::as_str)
        .filter(|command| command.starts_with("printf"))
        .collect();
    assert!(writes.len() > 1, "expected several writes, got {}", writes.len());
    let mut written = String::new();
    for (position, write) in writes.iter().enumerate() {
        let redirect = if position == 0 {
            "' > /tmp/stratadm-sync"
        } else {
            "' >> /tmp/stratadm-sync"
        };
        let payload = write
            .strip_prefix("printf '%s' '")
            .and_then(|rest| rest.strip_suffix(redirect))
            .unwrap_or_else(|| panic!("unexpected write: {write}"));
        written.push_str(payload);
    }
    assert_eq!(written, template);
    assert!(
        commands
            .last()
            .is_some_and(|command| command.starts_with("docker cp /tmp/stratadm-sync "))
    );
}

#[rstest]
fn sync_file_truncates_the_temp_file_for_empty_content(engine: Engine, target: RemoteTarget) {
    let executor = ScriptedExecutor::new();
    let mut ctx = TaskContext::new(&executor, Some(&target), seeded("abc123"));
    let step = SyncFile::new(
        engine,
        CONTAINER,
        "/a",
        "/b",
        "/tmp/stratadm-sync",
        Arc::new(|line: &str| line.to_owned()),
    );

    assert_eq!(step.execute(&mut ctx), StepOutcome::Continue);
    assert_eq!(
        executor.commands().get(2).map(String::as_str),
        Some("printf '%s' '' > /tmp/stratadm-sync")
    );
}

#[rstest]
fn write_chunks_split_on_character_boundaries() {
    let text = "é".repeat(40_000);
    let chunks = file::write_chunks(&text);

    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|chunk| chunk.len() <= 64 * 1024));
    assert_eq!(chunks.concat(), text);
    assert!(file::write_chunks("").is_empty());
}

#[rstest]
fn write_chunks_weigh_single_quotes() {
    let text = "'".repeat(10_000);
    let chunks = file::write_chunks(&text);

    assert!(chunks.iter().all(|chunk| chunk.len() <= 4 * 1024));
    assert_eq!(chunks.concat(), text);
}

#[rstest]
fn mutate_lines_keeps_trailing_newline() {
    let upper = |line: &str| line.to_uppercase();
    assert_eq!(file::mutate_lines("a\nb\n", &upper), "A\nB\n");
    assert_eq!(file::mutate_lines("a\nb", &upper), "A\nB");
    assert_eq!(file::mutate_lines("", &upper), "");
}

#[rstest]
fn mutate_lines_keeps_crlf_endings() {
    let identity = |line: &str| line.to_owned();
    let upper = |line: &str| line.to_uppercase();
    assert_eq!(
        file::mutate_lines("port=1\r\nname=x\r\n", &identity),
        "port=1\r\nname=x\r\n"
    );
    assert_eq!(file::mutate_lines("a\r\nb\nc", &upper), "A\r\nB\nC");
}

#[rstest]
fn remove_file_tolerates_missing_files(target: RemoteTarget) {
    let executor = ScriptedExecutor::new();
    let mut ctx = TaskContext::new(&executor, Some(&target), BTreeMap::new());

    let outcome = RemoveFile::new("/tmp/stratadm-sync", ExecOptions::default()).execute(&mut ctx);

    assert_eq!(outcome, StepOutcome::Continue);
    assert_eq!(executor.commands(), ["rm -f /tmp/stratadm-sync"]);
}
