//! Integration tests for task execution semantics.

use std::sync::{Arc, Mutex, PoisonError};

use rstest::{fixture, rstest};
use stratadm::exec::{ExecError, ExecOptions, RemoteTarget};
use stratadm::task::steps::{Lambda, RemoteCommand};
use stratadm::task::{ErrorCode, Slot, StepOutcome, Task, TaskError, TaskOutcome};
use stratadm::test_support::ScriptedExecutor;

const HOSTNAME: Slot = Slot::new("hostname");

type Journal = Arc<Mutex<Vec<&'static str>>>;

#[fixture]
fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(journal: &Journal) -> Vec<&'static str> {
    journal
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

fn step(journal: &Journal, name: &'static str, outcome: fn() -> StepOutcome) -> Lambda {
    let log = Arc::clone(journal);
    Lambda::new(name, move |_| {
        log.lock().unwrap_or_else(PoisonError::into_inner).push(name);
        outcome()
    })
}

fn broken() -> TaskError {
    TaskError::Step {
        step: String::from("b"),
        message: String::from("disk full"),
    }
}

fn target() -> RemoteTarget {
    RemoteTarget {
        host: String::from("host1"),
        hostname: String::from("10.0.0.1"),
        user: None,
        ssh_port: 22,
    }
}

#[rstest]
fn skip_stops_primary_steps_but_not_post_steps(journal: Journal) {
    let task = Task::builder("t")
        .step(step(&journal, "a", || StepOutcome::Continue))
        .step(step(&journal, "b", || StepOutcome::Skip))
        .step(step(&journal, "c", || StepOutcome::Continue))
        .post_step(step(&journal, "p", || StepOutcome::Continue))
        .build()
        .expect("valid task");

    let outcome = task.execute(&ScriptedExecutor::new());

    assert_eq!(
        outcome,
        Ok(TaskOutcome::Skipped {
            step: String::from("b")
        })
    );
    assert_eq!(entries(&journal), ["a", "b", "p"]);
}

#[rstest]
fn primary_failure_wins_over_successful_post_steps(journal: Journal) {
    let task = Task::builder("t")
        .step(step(&journal, "a", || StepOutcome::Continue))
        .step(step(&journal, "b", || StepOutcome::Fail(broken())))
        .step(step(&journal, "c", || StepOutcome::Continue))
        .post_step(step(&journal, "p", || StepOutcome::Continue))
        .build()
        .expect("valid task");

    let outcome = task.execute(&ScriptedExecutor::new());

    assert_eq!(outcome, Err(broken()));
    assert_eq!(entries(&journal), ["a", "b", "p"]);
}

#[rstest]
fn command_output_flows_to_later_steps(journal: Journal) {
    let executor = ScriptedExecutor::new();
    executor.push_output("node-1\n");
    let log = Arc::clone(&journal);
    let task = Task::builder("inspect")
        .target(target())
        .step(
            RemoteCommand::new("read hostname", "hostname", ExecOptions::default())
                .output(HOSTNAME),
        )
        .step(
            Lambda::new("check hostname", move |ctx| match ctx.get("check hostname", HOSTNAME) {
                Ok(name) if name.trim() == "node-1" => {
                    log.lock().unwrap_or_else(PoisonError::into_inner).push("matched");
                    StepOutcome::Continue
                }
                Ok(_) => StepOutcome::Skip,
                Err(err) => StepOutcome::Fail(err),
            })
            .reads([HOSTNAME]),
        )
        .build()
        .expect("valid task");

    assert_eq!(task.execute(&executor), Ok(TaskOutcome::Completed));
    assert_eq!(entries(&journal), ["matched"]);
    let invocations = executor.invocations();
    let [invocation] = invocations.as_slice() else {
        panic!("expected one invocation, got {invocations:?}");
    };
    assert_eq!(invocation.host.as_deref(), Some("host1"));
    assert_eq!(invocation.command, "hostname");
}

#[test]
fn failed_commands_report_their_error_code() {
    let executor = ScriptedExecutor::new();
    executor.push_error(ExecError::Failed {
        host: String::from("host1"),
        status: Some(2),
        status_text: String::from("2"),
        output: String::from("permission denied"),
    });
    let task = Task::builder("prepare")
        .target(target())
        .step(
            RemoteCommand::new("make dirs", "mkdir -p /data", ExecOptions::default())
                .code(ErrorCode::CREATE_DIRECTORY),
        )
        .build()
        .expect("valid task");

    let err = task.execute(&executor).expect_err("command fails");

    assert_eq!(
        err,
        TaskError::Command {
            code: ErrorCode::CREATE_DIRECTORY,
            output: String::from("permission denied"),
        }
    );
    assert!(err.to_string().contains("permission denied"));
}

#[test]
fn unwritten_slots_are_rejected_before_anything_runs() {
    let executor = ScriptedExecutor::new();
    let result = Task::builder("broken wiring")
        .target(target())
        .step(Lambda::new("needs hostname", |_| StepOutcome::Continue).reads([HOSTNAME]))
        .build();

    assert!(matches!(result, Err(TaskError::UnwrittenSlot { .. })));
    assert!(executor.commands().is_empty());
}
