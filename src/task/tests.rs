//! Unit tests for task building and execution.

use std::sync::{Arc, Mutex, PoisonError};

use rstest::rstest;

use super::steps::Lambda;
use super::*;
use crate::test_support::ScriptedExecutor;

const ID: Slot = Slot::new("id");
const OTHER: Slot = Slot::new("other");

fn failing(name: &str, message: &str) -> Lambda {
    let err = TaskError::Step {
        step: name.to_owned(),
        message: message.to_owned(),
    };
    Lambda::new(name, move |_| StepOutcome::Fail(err.clone()))
}

#[test]
fn reading_before_writing_is_rejected() {
    let result = Task::builder("create service")
        .step(Lambda::new("use id", |_| StepOutcome::Continue).reads([ID]))
        .step(Lambda::new("write id", |_| StepOutcome::Continue).writes([ID]))
        .build();

    assert_eq!(
        result.err(),
        Some(TaskError::UnwrittenSlot {
            task: String::from("create service"),
            step: String::from("use id"),
            slot: String::from("id"),
        })
    );
}

#[rstest]
#[case::seeded(true)]
#[case::written_earlier(false)]
fn satisfied_reads_build(#[case] seeded: bool) {
    let mut builder = Task::builder("t");
    if seeded {
        builder = builder.seed(ID, "abc");
    } else {
        builder = builder.step(Lambda::new("write", |ctx| {
            ctx.set(ID, "abc");
            StepOutcome::Continue
        })
        .writes([ID]));
    }
    let task = builder
        .step(Lambda::new("read", |ctx| match ctx.get("read", ID) {
            Ok("abc") => StepOutcome::Continue,
            Ok(other) => StepOutcome::Fail(TaskError::Step {
                step: String::from("read"),
                message: format!("unexpected {other}"),
            }),
            Err(err) => StepOutcome::Fail(err),
        })
        .reads([ID]))
        .build()
        .expect("wiring is valid");

    let outcome = task.execute(&ScriptedExecutor::new());
    assert_eq!(outcome, Ok(TaskOutcome::Completed));
}

#[test]
fn post_steps_may_read_slots_written_by_primary_steps() {
    let task = Task::builder("sync")
        .step(Lambda::new("write", |_| StepOutcome::Continue).writes([OTHER]))
        .post_step(Lambda::new("cleanup", |ctx| {
            if ctx.try_get(OTHER).is_some() {
                StepOutcome::Continue
            } else {
                StepOutcome::Skip
            }
        })
        .reads([OTHER]))
        .build();
    assert!(task.is_ok());
}

#[test]
fn post_step_errors_surface_after_success() {
    let task = Task::builder("t")
        .step(Lambda::new("ok", |_| StepOutcome::Continue))
        .post_step(failing("cleanup", "disk full"))
        .build()
        .expect("valid task");

    assert_eq!(
        task.execute(&ScriptedExecutor::new()),
        Err(TaskError::Step {
            step: String::from("cleanup"),
            message: String::from("disk full"),
        })
    );
}

#[test]
fn post_step_errors_surface_after_skip() {
    let task = Task::builder("t")
        .step(Lambda::new("already done", |_| StepOutcome::Skip))
        .post_step(failing("cleanup", "disk full"))
        .build()
        .expect("valid task");

    assert!(matches!(
        task.execute(&ScriptedExecutor::new()),
        Err(TaskError::Step { .. })
    ));
}

#[test]
fn every_post_step_runs_even_when_one_fails() {
    let ran = Arc::new(Mutex::new(Vec::new()));
    let record = |name: &'static str| {
        let log = Arc::clone(&ran);
        Lambda::new(name, move |_| {
            log.lock().unwrap_or_else(PoisonError::into_inner).push(name);
            StepOutcome::Continue
        })
    };
    let task = Task::builder("t")
        .step(failing("main", "broken"))
        .post_step(failing("first cleanup", "also broken"))
        .post_step(record("second cleanup"))
        .build()
        .expect("valid task");

    let result = task.execute(&ScriptedExecutor::new());

    assert_eq!(
        result,
        Err(TaskError::Step {
            step: String::from("main"),
            message: String::from("broken"),
        })
    );
    assert_eq!(
        *ran.lock().unwrap_or_else(PoisonError::into_inner),
        ["second cleanup"]
    );
}

#[test]
fn debug_output_lists_step_names() {
    let task = Task::builder("start service")
        .subname("host1 abc")
        .step(Lambda::new("start container", |_| StepOutcome::Continue))
        .build()
        .expect("valid task");

    let rendered = format!("{task:?}");
    assert!(rendered.contains("start container"));
    assert_eq!(task.subname(), "host1 abc");
    assert!(task.target().is_none());
}

#[rstest]
#[case(None, false, Ok(()))]
#[case(
    Some(ExecError::MissingTarget { command: String::from("true") }),
    true,
    Ok(())
)]
fn post_handle_passes_through(
    #[case] error: Option<ExecError>,
    #[case] bound: bool,
    #[case] expected: Result<(), TaskError>,
) {
    assert_eq!(post_handle(bound, error, ErrorCode::RUN_COMMAND), expected);
}

#[test]
fn post_handle_wraps_errors_without_output() {
    let error = ExecError::Spawn {
        program: String::from("ssh"),
        message: String::from("not found"),
    };
    assert_eq!(
        post_handle(false, Some(error.clone()), ErrorCode::START_CONTAINER),
        Err(TaskError::Exec {
            code: ErrorCode::START_CONTAINER,
            source: error,
        })
    );
}
