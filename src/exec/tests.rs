//! Unit tests for the exec module.

use super::*;
use crate::context::HostEntry;
use crate::test_support::ScriptedRunner;
use rstest::{fixture, rstest};

/// Helper to assert validation rejects empty or whitespace values for a given field.
fn assert_validation_rejects_field<F>(mut cfg: ExecConfig, field_name: &str, set_field: F)
where
    F: Fn(&mut ExecConfig, String),
{
    for invalid in ["", "  "] {
        set_field(&mut cfg, invalid.to_owned());
        let Err(err) = cfg.validate() else {
            panic!("{field_name} '{invalid}' should fail");
        };
        let ExecError::InvalidConfig { ref field } = err else {
            panic!("expected InvalidConfig for {field_name}, got {err:?}");
        };
        assert_eq!(field, field_name, "expected invalid field {field_name}");
    }
}

#[fixture]
fn base_config() -> ExecConfig {
    ExecConfig {
        ssh_bin: String::from("ssh"),
        ssh_user: String::from("root"),
        ssh_batch_mode: true,
        ssh_strict_host_key_checking: false,
        ssh_known_hosts_file: String::from("/dev/null"),
        ssh_identity_file: None,
        shell_bin: String::from("bash"),
        sudo_alias: String::from("sudo"),
        engine_bin: String::from("docker"),
        timeout_secs: DEFAULT_TIMEOUT_SECS,
    }
}

#[fixture]
fn target() -> RemoteTarget {
    RemoteTarget {
        host: String::from("host1"),
        hostname: String::from("10.0.0.1"),
        user: Some(String::from("dingo")),
        ssh_port: 2222,
    }
}

fn arg_strings(args: &[OsString]) -> Vec<String> {
    args.iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}

#[rstest]
fn exec_config_validate_accepts_defaults(base_config: ExecConfig) {
    assert!(base_config.validate().is_ok());
}

#[rstest]
#[case("ssh_bin")]
#[case("ssh_user")]
#[case("shell_bin")]
#[case("engine_bin")]
fn exec_config_validation_rejects_blank_fields(base_config: ExecConfig, #[case] name: &str) {
    assert_validation_rejects_field(base_config, name, |cfg, val| match name {
        "ssh_bin" => cfg.ssh_bin = val,
        "ssh_user" => cfg.ssh_user = val,
        "shell_bin" => cfg.shell_bin = val,
        _ => cfg.engine_bin = val,
    });
}

#[rstest]
fn invalid_config_message_names_env_var(base_config: ExecConfig) {
    let cfg = ExecConfig {
        engine_bin: String::from(" "),
        ..base_config
    };
    let err = cfg.validate().expect_err("blank engine");
    assert_eq!(
        err.to_string(),
        "missing engine_bin: set STRATADM_EXEC_ENGINE_BIN or add engine_bin to [exec] in stratadm.toml"
    );
}

#[rstest]
fn remote_commands_go_through_ssh(base_config: ExecConfig, target: RemoteTarget) {
    let runner = ScriptedRunner::new();
    runner.push_success("ok\n");
    let executor = SshExecutor::new(base_config, runner.clone()).expect("config should validate");
    let options = ExecOptions {
        sudo: true,
        timeout_secs: 30,
        ..ExecOptions::default()
    };

    let output = executor
        .execute(Some(&target), "docker ps -a", &options)
        .expect("command should succeed");

    assert_eq!(output, "ok\n");
    let invocations = runner.invocations();
    let invocation = invocations.first().expect("one invocation");
    assert_eq!(invocation.program, "ssh");
    assert_eq!(
        arg_strings(&invocation.args),
        [
            "-p",
            "2222",
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "dingo@10.0.0.1",
            "sudo timeout 30 bash -c 'docker ps -a'",
        ]
    );
}

#[rstest]
fn local_commands_use_the_shell(base_config: ExecConfig) {
    let runner = ScriptedRunner::new();
    runner.push_success("");
    let executor = SshExecutor::new(base_config, runner.clone()).expect("config should validate");
    let options = ExecOptions {
        local: true,
        timeout_secs: 0,
        ..ExecOptions::default()
    };

    executor
        .execute(None, "true", &options)
        .expect("command should succeed");

    let invocations = runner.invocations();
    let invocation = invocations.first().expect("one invocation");
    assert_eq!(invocation.command_string(), "bash -c bash -c true");
}

#[rstest]
fn exit_124_is_a_timeout(base_config: ExecConfig, target: RemoteTarget) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(124), "", "");
    let executor = SshExecutor::new(base_config, runner).expect("config should validate");

    let err = executor
        .execute(Some(&target), "sleep 999", &ExecOptions::default())
        .expect_err("should time out");

    assert!(err.is_timeout(), "unexpected error: {err}");
}

#[rstest]
fn failures_capture_output(base_config: ExecConfig, target: RemoteTarget) {
    let runner = ScriptedRunner::new();
    runner.push_failure(1);
    let executor = SshExecutor::new(base_config, runner).expect("config should validate");

    let err = executor
        .execute(Some(&target), "false", &ExecOptions::default())
        .expect_err("should fail");

    assert_eq!(err.output(), Some("simulated failure"));
    assert!(!err.is_timeout());
}

#[rstest]
fn remote_commands_require_a_target(base_config: ExecConfig) {
    let executor =
        SshExecutor::new(base_config, ScriptedRunner::new()).expect("config should validate");
    let err = executor
        .execute(None, "true", &ExecOptions::default())
        .expect_err("no target");
    assert!(matches!(err, ExecError::MissingTarget { .. }));
}

#[test]
fn targets_fall_back_to_the_host_identifier() {
    let mut context = Context::new();
    context
        .add_host(HostEntry {
            host: String::from("host1"),
            hostname: String::from("10.0.0.1"),
            user: None,
            ssh_port: 2200,
        })
        .expect("add host");

    let known = RemoteTarget::from_context(&context, "host1");
    assert_eq!(known.hostname, "10.0.0.1");
    assert_eq!(known.ssh_port, 2200);

    let unknown = RemoteTarget::from_context(&context, "host9");
    assert_eq!(unknown.hostname, "host9");
    assert_eq!(unknown.ssh_port, 22);
}
