//! Tests for command-line and environment configuration.

use workcell::{ConfigError, RunConfig};

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|arg| arg.to_string()).collect()
}

fn environment(list: &[&str]) -> Vec<String> {
    list.iter().map(|binding| binding.to_string()).collect()
}

#[test]
fn test_flags_and_command_vector() {
    let config = RunConfig::parse(
        &args(&["--env", "K=V", "--volume", "/a:/b", "cmd"]),
        &environment(&[]),
    )
    .unwrap();

    assert_eq!(config.args, vec!["cmd".to_string()]);
    assert!(config.env.contains(&"K=V".to_string()));
    assert_eq!(
        config.volumes,
        vec![
            "/var/run/docker.sock:/var/run/docker.sock".to_string(),
            "/run/host-services/ssh-auth.sock:/run/host-services/ssh-auth.sock".to_string(),
            "/a:/b".to_string(),
        ],
        "default mounts must come first, user mounts after, in order"
    );
}

#[test]
fn test_environment_defaults_when_host_lacks_them() {
    let config = RunConfig::parse(&args(&["cmd"]), &environment(&[])).unwrap();
    assert_eq!(config.env[0], "TERM=xterm-256color");
    assert_eq!(config.env[1], "COLORTERM=truecolor");
    assert_eq!(config.env[2], "ANTHROPIC_API_KEY=");
    assert_eq!(
        config.env[3],
        "SSH_AUTH_SOCK=/run/host-services/ssh-auth.sock"
    );
}

#[test]
fn test_host_environment_is_forwarded() {
    let config = RunConfig::parse(
        &args(&["cmd"]),
        &environment(&[
            "TERM=xterm",
            "COLORTERM=24bit",
            "ANTHROPIC_API_KEY=sk-test",
            "SSH_AUTH_SOCK=/tmp/host-agent.sock",
        ]),
    )
    .unwrap();

    assert_eq!(config.env[0], "TERM=xterm");
    assert_eq!(config.env[1], "COLORTERM=24bit");
    assert_eq!(config.env[2], "ANTHROPIC_API_KEY=sk-test");
    // The in-container agent socket is always the mounted path, not the
    // host's own socket.
    assert_eq!(
        config.env[3],
        "SSH_AUTH_SOCK=/run/host-services/ssh-auth.sock"
    );
}

#[test]
fn test_user_env_follows_defaults_in_order() {
    let config = RunConfig::parse(
        &args(&["--env", "A=1", "--env", "B=2", "cmd"]),
        &environment(&[]),
    )
    .unwrap();
    let a = config.env.iter().position(|e| e == "A=1").unwrap();
    let b = config.env.iter().position(|e| e == "B=2").unwrap();
    assert!(a > 3, "user bindings come after the four defaults");
    assert!(a < b, "user bindings keep their order");
}

#[test]
fn test_flag_equals_form() {
    let config = RunConfig::parse(
        &args(&["--network=backend", "--dockerfile=./spec/Dockerfile", "sh"]),
        &environment(&[]),
    )
    .unwrap();
    assert_eq!(config.network, "backend");
    assert_eq!(
        config.build_spec,
        std::path::PathBuf::from("./spec/Dockerfile")
    );
    assert_eq!(config.args, vec!["sh".to_string()]);
}

#[test]
fn test_defaults() {
    let config = RunConfig::parse(&args(&[]), &environment(&[])).unwrap();
    assert_eq!(config.image_name, "workcell:latest");
    assert_eq!(config.working_dir, "/app");
    assert_eq!(config.network, "default");
    assert_eq!(config.stop_timeout.as_secs(), 10);
    assert_eq!(config.resize_retries, 10);
    assert_eq!(config.resize_delay.as_millis(), 10);
    assert_eq!(config.git_user.name, "Workcell");
    assert_eq!(config.git_user.email, "workcell@example.com");
    assert!(config.args.is_empty());
}

#[test]
fn test_double_dash_ends_flag_parsing() {
    let config = RunConfig::parse(
        &args(&["--network", "n1", "--", "--env", "looks-like-a-flag"]),
        &environment(&[]),
    )
    .unwrap();
    assert_eq!(config.network, "n1");
    assert_eq!(
        config.args,
        vec!["--env".to_string(), "looks-like-a-flag".to_string()]
    );
}

#[test]
fn test_command_may_contain_flag_like_tokens() {
    let config = RunConfig::parse(
        &args(&["claude", "--dangerously-skip-permissions"]),
        &environment(&[]),
    )
    .unwrap();
    assert_eq!(
        config.args,
        vec![
            "claude".to_string(),
            "--dangerously-skip-permissions".to_string()
        ]
    );
}

#[test]
fn test_missing_flag_value_is_an_error() {
    let err = RunConfig::parse(&args(&["--env"]), &environment(&[])).unwrap_err();
    assert!(matches!(err, ConfigError::MissingValue { .. }));
    assert!(err.to_string().contains("--env"));
}

#[test]
fn test_unknown_flag_is_an_error() {
    let err = RunConfig::parse(&args(&["--frobnicate", "cmd"]), &environment(&[])).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownFlag { .. }));
    assert!(err.to_string().contains("--frobnicate"));
}
