//! Run configuration.
//!
//! [`RunConfig`] is an immutable snapshot of user intent, assembled from the
//! command line and the host environment. Flag parsing is a small hand-rolled
//! loop: recognized flags are consumed until the first positional token,
//! which starts the container command vector.

use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    CONTAINER_WORKDIR, DEFAULT_COLORTERM, DEFAULT_GIT_USER_EMAIL, DEFAULT_GIT_USER_NAME,
    DEFAULT_IMAGE_NAME, DEFAULT_NETWORK, DEFAULT_RESIZE_DELAY, DEFAULT_RESIZE_RETRIES,
    DEFAULT_STOP_TIMEOUT, DEFAULT_TERM, ENGINE_SOCKET_MOUNT, SSH_AGENT_MOUNT, SSH_AGENT_SOCKET,
};
use crate::error::ConfigError;

/// Committer identity configured in the rewritten snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitUser {
    pub name: String,
    pub email: String,
}

/// Immutable snapshot of user intent for one session.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Tag for the image built this session.
    pub image_name: String,
    /// Working directory inside the container.
    pub working_dir: String,
    /// Grace period for stopping the container.
    pub stop_timeout: Duration,
    /// Attempts for the initial terminal resize.
    pub resize_retries: u32,
    /// Base delay of the resize retry schedule.
    pub resize_delay: Duration,
    /// Committer identity for the snapshot.
    pub git_user: GitUser,

    /// Command vector run inside the container.
    pub args: Vec<String>,
    /// Container environment, defaults first, `--env` bindings after.
    pub env: Vec<String>,
    /// Bind mounts, defaults first, `--volume` bindings after.
    pub volumes: Vec<String>,
    /// Build specification path (`--dockerfile`).
    pub build_spec: PathBuf,
    /// Container network (`--network`).
    pub network: String,
}

impl RunConfig {
    /// Parses command-line arguments (without the program name) and the host
    /// environment into a configuration.
    ///
    /// Recognized flags take `--flag value` or `--flag=value` form; a bare
    /// `--` ends flag parsing. The first token that is not a recognized flag
    /// begins the container command.
    pub fn parse(args: &[String], environment: &[String]) -> Result<RunConfig, ConfigError> {
        let lookup = |key: &str| -> Option<&str> {
            environment.iter().find_map(|binding| {
                binding
                    .split_once('=')
                    .filter(|(k, _)| *k == key)
                    .map(|(_, v)| v)
            })
        };

        let mut extra_env = Vec::new();
        let mut extra_volumes = Vec::new();
        let mut build_spec = PathBuf::new();
        let mut network = DEFAULT_NETWORK.to_string();
        let mut command = Vec::new();

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if arg == "--" {
                command.extend(iter.cloned());
                break;
            }
            let (head, inline) = match arg.split_once('=') {
                Some((head, value)) if head.starts_with('-') => (head, Some(value.to_string())),
                _ => (arg.as_str(), None),
            };
            match flag_name(head) {
                Some("env") => extra_env.push(flag_value(&mut iter, inline, "--env")?),
                Some("volume") => {
                    extra_volumes.push(flag_value(&mut iter, inline, "--volume")?);
                }
                Some("dockerfile") => {
                    build_spec = PathBuf::from(flag_value(&mut iter, inline, "--dockerfile")?);
                }
                Some("network") => network = flag_value(&mut iter, inline, "--network")?,
                Some(_) => {
                    return Err(ConfigError::UnknownFlag {
                        flag: arg.to_string(),
                    });
                }
                None => {
                    command.push(arg.clone());
                    command.extend(iter.cloned());
                    break;
                }
            }
        }

        let mut env = Vec::new();
        env.push(format!(
            "TERM={}",
            lookup("TERM").unwrap_or(DEFAULT_TERM)
        ));
        env.push(format!(
            "COLORTERM={}",
            lookup("COLORTERM").unwrap_or(DEFAULT_COLORTERM)
        ));
        env.push(format!(
            "ANTHROPIC_API_KEY={}",
            lookup("ANTHROPIC_API_KEY").unwrap_or("")
        ));
        // Agent forwarding inside the container goes through the mounted socket.
        env.push(format!("SSH_AUTH_SOCK={SSH_AGENT_SOCKET}"));
        env.extend(extra_env);

        let mut volumes = vec![
            ENGINE_SOCKET_MOUNT.to_string(),
            SSH_AGENT_MOUNT.to_string(),
        ];
        volumes.extend(extra_volumes);

        Ok(RunConfig {
            image_name: DEFAULT_IMAGE_NAME.to_string(),
            working_dir: CONTAINER_WORKDIR.to_string(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            resize_retries: DEFAULT_RESIZE_RETRIES,
            resize_delay: DEFAULT_RESIZE_DELAY,
            git_user: GitUser {
                name: DEFAULT_GIT_USER_NAME.to_string(),
                email: DEFAULT_GIT_USER_EMAIL.to_string(),
            },
            args: command,
            env,
            volumes,
            build_spec,
            network,
        })
    }
}

/// Strips one or two leading dashes; `None` means the token is positional.
fn flag_name(arg: &str) -> Option<&str> {
    let stripped = arg
        .strip_prefix("--")
        .or_else(|| arg.strip_prefix('-'))?;
    if stripped.is_empty() {
        None
    } else {
        Some(stripped)
    }
}

fn flag_value(
    iter: &mut std::slice::Iter<'_, String>,
    inline: Option<String>,
    flag: &str,
) -> Result<String, ConfigError> {
    match inline {
        Some(value) => Ok(value),
        None => iter.next().cloned().ok_or_else(|| ConfigError::MissingValue {
            flag: flag.to_string(),
        }),
    }
}
