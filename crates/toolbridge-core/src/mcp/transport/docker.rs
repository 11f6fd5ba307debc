//! Container carrier
//!
//! Runs the server through the `docker` CLI with stdin attached, then frames
//! exactly like a local process. With a container name the command is
//! `exec`-ed into it; otherwise a throwaway container is started from the
//! image.

use crate::domain::DockerConfig;
use crate::mcp::error::McpError;

use super::stdio::ProcessSpec;

/// Build the `docker` invocation for a configuration
pub fn docker_process_spec(config: &DockerConfig, docker_binary: &str) -> Result<ProcessSpec, McpError> {
    let command = match config.command.as_deref().map(str::trim) {
        Some(line) if !line.is_empty() => shell_words::split(line).map_err(|e| {
            McpError::connection(format!("Invalid docker command '{}': {}", line, e))
        })?,
        _ => Vec::new(),
    };

    let mut args = Vec::new();
    match config.container.as_deref() {
        Some(container) => {
            if command.is_empty() {
                return Err(McpError::connection(format!(
                    "docker exec into '{}' requires a command",
                    container
                )));
            }
            args.extend(["exec".to_string(), "-i".to_string()]);
            push_env(&mut args, config);
            args.push(container.to_string());
        }
        None => {
            args.extend(["run".to_string(), "-i".to_string(), "--rm".to_string()]);
            push_env(&mut args, config);
            args.push(config.image.clone());
        }
    }
    args.extend(command);

    Ok(ProcessSpec {
        program: docker_binary.to_string(),
        args,
        ..Default::default()
    })
}

fn push_env(args: &mut Vec<String>, config: &DockerConfig) {
    let mut keys: Vec<&String> = config.env.keys().collect();
    keys.sort();
    for key in keys {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, config.env[key]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_run_uses_image_and_split_command() {
        let config = DockerConfig {
            image: "ghcr.io/acme/mcp-files:1.2".into(),
            container: None,
            command: Some("mcp-files --root '/data/my files'".into()),
            env: HashMap::from([("TOKEN".to_string(), "abc".to_string())]),
        };
        let spec = docker_process_spec(&config, "docker").unwrap();

        assert_eq!(spec.program, "docker");
        assert_eq!(
            spec.args,
            vec![
                "run", "-i", "--rm", "-e", "TOKEN=abc",
                "ghcr.io/acme/mcp-files:1.2", "mcp-files", "--root", "/data/my files",
            ]
        );
    }

    #[test]
    fn test_exec_into_existing_container() {
        let config = DockerConfig {
            image: "unused".into(),
            container: Some("tools-1".into()),
            command: Some("python -m server".into()),
            ..Default::default()
        };
        let spec = docker_process_spec(&config, "/usr/local/bin/docker").unwrap();

        assert_eq!(spec.program, "/usr/local/bin/docker");
        assert_eq!(spec.args, vec!["exec", "-i", "tools-1", "python", "-m", "server"]);
    }

    #[test]
    fn test_exec_without_command_is_rejected() {
        let config = DockerConfig {
            image: "img".into(),
            container: Some("tools-1".into()),
            ..Default::default()
        };
        assert!(docker_process_spec(&config, "docker").is_err());
    }
}
