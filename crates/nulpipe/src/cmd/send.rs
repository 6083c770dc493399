use std::fs;
use std::process::Stdio;
use std::time::Duration;

use nulpipe_frame::validate_payload;
use nulpipe_transport::{spawn, TransportConfig};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::cmd::{block_on, parse_duration, SendArgs};
use crate::exit::{
    frame_error, io_error, transport_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS,
    TIMEOUT, USAGE,
};
use crate::output::{print_message, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;
    block_on(send(args, payload, wait_timeout, format))?
}

async fn send(
    args: SendArgs,
    payload: Vec<u8>,
    wait_timeout: Duration,
    format: OutputFormat,
) -> CliResult<i32> {
    let (program, program_args) = args
        .program
        .split_first()
        .ok_or_else(|| CliError::new(USAGE, "no program given"))?;

    let mut child = Command::new(program)
        .args(program_args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| io_error(&format!("failed to start {program}"), err))?;
    debug!(program = %program, pid = child.id(), "spawned program");

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| CliError::new(INTERNAL, "program stdin was not captured"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CliError::new(INTERNAL, "program stdout was not captured"))?;
    let (handle, mut events) = spawn(stdin, stdout, TransportConfig::default());

    handle
        .send(payload)
        .await
        .map_err(|err| transport_error("send failed", err))?;

    if args.wait {
        match timeout(wait_timeout, events.next_message()).await {
            Ok(Some(Ok(message))) => print_message(&message, 1, format),
            Ok(Some(Err(err))) => return Err(transport_error("receive failed", err)),
            Ok(None) => {
                return Err(CliError::new(
                    FAILURE,
                    format!("{program} closed its output without replying"),
                ))
            }
            Err(_) => {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("no reply from {program} within {}", args.wait_timeout),
                ))
            }
        }
    }

    // Closing the transport drops the program's stdin, so it sees EOF.
    handle.close().await;
    reap(&mut child, wait_timeout).await;

    Ok(SUCCESS)
}

/// Wait up to `grace` for the program to exit, then kill it.
async fn reap(child: &mut Child, grace: Duration) {
    match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!(%status, "program exited"),
        Ok(Err(err)) => warn!(error = %err, "failed waiting for program"),
        Err(_) => {
            debug!("program still running; killing it");
            if let Err(err) = child.kill().await {
                warn!(error = %err, "failed to kill program");
            }
        }
    }
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    let payload = if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        json.as_bytes().to_vec()
    } else if let Some(data) = &args.data {
        data.as_bytes().to_vec()
    } else if let Some(path) = &args.file {
        fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?
    } else {
        Vec::new()
    };

    validate_payload(&payload).map_err(|err| frame_error("payload rejected", err))?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::exit::DATA_INVALID;

    fn args() -> SendArgs {
        SendArgs {
            json: None,
            data: None,
            file: None,
            wait: false,
            wait_timeout: "5s".to_string(),
            program: vec!["cat".to_string()],
        }
    }

    fn temp_file(tag: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "nulpipe-send-{tag}-{}.bin",
            std::process::id()
        ));
        fs::write(&path, contents).expect("temp file should be writable");
        path
    }

    #[test]
    fn json_payload_must_parse() {
        let err = resolve_payload(&SendArgs {
            json: Some("{not json".to_string()),
            ..args()
        })
        .unwrap_err();
        assert_eq!(err.code, USAGE);

        let payload = resolve_payload(&SendArgs {
            json: Some("{\"id\":1}".to_string()),
            ..args()
        })
        .unwrap();
        assert_eq!(payload, b"{\"id\":1}");
    }

    #[test]
    fn file_payload_with_delimiter_is_rejected() {
        let path = temp_file("nul", b"left\0right");
        let err = resolve_payload(&SendArgs {
            file: Some(path.clone()),
            ..args()
        })
        .unwrap_err();
        let _ = fs::remove_file(&path);

        assert_eq!(err.code, DATA_INVALID);
        assert!(err.message.contains("byte 4"));
    }

    #[tokio::test]
    async fn reap_kills_a_program_that_outlives_the_grace_period() {
        let mut child = Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .expect("sleep should spawn");

        timeout(Duration::from_secs(5), reap(&mut child, Duration::from_millis(100)))
            .await
            .expect("reap should not hang");
        assert!(child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn reap_waits_for_a_program_that_exits() {
        let mut child = Command::new("true").spawn().expect("true should spawn");
        reap(&mut child, Duration::from_secs(5)).await;
        assert!(child.try_wait().unwrap().is_some_and(|status| status.success()));
    }

    #[test]
    fn missing_payload_sends_empty_message() {
        assert!(resolve_payload(&args()).unwrap().is_empty());
    }
}
