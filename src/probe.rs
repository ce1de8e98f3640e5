use futures_util::future::BoxFuture;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutput {
    pub stdout: String,
    pub exit_code: i32,
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("команда {program} не завершилась за {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
    #[error("команда {program} не найдена")]
    NotFound { program: String },
    #[error("нет прав на запуск {program}")]
    PermissionDenied { program: String },
    #[error("команда {program} завершилась с кодом {code:?}")]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stdout: String,
    },
    #[error("ошибка выполнения {program}: {source}")]
    Io { program: String, source: io::Error },
}

impl ProbeError {
    pub fn stdout(&self) -> Option<&str> {
        match self {
            ProbeError::NonZeroExit { stdout, .. } => Some(stdout),
            _ => None,
        }
    }
}

pub trait ProbeRunner: Send + Sync {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [&'a str],
    ) -> BoxFuture<'a, Result<ProbeOutput, ProbeError>>;
}

#[derive(Debug, Clone)]
pub struct SystemProbe {
    timeout: Duration,
}

impl SystemProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ProbeRunner for SystemProbe {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [&'a str],
    ) -> BoxFuture<'a, Result<ProbeOutput, ProbeError>> {
        Box::pin(run_command(program, args, self.timeout))
    }
}

pub async fn run_command(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<ProbeOutput, ProbeError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| spawn_error(program, source))?;
    let mut stdout = child.stdout.take();

    let outcome = time::timeout(timeout, async {
        let mut buf = Vec::new();
        if let Some(pipe) = stdout.as_mut() {
            pipe.read_to_end(&mut buf).await?;
        }
        let status = child.wait().await?;
        Ok::<_, io::Error>((buf, status))
    })
    .await;

    match outcome {
        Ok(Ok((buf, status))) => {
            let stdout = String::from_utf8_lossy(&buf).into_owned();
            if status.success() {
                Ok(ProbeOutput {
                    stdout,
                    exit_code: status.code().unwrap_or(0),
                })
            } else {
                Err(ProbeError::NonZeroExit {
                    program: program.to_string(),
                    code: status.code(),
                    stdout,
                })
            }
        }
        Ok(Err(source)) => Err(ProbeError::Io {
            program: program.to_string(),
            source,
        }),
        Err(_) => {
            // kill() also waits, so the child is reaped before we return.
            if let Err(err) = child.kill().await {
                warn!(program, error = %err, "не удалось завершить зависшую команду");
            } else {
                debug!(program, "зависшая команда завершена");
            }
            Err(ProbeError::TimedOut {
                program: program.to_string(),
                timeout,
            })
        }
    }
}

fn spawn_error(program: &str, source: io::Error) -> ProbeError {
    match source.kind() {
        io::ErrorKind::NotFound => ProbeError::NotFound {
            program: program.to_string(),
        },
        io::ErrorKind::PermissionDenied => ProbeError::PermissionDenied {
            program: program.to_string(),
        },
        _ => ProbeError::Io {
            program: program.to_string(),
            source,
        },
    }
}
