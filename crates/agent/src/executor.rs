//! Uniform invocation of the external converter/merger tool.
//!
//! Every call spawns the configured program, services its stdio
//! concurrently, and returns the exit status plus captured stderr as plain
//! data. A non-zero exit is never an error here; the lifecycle daemon
//! decides what it means. The only failures this module reports are the
//! mechanics of running the child: spawn, I/O, and the wall-clock timeout.

use futures::TryFutureExt;
use std::ffi::OsString;
use tracing::Instrument;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to spawn {program:?}")]
    Spawn {
        program: PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("failed to service child stdout")]
    Stdout(#[source] std::io::Error),
    #[error("failed to service child stderr")]
    Stderr(#[source] std::io::Error),
    #[error("error while waiting for the child")]
    Wait(#[source] std::io::Error),
    #[error("child did not exit within {0:?}")]
    TimedOut(Duration),
    #[error("failed to place the child's output")]
    Place(#[source] std::io::Error),
}

/// Outcome of one completed invocation.
#[derive(Debug)]
pub struct Invocation {
    pub exit: std::process::ExitStatus,
    pub stderr: Vec<u8>,
}

impl Invocation {
    pub fn success(&self) -> bool {
        self.exit.success()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

enum StdoutSink<'a> {
    Discard,
    Writer(&'a mut (dyn AsyncWrite + Unpin + Send)),
}

#[derive(Debug, Clone)]
pub struct Executor {
    program: PathBuf,
    timeout: Duration,
}

impl Executor {
    pub fn new(program: PathBuf, timeout: Duration) -> Self {
        Self { program, timeout }
    }

    /// StationXML → the tool's internal form. The target appears only on a
    /// zero exit; the tool writes to a temporary sibling which is renamed
    /// into place afterwards.
    pub async fn convert(&self, source: &Path, target: &Path) -> Result<Invocation, Error> {
        let tmp = sibling_tmp(target);
        let invocation = self
            .run(
                vec![
                    "convert".into(),
                    source.as_os_str().to_owned(),
                    tmp.as_os_str().to_owned(),
                ],
                StdoutSink::Discard,
            )
            .await;

        match &invocation {
            Ok(inv) if inv.success() => {
                tokio::fs::rename(&tmp, target).await.map_err(Error::Place)?;
            }
            _ => {
                let _ = tokio::fs::remove_file(&tmp).await;
            }
        }
        invocation
    }

    /// Merge converted inputs, discarding the merged output. Used to test
    /// mergeability of one artifact against its network prototype.
    pub async fn merge_check(&self, files: &[PathBuf]) -> Result<Invocation, Error> {
        self.run(merge_args(files), StdoutSink::Discard).await
    }

    /// Merge converted inputs into `target`, written atomically via a
    /// temporary sibling.
    pub async fn merge_to_path(
        &self,
        files: &[PathBuf],
        target: &Path,
    ) -> Result<Invocation, Error> {
        let tmp = sibling_tmp(target);
        let result = async {
            let mut out = tokio::fs::File::create(&tmp).await.map_err(Error::Place)?;
            self.run(merge_args(files), StdoutSink::Writer(&mut out))
                .await
        }
        .await;

        match &result {
            Ok(inv) if inv.success() => {
                tokio::fs::rename(&tmp, target).await.map_err(Error::Place)?;
            }
            _ => {
                let _ = tokio::fs::remove_file(&tmp).await;
            }
        }
        result
    }

    /// Merge converted inputs, streaming stdout into the provided writer.
    pub async fn merge_to_writer<W>(&self, files: &[PathBuf], out: &mut W) -> Result<Invocation, Error>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.run(merge_args(files), StdoutSink::Writer(out)).await
    }

    /// Ask the downstream webservice stack to re-read its inventory.
    pub async fn reconfigure(&self) -> Result<Invocation, Error> {
        self.run(vec!["reconfigure".into()], StdoutSink::Discard).await
    }

    /// Restart the downstream query webservice.
    pub async fn restart_query_service(&self) -> Result<Invocation, Error> {
        self.run(vec!["restart".into()], StdoutSink::Discard).await
    }

    async fn run(&self, args: Vec<OsString>, sink: StdoutSink<'_>) -> Result<Invocation, Error> {
        let invocation_id = Uuid::new_v4();
        let span = tracing::info_span!("invoke", %invocation_id, program = ?self.program);
        self.run_inner(args, sink).instrument(span).await
    }

    async fn run_inner(
        &self,
        args: Vec<OsString>,
        sink: StdoutSink<'_>,
    ) -> Result<Invocation, Error> {
        tracing::debug!(?args, "spawning converter");

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| Error::Spawn {
            program: self.program.clone(),
            err,
        })?;

        let mut stdout = child.stdout.take().expect("stdout is piped");
        let mut stderr = child.stderr.take().expect("stderr is piped");

        let stdout_fut = async {
            match sink {
                StdoutSink::Discard => {
                    tokio::io::copy(&mut stdout, &mut tokio::io::sink()).await?
                }
                StdoutSink::Writer(writer) => tokio::io::copy(&mut stdout, writer).await?,
            };
            Ok(())
        }
        .map_err(Error::Stdout);

        let stderr_fut = async {
            let mut captured = Vec::new();
            stderr.read_to_end(&mut captured).await?;
            Ok(captured)
        }
        .map_err(Error::Stderr);

        let wait_fut = child.wait().map_err(Error::Wait);

        let outcome = tokio::time::timeout(self.timeout, async {
            futures::try_join!(stdout_fut, stderr_fut, wait_fut)
        })
        .await;

        match outcome {
            Err(_elapsed) => {
                let _ = child.kill().await;
                tracing::warn!(timeout = ?self.timeout, "killed converter after timeout");
                Err(Error::TimedOut(self.timeout))
            }
            Ok(Err(err)) => Err(err),
            Ok(Ok(((), stderr, exit))) => {
                tracing::debug!(code = ?exit.code(), "converter exited");
                Ok(Invocation { exit, stderr })
            }
        }
    }
}

fn merge_args(files: &[PathBuf]) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["merge".into()];
    args.extend(files.iter().map(|f| f.as_os_str().to_owned()));
    args
}

fn sibling_tmp(target: &Path) -> PathBuf {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!(
        ".{}.tmp-{}",
        target.file_name().unwrap_or_default().to_string_lossy(),
        Uuid::new_v4().simple()
    ))
}
