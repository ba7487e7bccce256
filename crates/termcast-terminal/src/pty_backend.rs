/// PTY-based process bridge
use anyhow::{Context, Result};
use portable_pty::{
    native_pty_system, Child, ChildKiller, CommandBuilder, ExitStatus, MasterPty, PtySize,
};
use std::io::{ErrorKind, Read, Write};
use std::thread;
use tokio::sync::mpsc;

use super::backend::{ExitInfo, ProcessBridge, ProcessEvent, ProcessHandle, SpawnRequest, SpawnedProcess};

const READ_BUFFER_SIZE: usize = 8192;

/// Spawns children on native pseudo-terminals
#[derive(Debug, Clone, Copy, Default)]
pub struct PtyBridge;

impl PtyBridge {
    pub fn new() -> Self {
        Self
    }
}

/// Handles PTY process management for one child
struct PtyHandler {
    pty: Box<dyn MasterPty + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    input: mpsc::UnboundedSender<Vec<u8>>,
}

fn pty_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

impl ProcessBridge for PtyBridge {
    fn spawn(&self, request: SpawnRequest) -> Result<SpawnedProcess> {
        let pty_system = native_pty_system();

        // Create PTY with specified size
        let pty_pair = pty_system
            .openpty(pty_size(request.cols, request.rows))
            .context("Failed to open PTY")?;

        // Build command
        let mut cmd = CommandBuilder::new(&request.program);
        cmd.args(&request.args);
        match &request.cwd {
            Some(cwd) => cmd.cwd(cwd),
            None => {
                if let Ok(cwd) = std::env::current_dir() {
                    cmd.cwd(cwd);
                }
            }
        }
        cmd.env("TERM", "xterm-256color");
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        // Spawn child process
        let child = pty_pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn '{}' in PTY", request.program))?;
        // The slave end must close in this process or EOF never arrives
        drop(pty_pair.slave);

        let killer = child.clone_killer();
        let reader = pty_pair
            .master
            .try_clone_reader()
            .context("Failed to clone PTY reader")?;
        let writer = pty_pair
            .master
            .take_writer()
            .context("Failed to take PTY writer")?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        start_background_reader(reader, child, events_tx)?;
        let input = start_background_writer(writer)?;

        Ok(SpawnedProcess {
            handle: Box::new(PtyHandler {
                pty: pty_pair.master,
                killer,
                input,
            }),
            events: events_rx,
        })
    }

    fn bridge_name(&self) -> &str {
        "pty"
    }
}

/// Read the PTY on a dedicated thread until EOF, then reap the child.
///
/// Output and exit go through the same channel, so the exit event always
/// follows the last output chunk.
fn start_background_reader(
    mut reader: Box<dyn Read + Send>,
    mut child: Box<dyn Child + Send + Sync>,
    events: mpsc::UnboundedSender<ProcessEvent>,
) -> Result<()> {
    thread::Builder::new()
        .name("pty-reader".into())
        .spawn(move || {
            let mut buffer = vec![0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buffer) {
                    // EOF - process exited
                    Ok(0) => break,
                    Ok(n) => {
                        if events.send(ProcessEvent::Output(buffer[..n].to_vec())).is_err() {
                            // Session is gone, nobody is listening
                            break;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        thread::sleep(std::time::Duration::from_millis(5));
                    }
                    // EIO once the child side closes
                    Err(_) => break,
                }
            }

            let exit = match child.wait() {
                Ok(status) => exit_info(&status),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to reap PTY child");
                    ExitInfo {
                        code: -1,
                        signal: None,
                    }
                }
            };
            let _ = events.send(ProcessEvent::Exit(exit));
        })
        .context("Failed to start PTY reader thread")?;

    Ok(())
}

/// Drain queued input into the PTY on a dedicated thread.
///
/// A child that stops reading stdin blocks this thread, never the caller.
fn start_background_writer(
    mut writer: Box<dyn Write + Send>,
) -> Result<mpsc::UnboundedSender<Vec<u8>>> {
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    thread::Builder::new()
        .name("pty-writer".into())
        .spawn(move || {
            while let Some(bytes) = input_rx.blocking_recv() {
                if let Err(e) = writer.write_all(&bytes).and_then(|()| writer.flush()) {
                    tracing::debug!(error = %e, "PTY writer closed");
                    break;
                }
            }
        })
        .context("Failed to start PTY writer thread")?;

    Ok(input_tx)
}

/// portable-pty only exposes the signal name through `Display`
fn exit_info(status: &ExitStatus) -> ExitInfo {
    let signal = status
        .to_string()
        .strip_prefix("Terminated by ")
        .map(str::to_string);
    ExitInfo {
        code: status.exit_code() as i32,
        signal,
    }
}

impl ProcessHandle for PtyHandler {
    /// Queue data for the PTY writer thread
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.input
            .send(data.to_vec())
            .map_err(|_| anyhow::anyhow!("PTY writer has shut down"))
    }

    /// Resize the PTY
    fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        self.pty
            .resize(pty_size(cols, rows))
            .context("Failed to resize PTY")?;
        Ok(())
    }

    /// Kill the child process
    fn kill(&mut self) -> Result<()> {
        self.killer.kill().context("Failed to kill child process")?;
        Ok(())
    }
}
