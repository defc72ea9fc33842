//! Command execution supervisor.
//!
//! `Runner` owns the table of running commands. It starts processes through
//! the platform layer, wires their output into the streaming pipeline and
//! spawns one reaper task per command that removes the table entry once the
//! process has exited and both pipes are drained.
//!
//! The table lock only ever guards map lookups and mutations. Spawning,
//! signalling and waiting all happen with the lock released.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::classify::{ExitOutcome, FailurePatterns};
use crate::errors::{EngineError, Result};
use crate::events::{EngineEvent, EventSink};
use crate::logging::{LogSink, TracingLog};
use crate::output::{forward_lines, LineTarget, StreamKind};
use crate::platform::{self, ProcessGroup};
use crate::process::{CommandSpec, RunEnv};

/// Starts, tracks and stops command processes.
pub struct Runner {
    table: Arc<Mutex<RunningTable>>,
    events: Arc<dyn EventSink>,
    log: Arc<dyn LogSink>,
}

#[derive(Default)]
struct RunningTable {
    running: HashMap<String, RunningCommand>,
    // Ids between the duplicate check and the spawn; keeps the check-and-insert atomic.
    starting: HashSet<String>,
}

struct RunningCommand {
    group: Arc<ProcessGroup>,
    done: watch::Receiver<bool>,
}

/// State moved into the reaper task of one command.
struct Reaper {
    id: String,
    name: String,
    child: Child,
    streams: JoinSet<()>,
    done: watch::Sender<bool>,
    table: Arc<Mutex<RunningTable>>,
    events: Arc<dyn EventSink>,
    log: Arc<dyn LogSink>,
}

fn lock_table(table: &Mutex<RunningTable>) -> MutexGuard<'_, RunningTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Runner {
    /// Creates a runner that logs through `tracing`.
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self::with_log(events, Arc::new(TracingLog))
    }

    /// Creates a runner with its own log sink.
    pub fn with_log(events: Arc<dyn EventSink>, log: Arc<dyn LogSink>) -> Self {
        Self {
            table: Arc::new(Mutex::new(RunningTable::default())),
            events,
            log,
        }
    }

    /// Starts `spec` unless a process for its id is already running.
    ///
    /// Returns once the process is spawned and registered; output and exit are
    /// handled by background tasks. Start failures are returned and also
    /// streamed as a log line for the command.
    pub async fn run(&self, spec: &CommandSpec, env: &RunEnv, base_dir: &Path) -> Result<()> {
        {
            let mut table = lock_table(&self.table);
            if table.running.contains_key(&spec.id) || !table.starting.insert(spec.id.clone()) {
                return Ok(());
            }
        }

        if let Err(err) = self.start(spec, env, base_dir) {
            lock_table(&self.table).starting.remove(&spec.id);
            self.report(&spec.id, &err);
            return Err(err);
        }
        Ok(())
    }

    /// Runs each command in order, stopping at the first start failure.
    pub async fn run_batch(
        &self,
        commands: &[CommandSpec],
        env: &RunEnv,
        base_dir: &Path,
    ) -> Result<()> {
        for spec in commands {
            self.run(spec, env, base_dir).await?;
        }
        Ok(())
    }

    /// Gracefully stops the command with `id`. Unknown or finished ids are a no-op.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let Some((group, done)) = self.lookup(id) else {
            return Ok(());
        };
        self.stop_group(id, &group, done).await
    }

    /// Stops each listed command in order, aborting on the first failure.
    ///
    /// Fail-fast like [`Runner::run_batch`] (see the
    /// `run_batch_stops_at_first_start_failure` test); commands after a failed
    /// stop keep running. [`Runner::stop_all`] instead continues past failures
    /// and returns all of them. Finished or unknown ids are not failures.
    pub async fn stop_batch(&self, commands: &[CommandSpec]) -> Result<()> {
        for spec in commands {
            self.stop(&spec.id).await?;
        }
        Ok(())
    }

    /// Stops every running command and returns all failures.
    pub async fn stop_all(&self) -> Vec<EngineError> {
        let snapshot: Vec<(String, Arc<ProcessGroup>, watch::Receiver<bool>)> = {
            let table = lock_table(&self.table);
            table
                .running
                .iter()
                .map(|(id, cmd)| (id.clone(), cmd.group.clone(), cmd.done.clone()))
                .collect()
        };

        let mut errors = Vec::new();
        for (id, group, done) in snapshot {
            if let Err(err) = self.stop_group(&id, &group, done).await {
                errors.push(err);
            }
        }
        errors
    }

    /// Ids of the commands currently running, in no particular order.
    pub fn running_ids(&self) -> Vec<String> {
        lock_table(&self.table).running.keys().cloned().collect()
    }

    pub fn is_running(&self, id: &str) -> bool {
        lock_table(&self.table).running.contains_key(id)
    }

    fn lookup(&self, id: &str) -> Option<(Arc<ProcessGroup>, watch::Receiver<bool>)> {
        let table = lock_table(&self.table);
        table
            .running
            .get(id)
            .map(|cmd| (cmd.group.clone(), cmd.done.clone()))
    }

    async fn stop_group(
        &self,
        id: &str,
        group: &ProcessGroup,
        done: watch::Receiver<bool>,
    ) -> Result<()> {
        self.log
            .info(id, &format!("stopping process group {}", group.id()));
        if let Err(source) = platform::terminate_gracefully(group, done).await {
            let err = EngineError::Stop {
                id: id.to_string(),
                source,
            };
            self.report(id, &err);
            return Err(err);
        }
        Ok(())
    }

    fn start(&self, spec: &CommandSpec, env: &RunEnv, base_dir: &Path) -> Result<()> {
        let mut command = platform::build_command(spec, env, base_dir);
        self.log.info(
            &spec.id,
            &format!("Starting {}: \x1b[1m{}\x1b[0m", spec.name, spec.command_line),
        );

        let mut child = command.spawn().map_err(|source| EngineError::Spawn {
            id: spec.id.clone(),
            source,
        })?;
        let group = match ProcessGroup::attach(&child) {
            Ok(group) => Arc::new(group),
            Err(source) => {
                let _ = child.start_kill();
                return Err(EngineError::Spawn {
                    id: spec.id.clone(),
                    source,
                });
            }
        };
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.start_kill();
            return Err(EngineError::MissingPipe {
                id: spec.id.clone(),
                stream: "output",
            });
        };

        let (done_tx, done_rx) = watch::channel(false);
        {
            let mut table = lock_table(&self.table);
            table.starting.remove(&spec.id);
            table.running.insert(
                spec.id.clone(),
                RunningCommand {
                    group,
                    done: done_rx,
                },
            );
            self.events.emit(EngineEvent::ProcessStarted {
                id: spec.id.clone(),
            });
        }

        let target = LineTarget {
            id: spec.id.clone(),
            events: self.events.clone(),
            log: self.log.clone(),
            patterns: Arc::new(FailurePatterns::new(&spec.failure_patterns)),
        };
        let mut streams = JoinSet::new();
        streams.spawn(forward_lines(StreamKind::Stdout, stdout, target.clone()));
        streams.spawn(forward_lines(StreamKind::Stderr, stderr, target));

        tokio::spawn(
            Reaper {
                id: spec.id.clone(),
                name: spec.name.clone(),
                child,
                streams,
                done: done_tx,
                table: self.table.clone(),
                events: self.events.clone(),
                log: self.log.clone(),
            }
            .run(),
        );
        Ok(())
    }

    fn report(&self, id: &str, err: &EngineError) {
        let message = err.to_string();
        self.log.error(id, &message);
        self.events.emit(EngineEvent::NewLogEntry {
            id: id.to_string(),
            line: message,
        });
    }
}

impl Reaper {
    async fn run(mut self) {
        // Drain first so no output line can follow ProcessFinished.
        while let Some(joined) = self.streams.join_next().await {
            if let Err(err) = joined {
                self.log
                    .debug(&self.id, &format!("output reader aborted: {}", err));
            }
        }

        let outcome = match self.child.wait().await {
            Ok(status) => ExitOutcome::Exited(status),
            Err(err) => ExitOutcome::WaitFailed(err),
        };
        if !outcome.success() {
            let message = format!("{} exited: {}", self.name, outcome);
            if outcome.is_expected_termination() {
                self.log.info(&self.id, &message);
            } else {
                self.log.error(&self.id, &message);
            }
            self.events.emit(EngineEvent::NewLogEntry {
                id: self.id.clone(),
                line: message,
            });
        }

        {
            let mut table = lock_table(&self.table);
            table.running.remove(&self.id);
            self.log.info(&self.id, &format!("{} finished", self.name));
            self.events.emit(EngineEvent::ProcessFinished {
                id: self.id.clone(),
            });
        }
        let _ = self.done.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn stopping_unknown_id_is_a_noop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = Runner::new(Arc::new(tx));
        runner.stop("missing").await.unwrap();
        assert!(runner.stop_all().await.is_empty());
        assert!(runner.running_ids().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reserved_id_is_not_started_twice() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = Runner::new(Arc::new(tx));
        lock_table(&runner.table).starting.insert("busy".to_string());

        let spec = CommandSpec::new("busy", "echo never");
        runner
            .run(&spec, &RunEnv::default(), Path::new(""))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
        assert!(!runner.is_running("busy"));
    }

    #[tokio::test]
    async fn start_failure_is_returned_and_streamed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = Runner::new(Arc::new(tx));
        let missing = std::env::temp_dir().join("cmdrack-no-such-dir").join("nested");
        let spec = CommandSpec::new("bad", "echo hi").with_working_dir(missing.to_string_lossy());

        let err = runner
            .run(&spec, &RunEnv::default(), Path::new(""))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Spawn { .. }));
        assert_eq!(err.command_id(), "bad");
        assert!(runner.running_ids().is_empty());
        assert!(lock_table(&runner.table).starting.is_empty());

        match rx.try_recv().unwrap() {
            EngineEvent::NewLogEntry { id, line } => {
                assert_eq!(id, "bad");
                assert!(line.contains("failed to start command 'bad'"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
