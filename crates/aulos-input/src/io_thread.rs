//! I/O thread bridge
//!
//! A single long-lived thread owns the transfer engine and runs its event
//! loop: it alternates between marshalled calls from consumer threads and
//! events reported by transfer workers. `call` enqueues a closure and
//! blocks the caller until it has run on the loop.
//!
//! Callers must not hold a stream mutex across `call`; the write and
//! header callbacks running on the loop take the same mutex.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use tracing::debug;

use crate::engine::backend::{TransferBackend, TransferEvent};
use crate::engine::Engine;
use crate::error::{InputError, Result};

enum IoTask {
    Call(Box<dyn FnOnce(&mut Engine) + Send>),
    Shutdown,
}

pub(crate) struct IoThread {
    tasks: Sender<IoTask>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl IoThread {
    /// Start the loop with a fresh engine around `backend`.
    pub fn spawn(backend: Box<dyn TransferBackend>) -> Result<Arc<Self>> {
        let (tasks, task_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let engine = Engine::new(backend, event_tx);

        let handle = thread::Builder::new()
            .name("http-io".to_string())
            .spawn(move || io_loop(task_rx, event_rx, engine))
            .map_err(|err| InputError::EngineInit(format!("failed to spawn I/O thread: {err}")))?;

        Ok(Arc::new(Self {
            tasks,
            handle: Mutex::new(Some(handle)),
        }))
    }

    /// Run `func` on the I/O thread and return its result.
    pub fn call<R, F>(&self, func: F) -> R
    where
        R: Send + 'static,
        F: FnOnce(&mut Engine) -> R + Send + 'static,
    {
        let (result_tx, result_rx) = bounded(1);
        self.tasks
            .send(IoTask::Call(Box::new(move |engine| {
                let _ = result_tx.send(func(engine));
            })))
            .expect("I/O thread is not running");
        result_rx.recv().expect("I/O thread dropped a call")
    }

    /// Stop the loop and join the thread.
    pub fn shutdown(&self) {
        let _ = self.tasks.send(IoTask::Shutdown);
        let handle = self
            .handle
            .lock()
            .expect("I/O thread handle poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn io_loop(task_rx: Receiver<IoTask>, event_rx: Receiver<TransferEvent>, mut engine: Engine) {
    debug!("I/O thread started");

    loop {
        select! {
            recv(task_rx) -> task => match task {
                Ok(IoTask::Call(func)) => func(&mut engine),
                Ok(IoTask::Shutdown) | Err(_) => break,
            },
            recv(event_rx) -> event => match event {
                Ok(event) => engine.dispatch(event),
                Err(_) => {
                    // the engine holds a sender, so this only fires if
                    // its channel infrastructure broke underneath it
                    engine.abort_all(InputError::Engine(
                        "transfer event channel closed".to_string(),
                    ));
                    break;
                }
            },
        }
    }

    debug!("I/O thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualBackend;

    fn io() -> Arc<IoThread> {
        IoThread::spawn(Box::new(ManualBackend::new(false))).unwrap()
    }

    #[test]
    fn call_returns_the_closure_result() {
        let io = io();
        let answer = io.call(|_engine| 40 + 2);
        assert_eq!(answer, 42);
        io.shutdown();
    }

    #[test]
    fn call_runs_on_the_io_thread() {
        let io = io();
        let name = io.call(|_engine| thread::current().name().map(str::to_string));
        assert_eq!(name.as_deref(), Some("http-io"));
        io.shutdown();
    }

    #[test]
    fn calls_run_in_submission_order() {
        let io = io();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let log = Arc::clone(&log);
            io.call(move |_engine| log.lock().unwrap().push(i));
        }
        assert_eq!(*log.lock().unwrap(), (0..10).collect::<Vec<_>>());
        io.shutdown();
    }

    #[test]
    fn call_observes_engine_state() {
        let io = io();
        let count = io.call(|engine| engine.active_count());
        assert_eq!(count, 0);
        io.shutdown();
    }

    #[test]
    fn shutdown_is_idempotent() {
        let io = io();
        io.shutdown();
        io.shutdown();
    }
}
