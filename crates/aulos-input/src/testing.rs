//! Scripted transfer backends for tests
//!
//! Both fakes honor the chunk/ack protocol of the real backend so tests
//! exercise the same pause semantics.

use std::sync::{Arc, Mutex};
use std::thread;

use crate::engine::backend::{
    TransferBackend, TransferEvent, TransferId, TransferLink, TransferRequest,
};
use crate::error::{InputError, Result};

/// One scripted action of a fake transfer worker.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Status(u16),
    Header(&'static str),
    Chunk(Vec<u8>),
    Done,
    Fail(&'static str),
}

/// Plays one script per launched transfer, in launch order.
pub(crate) struct ScriptedBackend {
    scripts: Mutex<Vec<Vec<Step>>>,
    /// Every request this backend was launched with, for assertions.
    pub requests: Arc<Mutex<Vec<TransferRequest>>>,
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<Vec<Step>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl TransferBackend for ScriptedBackend {
    fn launch(&self, id: TransferId, request: TransferRequest, link: TransferLink) -> Result<()> {
        self.requests.lock().unwrap().push(request);

        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            return Err(InputError::Transfer("no script for transfer".to_string()));
        }
        let script = scripts.remove(0);

        thread::spawn(move || play(id, script, link));
        Ok(())
    }
}

fn play(id: TransferId, script: Vec<Step>, link: TransferLink) {
    for step in script {
        let ok = match step {
            Step::Status(code) => link.events.send(TransferEvent::Status { id, code }).is_ok(),
            Step::Header(line) => link
                .events
                .send(TransferEvent::Header {
                    id,
                    line: line.as_bytes().to_vec(),
                })
                .is_ok(),
            Step::Chunk(data) => {
                if link.events.send(TransferEvent::Chunk { id, data }).is_err() {
                    return;
                }
                // like the real backend: wait out the pause
                link.ack.recv().is_ok()
            }
            Step::Done => {
                let _ = link.events.send(TransferEvent::Done { id, result: Ok(()) });
                return;
            }
            Step::Fail(text) => {
                let _ = link.events.send(TransferEvent::Done {
                    id,
                    result: Err(text.to_string()),
                });
                return;
            }
        };
        if !ok {
            return;
        }
    }
}

/// Records every launch and hands the link back to the test, which plays
/// the worker role itself. Optionally refuses to launch at all.
pub(crate) struct ManualBackend {
    pub launches: Arc<Mutex<Vec<(TransferId, TransferRequest, TransferLink)>>>,
    refuse: bool,
}

impl ManualBackend {
    pub fn new(refuse: bool) -> Self {
        Self {
            launches: Arc::new(Mutex::new(Vec::new())),
            refuse,
        }
    }
}

impl TransferBackend for ManualBackend {
    fn launch(&self, id: TransferId, request: TransferRequest, link: TransferLink) -> Result<()> {
        if self.refuse {
            return Err(InputError::Transfer("backend refused".to_string()));
        }
        self.launches.lock().unwrap().push((id, request, link));
        Ok(())
    }
}
