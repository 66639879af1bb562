//! Trigger receiver
//!
//! A single long-lived accept loop on a filesystem-addressed Unix socket.
//! Protocol: each connection writes a UTF-8 decimal external user id as its
//! whole payload and closes; an empty payload is the terminate signal. The
//! sender never gets a response, so malformed payloads are dropped silently.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::queue::TaskQueue;
use crate::task::SyncTask;

/// Handle to the receiver thread. There is exactly one per daemon run.
pub struct TriggerReceiver {
    handle: JoinHandle<()>,
}

impl TriggerReceiver {
    /// Bind the socket (unlinking any stale file at the path) and start the
    /// accept loop on its own thread.
    pub fn start(socket_path: &Path, queue: TaskQueue) -> Result<Self> {
        if socket_path.exists() {
            debug!(path = %socket_path.display(), "removing stale socket");
            std::fs::remove_file(socket_path)?;
        }
        let listener = UnixListener::bind(socket_path)?;
        info!(path = %socket_path.display(), "trigger receiver listening");
        let handle = std::thread::Builder::new()
            .name("trigger-receiver".to_string())
            .spawn(move || accept_loop(listener, queue))?;
        Ok(Self { handle })
    }

    /// Wait for the accept loop to exit. It only does so after receiving the
    /// empty-payload terminate signal.
    pub fn join(self) {
        if self.handle.join().is_err() {
            warn!("trigger receiver thread panicked");
        }
    }
}

fn accept_loop(listener: UnixListener, queue: TaskQueue) {
    for stream in listener.incoming() {
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "trigger accept failed");
                continue;
            }
        };
        let mut payload = String::new();
        if stream.read_to_string(&mut payload).is_err() {
            debug!("dropping non-UTF-8 trigger payload");
            continue;
        }
        if payload.is_empty() {
            info!("empty trigger payload, receiver stopping");
            break;
        }
        match payload.trim().parse::<i64>() {
            Ok(external_id) => {
                debug!(external_id, "trigger received");
                queue.enqueue(SyncTask::UserSync { external_id });
            }
            Err(_) => debug!("dropping unparseable trigger payload"),
        }
    }
}

/// Write one payload to the trigger socket and close. Used by the supervisor
/// to stop the receiver, and usable by any front door to request a sync.
pub fn send_trigger(socket_path: &Path, payload: &str) -> Result<()> {
    let mut stream = UnixStream::connect(socket_path)?;
    stream.write_all(payload.as_bytes())?;
    stream.shutdown(std::net::Shutdown::Write)?;
    Ok(())
}
