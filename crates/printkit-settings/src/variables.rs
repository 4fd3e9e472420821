//! Durable session variables
//!
//! Variables live in memory and are written to a JSON file by one
//! background writer thread. Every change queues a full snapshot on a
//! bounded channel; when the writer falls behind and the queue is full the
//! snapshot is dropped and a warning logged, so callers never block on
//! disk. Files are replaced atomically through a temporary sibling.

use parking_lot::{Mutex, RwLock};
use printkit_core::{
    register_reply_handler, CommandDispatcher, CommandLine, CommandReply, PersistenceError,
    VariableMap, VariableStore,
};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

/// JSON-file backed [`VariableStore`]
pub struct FileVariableStore {
    path: PathBuf,
    vars: RwLock<VariableMap>,
    sender: Mutex<Option<mpsc::Sender<VariableMap>>>,
    receiver: Mutex<Option<mpsc::Receiver<VariableMap>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl FileVariableStore {
    /// Load `path` if it exists; writes queue until [`start`](Self::start)
    pub fn open(path: impl Into<PathBuf>, queue_capacity: usize) -> Result<Self, PersistenceError> {
        let path = path.into();
        let vars = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => VariableMap::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => VariableMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(path = %path.display(), count = vars.len(), "Session variables loaded");

        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        Ok(Self {
            path,
            vars: RwLock::new(vars),
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            writer: Mutex::new(None),
            dropped: AtomicU64::new(0),
        })
    }

    /// Spawn the writer thread
    pub fn start(&self) -> Result<(), PersistenceError> {
        let Some(mut receiver) = self.receiver.lock().take() else {
            return Ok(());
        };
        let path = self.path.clone();
        let handle = std::thread::Builder::new()
            .name("printkit-variables".to_string())
            .spawn(move || {
                while let Some(snapshot) = receiver.blocking_recv() {
                    if let Err(e) = write_atomic(&path, &snapshot) {
                        tracing::error!(path = %path.display(), error = %e, "Variable write failed");
                    }
                }
                tracing::debug!("Variable writer stopped");
            })?;
        *self.writer.lock() = Some(handle);
        Ok(())
    }

    /// Close the queue, let the writer drain it and wait for it to exit
    pub fn stop(&self) {
        self.sender.lock().take();
        if let Some(handle) = self.writer.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Variable writer panicked");
            }
        }
    }

    /// Snapshots dropped because the queue was full
    pub fn dropped_writes(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// File the variables are written to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register `SAVE_VARIABLE VARIABLE=<name> VALUE=<json>`
    pub fn register_commands(self: &Arc<Self>, dispatcher: &Arc<dyn CommandDispatcher>) {
        register_reply_handler(dispatcher, "SAVE_VARIABLE", self, Self::cmd_save_variable);
    }

    fn cmd_save_variable(&self, cmd: &CommandLine) -> CommandReply {
        let name = cmd.require("VARIABLE")?.to_lowercase();
        let raw = cmd.require("VALUE")?;
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| cmd.malformed("VALUE", format!("not a JSON literal: {}", e)))?;
        let mut vars = VariableMap::new();
        vars.insert(name, value);
        self.set_variables(vars);
        Ok(None)
    }

    fn enqueue(&self, snapshot: VariableMap) {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            tracing::warn!("Variable writer stopped, write dropped");
            return;
        };
        match sender.try_send(snapshot) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Variable queue full, write dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Variable writer stopped, write dropped");
            }
        }
    }
}

impl VariableStore for FileVariableStore {
    fn set_variables(&self, variables: VariableMap) {
        let snapshot = {
            let mut vars = self.vars.write();
            vars.extend(variables);
            vars.clone()
        };
        self.enqueue(snapshot);
    }

    fn variables(&self) -> VariableMap {
        self.vars.read().clone()
    }
}

impl Drop for FileVariableStore {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for FileVariableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileVariableStore")
            .field("path", &self.path)
            .field("count", &self.vars.read().len())
            .finish()
    }
}

fn write_atomic(path: &Path, vars: &VariableMap) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(&serde_json::to_vec_pretty(vars)?)?;
    file.sync_all()?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
