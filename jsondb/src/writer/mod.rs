//! Per-path write serializer.
//!
//! Every collection rewrites its whole backing file on each mutation, so
//! two concurrent rewrites of the same file must never overlap. The
//! [`WriteQueue`] keeps one FIFO of pending writes per path and a single
//! drain task per non-idle path; writes to different paths run
//! independently.

use crate::error::{JsonDbError, Result};
use crate::fs::{run_blocking, Filesystem};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

enum WriteTask {
    Write {
        payload: Vec<u8>,
        done: oneshot::Sender<Result<()>>,
    },
    /// Resolves once every task queued ahead of it has completed.
    Barrier { done: oneshot::Sender<Result<()>> },
}

struct Inner {
    fs: Arc<dyn Filesystem>,
    /// A path has an entry exactly while its drain task is running.
    queues: Mutex<HashMap<PathBuf, VecDeque<WriteTask>>>,
}

/// Serializes writes per target path. Cheap to clone; clones share queues.
#[derive(Clone)]
pub struct WriteQueue {
    inner: Arc<Inner>,
}

impl WriteQueue {
    pub fn new(fs: Arc<dyn Filesystem>) -> Self {
        WriteQueue {
            inner: Arc::new(Inner {
                fs,
                queues: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Queue `payload` to replace the content of `path`.
    ///
    /// The task is queued before this returns. The ticket resolves with
    /// the outcome of this payload's write once every earlier write to
    /// the same path has finished. Must be called within a tokio runtime.
    pub fn enqueue_write(&self, path: impl Into<PathBuf>, payload: Vec<u8>) -> WriteTicket {
        let path = path.into();
        let (done, rx) = oneshot::channel();
        self.submit(path.clone(), WriteTask::Write { payload, done });
        WriteTicket::queued(path, rx)
    }

    /// A ticket that resolves once every write queued for `path` before
    /// this call has completed. Resolves immediately for idle paths.
    pub fn flush(&self, path: &Path) -> WriteTicket {
        let mut queues = self.inner.queues.lock();
        match queues.get_mut(path) {
            Some(queue) => {
                let (done, rx) = oneshot::channel();
                queue.push_back(WriteTask::Barrier { done });
                WriteTicket::queued(path.to_path_buf(), rx)
            }
            None => WriteTicket::ready(path.to_path_buf(), Ok(())),
        }
    }

    /// Whether nothing is queued or in flight for `path`.
    pub fn is_idle(&self, path: &Path) -> bool {
        !self.inner.queues.lock().contains_key(path)
    }

    pub(crate) fn filesystem(&self) -> &Arc<dyn Filesystem> {
        &self.inner.fs
    }

    fn submit(&self, path: PathBuf, task: WriteTask) {
        let mut queues = self.inner.queues.lock();
        match queues.entry(path) {
            Entry::Occupied(mut entry) => entry.get_mut().push_back(task),
            Entry::Vacant(entry) => {
                let path = entry.key().clone();
                entry.insert(VecDeque::from([task]));
                let inner = Arc::clone(&self.inner);
                tokio::spawn(drain(inner, path));
            }
        }
    }
}

impl std::fmt::Debug for WriteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteQueue")
            .field("active_paths", &self.inner.queues.lock().len())
            .finish()
    }
}

/// Run the queue for `path` until it is empty, then retire the entry.
async fn drain(inner: Arc<Inner>, path: PathBuf) {
    log::debug!("Write queue for {} started", path.display());

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let fs = Arc::clone(&inner.fs);
        let parent = parent.to_path_buf();
        let created = run_blocking(move || {
            if fs.exists(&parent) {
                Ok(())
            } else {
                fs.make_directory(&parent)
            }
        })
        .await;
        if let Err(e) = created {
            log::warn!("Could not create parent directory for {}: {e}", path.display());
        }
    }

    let mut next = next_task(&inner, &path);
    while let Some(task) = next {
        let (result, done) = match task {
            WriteTask::Write { payload, done } => {
                let fs = Arc::clone(&inner.fs);
                let target = path.clone();
                let result = run_blocking(move || fs.write_file(&target, &payload)).await;
                if let Err(e) = &result {
                    log::warn!("Write to {} failed: {e}", path.display());
                }
                (result, done)
            }
            WriteTask::Barrier { done } => (Ok(()), done),
        };

        // Retire the entry before signalling so a resolved ticket never
        // observes a stale queue for an idle path.
        next = next_task(&inner, &path);
        // The caller may have dropped its ticket; the write still happened.
        let _ = done.send(result);
    }

    log::debug!("Write queue for {} is idle", path.display());
}

fn next_task(inner: &Inner, path: &Path) -> Option<WriteTask> {
    let mut queues = inner.queues.lock();
    let task = queues.get_mut(path).and_then(VecDeque::pop_front);
    if task.is_none() {
        queues.remove(path);
    }
    task
}

enum TicketState {
    Queued(oneshot::Receiver<Result<()>>),
    Ready(Option<Result<()>>),
}

/// Completion signal for one queued write.
#[must_use = "a write ticket reports whether the write reached disk"]
pub struct WriteTicket {
    path: PathBuf,
    state: TicketState,
}

impl WriteTicket {
    fn queued(path: PathBuf, rx: oneshot::Receiver<Result<()>>) -> Self {
        WriteTicket {
            path,
            state: TicketState::Queued(rx),
        }
    }

    pub(crate) fn ready(path: PathBuf, result: Result<()>) -> Self {
        WriteTicket {
            path,
            state: TicketState::Ready(Some(result)),
        }
    }

    /// The file this ticket writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Future for WriteTicket {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            TicketState::Queued(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(_)) => Poll::Ready(Err(JsonDbError::WriterStopped(
                    this.path.display().to_string(),
                ))),
                Poll::Pending => Poll::Pending,
            },
            TicketState::Ready(result) => Poll::Ready(result.take().unwrap_or(Ok(()))),
        }
    }
}
