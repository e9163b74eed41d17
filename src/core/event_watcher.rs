//! Live subscriptions.
//!
//! Enabling a watcher first drains, synchronously, every record written since
//! the given bookmark, then attaches an `EvtSubscribe` callback that forwards
//! new records over an unbounded [`crossbeam_channel`]. The drain runs before
//! the caller holds the receiver, so the channel must not apply back-pressure.
//! Disabling hands the subscription handle to a short-lived worker thread:
//! closing it blocks until in-flight callbacks finish, which would deadlock
//! if done from a callback thread.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use windows::core::PCWSTR;
use windows::Win32::System::EventLog::*;

use crate::core::event_reader::{
    bookmark_for, open_bookmark, query, query_after, EventRenderer, PathType, ReaderOptions,
};
use crate::core::event_record::{Bookmark, NativeEventRecord};
use crate::core::evt_native::{to_wide, EvtHandle};
use crate::util::error::{windows_err, Result};

/// Messages delivered by a watcher.
#[derive(Debug)]
pub enum WatchMessage {
    Event(NativeEventRecord),
    /// A delivery failed. Non-fatal; the subscription stays attached.
    Error { log_name: String, error: String },
}

/// State reachable from the native callback.
struct CallbackState {
    log_name: String,
    sender: Sender<WatchMessage>,
    renderer: Mutex<EventRenderer>,
    bookmark: Mutex<Option<Bookmark>>,
    bookmark_buf: Mutex<Vec<u16>>,
}

impl CallbackState {
    fn deliver(&self, event: EVT_HANDLE) {
        let rendered = self.renderer.lock().render(event, &self.log_name);
        match rendered {
            Ok(mut record) => {
                if let Ok(b) = bookmark_for(event, &mut self.bookmark_buf.lock()) {
                    record.bookmark = Some(b.clone());
                    *self.bookmark.lock() = Some(b);
                }
                let _ = self.sender.send(WatchMessage::Event(record));
            }
            Err(e) => {
                tracing::warn!("Failed to render live event from '{}': {e}", self.log_name);
                let _ = self.sender.send(WatchMessage::Event(NativeEventRecord::failed(
                    &self.log_name,
                    e.to_string(),
                )));
            }
        }
    }
}

/// A live subscription to one log.
pub struct EventWatcher {
    state: Arc<CallbackState>,
    subscription: Option<EvtHandle>,
}

impl std::fmt::Debug for EventWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWatcher")
            .field("log_name", &self.state.log_name)
            .field("enabled", &self.subscription.is_some())
            .finish()
    }
}

/// Subscribe to `log_name`, delivering records into a new channel.
pub fn subscribe(
    log_name: &str,
    bookmark: Option<&Bookmark>,
    options: ReaderOptions,
) -> Result<(EventWatcher, Receiver<WatchMessage>)> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let watcher = EventWatcher::enable(log_name, bookmark, options, tx)?;
    Ok((watcher, rx))
}

unsafe extern "system" fn subscription_callback(
    action: EVT_SUBSCRIBE_NOTIFY_ACTION,
    context: *const c_void,
    event: EVT_HANDLE,
) -> u32 {
    if context.is_null() {
        return 0;
    }
    // SAFETY: `context` is the `Arc<CallbackState>` pointer registered in
    // `enable`; the watcher keeps that Arc alive until the subscription
    // handle is closed, and closing waits for running callbacks.
    let state = &*(context as *const CallbackState);
    if action == EvtSubscribeActionDeliver {
        state.deliver(event);
    } else {
        let _ = state.sender.send(WatchMessage::Error {
            log_name: state.log_name.clone(),
            error: format!("subscription error notification (code {})", event.0),
        });
    }
    0
}

impl EventWatcher {
    /// Drain records after `bookmark`, then attach the live callback.
    pub fn enable(
        log_name: &str,
        bookmark: Option<&Bookmark>,
        options: ReaderOptions,
        sender: Sender<WatchMessage>,
    ) -> Result<Self> {
        let mut last = bookmark.cloned();

        if let Some(start) = bookmark {
            let session = query_after(log_name, PathType::LogName, start, options.clone())?;
            let never = AtomicBool::new(false);
            let drained = session.read_all(&never, |batch| {
                if batch.bookmark.is_some() {
                    last = batch.bookmark.clone();
                }
                for record in batch.records {
                    let _ = sender.send(WatchMessage::Event(record));
                }
            })?;
            tracing::debug!("Drained {drained} records from '{log_name}' before subscribing");
        } else {
            // Touch the log first so a missing channel fails here, not in
            // the subscription callback.
            drop(query(log_name, PathType::LogName, options.clone())?);
        }

        let state = Arc::new(CallbackState {
            log_name: log_name.to_string(),
            sender,
            renderer: Mutex::new(EventRenderer::new(options.render_xml)?),
            bookmark: Mutex::new(last.clone()),
            bookmark_buf: Mutex::new(vec![0; 1024]),
        });

        let bookmark_handle = last.as_ref().map(open_bookmark).transpose()?;
        let flags = if bookmark_handle.is_some() {
            EvtSubscribeStartAfterBookmark.0 as u32
        } else {
            EvtSubscribeToFutureEvents.0 as u32
        };
        let path = to_wide(log_name);
        let xpath = to_wide("*");

        // SAFETY: strings are NUL-terminated; the context pointer stays valid
        // while `state` is held by the watcher (see `disable`).
        let raw = unsafe {
            EvtSubscribe(
                None,
                None,
                PCWSTR(path.as_ptr()),
                PCWSTR(xpath.as_ptr()),
                bookmark_handle
                    .as_ref()
                    .map(EvtHandle::raw)
                    .unwrap_or_default(),
                Some(Arc::as_ptr(&state) as *const c_void),
                Some(subscription_callback),
                flags,
            )
        }
        .map_err(|e| windows_err(e.code().0 as u32, format!("EvtSubscribe on '{log_name}'")))?;

        tracing::info!("Subscribed to '{log_name}'");
        Ok(Self {
            state,
            subscription: EvtHandle::new(raw),
        })
    }

    pub fn log_name(&self) -> &str {
        &self.state.log_name
    }

    pub fn is_enabled(&self) -> bool {
        self.subscription.is_some()
    }

    /// Bookmark of the last record delivered, for resuming later.
    pub fn bookmark(&self) -> Option<Bookmark> {
        self.state.bookmark.lock().clone()
    }

    /// Detach the subscription without blocking the caller.
    pub fn disable(&mut self) {
        let Some(subscription) = self.subscription.take() else {
            return;
        };
        let state = Arc::clone(&self.state);
        let log_name = state.log_name.clone();
        let spawned = std::thread::Builder::new()
            .name("evt-unsubscribe".into())
            .spawn(move || {
                drop(subscription);
                drop(state);
                tracing::debug!("Unsubscribed from '{log_name}'");
            });
        if let Err(e) = spawned {
            tracing::error!("Failed to spawn unsubscribe worker: {e}");
        }
    }
}

impl Drop for EventWatcher {
    fn drop(&mut self) {
        self.disable();
    }
}

/// A set of watchers sharing one delivery channel.
///
/// Adding and removing watchers goes through a single lock, so a removal
/// cannot race a concurrent add of the same log.
pub struct WatcherSet {
    sender: Sender<WatchMessage>,
    options: ReaderOptions,
    watchers: Mutex<HashMap<String, EventWatcher>>,
}

impl WatcherSet {
    pub fn new(options: ReaderOptions) -> (Self, Receiver<WatchMessage>) {
        let (sender, rx) = crossbeam_channel::unbounded();
        (
            Self {
                sender,
                options,
                watchers: Mutex::new(HashMap::new()),
            },
            rx,
        )
    }

    /// Start watching `log_name`. Already-watched logs are left as they are.
    pub fn add(&self, log_name: &str, bookmark: Option<&Bookmark>) -> Result<()> {
        let mut watchers = self.watchers.lock();
        let key = log_name.to_lowercase();
        if watchers.contains_key(&key) {
            return Ok(());
        }
        let watcher =
            EventWatcher::enable(log_name, bookmark, self.options.clone(), self.sender.clone())?;
        watchers.insert(key, watcher);
        Ok(())
    }

    /// Stop watching `log_name`, returning its last bookmark.
    pub fn remove(&self, log_name: &str) -> Option<Bookmark> {
        let mut watcher = self.watchers.lock().remove(&log_name.to_lowercase())?;
        let bookmark = watcher.bookmark();
        watcher.disable();
        bookmark
    }

    pub fn watched(&self) -> Vec<String> {
        self.watchers
            .lock()
            .values()
            .map(|w| w.log_name().to_string())
            .collect()
    }

    /// Disable every watcher.
    pub fn clear(&self) {
        for (_, mut watcher) in self.watchers.lock().drain() {
            watcher.disable();
        }
    }
}
