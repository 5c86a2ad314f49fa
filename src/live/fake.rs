//! Scripted event source for tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{EventSource, RawEvent};
use crate::error::{Result, ReviewSyncError};

enum Script {
    /// Deliver these events, then end the stream
    Session(Vec<RawEvent>),
    /// Fail to open
    Failure,
    /// Stay open and silent
    Held,
    /// Stay open and deliver whatever is pushed on the paired sender
    Live(UnboundedReceiverStream<RawEvent>),
}

/// Each `open` consumes the next script entry. Once the script is
/// exhausted, connections open and stay silent.
#[derive(Default)]
pub(crate) struct ScriptedSource {
    script: Mutex<VecDeque<Script>>,
    opens: AtomicUsize,
}

impl std::fmt::Debug for ScriptedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedSource")
            .field("opens", &self.open_count())
            .finish()
    }
}

impl ScriptedSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_session(&self, events: Vec<RawEvent>) {
        self.script.lock().unwrap().push_back(Script::Session(events));
    }

    pub(crate) fn push_failure(&self) {
        self.script.lock().unwrap().push_back(Script::Failure);
    }

    /// A connection that stays open until the channel disconnects.
    pub(crate) fn push_held_session(&self) {
        self.script.lock().unwrap().push_back(Script::Held);
    }

    /// A connection fed by the returned sender. Dropping the sender ends
    /// the stream.
    pub(crate) fn push_live_session(&self) -> mpsc::UnboundedSender<RawEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script
            .lock()
            .unwrap()
            .push_back(Script::Live(UnboundedReceiverStream::new(rx)));
        tx
    }

    pub(crate) fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn open(&self) -> Result<BoxStream<'static, RawEvent>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Script::Session(events)) => Ok(stream::iter(events).boxed()),
            Some(Script::Failure) => Err(ReviewSyncError::Transport(
                "scripted connection failure".to_string(),
            )),
            Some(Script::Live(rx)) => Ok(rx.boxed()),
            Some(Script::Held) | None => Ok(stream::pending().boxed()),
        }
    }
}
