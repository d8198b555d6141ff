//! Panel lifecycle: at most one live panel per host.
//!
//! A panel owns one `ConnectionManager` and one `MessageRouter` and runs as
//! a local task. Script execution is not `Send`, so the panel and every
//! command it handles stay on the host's `LocalSet`; other threads reach it
//! through [`PanelRegistry`] and [`PanelHandle`].

use std::{
    cell::RefCell,
    rc::Rc,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use futures::stream::BoxStream;
use scratchpad_core::traits::ClientFactory;
use scratchpad_session::{ConnectionManager, PersistentStore};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::{outbox::Outbox, protocol::OutboundMessage, router::MessageRouter};

/// Panel error.
#[derive(Debug, Error)]
pub enum PanelError {
    #[error("Panel host is not running")]
    HostGone,
    #[error("Panel is disposed")]
    Disposed,
}

/// Command for a running panel.
#[derive(Debug)]
pub enum PanelCommand {
    /// Inbound envelope text from a view.
    Message(String),
    Reveal,
    Dispose,
}

/// Result of an open request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Created,
    /// The live panel was reused.
    Revealed,
}

/// Thread-safe handle to a running panel.
#[derive(Clone)]
pub struct PanelHandle {
    id: Uuid,
    commands: mpsc::UnboundedSender<PanelCommand>,
    outbox: Arc<Outbox>,
    disposed: Arc<AtomicBool>,
    views: Arc<AtomicUsize>,
}

impl PanelHandle {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Send a command to the panel.
    ///
    /// # Errors
    /// Returns error if the panel is disposed.
    pub fn post(&self, command: PanelCommand) -> Result<(), PanelError> {
        if self.is_disposed() {
            return Err(PanelError::Disposed);
        }
        self.commands
            .send(command)
            .map_err(|_| PanelError::Disposed)
    }

    /// Deliver one inbound envelope.
    ///
    /// # Errors
    /// Returns error if the panel is disposed.
    pub fn post_message(&self, text: impl Into<String>) -> Result<(), PanelError> {
        self.post(PanelCommand::Message(text.into()))
    }

    /// Dispose the panel. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.commands.send(PanelCommand::Dispose);
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Outbound envelopes: history first, then live, ending at dispose.
    #[must_use]
    pub fn subscribe(&self) -> BoxStream<'static, OutboundMessage> {
        self.outbox.history_plus_stream()
    }

    /// Register a connected view. Dropping the last guard disposes the panel.
    #[must_use]
    pub fn attach_view(&self) -> ViewGuard {
        self.views.fetch_add(1, Ordering::SeqCst);
        ViewGuard {
            handle: self.clone(),
        }
    }

    #[must_use]
    pub fn view_count(&self) -> usize {
        self.views.load(Ordering::SeqCst)
    }
}

/// One connected view of a panel.
pub struct ViewGuard {
    handle: PanelHandle,
}

impl Drop for ViewGuard {
    fn drop(&mut self) {
        if self.handle.views.fetch_sub(1, Ordering::SeqCst) == 1 {
            tracing::info!(panel = %self.handle.id, "last view closed");
            self.handle.dispose();
        }
    }
}

/// Owner of the single live panel. Must be used inside a `LocalSet`.
#[derive(Clone)]
pub struct PanelHost {
    store: Arc<PersistentStore>,
    factory: Arc<dyn ClientFactory>,
    current: Rc<RefCell<Option<PanelHandle>>>,
}

impl PanelHost {
    #[must_use]
    pub fn new(store: Arc<PersistentStore>, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            store,
            factory,
            current: Rc::new(RefCell::new(None)),
        }
    }

    /// The live panel, if any.
    #[must_use]
    pub fn current(&self) -> Option<PanelHandle> {
        self.current
            .borrow()
            .as_ref()
            .filter(|handle| !handle.is_disposed())
            .cloned()
    }

    /// Reveal the live panel, or construct a fresh one.
    pub fn open(&self) -> (PanelHandle, OpenOutcome) {
        if let Some(handle) = self.current() {
            let _ = handle.post(PanelCommand::Reveal);
            return (handle, OpenOutcome::Revealed);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let outbox = Arc::new(Outbox::new());
        let connection = Arc::new(ConnectionManager::new(Arc::clone(&self.factory)));
        let router = Rc::new(MessageRouter::new(
            connection,
            Arc::clone(&self.store),
            Arc::clone(&outbox),
        ));
        let handle = PanelHandle {
            id: Uuid::new_v4(),
            commands: tx,
            outbox,
            disposed: Arc::new(AtomicBool::new(false)),
            views: Arc::new(AtomicUsize::new(0)),
        };
        *self.current.borrow_mut() = Some(handle.clone());
        tracing::info!(panel = %handle.id, "panel created");

        tokio::task::spawn_local(run_panel(
            router,
            rx,
            handle.clone(),
            Rc::clone(&self.current),
        ));
        (handle, OpenOutcome::Created)
    }

    /// Answer open requests until every [`PanelRegistry`] is dropped, then
    /// dispose the live panel.
    #[allow(clippy::future_not_send)]
    pub async fn serve(self, mut requests: PanelRequests) {
        while let Some(reply) = requests.rx.recv().await {
            let opened = self.open();
            if reply.send(opened).is_err() {
                tracing::debug!("open requester went away");
            }
        }
        if let Some(handle) = self.current() {
            handle.dispose();
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run_panel(
    router: Rc<MessageRouter>,
    mut commands: mpsc::UnboundedReceiver<PanelCommand>,
    handle: PanelHandle,
    slot: Rc<RefCell<Option<PanelHandle>>>,
) {
    router.startup().await;

    while let Some(command) = commands.recv().await {
        match command {
            PanelCommand::Message(text) => {
                let router = Rc::clone(&router);
                tokio::task::spawn_local(async move { router.receive(&text).await });
            }
            PanelCommand::Reveal => tracing::info!(panel = %handle.id, "panel revealed"),
            PanelCommand::Dispose => break,
        }
    }

    handle.disposed.store(true, Ordering::SeqCst);
    router.dispose();
    {
        let mut current = slot.borrow_mut();
        if current.as_ref().is_some_and(|h| h.id == handle.id) {
            *current = None;
        }
    }
    tracing::info!(panel = %handle.id, "panel disposed");
}

type OpenReply = oneshot::Sender<(PanelHandle, OpenOutcome)>;

/// `Send` entry point for opening the panel from any thread.
#[derive(Clone)]
pub struct PanelRegistry {
    requests: mpsc::UnboundedSender<OpenReply>,
}

/// Receiving side of a [`PanelRegistry`], consumed by [`PanelHost::serve`].
pub struct PanelRequests {
    rx: mpsc::UnboundedReceiver<OpenReply>,
}

#[must_use]
pub fn registry() -> (PanelRegistry, PanelRequests) {
    let (requests, rx) = mpsc::unbounded_channel();
    (PanelRegistry { requests }, PanelRequests { rx })
}

impl PanelRegistry {
    /// Open the panel on the host.
    ///
    /// # Errors
    /// Returns error if the host is no longer serving.
    pub async fn open(&self) -> Result<(PanelHandle, OpenOutcome), PanelError> {
        let (tx, rx) = oneshot::channel();
        self.requests.send(tx).map_err(|_| PanelError::HostGone)?;
        rx.await.map_err(|_| PanelError::HostGone)
    }
}
