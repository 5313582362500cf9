use color_eyre::{eyre::eyre, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::message::{Message, Reply};
use super::Worker;
use crate::cache::CacheStorage;
use crate::net::{Request, Response};

/// Everything the host can deliver to the agent
#[derive(Debug)]
pub enum Event {
  Install {
    done: oneshot::Sender<Result<()>>,
  },
  Activate {
    done: oneshot::Sender<Result<()>>,
  },
  /// An intercepted request; the response goes back over `respond`
  Fetch {
    request: Request,
    respond: oneshot::Sender<Result<Response>>,
  },
  /// The platform asks for a background sync under `tag`
  Sync {
    tag: String,
  },
  /// A push arrived, optionally carrying text
  Push {
    data: Option<String>,
  },
  NotificationClick {
    action: Option<String>,
  },
  Message {
    message: Message,
    reply: oneshot::Sender<Reply>,
  },
}

impl<S: CacheStorage + 'static> Worker<S> {
  /// Handle one event.
  ///
  /// Install and activate complete before this returns, so no later event is
  /// looked at until they are done. Everything else is registered on the
  /// pending set and left running.
  pub async fn dispatch(&self, event: Event) {
    match event {
      Event::Install { done } => {
        let _ = done.send(self.install().await);
      }
      Event::Activate { done } => {
        let _ = done.send(self.activate().await);
      }
      Event::Fetch { request, respond } => {
        let worker = self.clone();
        self.pending.wait_until(async move {
          let _ = respond.send(worker.handle_fetch(request).await);
        });
      }
      Event::Sync { tag } => {
        let worker = self.clone();
        self.pending.wait_until(async move {
          worker.handle_sync(&tag).await;
        });
      }
      Event::Push { data } => {
        let worker = self.clone();
        self.pending.wait_until(async move {
          if let Err(e) = worker.handle_push(data.as_deref()).await {
            warn!(error = %e, "Failed to show notification");
          }
        });
      }
      Event::NotificationClick { action } => {
        let worker = self.clone();
        self.pending.wait_until(async move {
          match worker.handle_notification_click(action.as_deref()).await {
            Ok(outcome) => debug!(?outcome, "Notification click handled"),
            Err(e) => warn!(error = %e, "Notification click failed"),
          }
        });
      }
      Event::Message {
        message: Message::GetVersion,
        reply,
      } => {
        let _ = reply.send(self.handle_message(Message::GetVersion).await);
      }
      Event::Message { message, reply } => {
        let worker = self.clone();
        self.pending.wait_until(async move {
          let _ = reply.send(worker.handle_message(message).await);
        });
      }
    }
  }
}

/// Pumps events from a channel into a worker, one at a time.
pub struct EventLoop {
  sender: EventSender,
  handle: JoinHandle<()>,
}

impl EventLoop {
  /// Spawn the loop. It runs until every `EventSender` is dropped, then waits
  /// for outstanding background work before finishing.
  pub fn spawn<S: CacheStorage + 'static>(worker: Worker<S>) -> Self {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
      while let Some(event) = rx.recv().await {
        worker.dispatch(event).await;
      }
      info!(pending = worker.pending.len(), "Event loop closed, draining background work");
      worker.settle().await;
      info!("Event loop stopped");
    });

    Self {
      sender: EventSender { tx },
      handle,
    }
  }

  pub fn sender(&self) -> EventSender {
    self.sender.clone()
  }

  /// Stop accepting events and wait for the loop to drain.
  pub async fn shutdown(self) -> Result<()> {
    drop(self.sender);
    self.handle.await.map_err(|e| {
      error!(error = %e, "Event loop panicked");
      eyre!("Event loop failed: {}", e)
    })
  }
}

/// Cloneable handle for delivering events.
#[derive(Clone)]
pub struct EventSender {
  tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
  fn send(&self, event: Event) -> Result<()> {
    self
      .tx
      .send(event)
      .map_err(|_| eyre!("Event loop is not running"))
  }

  async fn request<T>(&self, event: Event, rx: oneshot::Receiver<T>) -> Result<T> {
    self.send(event)?;
    rx.await.map_err(|_| eyre!("Event dropped without a reply"))
  }

  pub async fn install(&self) -> Result<()> {
    let (done, rx) = oneshot::channel();
    self.request(Event::Install { done }, rx).await?
  }

  pub async fn activate(&self) -> Result<()> {
    let (done, rx) = oneshot::channel();
    self.request(Event::Activate { done }, rx).await?
  }

  pub async fn fetch(&self, request: Request) -> Result<Response> {
    let (respond, rx) = oneshot::channel();
    self.request(Event::Fetch { request, respond }, rx).await?
  }

  pub async fn message(&self, message: Message) -> Result<Reply> {
    let (reply, rx) = oneshot::channel();
    self.request(Event::Message { message, reply }, rx).await
  }

  pub fn sync(&self, tag: &str) -> Result<()> {
    self.send(Event::Sync {
      tag: tag.to_string(),
    })
  }

  pub fn push(&self, data: Option<String>) -> Result<()> {
    self.send(Event::Push { data })
  }

  pub fn notification_click(&self, action: Option<String>) -> Result<()> {
    self.send(Event::NotificationClick { action })
  }
}
