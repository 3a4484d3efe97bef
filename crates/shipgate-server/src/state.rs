use std::collections::HashMap;
use std::sync::Arc;

use shipgate_client::{ClientConfig, HttpStoryService};
use shipgate_core::config::Config;
use shipgate_core::error::ControllerError;
use shipgate_core::events::{self, EventSender};
use shipgate_core::poll::PollPolicy;
use shipgate_core::session::StorySession;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::AppError;

/// Shared application state passed to all route handlers.
///
/// Holds at most one [`StorySession`] per story id. Every session publishes
/// into the same `event_tx`, which `/api/events` re-emits.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<HttpStoryService>,
    pub sessions: Arc<Mutex<HashMap<String, Arc<StorySession>>>>,
    pub event_tx: EventSender,
    pub policy: PollPolicy,
}

impl AppState {
    pub fn new(service: HttpStoryService, policy: PollPolicy) -> Self {
        Self {
            service: Arc::new(service),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            event_tx: events::channel(),
            policy,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let service = HttpStoryService::new(&ClientConfig::from(config))?;
        Ok(Self::new(service, config.poll_policy()))
    }

    /// The open session for `story_id`, or 404.
    pub async fn session(&self, story_id: &str) -> Result<Arc<StorySession>, AppError> {
        self.sessions
            .lock()
            .await
            .get(story_id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("no open session for story '{story_id}'")))
    }

    /// Open a fresh session for `story_id`, tearing down any prior one.
    ///
    /// Refused with a conflict while the prior session has a run submitting
    /// or in progress. The upstream fetches happen outside the map lock; the
    /// previous session stays usable until the new one is in place.
    pub async fn open_session(&self, story_id: &str) -> Result<Arc<StorySession>, AppError> {
        let existing = self.sessions.lock().await.get(story_id).cloned();
        if let Some(existing) = existing {
            ensure_idle(&existing).await?;
        }

        let session = StorySession::open(
            story_id,
            self.service.clone(),
            self.policy.clone(),
            self.event_tx.clone(),
        )
        .await?;
        let session = Arc::new(session);

        let previous = {
            let mut sessions = self.sessions.lock().await;
            // A run may have started while the new session was loading.
            if let Some(existing) = sessions.get(story_id) {
                if let Err(e) = ensure_idle(existing).await {
                    drop(sessions);
                    session.teardown().await;
                    return Err(e);
                }
            }
            sessions.insert(story_id.to_string(), session.clone())
        };
        if let Some(previous) = previous {
            info!(story = %story_id, "replacing open session");
            previous.teardown().await;
        }
        Ok(session)
    }

    /// Tear down and forget the session for `story_id`. Returns false if none
    /// was open.
    pub async fn close_session(&self, story_id: &str) -> bool {
        let removed = self.sessions.lock().await.remove(story_id);
        match removed {
            Some(session) => {
                session.teardown().await;
                true
            }
            None => false,
        }
    }

    /// Tear down every open session; used on shutdown.
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        for session in drained {
            session.teardown().await;
        }
    }
}

async fn ensure_idle(session: &StorySession) -> Result<(), AppError> {
    let phase = session.controller().phase().await;
    if phase.is_active() {
        return Err(ControllerError::Conflict {
            story: session.story_id().to_string(),
            phase: phase.to_string(),
        }
        .into());
    }
    Ok(())
}
