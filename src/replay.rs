// Replay — run a scripted sequence of social actions against a store while a
// session watches one user's activity, recording the summary after each step.
//
// Script format (JSON):
//
//   {
//     "user": "U1",
//     "steps": [
//       { "action": "follow", "follower": "U2", "followed": "U1" },
//       { "action": "message", "from": "U2", "to": "U1", "text": "hi" },
//       { "action": "mark_read", "with": "U2" },
//       { "action": "wait", "ms": 100 }
//     ]
//   }

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::activity::{ActivitySummary, AggregatorConfig, Timestamp, UserId};
use crate::layout;
use crate::session::Session;
use crate::social;
use crate::store::DocumentStore;

/// How long the summary must stay unchanged before a step counts as done.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayScript {
    /// Whose activity is watched.
    pub user: UserId,
    #[serde(default)]
    pub steps: Vec<ReplayStep>,
}

impl ReplayScript {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("invalid replay script")
    }
}

/// One scripted action. `at` defaults to the current time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReplayStep {
    Follow {
        follower: UserId,
        followed: UserId,
        #[serde(default)]
        at: Option<Timestamp>,
    },
    Unfollow {
        follower: UserId,
        followed: UserId,
    },
    Message {
        from: UserId,
        to: UserId,
        text: String,
        #[serde(default)]
        at: Option<Timestamp>,
    },
    /// Mark the conversation with `with` read. `user` defaults to the watched user.
    MarkRead {
        #[serde(default)]
        user: Option<UserId>,
        with: UserId,
        #[serde(default)]
        at: Option<Timestamp>,
    },
    Post {
        author: UserId,
        content: String,
        #[serde(default)]
        at: Option<Timestamp>,
    },
    /// Sign in as someone else; the rest of the script watches them.
    SwitchUser {
        user: UserId,
    },
    Wait {
        ms: u64,
    },
}

impl ReplayStep {
    pub fn label(&self) -> String {
        match self {
            ReplayStep::Follow { follower, followed, .. } => format!("{follower} follows {followed}"),
            ReplayStep::Unfollow { follower, followed } => format!("{follower} unfollows {followed}"),
            ReplayStep::Message { from, to, .. } => format!("{from} messages {to}"),
            ReplayStep::MarkRead { user, with, .. } => match user {
                Some(user) => format!("{user} reads conversation with {with}"),
                None => format!("read conversation with {with}"),
            },
            ReplayStep::Post { author, .. } => format!("{author} posts"),
            ReplayStep::SwitchUser { user } => format!("switch to {user}"),
            ReplayStep::Wait { ms } => format!("wait {ms}ms"),
        }
    }
}

/// The summary observed after a step. Step 0 is the initial snapshot.
#[derive(Debug, Clone)]
pub struct ReplayFrame {
    pub step: usize,
    pub label: String,
    pub summary: Arc<ActivitySummary>,
}

pub struct Replayer {
    store: Arc<dyn DocumentStore>,
    config: AggregatorConfig,
    quiet: Duration,
}

impl Replayer {
    pub fn new(store: Arc<dyn DocumentStore>, config: AggregatorConfig) -> Self {
        Self {
            store,
            config,
            quiet: DEFAULT_QUIET_PERIOD,
        }
    }

    pub fn with_quiet_period(mut self, quiet: Duration) -> Self {
        self.quiet = quiet;
        self
    }

    /// Run every step in order, calling `on_frame` after each one.
    pub async fn run<F>(&self, script: &ReplayScript, mut on_frame: F) -> Result<Vec<ReplayFrame>>
    where
        F: FnMut(&ReplayFrame),
    {
        let mut session = Session::begin(self.store.clone(), script.user.clone(), self.config)
            .await
            .with_context(|| format!("failed to start session for {}", script.user))?;
        let mut rx = session.activity().subscribe();
        let mut frames = Vec::with_capacity(script.steps.len() + 1);

        let initial = session.activity().settled().await;
        let summary = self.quiesce(&mut rx, initial).await;
        let frame = ReplayFrame {
            step: 0,
            label: format!("watching {}", script.user),
            summary,
        };
        on_frame(&frame);
        frames.push(frame);

        for (index, step) in script.steps.iter().enumerate() {
            debug!(step = index + 1, action = %step.label(), "Replaying step");
            self.apply(&mut session, step)
                .await
                .with_context(|| format!("step {} ({}) failed", index + 1, step.label()))?;
            if matches!(step, ReplayStep::SwitchUser { .. }) {
                // The receiver keeps working across stop/start; only wait for
                // the new user's sources to come up.
                session.activity().settled().await;
            }

            let latest = rx.borrow_and_update().clone();
            let summary = self.quiesce(&mut rx, latest).await;
            let frame = ReplayFrame {
                step: index + 1,
                label: step.label(),
                summary,
            };
            on_frame(&frame);
            frames.push(frame);
        }

        info!(user = %session.user_id(), steps = script.steps.len(), "Replay complete");
        session.end().await;
        Ok(frames)
    }

    /// Wait until no publish has happened for one quiet period.
    async fn quiesce(
        &self,
        rx: &mut watch::Receiver<Arc<ActivitySummary>>,
        mut latest: Arc<ActivitySummary>,
    ) -> Arc<ActivitySummary> {
        loop {
            match tokio::time::timeout(self.quiet, rx.changed()).await {
                Ok(Ok(())) => latest = rx.borrow_and_update().clone(),
                // Quiet period elapsed, or the aggregator is gone.
                Ok(Err(_)) | Err(_) => return latest,
            }
        }
    }

    async fn apply(&self, session: &mut Session, step: &ReplayStep) -> Result<()> {
        let store = self.store.as_ref();
        let now = |at: &Option<Timestamp>| at.unwrap_or_else(Timestamp::now);
        match step {
            ReplayStep::Follow { follower, followed, at } => {
                social::follow(store, follower, followed, now(at)).await?;
            }
            ReplayStep::Unfollow { follower, followed } => {
                social::unfollow(store, follower, followed).await?;
            }
            ReplayStep::Message { from, to, text, at } => {
                social::send_message(store, from, to, text, now(at)).await?;
            }
            ReplayStep::MarkRead { user, with, at } => {
                let user = user.clone().unwrap_or_else(|| session.user_id().clone());
                let conversation = layout::conversation_id(&user, with);
                social::mark_read(store, &conversation, &user, now(at)).await?;
            }
            ReplayStep::Post { author, content, at } => {
                social::publish_post(store, author, content, now(at)).await?;
            }
            ReplayStep::SwitchUser { user } => {
                session.switch_user(user.clone()).await?;
            }
            ReplayStep::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
        }
        Ok(())
    }
}
