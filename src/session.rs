// Session — one signed-in user and the activity aggregator serving them.
//
// Replaces a process-wide "current user" object: whoever holds the Session
// holds the user id, and ending or dropping it tears the subscriptions down.

use std::sync::Arc;

use tracing::info;

use crate::activity::{ActivityAggregator, ActivitySummary, AggregatorConfig, AggregatorError, UserId};
use crate::store::DocumentStore;

pub struct Session {
    user_id: UserId,
    activity: ActivityAggregator,
}

impl Session {
    /// Begin a session for an authenticated user and start watching their activity.
    pub async fn begin(
        store: Arc<dyn DocumentStore>,
        user_id: impl Into<UserId>,
        config: AggregatorConfig,
    ) -> Result<Self, AggregatorError> {
        let user_id = user_id.into();
        let activity = ActivityAggregator::new(store, config);
        activity.start(user_id.clone()).await?;
        info!(user = %user_id, "Session started");
        Ok(Self { user_id, activity })
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn activity(&self) -> &ActivityAggregator {
        &self.activity
    }

    pub fn summary(&self) -> Arc<ActivitySummary> {
        self.activity.current_summary()
    }

    /// Sign in as someone else on the same device. The previous user's
    /// subscriptions are released before the new ones open.
    pub async fn switch_user(&mut self, user_id: impl Into<UserId>) -> Result<(), AggregatorError> {
        let user_id = user_id.into();
        if user_id.is_empty() {
            return Err(AggregatorError::EmptyUserId);
        }
        user_id.validate()?;
        self.activity.stop().await;
        self.activity.start(user_id.clone()).await?;
        info!(from = %self.user_id, to = %user_id, "Session switched user");
        self.user_id = user_id;
        Ok(())
    }

    /// Log out: release every subscription and clear the summary.
    pub async fn end(self) {
        self.activity.stop().await;
        info!(user = %self.user_id, "Session ended");
    }
}
