// Activity aggregation — unread messages, new followers, and new posts from
// followed accounts, folded into one summary for the notification badge.

pub mod aggregator;
pub mod error;
pub mod models;
pub mod records;
pub mod sources;

pub use aggregator::{ActivityAggregator, AggregatorConfig, DEFAULT_PREVIEW_LIMIT};
pub use error::{AggregatorError, InvalidUserId, SourceError};
pub use models::{
    ActivitySummary, FollowerHandle, MessagePreview, PostPreview, SourceHealth, SourceKind,
    SourceStatus, Timestamp, UserId,
};
