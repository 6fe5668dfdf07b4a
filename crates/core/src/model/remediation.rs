use serde::{Deserialize, Serialize};

use crate::model::ids::ResourceId;

/// Kind of corrective content a suggestion points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    VideoSegment,
    TextSection,
    InteractiveChallenge,
}

/// A piece of content offered to a learner after a failed attempt.
///
/// The engine never resolves `resource_id`; callers map it to a video
/// timestamp, article anchor or challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationSuggestion {
    pub resource_id: ResourceId,
    pub kind: ResourceKind,
    pub title: String,
    pub estimated_minutes: u32,
    /// Offset into the video, in seconds. Only meaningful for video segments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time_secs: Option<u32>,
}

impl RemediationSuggestion {
    #[must_use]
    pub fn new(
        resource_id: impl Into<String>,
        kind: ResourceKind,
        title: impl Into<String>,
        estimated_minutes: u32,
    ) -> Self {
        Self {
            resource_id: ResourceId::new(resource_id),
            kind,
            title: title.into(),
            estimated_minutes,
            start_time_secs: None,
        }
    }

    /// Video segment starting at `start_time_secs`.
    #[must_use]
    pub fn video(
        resource_id: impl Into<String>,
        title: impl Into<String>,
        estimated_minutes: u32,
        start_time_secs: u32,
    ) -> Self {
        Self {
            start_time_secs: Some(start_time_secs),
            ..Self::new(resource_id, ResourceKind::VideoSegment, title, estimated_minutes)
        }
    }
}
