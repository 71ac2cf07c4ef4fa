use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_enabled() -> bool {
    true
}

/// Metadata for one content source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publisher {
    pub publisher_id: String,
    #[serde(default)]
    pub publisher_name: String,
    #[serde(default)]
    pub category: String,
    /// Server-side default for whether content is shown.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Explicit user choice; takes precedence over `enabled` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_enabled: Option<bool>,
}

impl Publisher {
    /// Whether this publisher's items may appear in the feed.
    ///
    /// The user's explicit choice wins; otherwise the server default applies.
    pub fn is_content_allowed(&self) -> bool {
        self.user_enabled.unwrap_or(self.enabled)
    }
}

/// Publisher identifier to metadata.
pub type PublisherMap = HashMap<String, Publisher>;

/// Subset of a [`PublisherMap`] whose entries pass [`Publisher::is_content_allowed`].
pub type EnabledPublisherMap = HashMap<String, Publisher>;
