use super::types::{EnabledPublisherMap, PublisherMap};

/// Keep exactly the publishers whose content is allowed.
///
/// Pure and order-insensitive: the input is left untouched and the result
/// depends only on the set of entries.
pub fn enabled_only(all: &PublisherMap) -> EnabledPublisherMap {
    all.iter()
        .filter(|(_, publisher)| publisher.is_content_allowed())
        .map(|(id, publisher)| (id.clone(), publisher.clone()))
        .collect()
}
