use serde::{Deserialize, Serialize};

/// Minimal property summary carried alongside pending offers for the agent
/// UI. The full property record lives in the listings service; the
/// dispatcher keeps only the synced fields it needs to render an
/// assignment card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySummary {
    pub property_id: String,
    pub title: String,
    pub zipcode: String,
    pub district: String,
}

impl PropertySummary {
    /// Fallback when the directory has not synced this property yet; the
    /// offer is still actionable by ID.
    pub fn placeholder(property_id: &str) -> Self {
        Self {
            property_id: property_id.to_string(),
            title: String::new(),
            zipcode: String::new(),
            district: String::new(),
        }
    }
}
