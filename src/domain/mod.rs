pub mod assignment;
pub mod offer;
pub mod property;

pub use assignment::{AssignmentRecord, AssignmentStatus};
pub use offer::{Offer, OfferStatus};
pub use property::PropertySummary;
