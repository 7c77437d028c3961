//! Entity data model

mod family;
mod types;

pub use family::{Family, FamilyDescriptor, Grouping, RefreshShape, FAMILIES};
pub use types::{Entity, EntityEvent, EntityId, EntityRef, EventType, NewEvent, SeenSource, StatusUpdate};
