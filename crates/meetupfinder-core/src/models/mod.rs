//! Data models for meetup events.
//!
//! - `Event`: canonical event, built from either the directory API shape or
//!   the cache record shape through `EventBuilder`
//! - `Coordinate`: latitude/longitude pair used to look events up

pub mod event;
pub mod location;

pub use event::{Event, EventBuilder, RequiredFields};
pub use location::Coordinate;
