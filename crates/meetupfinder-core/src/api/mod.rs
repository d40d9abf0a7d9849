//! Directory API module.
//!
//! This module provides the `EventSource` port and `MeetupClient`, its
//! implementation against the Meetup "find events" endpoint. The client
//! makes a single GET per lookup, with no retry and no pagination.

pub mod client;
pub mod error;
pub mod source;

pub use client::MeetupClient;
pub use error::ApiError;
pub use source::EventSource;
