//! Common types shared by the message store and the relay.

pub mod error;
pub mod ids;
pub mod messages;
pub mod time;

pub use error::{Error, Result};
pub use ids::generate_id;
pub use messages::{Message, Topic};
pub use time::SinceDate;
