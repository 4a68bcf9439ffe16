//! Core domain types for the ferry event relay.
//!
//! Provides the event payload model sent to the chat relay endpoint, the
//! settings contract supplied by the host application, and the clock
//! abstraction shared by every time-dependent component. The dispatch crate
//! and the binary build on these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod origin;
pub mod settings;
pub mod time;

pub use error::{CoreError, Result};
pub use events::{Author, EventPayload, PostCreated, TopicCreated, TopicRemoved};
pub use settings::{Settings, SettingsProvider, StaticSettings};
pub use time::{Clock, RealClock, TestClock};
