//! Core types: credentials, mirrored calendar resources, time windows, tracing

pub mod credential;
pub mod event;
pub mod time;
pub mod tracing;

pub use credential::{MIN_ACCESS_TOKEN_LEN, OAuthCredential};
pub use event::{CalendarEvent, CalendarInfo, NewEvent};
pub use time::TimeWindow;
pub use self::tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
