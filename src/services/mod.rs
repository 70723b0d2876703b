//! Scheduled data sources
//!
//! - messages: chat history since the watermark
//! - contacts: full address book snapshot
//! - screenshots: one captured frame per tick

pub mod contacts;
pub mod messages;
pub mod screenshots;

pub use contacts::{ContactRecord, ContactSource, ContactsService};
pub use messages::{Attachment, MessageRecord, MessagesService};
pub use screenshots::{ScreenCapturer, Screenshot, ScreenshotService};
