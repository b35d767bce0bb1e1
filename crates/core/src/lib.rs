//! `newsdesk-core`: domain foundation building blocks.
//!
//! Records, identifiers, the record-access contract and the clock. No
//! infrastructure concerns live here.

pub mod clock;
pub mod error;
pub mod id;
pub mod news;
pub mod store;
pub mod user;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{NewsId, RecordId, UserId};
pub use news::News;
pub use store::{Page, PageRequest, Record, RecordStore, StoreError, StoreResult};
pub use user::User;
