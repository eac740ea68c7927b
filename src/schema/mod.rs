//! Document-store record shapes
//!
//! Plain-data views of what the data-access layer hands the engine: raw sensor
//! records and user records. Nothing here performs I/O.

mod raw_record;
mod user;

pub use raw_record::*;
pub use user::*;
