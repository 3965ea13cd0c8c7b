//! Domain models shared across persistence and coordination layers.

pub mod lock;
pub mod material;
pub mod progress;
pub mod question;
pub mod result;
pub mod session;
