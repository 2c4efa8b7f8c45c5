//! API request handlers

mod governance;
mod health;
mod intents;
mod internal;

pub use governance::*;
pub use health::*;
pub use intents::*;
pub use internal::*;
