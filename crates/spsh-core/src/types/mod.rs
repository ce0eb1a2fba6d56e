//! Domain types shared with the upstream person/organisation service

mod event;
mod organisation;
mod person;

pub use event::*;
pub use organisation::*;
pub use person::*;
