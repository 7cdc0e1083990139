mod context;
mod error;
mod event;
mod frame;
mod rule;

pub use context::*;
pub use error::*;
pub use event::*;
pub use frame::*;
pub use rule::*;
