mod message;
mod provider;
mod tool;

pub use message::*;
pub use provider::*;
pub use tool::*;
