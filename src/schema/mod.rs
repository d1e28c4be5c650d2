pub mod campaign;
pub mod contact;
pub mod conversation;
pub mod integration;
pub mod message;
pub mod send_job;
pub mod webhook_event;

pub use campaign::*;
pub use contact::*;
pub use conversation::*;
pub use integration::*;
pub use message::*;
pub use send_job::*;
pub use webhook_event::*;
