pub mod audience;
pub mod conversations;
pub mod provider;
pub mod signature;

pub use audience::*;
pub use conversations::*;
pub use provider::*;
