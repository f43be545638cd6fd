pub mod fixtures;
pub mod session;

pub use fixtures::*;
pub use session::TestSession;
