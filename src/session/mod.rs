pub mod controller;
pub mod driver;
pub mod state;

pub use controller::SessionController;
pub use driver::{spawn_session, SessionCommand, SessionHandle};
pub use state::{PlayContext, PlaybackState, Readiness, SessionSnapshot, SessionStatus, Transport};
