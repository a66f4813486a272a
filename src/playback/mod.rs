pub mod backend;
pub mod device;
pub mod embedded;
pub mod preview;
pub mod progress;
pub mod queue;
