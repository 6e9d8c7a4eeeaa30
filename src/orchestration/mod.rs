pub mod dispatcher;

pub use dispatcher::{DispatchError, JobDispatcher, DEFAULT_POLL_INTERVAL};
