pub mod poll;

pub use poll::{Interest, Poller, Readiness};
