//! Engine threading.
//!
//! Both engines run their periodic work on a dedicated thread owned through
//! an [`EngineThread`]. The playout engine keeps its device handle on it; the
//! capture poller drives every capture engine from it.

mod worker;

pub(crate) use worker::{EngineThread, Worker};
