//! Back up every database container on a host, then its volumes.
//!
//! Applications are stopped first so nothing writes during the dumps, each
//! database is dumped through the runtime's exec facility, the databases are
//! stopped for a consistent archive of the volume directory, and everything
//! that was stopped is started again.

pub mod core;
pub mod utils;
