mod futures;
mod sync;

pub use futures::AsyncSingleFlightCache;
pub use sync::SingleFlightCache;
