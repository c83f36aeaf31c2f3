pub mod comparison;
pub mod metrics;
pub mod scenario;

pub use comparison::*;
pub use metrics::*;
pub use scenario::*;
