pub use crate::core::app::App;

pub use yrelay_types::error::{Error, RelayResult};
pub use yrelay_types::types::Timestamp;

pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn, warn_span};

// vim: ts=4
