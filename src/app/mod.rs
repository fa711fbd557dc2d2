//! Maps CLI commands onto component entry points.

pub mod dispatch;
pub mod status;

pub use dispatch::{Outcome, dispatch, exit_code_for_error};
