//! # Equipment interfaces
//!
//! Command and response definitions for the external driver processes the
//! executive talks to: the navigation driver, the perception pipeline, and
//! the manipulator arm driver. The drivers themselves live outside this
//! repository; these types are the whole of their contract.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod det;
pub mod manip;
pub mod nav;
