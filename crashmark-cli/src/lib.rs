// Copyright (c) The crashmark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The crashmark command-line tools.
//!
//! Two binaries over [`crashmark_runner`]:
//!
//! - `crashmark-patch` merges crashes recorded in the crash log into
//!   report artifacts;
//! - `crashmark-retry` re-invokes a worker command, deselecting crashed
//!   tests, until the run converges.

mod dispatch;
mod errors;
mod output;

pub use dispatch::{PatchApp, RetryApp};
pub use errors::ExpectedError;
pub use output::init_logger;
