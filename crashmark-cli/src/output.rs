// Copyright (c) The crashmark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Once;
use tracing_subscriber::{
    Layer,
    filter::{LevelFilter, Targets},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

static INIT_LOGGER: Once = Once::new();

/// Initializes the stderr logger.
///
/// `CRASHMARK_LOG` takes a tracing target filter (e.g. `debug` or
/// `crashmark_runner=trace`); without it, informational messages and up
/// are shown.
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        let level_str = std::env::var("CRASHMARK_LOG").unwrap_or_default();
        let targets = if level_str.is_empty() {
            Targets::new().with_default(LevelFilter::INFO)
        } else {
            level_str.parse().expect("unable to parse CRASHMARK_LOG")
        };

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time();

        tracing_subscriber::registry()
            .with(layer.with_filter(targets))
            .init();
    });
}
