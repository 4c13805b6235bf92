//! Screen Composer - screen recording with a camera overlay.
//!
//! This is the library crate behind the `screen-composer` binary. It manages
//! camera and microphone streams, composes the screen with a camera overlay
//! and drives the recording session lifecycle.

pub mod capture;
pub mod compose;
pub mod config;
pub mod device;
pub mod media;
pub mod recorder;
pub mod utils;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber. Later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "screen_composer=debug,screen_composer_lib=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
