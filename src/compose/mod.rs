//! Video composition
//!
//! Renders the screen stream with an optional camera overlay onto a canvas at
//! a fixed frame rate and exposes the result as a new live stream.

pub mod canvas;
pub mod composer;
pub mod layout;
pub mod restart;
pub mod types;

pub use composer::{VideoComposer, COMPOSITE_TRACK_LABEL};
pub use layout::overlay_rect;
pub use restart::{ComposerSlot, RestartOutcome};
pub use types::{
    CameraPosition, CameraSize, ComposerError, CompositionConfig, CompositionStats, Rect,
};
