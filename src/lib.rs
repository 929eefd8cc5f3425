//! Interactive selection and transform engine for pixel-art editing.
//!
//! A rectangular (or traced) selection is lifted into a floating buffer,
//! moved/rotated/scaled with pixel-art aware resampling, and stamped back
//! into its layer as one reversible [`HistoryDelta`]. Hosts drive the
//! [`SelectionController`] with pointer events and receive [`RenderFrame`]s.

pub mod canvas;
pub mod cli;
pub mod components;
pub mod config;
pub mod error;
pub mod logger;
pub mod ops;

pub use canvas::{CanvasState, Layer, PixelBuffer, PixelRect, PixelStore, SelectionMask, SelectionMode};
pub use components::handles::{HandleId, HandleLayout, ScaleHandle, ViewTransform};
pub use components::history::{HistoryDelta, HistoryManager};
pub use components::selection_tool::{
    PointerEvent, PreviewImage, RenderFrame, SelectionController, SelectionHost, SelectionState,
};
pub use config::SelectionConfig;
pub use error::{Result, SelectionError};
pub use ops::outline::{Outline, OutlineMode};
pub use ops::resample::Interpolation;
pub use ops::transform::{Affine, TransformState};
