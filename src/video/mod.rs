//! Grid compositing and ASCII conversion pipeline (spec §3.8, §4.7).

pub mod ascii;
pub mod compositor;
pub mod resize;

pub use compositor::{broadcast_ascii_frame, compose_tick, grid_for_count, CompositorConfig};
