//! Audio pipeline: per-source ducking, crowd scaling, master
//! compression (spec §3.7, §4.6).

pub mod compressor;
pub mod mixer;

pub use mixer::Mixer;
