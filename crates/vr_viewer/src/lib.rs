// src/lib.rs
//! Headless stereo viewer for the painter-sort pipeline.
//!
//! A demo world is walked every frame into `trisort`, sorted on the GPU (or
//! the CPU reference backend) and drawn once per eye inside the `xr_frame`
//! frame loop. Failures switch VR off without stopping the host.

pub mod config;
pub mod gpu;
pub mod host;
pub mod plugin;
pub mod renderer;
