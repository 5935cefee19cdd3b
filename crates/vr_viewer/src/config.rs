use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use xr_frame::format::{gl, vk, DEFAULT_PREFERENCE};
use xr_frame::{FrameLoopConfig, SimulatedRuntimeConfig};

use crate::host::WorldConfig;
use crate::plugin::PluginConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown swapchain format '{0}'")]
    UnknownFormat(String),
}

/// Parses a swapchain format name such as `rgba8-srgb` or `gl-rgba16f` into
/// its runtime format code.
pub fn parse_format(name: &str) -> Result<i64, ConfigError> {
    Ok(match name.to_ascii_lowercase().as_str() {
        "rgba8-srgb" => vk::R8G8B8A8_SRGB,
        "bgra8-srgb" => vk::B8G8R8A8_SRGB,
        "rgba8" => vk::R8G8B8A8_UNORM,
        "bgra8" => vk::B8G8R8A8_UNORM,
        "gl-rgba8" => gl::RGBA8,
        "gl-srgb8-alpha8" => gl::SRGB8_ALPHA8,
        "gl-rgb10-a2" => gl::RGB10_A2,
        "gl-rgba16f" => gl::RGBA16F,
        _ => return Err(ConfigError::UnknownFormat(name.to_owned())),
    })
}

/// `vr_viewer` - Drives a demo world through the painter-sort pipeline and a
/// stereo VR frame loop.
///
/// Without a headset runtime the frames go to a simulated compositor, which
/// exercises the same session lifecycle and swapchain protocol.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Host frames to run before exiting. Runs until the session ends if unset.
    #[arg(long, env = "VR_FRAMES")]
    pub frames: Option<u64>,

    /// Request a session exit after this many rendered frames.
    #[arg(long, env = "VR_EXIT_AFTER")]
    pub exit_after: Option<u64>,

    /// Per-eye swapchain width in pixels.
    #[arg(long, default_value_t = 1440)]
    pub eye_width: u32,

    /// Per-eye swapchain height in pixels.
    #[arg(long, default_value_t = 1600)]
    pub eye_height: u32,

    /// Swapchain images per eye.
    #[arg(long, default_value_t = 3)]
    pub images: u32,

    /// Swapchain formats in order of preference, e.g. `rgba8-srgb,bgra8`.
    ///
    /// Defaults to sRGB first, then linear.
    #[arg(long, value_delimiter = ',', value_parser = parse_format)]
    pub formats: Vec<i64>,

    /// Interpupillary distance in metres.
    #[arg(long, default_value_t = 0.064)]
    pub ipd: f32,

    /// Tiles per edge of the generated map.
    #[arg(long, default_value_t = 64)]
    pub scene_size: u32,

    /// Moving models submitted as per-frame geometry.
    #[arg(long, default_value_t = 32)]
    pub walkers: u32,

    /// Draw distance in tiles.
    #[arg(long, default_value_t = 25)]
    pub draw_distance: u32,

    /// Reload the scene every this many host frames.
    #[arg(long)]
    pub reload_every: Option<u64>,

    /// Simulated frames (1-based) whose head pose is reported invalid.
    #[arg(long, value_delimiter = ',')]
    pub tracking_loss: Vec<u64>,

    /// Milliseconds to sleep between polls while no session is running.
    #[arg(long, default_value_t = 250)]
    pub idle_throttle_ms: u64,

    /// Sort on the CPU reference backend and skip GPU rendering.
    #[arg(long, env = "VR_CPU")]
    pub cpu: bool,
}

impl Config {
    pub fn preferred_formats(&self) -> Vec<i64> {
        if self.formats.is_empty() {
            DEFAULT_PREFERENCE.to_vec()
        } else {
            self.formats.clone()
        }
    }

    pub fn runtime(&self) -> SimulatedRuntimeConfig {
        SimulatedRuntimeConfig {
            width: self.eye_width,
            height: self.eye_height,
            image_count: self.images,
            preferred_formats: self.preferred_formats(),
            ipd: self.ipd,
            tracking_loss: self.tracking_loss.clone(),
            ..SimulatedRuntimeConfig::default()
        }
    }

    pub fn world(&self) -> WorldConfig {
        WorldConfig {
            size: self.scene_size,
            walkers: self.walkers,
            draw_distance: self.draw_distance,
            reload_every: self.reload_every,
        }
    }

    pub fn plugin(&self) -> PluginConfig {
        PluginConfig {
            frame_loop: FrameLoopConfig {
                idle_throttle: Duration::from_millis(self.idle_throttle_ms),
                ..FrameLoopConfig::default()
            },
            exit_after: self.exit_after,
            eye_width: self.eye_width,
            eye_height: self.eye_height,
            ..PluginConfig::default()
        }
    }

    /// Fog distance for the eye renderer, in game units.
    pub fn fog_distance(&self) -> f32 {
        (self.draw_distance as i32 * trisort::scene::TILE_SIZE) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_prefer_srgb() {
        let config = Config::try_parse_from(["vr_viewer"]).unwrap();
        assert_eq!(config.preferred_formats(), DEFAULT_PREFERENCE);
        assert!(!config.cpu);
        assert_eq!(config.frames, None);

        let runtime = config.runtime();
        assert_eq!((runtime.width, runtime.height, runtime.image_count), (1440, 1600, 3));
        assert!(runtime.tracking_loss.is_empty());
    }

    #[test]
    fn format_list_is_parsed_in_order() {
        let config = Config::try_parse_from(["vr_viewer", "--formats", "bgra8,gl-rgba16f"]).unwrap();
        assert_eq!(config.preferred_formats(), vec![vk::B8G8R8A8_UNORM, gl::RGBA16F]);
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert_eq!(parse_format("rgb565"), Err(ConfigError::UnknownFormat("rgb565".into())));
        assert!(Config::try_parse_from(["vr_viewer", "--formats", "rgb565"]).is_err());
    }

    #[test]
    fn world_and_plugin_settings_follow_flags() {
        let config = Config::try_parse_from([
            "vr_viewer",
            "--scene-size",
            "16",
            "--walkers",
            "4",
            "--reload-every",
            "100",
            "--tracking-loss",
            "3,7",
            "--exit-after",
            "10",
            "--idle-throttle-ms",
            "5",
        ])
        .unwrap();

        let world = config.world();
        assert_eq!((world.size, world.walkers, world.reload_every), (16, 4, Some(100)));
        assert_eq!(config.runtime().tracking_loss, vec![3, 7]);

        let plugin = config.plugin();
        assert_eq!(plugin.exit_after, Some(10));
        assert_eq!(plugin.frame_loop.idle_throttle, Duration::from_millis(5));
    }
}
