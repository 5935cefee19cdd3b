//! One stereo frame per call: events, wait, begin, locate, render each eye, end.

use std::time::Duration;

use crate::camera::{eye_transforms, EyeTransforms, GameCamera};
use crate::compositor::{Compositor, EyeView, ProjectionView, SwapchainInfo};
use crate::error::XrError;
use crate::session::{PumpOutcome, SessionMachine};

#[derive(Clone, Debug)]
pub struct FrameLoopConfig {
    /// Sleep between event polls while no session is running.
    pub idle_throttle: Duration,
    /// Near and far planes in metres.
    pub near: f32,
    pub far: f32,
}

impl Default for FrameLoopConfig {
    fn default() -> Self {
        Self {
            idle_throttle: Duration::from_millis(250),
            near: 0.05,
            far: 200.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The compositor set `should_render` to false.
    NotRequested,
    /// Orientation or position was not valid at the predicted time.
    PoseInvalid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// No session running yet; the caller should throttle.
    Idle,
    /// Frame waited and ended with no layers.
    Skipped(SkipReason),
    Rendered { views: usize },
    /// The session is over; stop calling.
    Stopped,
}

/// Everything the renderer needs for one eye.
#[derive(Clone, Copy, Debug)]
pub struct EyeTarget<'a> {
    pub view: usize,
    /// Index of the acquired image in this view's swapchain.
    pub image: u32,
    pub swapchain: SwapchainInfo,
    pub eye: &'a EyeView,
    pub transforms: EyeTransforms,
}

pub struct FrameLoop {
    session: SessionMachine,
    config: FrameLoopConfig,
    frames: u64,
}

impl FrameLoop {
    pub fn new(config: FrameLoopConfig) -> Self {
        Self {
            session: SessionMachine::new(),
            config,
            frames: 0,
        }
    }

    pub fn session(&self) -> &SessionMachine {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionMachine {
        &mut self.session
    }

    pub fn config(&self) -> &FrameLoopConfig {
        &self.config
    }

    /// Frames ended so far, rendered or skipped.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Sleeps for the idle interval.
    pub fn throttle(&self) {
        std::thread::sleep(self.config.idle_throttle);
    }

    /// Drives one frame. `render` runs once per eye between acquire and release.
    pub fn run_frame<C, E, F>(
        &mut self,
        compositor: &mut C,
        camera: &GameCamera,
        mut render: F,
    ) -> Result<FrameOutcome, E>
    where
        C: Compositor + ?Sized,
        E: From<XrError>,
        F: FnMut(&EyeTarget<'_>) -> Result<(), E>,
    {
        if self.session.pump(compositor)? == PumpOutcome::Stop {
            return Ok(FrameOutcome::Stopped);
        }
        if !self.session.is_running() {
            return Ok(FrameOutcome::Idle);
        }

        let timing = compositor.wait_frame()?;
        compositor.begin_frame()?;
        if !timing.should_render {
            compositor.end_frame(timing.display_time, None)?;
            self.frames += 1;
            log::debug!("Frame {} skipped: compositor declined rendering", self.frames);
            return Ok(FrameOutcome::Skipped(SkipReason::NotRequested));
        }

        let located = compositor.locate_views(timing.display_time)?;
        if !located.flags.pose_valid() {
            compositor.end_frame(timing.display_time, None)?;
            self.frames += 1;
            log::debug!("Frame {} skipped: pose not valid", self.frames);
            return Ok(FrameOutcome::Skipped(SkipReason::PoseInvalid));
        }

        let mut layer = Vec::with_capacity(located.views.len());
        for (view, eye) in located.views.iter().enumerate() {
            let swapchain = *compositor
                .swapchains()
                .get(view)
                .ok_or(XrError::NoSuchView(view))?;
            let image = compositor.acquire_image(view)?;
            compositor.wait_image(view)?;

            let target = EyeTarget {
                view,
                image,
                swapchain,
                eye,
                transforms: eye_transforms(eye, camera, self.config.near, self.config.far),
            };
            let rendered = render(&target);
            compositor.release_image(view)?;

            if let Err(e) = rendered {
                if let Err(end) = compositor.end_frame(timing.display_time, None) {
                    log::warn!("Failed to end frame after render error: {}", end);
                }
                self.frames += 1;
                return Err(e);
            }
            layer.push(ProjectionView {
                view,
                eye: *eye,
                width: swapchain.width,
                height: swapchain.height,
            });
        }

        compositor.end_frame(timing.display_time, Some(&layer))?;
        self.frames += 1;
        Ok(FrameOutcome::Rendered { views: layer.len() })
    }
}
