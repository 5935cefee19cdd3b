//! An in-process compositor that follows the runtime protocol strictly.
//!
//! It runs headless, emits the same session-state sequence a real runtime
//! does, and rejects out-of-order calls with [`XrError::OutOfOrder`]. Tracking
//! loss and declined frames can be scheduled by frame number.

use std::collections::VecDeque;

use glam::{Quat, Vec3};

use crate::compositor::{
    Compositor, CompositorEvent, EyeView, Fov, FrameTiming, LocatedViews, Pose, ProjectionView,
    SessionHandle, SessionState, SwapchainInfo, ViewStateFlags,
};
use crate::error::XrError;
use crate::format::{select_swapchain_format, vk, DEFAULT_PREFERENCE};

#[derive(Clone, Debug)]
pub struct SimulatedRuntimeConfig {
    pub width: u32,
    pub height: u32,
    pub image_count: u32,
    /// Formats the simulated runtime offers, in its own order.
    pub available_formats: Vec<i64>,
    /// Ranked formats the application asks for.
    pub preferred_formats: Vec<i64>,
    /// Interpupillary distance in metres.
    pub ipd: f32,
    pub fov: Fov,
    /// Nanoseconds between predicted display times.
    pub frame_period_ns: i64,
    /// Frame numbers (1-based) located with invalid pose flags.
    pub tracking_loss: Vec<u64>,
    /// Frame numbers (1-based) where `should_render` is false.
    pub declined_frames: Vec<u64>,
    pub session_handle: SessionHandle,
}

impl Default for SimulatedRuntimeConfig {
    fn default() -> Self {
        Self {
            width: 1440,
            height: 1600,
            image_count: 3,
            available_formats: vec![vk::B8G8R8A8_SRGB, vk::R8G8B8A8_SRGB, vk::B8G8R8A8_UNORM],
            preferred_formats: DEFAULT_PREFERENCE.to_vec(),
            ipd: 0.064,
            fov: Fov {
                angle_left: -0.87,
                angle_right: 0.78,
                angle_up: 0.85,
                angle_down: -0.92,
            },
            frame_period_ns: 11_111_111,
            tracking_loss: Vec::new(),
            declined_frames: Vec::new(),
            session_handle: 0x5e55_1011,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimulatedStats {
    pub session_begins: u32,
    pub session_ends: u32,
    pub frames_waited: u64,
    pub frames_ended: u64,
    /// Frames ended with no layers.
    pub empty_frames: u64,
    pub images_acquired: u64,
    pub images_released: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FramePhase {
    Idle,
    Waited,
    Begun,
}

#[derive(Debug)]
struct ImageRing {
    next: u32,
    acquired: Option<u32>,
    waited: bool,
}

#[derive(Debug)]
pub struct SimulatedCompositor {
    config: SimulatedRuntimeConfig,
    swapchains: Vec<SwapchainInfo>,
    rings: Vec<ImageRing>,
    events: VecDeque<CompositorEvent>,
    state: SessionState,
    running: bool,
    phase: FramePhase,
    frame: u64,
    destroyed: bool,
    stats: SimulatedStats,
    last_layer: Option<Vec<ProjectionView>>,
}

const VIEW_COUNT: usize = 2;

impl SimulatedCompositor {
    /// Creates the runtime and queues IDLE then READY.
    pub fn new(config: SimulatedRuntimeConfig) -> Result<Self, XrError> {
        let format = select_swapchain_format(&config.preferred_formats, &config.available_formats)?;
        if config.image_count == 0 {
            return Err(XrError::Runtime {
                call: "create_swapchain",
                reason: "image count must be at least 1".into(),
            });
        }
        let info = SwapchainInfo {
            width: config.width,
            height: config.height,
            format,
            image_count: config.image_count,
        };
        log::info!(
            "Simulated VR runtime: {}x{} per eye, format {}, {} images",
            info.width,
            info.height,
            info.format,
            info.image_count
        );

        let mut compositor = Self {
            swapchains: vec![info; VIEW_COUNT],
            rings: (0..VIEW_COUNT)
                .map(|_| ImageRing {
                    next: 0,
                    acquired: None,
                    waited: false,
                })
                .collect(),
            config,
            events: VecDeque::new(),
            state: SessionState::Unknown,
            running: false,
            phase: FramePhase::Idle,
            frame: 0,
            destroyed: false,
            stats: SimulatedStats::default(),
            last_layer: None,
        };
        compositor.emit(SessionState::Idle);
        compositor.emit(SessionState::Ready);
        Ok(compositor)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SimulatedStats {
        self.stats
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Layer submitted by the most recent `end_frame`, `None` if it was empty.
    pub fn last_layer(&self) -> Option<&[ProjectionView]> {
        self.last_layer.as_deref()
    }

    /// Queues an arbitrary event, as a misbehaving or remote runtime might.
    pub fn inject(&mut self, event: CompositorEvent) {
        self.events.push_back(event);
    }

    fn emit(&mut self, state: SessionState) {
        self.state = state;
        self.events.push_back(CompositorEvent::SessionStateChanged {
            session: self.config.session_handle,
            state,
        });
    }

    fn check_live(&self) -> Result<(), XrError> {
        if self.destroyed {
            Err(XrError::SessionLost)
        } else {
            Ok(())
        }
    }

    fn ring(&mut self, view: usize) -> Result<&mut ImageRing, XrError> {
        self.rings.get_mut(view).ok_or(XrError::NoSuchView(view))
    }

    fn head_pose(&self) -> Quat {
        Quat::from_rotation_y(0.05 * (self.frame as f32 * 0.01).sin())
    }
}

impl Compositor for SimulatedCompositor {
    fn poll_event(&mut self) -> Result<Option<CompositorEvent>, XrError> {
        if self.destroyed {
            return Ok(None);
        }
        Ok(self.events.pop_front())
    }

    fn session_handle(&self) -> SessionHandle {
        self.config.session_handle
    }

    fn begin_session(&mut self) -> Result<(), XrError> {
        self.check_live()?;
        if self.state != SessionState::Ready || self.running {
            return Err(XrError::OutOfOrder("begin_session outside READY"));
        }
        self.running = true;
        self.stats.session_begins += 1;
        self.emit(SessionState::Synchronized);
        self.emit(SessionState::Visible);
        self.emit(SessionState::Focused);
        Ok(())
    }

    fn end_session(&mut self) -> Result<(), XrError> {
        self.check_live()?;
        if self.state != SessionState::Stopping {
            return Err(XrError::OutOfOrder("end_session outside STOPPING"));
        }
        self.running = false;
        self.stats.session_ends += 1;
        self.emit(SessionState::Idle);
        self.emit(SessionState::Exiting);
        Ok(())
    }

    fn request_exit(&mut self) -> Result<(), XrError> {
        self.check_live()?;
        if !self.running {
            return Err(XrError::OutOfOrder("request_exit without a running session"));
        }
        self.emit(SessionState::Stopping);
        Ok(())
    }

    fn wait_frame(&mut self) -> Result<FrameTiming, XrError> {
        self.check_live()?;
        if !self.running {
            return Err(XrError::OutOfOrder("wait_frame without a running session"));
        }
        if self.phase != FramePhase::Idle {
            return Err(XrError::OutOfOrder("wait_frame before the previous frame ended"));
        }
        self.phase = FramePhase::Waited;
        self.frame += 1;
        self.stats.frames_waited += 1;
        Ok(FrameTiming {
            display_time: self.frame as i64 * self.config.frame_period_ns,
            should_render: !self.config.declined_frames.contains(&self.frame),
        })
    }

    fn begin_frame(&mut self) -> Result<(), XrError> {
        self.check_live()?;
        if self.phase != FramePhase::Waited {
            return Err(XrError::OutOfOrder("begin_frame without wait_frame"));
        }
        self.phase = FramePhase::Begun;
        Ok(())
    }

    fn locate_views(&mut self, _display_time: i64) -> Result<LocatedViews, XrError> {
        self.check_live()?;
        if !self.running {
            return Err(XrError::OutOfOrder("locate_views without a running session"));
        }
        let flags = if self.config.tracking_loss.contains(&self.frame) {
            ViewStateFlags::default()
        } else {
            ViewStateFlags::ALL
        };
        let head = self.head_pose();
        let half_ipd = self.config.ipd / 2.0;
        let views = [-half_ipd, half_ipd]
            .into_iter()
            .map(|x| EyeView {
                pose: Pose {
                    orientation: head,
                    position: head * Vec3::new(x, 0.0, 0.0),
                },
                fov: self.config.fov,
            })
            .collect();
        Ok(LocatedViews { flags, views })
    }

    fn swapchains(&self) -> &[SwapchainInfo] {
        &self.swapchains
    }

    fn acquire_image(&mut self, view: usize) -> Result<u32, XrError> {
        self.check_live()?;
        if self.phase != FramePhase::Begun {
            return Err(XrError::OutOfOrder("acquire_image outside a frame"));
        }
        let count = self.config.image_count;
        let ring = self.ring(view)?;
        if ring.acquired.is_some() {
            return Err(XrError::OutOfOrder("acquire_image twice without release"));
        }
        let image = ring.next;
        ring.next = (ring.next + 1) % count;
        ring.acquired = Some(image);
        ring.waited = false;
        self.stats.images_acquired += 1;
        Ok(image)
    }

    fn wait_image(&mut self, view: usize) -> Result<(), XrError> {
        self.check_live()?;
        let ring = self.ring(view)?;
        if ring.acquired.is_none() || ring.waited {
            return Err(XrError::OutOfOrder("wait_image without a fresh acquire"));
        }
        ring.waited = true;
        Ok(())
    }

    fn release_image(&mut self, view: usize) -> Result<(), XrError> {
        self.check_live()?;
        let ring = self.ring(view)?;
        if ring.acquired.is_none() || !ring.waited {
            return Err(XrError::OutOfOrder("release_image without acquire and wait"));
        }
        ring.acquired = None;
        ring.waited = false;
        self.stats.images_released += 1;
        Ok(())
    }

    fn end_frame(&mut self, _display_time: i64, layer: Option<&[ProjectionView]>) -> Result<(), XrError> {
        self.check_live()?;
        if self.phase != FramePhase::Begun {
            return Err(XrError::OutOfOrder("end_frame without begin_frame"));
        }
        if self.rings.iter().any(|r| r.acquired.is_some()) {
            return Err(XrError::OutOfOrder("end_frame with an image still acquired"));
        }
        if let Some(views) = layer {
            if views.len() != VIEW_COUNT {
                return Err(XrError::OutOfOrder("projection layer must cover both views"));
            }
        }
        self.phase = FramePhase::Idle;
        self.stats.frames_ended += 1;
        if layer.is_none() {
            self.stats.empty_frames += 1;
        }
        self.last_layer = layer.map(<[ProjectionView]>::to_vec);
        Ok(())
    }

    fn destroy(&mut self) {
        if !self.destroyed {
            log::debug!("Simulated VR runtime destroyed after {} frames", self.frame);
        }
        self.destroyed = true;
        self.running = false;
        self.events.clear();
    }
}
