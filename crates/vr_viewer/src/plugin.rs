//! Top-level driver tying the host, the sort pipeline and the VR frame loop
//! together.
//!
//! Any error escaping a frame is fatal to the VR feature only: the plugin
//! logs it once, tears everything down and reports [`PluginStatus::Disabled`]
//! from then on, while the host carries on without VR output.

use anyhow::{Context, Result};
use trisort::{
    CameraUniform, GpuDevice, SceneBuffers, SceneSource, SortBuffers, SortConfig, SortDispatcher,
    SortError,
};
use xr_frame::{Compositor, EyeTarget, FrameLoop, FrameLoopConfig, FrameOutcome, GameCamera};

/// What the plugin needs from the host engine.
pub trait HostEngine {
    /// Advances game state by one frame. Returns `true` when a new scene
    /// should be loaded.
    fn tick(&mut self) -> bool;

    fn camera(&self) -> GameCamera;

    fn scene_source(&mut self) -> &mut dyn SceneSource;

    /// Submits every drawable for this frame, in draw order.
    fn walk_scene(&mut self, scene_id: u32, dispatcher: &mut SortDispatcher) -> Result<(), SortError>;
}

/// The sorted output of one frame, shared by both eyes.
pub struct SortedFrame<'a, B> {
    pub buffers: &'a SortBuffers<B>,
    pub vertex_count: u32,
    pub camera: &'a GameCamera,
}

/// Turns the sorted buffers into pixels for one eye.
pub trait EyeSink<B> {
    fn draw_eye(&mut self, target: &EyeTarget<'_>, frame: &SortedFrame<'_, B>) -> Result<()>;
}

/// Sink for headless runs: records what would have been drawn.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrawLog {
    pub eyes: u64,
    pub last_vertex_count: u32,
    /// `(view, image)` of every eye drawn.
    pub targets: Vec<(usize, u32)>,
}

impl<B> EyeSink<B> for DrawLog {
    fn draw_eye(&mut self, target: &EyeTarget<'_>, frame: &SortedFrame<'_, B>) -> Result<()> {
        self.eyes += 1;
        self.last_vertex_count = frame.vertex_count;
        self.targets.push((target.view, target.image));
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct PluginConfig {
    pub frame_loop: FrameLoopConfig,
    pub sort: SortConfig,
    /// Ask the compositor to end the session after this many rendered frames.
    pub exit_after: Option<u64>,
    /// Eye resolution, used for the sort uniform's projection centre.
    pub eye_width: u32,
    pub eye_height: u32,
    pub zoom: i32,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            frame_loop: FrameLoopConfig::default(),
            sort: SortConfig::default(),
            exit_after: None,
            eye_width: 1440,
            eye_height: 1600,
            zoom: 512,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PluginStatus {
    /// Waiting for the runtime to start a session.
    Idle,
    Running,
    /// The session ended normally.
    Stopped,
    /// A fatal error switched VR off.
    Disabled,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PluginStats {
    pub ticks: u64,
    pub rendered: u64,
    pub skipped: u64,
    pub idle: u64,
    pub scene_swaps: u32,
    /// Output vertices of the last sorted frame.
    pub last_vertices: u32,
}

pub struct VrPlugin<C, D, S, H>
where
    C: Compositor,
    D: GpuDevice,
    S: EyeSink<D::Buffer>,
    H: HostEngine,
{
    config: PluginConfig,
    compositor: C,
    frame_loop: FrameLoop,
    device: D,
    buffers: SortBuffers<D::Buffer>,
    scenes: SceneBuffers<D::Buffer>,
    dispatcher: SortDispatcher,
    sink: S,
    host: H,
    status: PluginStatus,
    stats: PluginStats,
    exit_requested: bool,
    torn_down: bool,
}

impl<C, D, S, H> VrPlugin<C, D, S, H>
where
    C: Compositor,
    D: GpuDevice,
    S: EyeSink<D::Buffer>,
    H: HostEngine,
{
    /// Allocates the scene buffers and uploads the host's first scene. On
    /// failure everything allocated so far is released.
    pub fn start(config: PluginConfig, mut compositor: C, mut device: D, sink: S, mut host: H) -> Result<Self> {
        let mut scenes = match SceneBuffers::new(&mut device) {
            Ok(scenes) => scenes,
            Err(e) => {
                compositor.destroy();
                return Err(e).context("Failed to allocate scene buffers");
            }
        };
        let loaded = scenes
            .load_scene(host.scene_source())
            .and_then(|_| scenes.swap_scene(&mut device));
        if let Err(e) = loaded {
            scenes.destroy(&mut device);
            compositor.destroy();
            return Err(e).context("Failed to upload the initial scene");
        }

        log::info!("VR plugin started with scene {}", scenes.active().id);
        Ok(Self {
            frame_loop: FrameLoop::new(config.frame_loop.clone()),
            dispatcher: SortDispatcher::new(&config.sort),
            config,
            compositor,
            device,
            buffers: SortBuffers::new(),
            scenes,
            sink,
            host,
            status: PluginStatus::Idle,
            stats: PluginStats::default(),
            exit_requested: false,
            torn_down: false,
        })
    }

    pub fn status(&self) -> PluginStatus {
        self.status
    }

    pub fn stats(&self) -> PluginStats {
        self.stats
    }

    pub fn compositor(&self) -> &C {
        &self.compositor
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn active_scene(&self) -> u32 {
        self.scenes.active().id
    }

    /// Runs one host frame. Never fails; a fatal error disables the plugin.
    ///
    /// Once VR has stopped or been disabled the host still ticks every frame;
    /// only the sort and compositor work is skipped.
    pub fn frame(&mut self) -> PluginStatus {
        if matches!(self.status, PluginStatus::Stopped | PluginStatus::Disabled) {
            self.stats.ticks += 1;
            if self.host.tick() {
                log::debug!("Scene reload ignored while VR is off");
            }
            return self.status;
        }
        match self.try_frame() {
            Ok(status) => self.status = status,
            Err(e) => {
                log::error!("VR disabled after a fatal error: {:#}", e);
                self.shutdown();
                self.status = PluginStatus::Disabled;
            }
        }
        if self.status == PluginStatus::Stopped {
            self.shutdown();
        }
        self.status
    }

    /// Runs host frames until `max_frames` have passed, sleeping between polls
    /// while idle. If VR ends first the host keeps ticking without it; with no
    /// limit the loop returns as soon as VR ends.
    pub fn run(&mut self, max_frames: Option<u64>) -> PluginStatus {
        loop {
            if matches!(max_frames, Some(max) if self.stats.ticks >= max) {
                return self.status;
            }
            let was_on = self.vr_active();
            let status = self.frame();
            match status {
                PluginStatus::Stopped | PluginStatus::Disabled => {
                    if max_frames.is_none() {
                        return status;
                    }
                    if was_on {
                        log::info!("VR ended ({:?}); host continues without it", status);
                    }
                }
                PluginStatus::Idle => self.frame_loop.throttle(),
                PluginStatus::Running => {}
            }
        }
    }

    /// Whether frames still go to the compositor.
    pub fn vr_active(&self) -> bool {
        matches!(self.status, PluginStatus::Idle | PluginStatus::Running)
    }

    fn try_frame(&mut self) -> Result<PluginStatus> {
        self.stats.ticks += 1;
        if self.host.tick() {
            self.scenes.load_scene(self.host.scene_source())?;
        }
        if self.scenes.swap_scene(&mut self.device)? {
            self.stats.scene_swaps += 1;
        }

        let camera = self.host.camera();
        self.dispatcher.begin_frame(self.camera_uniform(&camera));
        self.host.walk_scene(self.scenes.active().id, &mut self.dispatcher)?;
        self.dispatcher.finish_frame()?;

        let Self {
            compositor,
            frame_loop,
            device,
            buffers,
            scenes,
            dispatcher,
            sink,
            stats,
            ..
        } = self;

        // Sorting waits for the first eye so skipped frames cost no GPU work.
        let mut sorted: Option<u32> = None;
        let outcome = frame_loop.run_frame(compositor, &camera, |target: &EyeTarget<'_>| -> Result<()> {
            let vertex_count = match sorted {
                Some(count) => count,
                None => {
                    let summary = dispatcher
                        .dispatch(device, buffers, scenes.active())
                        .context("Sort dispatch failed")?;
                    sorted = Some(summary.output_vertices);
                    summary.output_vertices
                }
            };
            stats.last_vertices = vertex_count;
            sink.draw_eye(
                target,
                &SortedFrame {
                    buffers,
                    vertex_count,
                    camera: &camera,
                },
            )
        })?;

        Ok(match outcome {
            FrameOutcome::Idle => {
                self.stats.idle += 1;
                PluginStatus::Idle
            }
            FrameOutcome::Skipped(reason) => {
                self.stats.skipped += 1;
                log::trace!("Frame skipped: {:?}", reason);
                PluginStatus::Running
            }
            FrameOutcome::Rendered { .. } => {
                self.stats.rendered += 1;
                if matches!(self.config.exit_after, Some(n) if self.stats.rendered >= n) && !self.exit_requested {
                    log::info!("Requesting session exit after {} frames", self.stats.rendered);
                    self.compositor.request_exit()?;
                    self.exit_requested = true;
                }
                PluginStatus::Running
            }
            FrameOutcome::Stopped => PluginStatus::Stopped,
        })
    }

    fn camera_uniform(&self, camera: &GameCamera) -> CameraUniform {
        CameraUniform {
            yaw: camera.yaw,
            pitch: camera.pitch,
            center_x: self.config.eye_width as i32 / 2,
            center_y: self.config.eye_height as i32 / 2,
            zoom: self.config.zoom,
            camera_x: camera.position.x,
            camera_y: camera.position.y,
            camera_z: camera.position.z,
        }
    }

    /// Releases the runtime and every GPU buffer. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.frame_loop.session_mut().teardown(&mut self.compositor);
        self.buffers.destroy(&mut self.device);
        self.scenes.destroy(&mut self.device);
        log::info!(
            "VR plugin shut down: {} rendered, {} skipped, {} scene swaps",
            self.stats.rendered,
            self.stats.skipped,
            self.stats.scene_swaps
        );
    }
}

impl<C, D, S, H> Drop for VrPlugin<C, D, S, H>
where
    C: Compositor,
    D: GpuDevice,
    S: EyeSink<D::Buffer>,
    H: HostEngine,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}
