//! [`Compositor`] over a real OpenXR runtime.
//!
//! Generic over the graphics binding so an embedder supplies the session
//! create info for whatever API it renders with; the swapchain images are
//! exposed through [`OpenXrCompositor::images`].

use glam::{Quat, Vec3};
use openxr as xr;

use crate::compositor::{
    Compositor, CompositorEvent, EyeView, Fov, FrameTiming, LocatedViews, Pose, ProjectionView,
    SessionHandle, SessionState, SwapchainInfo, ViewStateFlags,
};
use crate::error::XrError;
use crate::format::{select_swapchain_format, DEFAULT_PREFERENCE};

const VIEW_TYPE: xr::ViewConfigurationType = xr::ViewConfigurationType::PRIMARY_STEREO;

/// Instance extension that carries the graphics binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphicsExtension {
    Vulkan2,
    OpenGl,
    D3D11,
}

impl GraphicsExtension {
    pub fn name(self) -> &'static str {
        match self {
            GraphicsExtension::Vulkan2 => "XR_KHR_vulkan_enable2",
            GraphicsExtension::OpenGl => "XR_KHR_opengl_enable",
            GraphicsExtension::D3D11 => "XR_KHR_D3D11_enable",
        }
    }

    fn is_available(self, extensions: &xr::ExtensionSet) -> bool {
        match self {
            GraphicsExtension::Vulkan2 => extensions.khr_vulkan_enable2,
            GraphicsExtension::OpenGl => extensions.khr_opengl_enable,
            GraphicsExtension::D3D11 => extensions.khr_d3d11_enable,
        }
    }

    fn enable(self, extensions: &mut xr::ExtensionSet) {
        match self {
            GraphicsExtension::Vulkan2 => extensions.khr_vulkan_enable2 = true,
            GraphicsExtension::OpenGl => extensions.khr_opengl_enable = true,
            GraphicsExtension::D3D11 => extensions.khr_d3d11_enable = true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct OpenXrConfig {
    pub application_name: String,
    pub graphics: GraphicsExtension,
    /// Ranked swapchain formats, in the binding's native codes.
    pub preferred_formats: Vec<i64>,
}

impl Default for OpenXrConfig {
    fn default() -> Self {
        Self {
            application_name: "vr_viewer".into(),
            graphics: GraphicsExtension::Vulkan2,
            preferred_formats: DEFAULT_PREFERENCE.to_vec(),
        }
    }
}

trait XrResultExt<T> {
    fn call(self, name: &'static str) -> Result<T, XrError>;
}

impl<T> XrResultExt<T> for xr::Result<T> {
    fn call(self, name: &'static str) -> Result<T, XrError> {
        self.map_err(|e| XrError::Runtime {
            call: name,
            reason: e.to_string(),
        })
    }
}

/// Runtime objects, dropped together in field order.
struct Live<G: xr::Graphics> {
    swapchains: Vec<xr::Swapchain<G>>,
    space: xr::Space,
    frame_stream: xr::FrameStream<G>,
    frame_waiter: xr::FrameWaiter,
    session: xr::Session<G>,
    instance: xr::Instance,
}

pub struct OpenXrCompositor<G: xr::Graphics> {
    live: Option<Live<G>>,
    blend_mode: xr::EnvironmentBlendMode,
    handle: SessionHandle,
    swapchain_info: Vec<SwapchainInfo>,
    images: Vec<Vec<G::SwapchainImage>>,
    events: xr::EventDataBuffer,
}

impl<G: xr::Graphics> OpenXrCompositor<G> {
    /// Loads the runtime, creates the session and one swapchain per eye.
    ///
    /// `session_info` is called once the system is known; it should check the
    /// runtime's graphics requirements and return the binding's create info.
    pub fn new<F>(config: &OpenXrConfig, session_info: F) -> Result<Self, XrError>
    where
        F: FnOnce(&xr::Instance, xr::SystemId) -> Result<G::SessionCreateInfo, XrError>,
    {
        let entry = unsafe { xr::Entry::load() }.map_err(|e| XrError::LoaderUnavailable(e.to_string()))?;
        let available = entry
            .enumerate_extensions()
            .call("xrEnumerateInstanceExtensionProperties")?;
        if !config.graphics.is_available(&available) {
            return Err(XrError::MissingExtension(config.graphics.name()));
        }
        let mut enabled = xr::ExtensionSet::default();
        config.graphics.enable(&mut enabled);

        let instance = entry
            .create_instance(
                &xr::ApplicationInfo {
                    application_name: &config.application_name,
                    application_version: 0,
                    engine_name: "vr_viewer",
                    engine_version: 0,
                    api_version: xr::Version::new(1, 0, 0),
                },
                &enabled,
                &[],
            )
            .call("xrCreateInstance")?;
        let props = instance.properties().call("xrGetInstanceProperties")?;
        log::info!("Loaded OpenXR runtime: {} {}", props.runtime_name, props.runtime_version);

        let system = instance
            .system(xr::FormFactor::HEAD_MOUNTED_DISPLAY)
            .map_err(|e| XrError::NoHeadset(e.to_string()))?;
        let blend_mode = instance
            .enumerate_environment_blend_modes(system, VIEW_TYPE)
            .call("xrEnumerateEnvironmentBlendModes")?
            .first()
            .copied()
            .ok_or_else(|| XrError::NoHeadset("no environment blend mode".into()))?;
        let view_configs = instance
            .enumerate_view_configuration_views(system, VIEW_TYPE)
            .call("xrEnumerateViewConfigurationViews")?;

        let create_info = session_info(&instance, system)?;
        let (session, frame_waiter, frame_stream) =
            unsafe { instance.create_session::<G>(system, &create_info) }.call("xrCreateSession")?;
        let space = session
            .create_reference_space(xr::ReferenceSpaceType::LOCAL, xr::Posef::IDENTITY)
            .call("xrCreateReferenceSpace")?;

        let offered: Vec<i64> = session
            .enumerate_swapchain_formats()
            .call("xrEnumerateSwapchainFormats")?
            .into_iter()
            .map(G::lower_format)
            .collect();
        let format = select_swapchain_format(&config.preferred_formats, &offered)?;

        let mut swapchains = Vec::with_capacity(view_configs.len());
        let mut swapchain_info = Vec::with_capacity(view_configs.len());
        let mut images = Vec::with_capacity(view_configs.len());
        for view in &view_configs {
            let swapchain = session
                .create_swapchain(&xr::SwapchainCreateInfo {
                    create_flags: xr::SwapchainCreateFlags::EMPTY,
                    usage_flags: xr::SwapchainUsageFlags::COLOR_ATTACHMENT | xr::SwapchainUsageFlags::SAMPLED,
                    format: G::raise_format(format),
                    sample_count: 1,
                    width: view.recommended_image_rect_width,
                    height: view.recommended_image_rect_height,
                    face_count: 1,
                    array_size: 1,
                    mip_count: 1,
                })
                .call("xrCreateSwapchain")?;
            let view_images = swapchain.enumerate_images().call("xrEnumerateSwapchainImages")?;
            swapchain_info.push(SwapchainInfo {
                width: view.recommended_image_rect_width,
                height: view.recommended_image_rect_height,
                format,
                image_count: view_images.len() as u32,
            });
            images.push(view_images);
            swapchains.push(swapchain);
        }
        log::info!(
            "OpenXR session created: {} views, format {}, {}x{}",
            swapchain_info.len(),
            format,
            swapchain_info.first().map_or(0, |s| s.width),
            swapchain_info.first().map_or(0, |s| s.height)
        );

        let handle = session.as_raw().into_raw();
        Ok(Self {
            live: Some(Live {
                swapchains,
                space,
                frame_stream,
                frame_waiter,
                session,
                instance,
            }),
            blend_mode,
            handle,
            swapchain_info,
            images,
            events: xr::EventDataBuffer::new(),
        })
    }

    /// Native images of one view's swapchain.
    pub fn images(&self, view: usize) -> &[G::SwapchainImage] {
        self.images.get(view).map_or(&[], Vec::as_slice)
    }

    fn live(&mut self) -> Result<&mut Live<G>, XrError> {
        self.live.as_mut().ok_or(XrError::SessionLost)
    }

    fn swapchain(&mut self, view: usize) -> Result<&mut xr::Swapchain<G>, XrError> {
        self.live()?.swapchains.get_mut(view).ok_or(XrError::NoSuchView(view))
    }
}

fn session_state(state: xr::SessionState) -> SessionState {
    match state {
        xr::SessionState::IDLE => SessionState::Idle,
        xr::SessionState::READY => SessionState::Ready,
        xr::SessionState::SYNCHRONIZED => SessionState::Synchronized,
        xr::SessionState::VISIBLE => SessionState::Visible,
        xr::SessionState::FOCUSED => SessionState::Focused,
        xr::SessionState::STOPPING => SessionState::Stopping,
        xr::SessionState::LOSS_PENDING => SessionState::LossPending,
        xr::SessionState::EXITING => SessionState::Exiting,
        _ => SessionState::Unknown,
    }
}

fn to_pose(pose: &xr::Posef) -> Pose {
    let o = pose.orientation;
    let p = pose.position;
    Pose {
        orientation: Quat::from_xyzw(o.x, o.y, o.z, o.w),
        position: Vec3::new(p.x, p.y, p.z),
    }
}

fn to_posef(pose: &Pose) -> xr::Posef {
    let o = pose.orientation;
    let p = pose.position;
    xr::Posef {
        orientation: xr::Quaternionf {
            x: o.x,
            y: o.y,
            z: o.z,
            w: o.w,
        },
        position: xr::Vector3f { x: p.x, y: p.y, z: p.z },
    }
}

fn to_fovf(fov: &Fov) -> xr::Fovf {
    xr::Fovf {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

impl<G: xr::Graphics> Compositor for OpenXrCompositor<G> {
    fn poll_event(&mut self) -> Result<Option<CompositorEvent>, XrError> {
        let Some(live) = self.live.as_ref() else {
            return Ok(None);
        };
        let event = live.instance.poll_event(&mut self.events).call("xrPollEvent")?;
        Ok(event.map(|event| match event {
            xr::Event::SessionStateChanged(e) => CompositorEvent::SessionStateChanged {
                session: e.session().into_raw(),
                state: session_state(e.state()),
            },
            xr::Event::InstanceLossPending(_) => CompositorEvent::InstanceLossPending,
            xr::Event::EventsLost(e) => CompositorEvent::EventsLost {
                count: e.lost_event_count(),
            },
            xr::Event::ReferenceSpaceChangePending(_) => {
                CompositorEvent::Other("reference space change pending".into())
            }
            xr::Event::InteractionProfileChanged(_) => {
                CompositorEvent::Other("interaction profile changed".into())
            }
            _ => CompositorEvent::Other("unhandled runtime event".into()),
        }))
    }

    fn session_handle(&self) -> SessionHandle {
        self.handle
    }

    fn begin_session(&mut self) -> Result<(), XrError> {
        self.live()?.session.begin(VIEW_TYPE).call("xrBeginSession")?;
        Ok(())
    }

    fn end_session(&mut self) -> Result<(), XrError> {
        self.live()?.session.end().call("xrEndSession")?;
        Ok(())
    }

    fn request_exit(&mut self) -> Result<(), XrError> {
        self.live()?.session.request_exit().call("xrRequestExitSession")
    }

    fn wait_frame(&mut self) -> Result<FrameTiming, XrError> {
        let state = self.live()?.frame_waiter.wait().call("xrWaitFrame")?;
        Ok(FrameTiming {
            display_time: state.predicted_display_time.as_nanos(),
            should_render: state.should_render,
        })
    }

    fn begin_frame(&mut self) -> Result<(), XrError> {
        self.live()?.frame_stream.begin().call("xrBeginFrame")?;
        Ok(())
    }

    fn locate_views(&mut self, display_time: i64) -> Result<LocatedViews, XrError> {
        let live = self.live()?;
        let (flags, views) = live
            .session
            .locate_views(VIEW_TYPE, xr::Time::from_nanos(display_time), &live.space)
            .call("xrLocateViews")?;
        Ok(LocatedViews {
            flags: ViewStateFlags {
                orientation_valid: flags.contains(xr::ViewStateFlags::ORIENTATION_VALID),
                position_valid: flags.contains(xr::ViewStateFlags::POSITION_VALID),
                orientation_tracked: flags.contains(xr::ViewStateFlags::ORIENTATION_TRACKED),
                position_tracked: flags.contains(xr::ViewStateFlags::POSITION_TRACKED),
            },
            views: views
                .iter()
                .map(|v| EyeView {
                    pose: to_pose(&v.pose),
                    fov: Fov {
                        angle_left: v.fov.angle_left,
                        angle_right: v.fov.angle_right,
                        angle_up: v.fov.angle_up,
                        angle_down: v.fov.angle_down,
                    },
                })
                .collect(),
        })
    }

    fn swapchains(&self) -> &[SwapchainInfo] {
        &self.swapchain_info
    }

    fn acquire_image(&mut self, view: usize) -> Result<u32, XrError> {
        self.swapchain(view)?.acquire_image().call("xrAcquireSwapchainImage")
    }

    fn wait_image(&mut self, view: usize) -> Result<(), XrError> {
        self.swapchain(view)?
            .wait_image(xr::Duration::INFINITE)
            .call("xrWaitSwapchainImage")
    }

    fn release_image(&mut self, view: usize) -> Result<(), XrError> {
        self.swapchain(view)?.release_image().call("xrReleaseSwapchainImage")
    }

    fn end_frame(&mut self, display_time: i64, layer: Option<&[ProjectionView]>) -> Result<(), XrError> {
        let blend_mode = self.blend_mode;
        let live = self.live()?;
        let time = xr::Time::from_nanos(display_time);
        let Some(views) = layer else {
            return live.frame_stream.end(time, blend_mode, &[]).call("xrEndFrame");
        };

        let mut projection_views = Vec::with_capacity(views.len());
        for v in views {
            let swapchain = live.swapchains.get(v.view).ok_or(XrError::NoSuchView(v.view))?;
            projection_views.push(
                xr::CompositionLayerProjectionView::new()
                    .pose(to_posef(&v.eye.pose))
                    .fov(to_fovf(&v.eye.fov))
                    .sub_image(
                        xr::SwapchainSubImage::new()
                            .swapchain(swapchain)
                            .image_array_index(0)
                            .image_rect(xr::Rect2Di {
                                offset: xr::Offset2Di { x: 0, y: 0 },
                                extent: xr::Extent2Di {
                                    width: v.width as i32,
                                    height: v.height as i32,
                                },
                            }),
                    ),
            );
        }
        let projection = xr::CompositionLayerProjection::new()
            .space(&live.space)
            .views(&projection_views);
        live.frame_stream
            .end(time, blend_mode, &[&projection])
            .call("xrEndFrame")
    }

    fn destroy(&mut self) {
        if self.live.take().is_some() {
            self.images.clear();
            log::info!("OpenXR session destroyed");
        }
    }
}
