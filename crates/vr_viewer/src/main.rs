//! Entry point for the VR viewer.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use trisort::cpu::CpuDevice;
use vr_viewer::{
    config::Config,
    gpu::WgpuDevice,
    host::DemoWorld,
    plugin::{DrawLog, HostEngine, PluginStatus, VrPlugin},
    renderer::{context::GfxContext, Renderer},
};
use xr_frame::{Compositor, SimulatedCompositor};

fn main() -> Result<()> {
    // Initialize logging; default to "info" if RUST_LOG is unset.
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).init();

    let config = Config::parse();
    let mut compositor = SimulatedCompositor::new(config.runtime()).context("Failed to create the VR runtime")?;
    let world = DemoWorld::new(config.world());

    let status = if config.cpu {
        let plugin = VrPlugin::start(config.plugin(), compositor, CpuDevice::new(), DrawLog::default(), world);
        drive(plugin, &config)
    } else {
        match gpu_backends(&compositor, &config) {
            Ok((device, renderer)) => {
                let plugin = VrPlugin::start(config.plugin(), compositor, device, renderer, world);
                drive(plugin, &config)
            }
            Err(err) => {
                log::error!("VR unavailable: {:#}", err);
                compositor.destroy();
                run_without_vr(world, &config)
            }
        }
    };

    log::info!("Viewer finished: {:?}", status);
    Ok(())
}

fn gpu_backends(compositor: &SimulatedCompositor, config: &Config) -> Result<(WgpuDevice, Renderer)> {
    let gfx = Arc::new(pollster::block_on(GfxContext::new())?);
    log::info!("Using adapter {} ({:?})", gfx.info.name, gfx.info.backend);
    let device = WgpuDevice::new(gfx.clone()).context("Failed to build the sort pipelines")?;
    let renderer = Renderer::new(gfx, compositor.swapchains(), config.fog_distance())?;
    Ok((device, renderer))
}

fn drive<C, D, S>(plugin: Result<VrPlugin<C, D, S, DemoWorld>>, config: &Config) -> PluginStatus
where
    C: Compositor,
    D: trisort::GpuDevice,
    S: vr_viewer::plugin::EyeSink<D::Buffer>,
{
    let mut plugin = match plugin {
        Ok(plugin) => plugin,
        Err(err) => {
            log::error!("VR unavailable: {:#}", err);
            // The failed start consumed the world; a fresh one is identical at tick zero.
            return run_without_vr(DemoWorld::new(config.world()), config);
        }
    };
    // Within a frame budget the plugin keeps ticking the host after VR ends.
    let status = plugin.run(config.frames);
    let stats = plugin.stats();
    log::info!(
        "{} host frames, {} rendered, {} skipped, {} sorted vertices in the last frame",
        stats.ticks,
        stats.rendered,
        stats.skipped,
        stats.last_vertices
    );
    status
}

/// Keeps the host ticking with VR switched off.
fn run_without_vr(mut world: DemoWorld, config: &Config) -> PluginStatus {
    let frames = config.frames.unwrap_or(0);
    for _ in 0..frames {
        world.tick();
    }
    log::info!("Ran {} host frames without VR", world.ticks());
    PluginStatus::Disabled
}
