use xr_frame::{
    Compositor, CompositorEvent, EyeTarget, FrameLoop, FrameLoopConfig, FrameOutcome, GameCamera,
    SessionMachine, SessionState, SimulatedCompositor, SimulatedRuntimeConfig, SkipReason, XrError,
};

fn runtime(config: SimulatedRuntimeConfig) -> SimulatedCompositor {
    SimulatedCompositor::new(config).unwrap()
}

fn frame<F>(lp: &mut FrameLoop, compositor: &mut SimulatedCompositor, render: F) -> Result<FrameOutcome, XrError>
where
    F: FnMut(&EyeTarget<'_>) -> Result<(), XrError>,
{
    lp.run_frame(compositor, &GameCamera::default(), render)
}

fn count_draws(draws: &mut u32) -> impl FnMut(&EyeTarget<'_>) -> Result<(), XrError> + '_ {
    move |_| {
        *draws += 1;
        Ok(())
    }
}

#[test]
fn begin_is_only_legal_from_ready() {
    let mut compositor = runtime(SimulatedRuntimeConfig::default());
    let mut machine = SessionMachine::new();

    let err = machine.request_begin(&mut compositor).unwrap_err();
    assert!(matches!(
        err,
        XrError::IllegalTransition { action: "begin", state: SessionState::Unknown }
    ));
    let err = machine.request_end(&mut compositor).unwrap_err();
    assert!(matches!(err, XrError::IllegalTransition { action: "end", .. }));

    machine.pump(&mut compositor).unwrap();
    assert!(machine.is_running());
    assert_eq!(machine.state(), SessionState::Focused);
    assert_eq!(compositor.stats().session_begins, 1);

    // Already begun: a second begin is rejected even though nothing changed at the runtime.
    assert!(machine.request_begin(&mut compositor).is_err());
}

#[test]
fn first_frame_renders_both_eyes() {
    let mut compositor = runtime(SimulatedRuntimeConfig::default());
    let mut lp = FrameLoop::new(FrameLoopConfig::default());
    let mut seen = Vec::new();

    let outcome = frame(&mut lp, &mut compositor, |target| {
        seen.push((target.view, target.image, target.swapchain.width));
        Ok(())
    })
    .unwrap();

    assert_eq!(outcome, FrameOutcome::Rendered { views: 2 });
    assert_eq!(seen, vec![(0, 0, 1440), (1, 0, 1440)]);
    let layer = compositor.last_layer().unwrap();
    assert_eq!(layer.len(), 2);
    assert!(layer[0].eye.pose.position.x < layer[1].eye.pose.position.x);
}

#[test]
fn swapchain_images_cycle_through_the_ring() {
    let mut compositor = runtime(SimulatedRuntimeConfig {
        image_count: 3,
        ..Default::default()
    });
    let mut lp = FrameLoop::new(FrameLoopConfig::default());
    let mut images = Vec::new();
    for _ in 0..4 {
        frame(&mut lp, &mut compositor, |target| {
            if target.view == 0 {
                images.push(target.image);
            }
            Ok(())
        })
        .unwrap();
    }
    assert_eq!(images, vec![0, 1, 2, 0]);
    let stats = compositor.stats();
    assert_eq!(stats.images_acquired, stats.images_released);
}

#[test]
fn invalid_pose_frame_draws_nothing_and_ends_empty() {
    let mut compositor = runtime(SimulatedRuntimeConfig {
        tracking_loss: vec![2],
        ..Default::default()
    });
    let mut lp = FrameLoop::new(FrameLoopConfig::default());
    let mut draws = 0;

    assert_eq!(
        frame(&mut lp, &mut compositor, count_draws(&mut draws)).unwrap(),
        FrameOutcome::Rendered { views: 2 }
    );
    assert_eq!(draws, 2);

    let outcome = frame(&mut lp, &mut compositor, count_draws(&mut draws)).unwrap();
    assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::PoseInvalid));
    assert_eq!(draws, 2);
    assert!(compositor.last_layer().is_none());
    assert_eq!(compositor.stats().empty_frames, 1);
    assert_eq!(compositor.stats().frames_ended, 2);
    assert_eq!(compositor.stats().images_acquired, 2);

    assert_eq!(
        frame(&mut lp, &mut compositor, count_draws(&mut draws)).unwrap(),
        FrameOutcome::Rendered { views: 2 }
    );
}

#[test]
fn declined_frame_is_ended_without_locating() {
    let mut compositor = runtime(SimulatedRuntimeConfig {
        declined_frames: vec![1],
        ..Default::default()
    });
    let mut lp = FrameLoop::new(FrameLoopConfig::default());
    let mut draws = 0;
    let outcome = frame(&mut lp, &mut compositor, count_draws(&mut draws)).unwrap();
    assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::NotRequested));
    assert_eq!(draws, 0);
    assert_eq!(compositor.stats().empty_frames, 1);
    assert_eq!(lp.frames(), 1);
}

#[test]
fn stopping_ends_session_and_no_frame_is_waited_afterwards() {
    let mut compositor = runtime(SimulatedRuntimeConfig::default());
    let mut lp = FrameLoop::new(FrameLoopConfig::default());
    let mut draws = 0;

    frame(&mut lp, &mut compositor, count_draws(&mut draws)).unwrap();
    compositor.request_exit().unwrap();

    let outcome = frame(&mut lp, &mut compositor, count_draws(&mut draws)).unwrap();
    assert_eq!(outcome, FrameOutcome::Stopped);
    let stats = compositor.stats();
    assert_eq!(stats.session_ends, 1);
    assert_eq!(stats.frames_waited, 1);
    assert!(compositor.is_destroyed());
    assert!(lp.session().is_torn_down());

    assert_eq!(
        frame(&mut lp, &mut compositor, count_draws(&mut draws)).unwrap(),
        FrameOutcome::Stopped
    );
    assert_eq!(compositor.stats().frames_waited, 1);
    assert_eq!(draws, 2);
}

#[test]
fn events_for_unknown_sessions_are_ignored() {
    let mut compositor = runtime(SimulatedRuntimeConfig::default());
    let mut lp = FrameLoop::new(FrameLoopConfig::default());
    let mut draws = 0;
    frame(&mut lp, &mut compositor, count_draws(&mut draws)).unwrap();

    compositor.inject(CompositorEvent::SessionStateChanged {
        session: 0xdead,
        state: SessionState::Exiting,
    });
    compositor.inject(CompositorEvent::EventsLost { count: 4 });
    compositor.inject(CompositorEvent::Other("reference space change pending".into()));

    let outcome = frame(&mut lp, &mut compositor, count_draws(&mut draws)).unwrap();
    assert_eq!(outcome, FrameOutcome::Rendered { views: 2 });
    assert_eq!(lp.session().state(), SessionState::Focused);
}

#[test]
fn instance_loss_stops_and_tears_down() {
    let mut compositor = runtime(SimulatedRuntimeConfig::default());
    let mut lp = FrameLoop::new(FrameLoopConfig::default());
    let mut draws = 0;
    frame(&mut lp, &mut compositor, count_draws(&mut draws)).unwrap();

    compositor.inject(CompositorEvent::InstanceLossPending);
    assert_eq!(
        frame(&mut lp, &mut compositor, count_draws(&mut draws)).unwrap(),
        FrameOutcome::Stopped
    );
    assert!(compositor.is_destroyed());
}

#[test]
fn idle_until_the_runtime_is_ready() {
    let mut compositor = runtime(SimulatedRuntimeConfig::default());
    // Swallow IDLE and READY so the machine never sees the session become ready.
    compositor.poll_event().unwrap();
    compositor.poll_event().unwrap();

    let mut lp = FrameLoop::new(FrameLoopConfig::default());
    let mut draws = 0;
    assert_eq!(
        frame(&mut lp, &mut compositor, count_draws(&mut draws)).unwrap(),
        FrameOutcome::Idle
    );
    assert_eq!(compositor.stats().frames_waited, 0);
}

#[test]
fn render_failure_releases_image_and_ends_frame() {
    let mut compositor = runtime(SimulatedRuntimeConfig::default());
    let mut lp = FrameLoop::new(FrameLoopConfig::default());

    let err = frame(&mut lp, &mut compositor, |target| {
        if target.view == 1 {
            Err(XrError::Runtime {
                call: "draw",
                reason: "device lost".into(),
            })
        } else {
            Ok(())
        }
    })
    .unwrap_err();
    assert!(matches!(err, XrError::Runtime { call: "draw", .. }));

    let stats = compositor.stats();
    assert_eq!(stats.images_acquired, 2);
    assert_eq!(stats.images_released, 2);
    assert_eq!(stats.empty_frames, 1);

    // The protocol is still intact for the next frame.
    let mut draws = 0;
    assert_eq!(
        frame(&mut lp, &mut compositor, count_draws(&mut draws)).unwrap(),
        FrameOutcome::Rendered { views: 2 }
    );
}

#[test]
fn no_matching_format_fails_startup() {
    let err = SimulatedCompositor::new(SimulatedRuntimeConfig {
        available_formats: vec![1, 2, 3],
        ..Default::default()
    })
    .unwrap_err();
    assert!(matches!(err, XrError::NoSwapchainFormat { .. }));
}
