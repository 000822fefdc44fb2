//! Android NativeActivity front end
//!
//! Wires the platform capabilities (NDK sensors, JNI calibration store,
//! wgpu device and compositor) into a [`PassthroughApp`] and drives it from
//! winit's event loop.

mod compositor;
mod gpu_device;
mod jni_bridge;
mod sensors;

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use android_activity::AndroidApp;
use log::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::android::EventLoopBuilderExtAndroid;
use winit::window::{Window, WindowId};

use crate::app::{Capabilities, FrameStatus, PassthroughApp};
use crate::config::PassthroughConfig;
use crate::error::{Error, Result};
use crate::lens::ProfileLensFactory;
use crate::sensor_packet::{PosePacket, PoseStreamer};
use crate::tracking::BootClock;

use compositor::mesh_compositors;
use gpu_device::WgpuDevice;
use jni_bridge::JniCalibrationStore;
use sensors::{MotionSample, NdkHeadTracker};

const CONFIG_FILE: &str = "passthrough.json";
const SENSOR_PACKAGE: &std::ffi::CStr = c"com.phonexr.passthrough";

struct Session {
    window: Arc<Window>,
    app: PassthroughApp<WgpuDevice>,
    motion: Rc<Cell<MotionSample>>,
    last_status: Option<FrameStatus>,
}

struct PhoneXrHandler {
    android: AndroidApp,
    config: PassthroughConfig,
    session: Option<Session>,
    streamer: Option<PoseStreamer>,
}

impl PhoneXrHandler {
    fn new(android: AndroidApp) -> Self {
        let config = load_config(&android);
        let streamer = config.pose_stream.as_ref().and_then(|stream| {
            PoseStreamer::connect(&stream.address)
                .map_err(|e| warn!("Pose streaming disabled: {}", e))
                .ok()
        });
        Self {
            android,
            config,
            session: None,
            streamer,
        }
    }

    fn start_session(&self, event_loop: &ActiveEventLoop) -> Result<Session> {
        let window_attrs = Window::default_attributes().with_title("PhoneXR Passthrough");
        let window = Arc::new(
            event_loop
                .create_window(window_attrs)
                .map_err(|e| Error::Platform(format!("window: {e}")))?,
        );

        let gpu = pollster::block_on(WgpuDevice::new(window.clone()))?;
        info!("wgpu device ready");

        let tracker = NdkHeadTracker::new(SENSOR_PACKAGE);
        if !tracker.is_available() {
            warn!("No motion sensors, head pose stays fixed");
        }
        let motion = tracker.motion_handle();

        let mut app = PassthroughApp::new(
            self.config.clone(),
            gpu,
            Capabilities {
                tracker: Box::new(tracker),
                clock: Box::new(BootClock),
                calibration: Box::new(JniCalibrationStore::new(self.android.clone())),
                lens_factory: Box::new(ProfileLensFactory),
                compositors: mesh_compositors(),
            },
        );

        let camera_texture = app.on_surface_created()?;
        info!("Camera texture {:?}", camera_texture);

        let size = window.inner_size();
        app.set_screen_params(size.width, size.height);
        app.set_passthrough_size(self.config.passthrough_size);
        app.resume();

        Ok(Session {
            window,
            app,
            motion,
            last_status: None,
        })
    }

    fn draw(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if let Some(frame) = jni_bridge::take_pending_frame() {
            let texture = session.app.camera_texture();
            session
                .app
                .gpu_mut()
                .update_camera_texture(texture, &frame.data, frame.width, frame.height);
        }

        let status = session.app.render_frame();
        session.app.gpu_mut().present();
        if session.last_status != Some(status) {
            info!("Frame status: {:?}", status);
            session.last_status = Some(status);
        }

        if let Some(streamer) = self.streamer.as_mut() {
            let motion = session.motion.get();
            streamer.send(&PosePacket {
                head_pose: session.app.last_head_pose_array(),
                accel: motion.accel,
                gyro: motion.gyro,
                magnet: motion.magnet,
            });
        }

        session.window.request_redraw();
    }
}

impl ApplicationHandler for PhoneXrHandler {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        info!("App resumed - starting passthrough session");
        match self.start_session(event_loop) {
            Ok(session) => {
                session.window.request_redraw();
                self.session = Some(session);
            }
            Err(e) => error!("Passthrough session failed to start: {}", e),
        }
    }

    fn suspended(&mut self, _event_loop: &ActiveEventLoop) {
        info!("App suspended - releasing GPU resources");
        if let Some(mut session) = self.session.take() {
            session.app.pause();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(session) = self.session.as_mut() {
                    session.app.gpu_mut().resize(size.width, size.height);
                    session.app.set_screen_params(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => self.draw(),
            _ => {}
        }
    }
}

fn load_config(android: &AndroidApp) -> PassthroughConfig {
    let Some(path) = android.internal_data_path().map(|dir| dir.join(CONFIG_FILE)) else {
        return PassthroughConfig::default();
    };
    if !path.exists() {
        info!("No {} found, using defaults", path.display());
        return PassthroughConfig::default();
    }
    match PassthroughConfig::load(&path) {
        Ok(config) => {
            info!("Loaded config from {}", path.display());
            config
        }
        Err(e) => {
            warn!("Ignoring {}: {}", path.display(), e);
            PassthroughConfig::default()
        }
    }
}

/// Android entry point
#[no_mangle]
fn android_main(app: AndroidApp) {
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Info)
            .with_tag("PhoneXR"),
    );

    info!("PhoneXR passthrough starting...");

    let event_loop = match EventLoop::builder().with_android_app(app.clone()).build() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            error!("Failed to create event loop: {}", e);
            return;
        }
    };

    let mut handler = PhoneXrHandler::new(app);
    if let Err(e) = event_loop.run_app(&mut handler) {
        error!("Event loop failed: {}", e);
    }
}
