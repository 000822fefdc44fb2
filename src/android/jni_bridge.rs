//! JNI glue to the hosting activity
//!
//! The activity owns the viewer calibration (it runs the QR scanner and
//! persists the result) and the camera pipeline, which pushes RGBA frames in
//! through [`Java_com_phonexr_passthrough_MainActivity_nativeOnCameraFrame`].

use std::sync::Mutex;

use android_activity::AndroidApp;
use jni::objects::{JByteArray, JClass, JObject};
use jni::sys::{jint, jobject};
use jni::{JNIEnv, JavaVM};
use lazy_static::lazy_static;
use log::{error, info, warn};

use crate::calibration::{CalibrationStore, DeviceCalibration};
use crate::error::{Error, Result};

/// One RGBA8 camera frame, rows top to bottom.
pub struct CameraFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

lazy_static! {
    static ref PENDING_FRAME: Mutex<Option<CameraFrame>> = Mutex::new(None);
}

/// Latest frame delivered since the last call, if any.
pub fn take_pending_frame() -> Option<CameraFrame> {
    PENDING_FRAME.lock().ok()?.take()
}

fn with_activity<T>(app: &AndroidApp, f: impl FnOnce(&mut JNIEnv, &JObject) -> Result<T>) -> Result<T> {
    let vm = unsafe { JavaVM::from_raw(app.vm_as_ptr() as *mut jni::sys::JavaVM) }
        .map_err(|e| Error::Platform(format!("JavaVM: {e}")))?;
    let mut env = vm
        .attach_current_thread()
        .map_err(|e| Error::Platform(format!("attach thread: {e}")))?;
    let activity = unsafe { JObject::from_raw(app.activity_as_ptr() as jobject) };
    f(&mut env, &activity)
}

/// Calibration held by the activity's preferences.
pub struct JniCalibrationStore {
    app: AndroidApp,
}

impl JniCalibrationStore {
    pub fn new(app: AndroidApp) -> Self {
        Self { app }
    }

    fn fetch(&self) -> Result<DeviceCalibration> {
        with_activity(&self.app, |env, activity| {
            let value = env
                .call_method(activity, "getSavedDeviceParams", "()[B", &[])
                .and_then(|v| v.l())
                .map_err(|e| Error::Platform(format!("getSavedDeviceParams: {e}")))?;
            if value.is_null() {
                return Ok(DeviceCalibration::absent());
            }
            let array = JByteArray::from(value);
            let bytes = env
                .convert_byte_array(&array)
                .map_err(|e| Error::Platform(format!("device params bytes: {e}")))?;
            Ok(DeviceCalibration::new(bytes))
        })
    }
}

impl CalibrationStore for JniCalibrationStore {
    fn saved_params(&mut self) -> DeviceCalibration {
        match self.fetch() {
            Ok(calibration) => calibration,
            Err(e) => {
                error!("Reading saved viewer calibration failed: {}", e);
                DeviceCalibration::absent()
            }
        }
    }

    fn scan_and_save(&mut self) {
        let result = with_activity(&self.app, |env, activity| {
            env.call_method(activity, "scanQrCodeAndSaveDeviceParams", "()V", &[])
                .map(|_| ())
                .map_err(|e| Error::Platform(format!("scanQrCodeAndSaveDeviceParams: {e}")))
        });
        match result {
            Ok(()) => info!("Viewer QR scan launched"),
            Err(e) => error!("{}", e),
        }
    }
}

#[no_mangle]
pub extern "C" fn Java_com_phonexr_passthrough_MainActivity_nativeOnCameraFrame(
    env: JNIEnv,
    _class: JClass,
    frame: JByteArray,
    width: jint,
    height: jint,
) {
    let (Ok(width), Ok(height)) = (u32::try_from(width), u32::try_from(height)) else {
        warn!("Camera frame with negative size {}x{}", width, height);
        return;
    };
    let data = match env.convert_byte_array(&frame) {
        Ok(data) => data,
        Err(e) => {
            error!("Camera frame copy failed: {}", e);
            return;
        }
    };
    if let Ok(mut pending) = PENDING_FRAME.lock() {
        *pending = Some(CameraFrame {
            data,
            width,
            height,
        });
    }
}
