//! Capture device discovery and acquisition checks

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::CaptureError;

/// A camera node
#[derive(Debug, Clone, Serialize)]
pub struct VideoDeviceInfo {
    pub path: PathBuf,
    pub name: String,
}

/// A microphone
#[derive(Debug, Clone, Serialize)]
pub struct AudioInputInfo {
    pub name: String,
    pub is_default: bool,
}

/// List v4l2 camera nodes (`/dev/video*`)
pub fn list_video_devices() -> Vec<VideoDeviceInfo> {
    let mut devices = Vec::new();

    let Ok(entries) = std::fs::read_dir("/dev") else {
        return devices;
    };

    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if !file_name.starts_with("video") {
            continue;
        }

        // Kernel-provided card name, when sysfs exposes it
        let name = std::fs::read_to_string(format!("/sys/class/video4linux/{}/name", file_name))
            .map(|n| n.trim().to_string())
            .unwrap_or_else(|_| file_name.to_string());

        devices.push(VideoDeviceInfo {
            path: entry.path(),
            name,
        });
    }

    devices.sort_by(|a, b| a.path.cmp(&b.path));
    devices
}

/// Check that a camera node exists and can be opened for reading
pub fn check_video_device(path: &Path) -> Result<(), CaptureError> {
    match OpenOptions::new().read(true).open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(CaptureError::DeviceUnavailable(
            format!("permission denied for {}", path.display()),
        )),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(CaptureError::DeviceUnavailable(format!(
            "no camera at {}",
            path.display()
        ))),
        Err(e) => Err(CaptureError::DeviceUnavailable(format!(
            "{}: {}",
            path.display(),
            e
        ))),
    }
}

/// List microphones known to the default audio host
pub fn list_audio_inputs() -> Vec<AudioInputInfo> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let Ok(inputs) = host.input_devices() else {
        return Vec::new();
    };

    inputs
        .filter_map(|device| device.name().ok())
        .map(|name| AudioInputInfo {
            is_default: default_name.as_ref() == Some(&name),
            name,
        })
        .collect()
}

/// The default microphone, or `DeviceUnavailable`
pub fn default_audio_input() -> Result<AudioInputInfo, CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::DeviceUnavailable("no default audio input".to_string()))?;

    let name = device
        .name()
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

    // An input with no usable configuration cannot be recorded from
    device
        .default_input_config()
        .map_err(|e| CaptureError::DeviceUnavailable(format!("{}: {}", name, e)))?;

    Ok(AudioInputInfo {
        name,
        is_default: true,
    })
}
