use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Physical orientation reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DeviceOrientation {
    Unknown,
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
    FaceUp,
    FaceDown,
}

impl DeviceOrientation {
    pub fn is_landscape(self) -> bool {
        matches!(self, Self::LandscapeLeft | Self::LandscapeRight)
    }
}

/// Orientation of the user interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceOrientation {
    Unknown,
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

/// Orientation attached to captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum VideoOrientation {
    #[default]
    Portrait = 0,
    PortraitUpsideDown = 1,
    LandscapeRight = 2,
    LandscapeLeft = 3,
}

impl VideoOrientation {
    /// The camera's landscape axes are mirrored relative to the device's, so
    /// landscape-left on the device is landscape-right for video.
    pub fn from_device(orientation: DeviceOrientation) -> Option<Self> {
        match orientation {
            DeviceOrientation::Portrait => Some(Self::Portrait),
            DeviceOrientation::PortraitUpsideDown => Some(Self::PortraitUpsideDown),
            DeviceOrientation::LandscapeLeft => Some(Self::LandscapeRight),
            DeviceOrientation::LandscapeRight => Some(Self::LandscapeLeft),
            _ => None,
        }
    }

    pub fn from_interface(orientation: InterfaceOrientation) -> Option<Self> {
        match orientation {
            InterfaceOrientation::Portrait => Some(Self::Portrait),
            InterfaceOrientation::PortraitUpsideDown => Some(Self::PortraitUpsideDown),
            InterfaceOrientation::LandscapeLeft => Some(Self::LandscapeLeft),
            InterfaceOrientation::LandscapeRight => Some(Self::LandscapeRight),
            InterfaceOrientation::Unknown => None,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::PortraitUpsideDown,
            2 => Self::LandscapeRight,
            3 => Self::LandscapeLeft,
            _ => Self::Portrait,
        }
    }
}

/// Current video orientation, shared with the frame-delivery thread.
#[derive(Debug, Clone, Default)]
pub struct OrientationCell {
    raw: Arc<AtomicU8>,
}

impl OrientationCell {
    /// Initial orientation follows the interface, defaulting to portrait.
    pub fn new(initial: InterfaceOrientation) -> Self {
        let orientation = VideoOrientation::from_interface(initial).unwrap_or_default();
        Self {
            raw: Arc::new(AtomicU8::new(orientation as u8)),
        }
    }

    pub fn get(&self) -> VideoOrientation {
        VideoOrientation::from_u8(self.raw.load(Ordering::Relaxed))
    }

    /// Apply a device rotation. Only landscape rotations are followed;
    /// returns whether the orientation changed.
    pub fn rotate_to(&self, device: DeviceOrientation) -> bool {
        if !device.is_landscape() {
            return false;
        }
        let Some(orientation) = VideoOrientation::from_device(device) else {
            return false;
        };
        self.raw.swap(orientation as u8, Ordering::Relaxed) != orientation as u8
    }
}
