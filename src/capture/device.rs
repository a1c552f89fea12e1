/// Kind of built-in camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    DualCamera,
    WideAngle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePosition {
    Back,
    Front,
}

/// A video-capture device as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
    pub position: DevicePosition,
}

impl DeviceDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: DeviceKind,
        position: DevicePosition,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            position,
        }
    }
}

/// Preferred devices, most wanted first. The front camera is the last resort
/// for hardware whose back cameras are broken.
pub const DEVICE_PREFERENCE: &[(DeviceKind, DevicePosition)] = &[
    (DeviceKind::DualCamera, DevicePosition::Back),
    (DeviceKind::WideAngle, DevicePosition::Back),
    (DeviceKind::WideAngle, DevicePosition::Front),
];

/// First available device matching `preference`, in preference order.
pub fn select_device<'a>(
    preference: &[(DeviceKind, DevicePosition)],
    available: &'a [DeviceDescriptor],
) -> Option<&'a DeviceDescriptor> {
    preference.iter().find_map(|&(kind, position)| {
        available
            .iter()
            .find(|d| d.kind == kind && d.position == position)
    })
}
