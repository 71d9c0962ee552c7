/// A selectable thing a view can show, with the device that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewSource<T> {
    name: String,
    device: Option<usize>,
    target: T,
}

impl<T> ViewSource<T> {
    pub(crate) const fn new(name: String, device: Option<usize>, target: T) -> Self {
        Self { name, device, target }
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning device, if any.
    #[must_use]
    pub const fn device(&self) -> Option<usize> {
        self.device
    }

    /// What the view reads.
    #[must_use]
    pub const fn target(&self) -> &T {
        &self.target
    }
}
