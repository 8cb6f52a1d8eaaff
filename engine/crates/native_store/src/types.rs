/// Handle to a native object living in a [`crate::NativeStore`].
///
/// The generation detects use-after-free: a handle whose slot has been
/// released and reused no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle {
    pub index: u32,
    pub generation: u32,
}

impl NativeHandle {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl std::fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "N({}v{})", self.index, self.generation)
    }
}
