/// Scalar element types carried by tensor buffers.
///
/// The engine stores and computes in single precision; the enum leaves room
/// for widening without touching call sites that only ask for sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DType {
    #[default]
    F32,
}

impl DType {
    /// Returns the storage size of one element in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
        }
    }
}
