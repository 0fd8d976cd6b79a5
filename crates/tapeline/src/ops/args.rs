//! Operation kinds and the argument container attached to every graph node.
//!
//! `OpArgs` is a tagged union over the closed set of operation payloads. The
//! payload lives inline in the enum, copies are deep, and the kind test plus
//! downcast are constant-time discriminant checks.

use smallvec::SmallVec;

use crate::error::{Error, Result};

/// Dense, stable identifier for each operation-argument type.
///
/// The executor indexes its handler table with these, so the discriminants
/// double as registry slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum OpKind {
    Input = 0,
    Split = 1,
    MatMul = 2,
    Reduce = 3,
    Relu = 4,
    Add = 5,
    Multiply = 6,
    FusedMlp = 7,
}

impl OpKind {
    /// Number of kinds the dense kernel table must cover.
    pub const COUNT: usize = 8;

    /// Registry slot for this kind.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Display name shared with the matching payload type.
    pub fn name(self) -> &'static str {
        match self {
            OpKind::Input => InputArgs::NAME,
            OpKind::Split => SplitArgs::NAME,
            OpKind::MatMul => MatMulArgs::NAME,
            OpKind::Reduce => ReduceArgs::NAME,
            OpKind::Relu => ReluArgs::NAME,
            OpKind::Add => AddArgs::NAME,
            OpKind::Multiply => MultiplyArgs::NAME,
            OpKind::FusedMlp => FusedMlpArgs::NAME,
        }
    }

    /// Required kernel argument count (lazy and constant inputs combined).
    pub fn arity(self) -> usize {
        match self {
            OpKind::Input => 0,
            OpKind::Split | OpKind::Reduce | OpKind::Relu => 1,
            OpKind::MatMul | OpKind::Add | OpKind::Multiply => 2,
            OpKind::FusedMlp => 3,
        }
    }
}

/// Reduction families supported by the reduce payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceKind {
    Sum,
    Mean,
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitArgs {
    pub split_size: usize,
    pub dim: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatMulArgs {
    pub transpose_a: bool,
    pub transpose_b: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReduceArgs {
    pub dims: SmallVec<[usize; 4]>,
    pub keepdim: bool,
    pub kind: ReduceKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReluArgs {
    pub inplace: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddArgs;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultiplyArgs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusedMlpArgs {
    pub has_relu: bool,
    pub debug_info: String,
}

/// Payload types that can be stored in an [`OpArgs`].
pub trait OpPayload: Clone + std::fmt::Debug {
    const KIND: OpKind;
    const NAME: &'static str;

    fn wrap(self) -> OpArgs;
    fn unwrap_ref(args: &OpArgs) -> Option<&Self>;
}

macro_rules! op_payload {
    ($payload:ty, $variant:ident, $name:literal) => {
        impl OpPayload for $payload {
            const KIND: OpKind = OpKind::$variant;
            const NAME: &'static str = $name;

            fn wrap(self) -> OpArgs {
                OpArgs::$variant(self)
            }

            fn unwrap_ref(args: &OpArgs) -> Option<&Self> {
                match args {
                    OpArgs::$variant(payload) => Some(payload),
                    _ => None,
                }
            }
        }

        impl From<$payload> for OpArgs {
            fn from(payload: $payload) -> OpArgs {
                OpArgs::$variant(payload)
            }
        }
    };
}

op_payload!(InputArgs, Input, "Input");
op_payload!(SplitArgs, Split, "Split");
op_payload!(MatMulArgs, MatMul, "MatMul");
op_payload!(ReduceArgs, Reduce, "Reduce");
op_payload!(ReluArgs, Relu, "ReLU");
op_payload!(AddArgs, Add, "Add");
op_payload!(MultiplyArgs, Multiply, "Multiply");
op_payload!(FusedMlpArgs, FusedMlp, "FusedMLP");

/// Per-operation parameters, stored by value on the producing node.
#[derive(Debug, Clone, PartialEq)]
pub enum OpArgs {
    Input(InputArgs),
    Split(SplitArgs),
    MatMul(MatMulArgs),
    Reduce(ReduceArgs),
    Relu(ReluArgs),
    Add(AddArgs),
    Multiply(MultiplyArgs),
    FusedMlp(FusedMlpArgs),
}

impl OpArgs {
    /// Wraps a payload value.
    pub fn make<P: OpPayload>(payload: P) -> OpArgs {
        payload.wrap()
    }

    /// Returns the stable kind of the stored payload.
    pub fn kind(&self) -> OpKind {
        match self {
            OpArgs::Input(_) => OpKind::Input,
            OpArgs::Split(_) => OpKind::Split,
            OpArgs::MatMul(_) => OpKind::MatMul,
            OpArgs::Reduce(_) => OpKind::Reduce,
            OpArgs::Relu(_) => OpKind::Relu,
            OpArgs::Add(_) => OpKind::Add,
            OpArgs::Multiply(_) => OpKind::Multiply,
            OpArgs::FusedMlp(_) => OpKind::FusedMlp,
        }
    }

    /// Returns the static display name of the stored payload.
    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Tests whether the payload is of type `P`.
    pub fn is<P: OpPayload>(&self) -> bool {
        self.kind() == P::KIND
    }

    /// Borrows the payload when the kind matches, without failure plumbing.
    pub fn downcast_ref<P: OpPayload>(&self) -> Option<&P> {
        P::unwrap_ref(self)
    }

    /// Borrows the payload as `P`, reporting a recoverable miss otherwise.
    pub fn try_cast<P: OpPayload>(&self) -> Result<&P> {
        P::unwrap_ref(self).ok_or(Error::KindMismatch {
            requested: P::NAME,
            found: self.name(),
        })
    }
}
