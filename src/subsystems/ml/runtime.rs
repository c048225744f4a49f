//!
//! Inference runtime abstraction
//!
//! The actual runtime (TFLite, ONNX Runtime, a test double...) lives behind [`InferenceRuntime`],
//! which turns a [`Model`] blob into an [`Interpreter`].
//!

use std::{fmt, path::Path};

use snafu::ResultExt;

use crate::error::{Error, FailedToReadModelSnafu};

/// Element type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorKind {
    Float32,
    UInt8,
    Int8,
}
impl fmt::Display for TensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Float32 => "float32",
            Self::UInt8 => "uint8",
            Self::Int8 => "int8",
        })
    }
}

/// Affine quantization parameters: `real = scale * (q - zero_point)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantization {
    pub scale: f32,
    pub zero_point: i32,
}

/// Shape and type of an input or output tensor
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    pub kind: TensorKind,
    pub shape: Vec<usize>,
    pub quantization: Option<Quantization>,
}
impl TensorInfo {
    pub fn new(kind: TensorKind, shape: Vec<usize>) -> Self {
        Self {
            kind,
            shape,
            quantization: None,
        }
    }

    pub fn with_quantization(mut self, scale: f32, zero_point: i32) -> Self {
        self.quantization = Some(Quantization { scale, zero_point });
        self
    }

    /// Total number of elements
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tensor contents
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Float32(Vec<f32>),
    UInt8(Vec<u8>),
    Int8(Vec<i8>),
}
impl TensorData {
    pub fn kind(&self) -> TensorKind {
        match self {
            Self::Float32(_) => TensorKind::Float32,
            Self::UInt8(_) => TensorKind::UInt8,
            Self::Int8(_) => TensorKind::Int8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Float32(data) => data.len(),
            Self::UInt8(data) => data.len(),
            Self::Int8(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A model blob that can be handed to an [`InferenceRuntime`]
#[derive(Clone)]
pub struct Model {
    bytes: Vec<u8>,
}
impl Model {
    /// Load a model from a byte slice
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Load a model from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).context(FailedToReadModelSnafu { path })?;
        Ok(Self { bytes })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}
impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A loaded model, ready to make inferences
///
/// ```text
/// int.write_input(data)?;
/// int.invoke()?;
/// let out = int.read_output()?;
/// ```
pub trait Interpreter: Send {
    /// The first input tensor
    fn input_info(&self) -> TensorInfo;

    /// The first output tensor
    fn output_info(&self) -> TensorInfo;

    /// Fill the first input tensor
    fn write_input(&mut self, data: TensorData) -> Result<(), Error>;

    /// Run inference
    fn invoke(&mut self) -> Result<(), Error>;

    /// Copy out the first output tensor
    fn read_output(&self) -> Result<TensorData, Error>;
}

/// Creates [`Interpreter`]s from [`Model`]s
pub trait InferenceRuntime: Send + Sync {
    fn interpreter(&self, model: &Model) -> Result<Box<dyn Interpreter>, Error>;
}

/// Runtime used when the crate is built without an inference backend
///
/// Every load fails, which leaves the model manager in its failed state.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableRuntime;
impl InferenceRuntime for UnavailableRuntime {
    fn interpreter(&self, _model: &Model) -> Result<Box<dyn Interpreter>, Error> {
        Err(Error::FailedToLoadModel {
            reason: String::from("no inference backend compiled in"),
        })
    }
}
