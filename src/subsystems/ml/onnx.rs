//!
//! ONNX Runtime backend
//!

use ndarray::ArrayD;
use ort::{inputs, session::Session, value::TensorRef};

use super::runtime::{InferenceRuntime, Interpreter, Model, TensorData, TensorInfo, TensorKind};
use crate::error::Error;

/// [`InferenceRuntime`] backed by ONNX Runtime
///
/// Models take a float32 image tensor of `input_size × input_size` RGB pixels and return class
/// scores. `channels_first` models (NCHW) get their input transposed from the interleaved layout.
#[derive(Debug, Clone, Copy)]
pub struct OnnxRuntime {
    input_size: u32,
    channels_first: bool,
}
impl OnnxRuntime {
    pub fn new(input_size: u32) -> Self {
        Self {
            input_size,
            channels_first: false,
        }
    }

    pub fn channels_first(mut self, channels_first: bool) -> Self {
        self.channels_first = channels_first;
        self
    }
}
impl InferenceRuntime for OnnxRuntime {
    fn interpreter(&self, model: &Model) -> Result<Box<dyn Interpreter>, Error> {
        let session = Session::builder()
            .and_then(|builder| builder.commit_from_memory(model.bytes()))
            .map_err(|err| Error::FailedToLoadModel {
                reason: err.to_string(),
            })?;

        let input_name = session
            .inputs()
            .first()
            .map(|input| input.name().to_string())
            .ok_or_else(|| Error::FailedToLoadModel {
                reason: String::from("model has no inputs"),
            })?;
        let output_name = session
            .outputs()
            .first()
            .map(|output| output.name().to_string())
            .ok_or_else(|| Error::FailedToLoadModel {
                reason: String::from("model has no outputs"),
            })?;

        debug!("onnx session ready: {input_name} -> {output_name}");

        let size = self.input_size as usize;
        Ok(Box::new(OnnxInterpreter {
            session,
            input_name,
            output_name,
            size,
            channels_first: self.channels_first,
            input: None,
            output: None,
        }))
    }
}

pub struct OnnxInterpreter {
    session: Session,
    input_name: String,
    output_name: String,
    size: usize,
    channels_first: bool,
    input: Option<ArrayD<f32>>,
    output: Option<(Vec<usize>, Vec<f32>)>,
}
impl Interpreter for OnnxInterpreter {
    fn input_info(&self) -> TensorInfo {
        TensorInfo::new(TensorKind::Float32, vec![1, self.size, self.size, 3])
    }

    fn output_info(&self) -> TensorInfo {
        let shape = match &self.output {
            Some((shape, _)) => shape.clone(),
            None => vec![1, 0],
        };
        TensorInfo::new(TensorKind::Float32, shape)
    }

    fn write_input(&mut self, data: TensorData) -> Result<(), Error> {
        let data = match data {
            TensorData::Float32(data) => data,
            other => {
                return Err(Error::UnsupportedTensorKind {
                    kind: other.kind().to_string(),
                })
            }
        };

        let size = self.size;
        let actual = data.len();
        let (shape, data) = if self.channels_first {
            let plane = size * size;
            let mut planar = vec![0f32; data.len()];
            for (idx, px) in data.chunks_exact(3).enumerate() {
                planar[idx] = px[0];
                planar[plane + idx] = px[1];
                planar[2 * plane + idx] = px[2];
            }
            (vec![1, 3, size, size], planar)
        } else {
            (vec![1, size, size, 3], data)
        };

        let array = ArrayD::from_shape_vec(shape, data).map_err(|_| Error::TensorSizeMismatch {
            expected: size * size * 3,
            actual,
        })?;
        self.input = Some(array);

        Ok(())
    }

    fn invoke(&mut self) -> Result<(), Error> {
        let input = self.input.as_ref().ok_or_else(|| Error::InferenceFailed {
            reason: String::from("input tensor not written"),
        })?;

        let output = {
            let tensor_ref =
                TensorRef::from_array_view(input.view()).map_err(|err| Error::InferenceFailed {
                    reason: err.to_string(),
                })?;
            let outputs = self
                .session
                .run(inputs![self.input_name.as_str() => tensor_ref])
                .map_err(|err| Error::InferenceFailed {
                    reason: err.to_string(),
                })?;
            let array = outputs[self.output_name.as_str()]
                .try_extract_array::<f32>()
                .map_err(|err| Error::UnsupportedTensorKind {
                    kind: err.to_string(),
                })?;

            (array.shape().to_vec(), array.iter().copied().collect())
        };
        self.output = Some(output);

        Ok(())
    }

    fn read_output(&self) -> Result<TensorData, Error> {
        match &self.output {
            Some((_, data)) => Ok(TensorData::Float32(data.clone())),
            None => Err(Error::InferenceFailed {
                reason: String::from("no output, invoke first"),
            }),
        }
    }
}
