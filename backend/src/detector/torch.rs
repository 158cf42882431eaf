use std::path::Path;
use std::sync::Mutex;

use image::DynamicImage;
use ndarray::{ArrayViewD, IxDyn};
use tch::{CModule, Device, IValue, Kind, Tensor};

use super::yolo::{self, Letterbox};
use super::{Detector, DetectorParams, InferenceError, LabelTable, RawDetection};

/// A TorchScript export of a YOLO detector, run through libtorch.
pub struct TorchDetector {
    model: Mutex<CModule>,
    device: Device,
    params: DetectorParams,
    labels: Option<LabelTable>,
}

impl TorchDetector {
    pub fn load(
        model_path: &Path,
        params: DetectorParams,
        labels: Option<LabelTable>,
    ) -> Result<Self, InferenceError> {
        let device = Device::cuda_if_available();
        let mut model = CModule::load_on_device(model_path, device)?;
        model.set_eval();
        log::info!("TorchScript module loaded on {:?}", device);
        Ok(Self {
            model: Mutex::new(model),
            device,
            params,
            labels,
        })
    }

    fn preprocess(&self, image: &DynamicImage) -> Result<(Tensor, Letterbox), InferenceError> {
        let letterbox = yolo::letterbox(image, self.params.image_size)?;
        let data = letterbox.input.as_slice().ok_or_else(|| {
            InferenceError::Preprocessing("input tensor is not contiguous".to_string())
        })?;
        let shape: Vec<i64> = letterbox.input.shape().iter().map(|&d| d as i64).collect();
        let tensor = Tensor::from_slice(data).view(shape.as_slice()).to_device(self.device);
        Ok((tensor, letterbox))
    }

    fn forward(&self, input: Tensor) -> Result<Tensor, InferenceError> {
        let model = self.model.lock().map_err(|_| InferenceError::LockPoisoned)?;
        let output = tch::no_grad(|| model.forward_is(&[IValue::Tensor(input)]))?;
        match output {
            IValue::Tensor(tensor) => Ok(tensor),
            // Some exports return (predictions, auxiliary outputs).
            IValue::Tuple(mut values) | IValue::GenericList(mut values) if !values.is_empty() => {
                match values.swap_remove(0) {
                    IValue::Tensor(tensor) => Ok(tensor),
                    other => Err(InferenceError::Output(format!(
                        "first model output is not a tensor: {:?}",
                        other
                    ))),
                }
            }
            IValue::TensorList(mut tensors) if !tensors.is_empty() => Ok(tensors.swap_remove(0)),
            other => Err(InferenceError::Output(format!(
                "unsupported model output: {:?}",
                other
            ))),
        }
    }
}

impl From<tch::TchError> for InferenceError {
    fn from(err: tch::TchError) -> Self {
        InferenceError::Model(err.to_string())
    }
}

impl Detector for TorchDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<RawDetection>, InferenceError> {
        let (input, letterbox) = self.preprocess(image)?;
        let output = self
            .forward(input)?
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .contiguous();

        let shape: Vec<usize> = output.size().iter().map(|&d| d as usize).collect();
        let num_elements = output.numel();
        let mut output_vec = vec![0.0f32; num_elements];
        output.view([-1]).copy_data(&mut output_vec, num_elements);

        let view = ArrayViewD::from_shape(IxDyn(&shape), &output_vec)
            .map_err(|e| InferenceError::Output(e.to_string()))?;
        yolo::decode(view, &letterbox.geometry, &self.params)
    }

    fn labels(&self) -> Option<&LabelTable> {
        self.labels.as_ref()
    }
}
