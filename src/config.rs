use crate::error::KernelError;
use crate::kernels::conv::{query_scratch_size, ConvGeometry, ConvParams, KernelShape};
use crate::quant::{Precision, RoundingMode};
use crate::ring::loader::LoaderMode;
use crate::ring::planner::PaddingPlan;
use crate::shape::TensorShape;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

fn unit_pair() -> [usize; 2] { [1, 1] }

/// One convolution layer as described in a JSON layer file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvLayerSpec {
    pub name: String,
    /// NHWC, or a lower-rank suffix of it.
    pub input: Vec<usize>,
    pub out_channels: usize,
    /// `[height, width]`
    pub kernel: [usize; 2],
    #[serde(default = "unit_pair")]
    pub stride: [usize; 2],
    #[serde(default = "unit_pair")]
    pub dilation: [usize; 2],
    /// Leading `[top, left]` padding; trailing padding is derived.
    #[serde(default)]
    pub padding: [usize; 2],
    /// Explicit `[height, width]` output; omitted means symmetric padding.
    #[serde(default)]
    pub output: Option<[usize; 2]>,
    #[serde(default)]
    pub precision: Precision,
    #[serde(default)]
    pub rounding: RoundingMode,
}

impl ConvLayerSpec {
    pub fn params(&self) -> ConvParams {
        ConvParams {
            stride_h: self.stride[0],
            stride_w: self.stride[1],
            dilation_h: self.dilation[0],
            dilation_w: self.dilation[1],
            pad_top: self.padding[0],
            pad_left: self.padding[1],
        }
    }

    pub fn geometry(&self) -> std::result::Result<ConvGeometry, KernelError> {
        let input = TensorShape::new(&self.input)?;
        let kernel = KernelShape::new(self.out_channels, self.kernel[0], self.kernel[1], input.channels());
        match self.output {
            Some([oh, ow]) => Ok(ConvGeometry::new(input, kernel, self.params(), oh, ow)),
            None => ConvGeometry::with_symmetric_output(input, kernel, self.params()),
        }
    }

    /// Plan the layer: padding, ring shape and scratch requirement.
    pub fn report(&self) -> std::result::Result<LayerReport, KernelError> {
        let geom = self.geometry()?;
        let layout = geom.layout()?;
        let scratch_bytes = query_scratch_size(&geom.input, &geom.kernel, &geom.params, geom.output_h, self.precision)?;
        Ok(LayerReport {
            name: self.name.clone(),
            input: geom.input.dims(),
            output: geom.output_shape()?.dims(),
            padding: layout.plan,
            loader: match LoaderMode::for_layout(&layout) {
                LoaderMode::Dense => "dense",
                LoaderMode::Dilated => "dilated",
            },
            planes: layout.planes(),
            plane_len: layout.plane_len(),
            precision: self.precision,
            scratch_bytes,
        })
    }
}

/// What `qkern-plan` prints for each layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerReport {
    pub name: String,
    pub input: [usize; 4],
    pub output: [usize; 4],
    pub padding: PaddingPlan,
    pub loader: &'static str,
    pub planes: usize,
    pub plane_len: usize,
    pub precision: Precision,
    pub scratch_bytes: usize,
}

pub fn parse_layer_specs(text: &str) -> Result<Vec<ConvLayerSpec>> {
    serde_json::from_str(text).context("parse layer specs")
}

pub fn load_layer_specs<P: AsRef<Path>>(path: P) -> Result<Vec<ConvLayerSpec>> {
    let f = File::open(&path).with_context(|| format!("open layer spec file: {}", path.as_ref().display()))?;
    let specs: Vec<ConvLayerSpec> = serde_json::from_reader(BufReader::new(f))
        .with_context(|| format!("parse layer specs: {}", path.as_ref().display()))?;
    for s in &specs {
        s.geometry().with_context(|| format!("layer {}", s.name))?;
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in() {
        let specs = parse_layer_specs(r#"[{"name":"c1","input":[1,8,8,3],"out_channels":4,"kernel":[3,3],"padding":[1,1]}]"#).unwrap();
        let s = &specs[0];
        assert_eq!(s.stride, [1, 1]);
        assert_eq!(s.precision, Precision::S8);
        let g = s.geometry().unwrap();
        assert_eq!((g.output_h, g.output_w), (8, 8));
        let r = s.report().unwrap();
        assert_eq!(r.padding, PaddingPlan { top: 1, bottom: 1, left: 1, right: 1 });
        // 3 planes of 10 rows x 3 channels
        assert_eq!(r.scratch_bytes, 96);
    }
}
