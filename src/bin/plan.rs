use anyhow::{bail, Context};
use clap::Parser;
use qkern::config::{load_layer_specs, ConvLayerSpec};
use qkern::quant::{Precision, RoundingMode};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "qkern-plan", version, about = "Print padding plans, ring layouts and scratch sizes for conv layers")]
struct Args {
    /// JSON file with an array of layer specs (overrides the single-layer flags)
    #[arg(long)]
    spec: Option<PathBuf>,

    /// Input shape, comma separated (NHWC or a suffix of it)
    #[arg(long, value_delimiter = ',')]
    input: Vec<usize>,

    #[arg(long, default_value_t = 1)]
    out_channels: usize,

    /// Kernel height,width
    #[arg(long, value_delimiter = ',', default_value = "3,3")]
    kernel: Vec<usize>,

    #[arg(long, value_delimiter = ',', default_value = "1,1")]
    stride: Vec<usize>,

    #[arg(long, value_delimiter = ',', default_value = "1,1")]
    dilation: Vec<usize>,

    /// Leading top,left padding
    #[arg(long, value_delimiter = ',', default_value = "0,0")]
    padding: Vec<usize>,

    /// Explicit output height,width
    #[arg(long, value_delimiter = ',')]
    output: Option<Vec<usize>>,

    /// Element precision in bits (8 or 16)
    #[arg(long, default_value_t = 8)]
    bits: u32,

    #[arg(long, default_value_t = false)]
    pretty: bool,
}

fn pair(name: &str, v: &[usize]) -> anyhow::Result<[usize; 2]> {
    match v {
        [a, b] => Ok([*a, *b]),
        _ => bail!("--{name} takes two comma separated values, got {v:?}"),
    }
}

fn spec_from_flags(a: &Args) -> anyhow::Result<ConvLayerSpec> {
    if a.input.is_empty() { bail!("either --spec or --input is required"); }
    Ok(ConvLayerSpec {
        name: "cli".to_string(),
        input: a.input.clone(),
        out_channels: a.out_channels,
        kernel: pair("kernel", &a.kernel)?,
        stride: pair("stride", &a.stride)?,
        dilation: pair("dilation", &a.dilation)?,
        padding: pair("padding", &a.padding)?,
        output: a.output.as_deref().map(|o| pair("output", o)).transpose()?,
        precision: Precision::from_code(a.bits)?,
        rounding: RoundingMode::default(),
    })
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let a = Args::parse();
    let specs = match &a.spec {
        Some(path) => load_layer_specs(path)?,
        None => vec![spec_from_flags(&a)?],
    };
    let mut reports = Vec::with_capacity(specs.len());
    for s in &specs {
        reports.push(s.report().with_context(|| format!("plan layer {}", s.name))?);
    }
    let text = if a.pretty { serde_json::to_string_pretty(&reports)? } else { serde_json::to_string(&reports)? };
    println!("{}", text);
    Ok(())
}
