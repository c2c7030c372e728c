use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use qkern::kernels::conv::scratch_len;
use qkern::quant::{Accumulate, Activation};
use qkern::reference::{conv2d_accumulators, matmul_accumulators, reduce_reference, requantize_f64};
use qkern::{
    conv2d, quantized_matmul, reduce, reduce_scratch_len, AxisSet, ConvGeometry, ConvParams, ConvQuant, KernelShape,
    MatmulDims, MatmulQuant, QuantParams, ReduceKind, ReduceQuant, RoundingMode, TensorShape,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use std::time::Instant;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Kernel {
    Conv,
    Matmul,
    Reduce,
    All,
}

#[derive(Parser, Debug)]
#[command(name = "qkern-sweep", version, about = "Randomized check of the streaming kernels against the naive reference")]
struct Args {
    #[arg(long, value_enum, default_value_t = Kernel::All)]
    kernel: Kernel,

    /// Random configurations per kernel
    #[arg(long, default_value_t = 500)]
    cases: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Worker threads (0 = rayon default)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Largest accepted difference from the reference, in output units
    #[arg(long, default_value_t = 1)]
    tolerance: i32,
}

enum Outcome {
    Pass,
    Skip,
    Fail(String),
}

fn rounding(rng: &mut SmallRng) -> RoundingMode {
    if rng.gen_bool(0.5) { RoundingMode::Double } else { RoundingMode::Single }
}

fn random_tensor<X: Activation>(rng: &mut SmallRng, len: usize, zero_point: i32) -> Vec<X> {
    let spread = (X::MAX - X::MIN) as f64 / 6.0;
    let Ok(normal) = Normal::new(zero_point as f64, spread) else { return vec![X::default(); len] };
    (0..len).map(|_| X::saturate(normal.sample(rng).round() as i64)).collect()
}

fn random_weights(rng: &mut SmallRng, len: usize) -> Vec<i8> {
    (0..len).map(|_| rng.gen_range(-127..=127)).collect()
}

fn first_mismatch<X: Activation>(got: &[X], want: &[i32], tolerance: i32) -> Option<String> {
    got.iter()
        .zip(want)
        .position(|(g, w)| (g.to_i32() - w).abs() > tolerance)
        .map(|i| format!("index {i}: got {}, want {}", got[i].to_i32(), want[i]))
}

fn output_quant<X: Activation>(rng: &mut SmallRng, lo: f64, hi: f64) -> QuantParams {
    let scale = rng.gen_range(lo..hi);
    let zp = rng.gen_range(X::MIN / 8..=X::MAX / 8);
    QuantParams::from_scale(scale, zp).unwrap_or(QuantParams::identity(zp))
}

fn conv_case<X: Activation>(rng: &mut SmallRng, tolerance: i32) -> Outcome {
    let (h, w, c) = (rng.gen_range(1..=10), rng.gen_range(1..=12), rng.gen_range(1..=6));
    let n = rng.gen_range(1..=2);
    let (kh, kw) = (rng.gen_range(1..=4), rng.gen_range(1..=4));
    let params = ConvParams {
        stride_h: rng.gen_range(1..=3),
        stride_w: rng.gen_range(1..=3),
        dilation_h: rng.gen_range(1..=2),
        dilation_w: rng.gen_range(1..=3),
        pad_top: rng.gen_range(0..kh),
        pad_left: rng.gen_range(0..kw),
    };
    let Ok(input_shape) = TensorShape::nhwc(n, h, w, c) else { return Outcome::Skip };
    let kernel = KernelShape::new(rng.gen_range(1..=6), kh, kw, c);
    let Ok(geom) = ConvGeometry::with_symmetric_output(input_shape, kernel, params) else { return Outcome::Skip };

    let in_zp = rng.gen_range(X::MIN / 4..=X::MAX / 4);
    let w_zp = rng.gen_range(-2..=2);
    let mut quant = ConvQuant::per_tensor::<X>(in_zp, w_zp, output_quant::<X>(rng, 1e-3, 0.05));
    quant.rounding = rounding(rng);
    let input = random_tensor::<X>(rng, input_shape.len(), in_zp);
    let weights = random_weights(rng, kernel.len());
    let bias: Vec<X::Acc> = (0..kernel.out_channels).map(|_| X::Acc::from_i32(rng.gen_range(-2000..2000))).collect();

    let Ok(scratch_elems) = scratch_len::<X>(&geom) else { return Outcome::Fail(format!("scratch query failed for {geom:?}")) };
    let mut scratch = vec![X::default(); scratch_elems];
    let mut out = vec![X::default(); n * geom.output_image_len()];
    if let Err(e) = conv2d(&mut out, &input, &geom, &weights, Some(bias.as_slice()), &quant, &mut scratch) {
        return Outcome::Fail(format!("conv2d rejected {geom:?}: {e}"));
    }
    let bias64: Vec<i64> = bias.iter().map(|b| b.to_i64()).collect();
    let want: Vec<i32> = conv2d_accumulators(&input, &geom, &weights, Some(bias64.as_slice()), &quant)
        .into_iter()
        .map(|acc| requantize_f64(acc, &quant.output, X::MIN, X::MAX))
        .collect();
    match first_mismatch(&out, &want, tolerance) {
        None => Outcome::Pass,
        Some(m) => Outcome::Fail(format!("conv {geom:?}: {m}")),
    }
}

fn matmul_case<X: Activation>(rng: &mut SmallRng, tolerance: i32) -> Outcome {
    let (rows, cols, vc) = (rng.gen_range(1..=24), rng.gen_range(1..=80), rng.gen_range(1..=5));
    let dims = MatmulDims { row_stride: cols + rng.gen_range(0..4), vector_stride: cols + rng.gen_range(0..4), ..MatmulDims::packed(rows, cols, vc) };
    let x_zp = rng.gen_range(X::MIN / 4..=X::MAX / 4);
    let mut quant = MatmulQuant::per_tensor::<X>(rng.gen_range(-2..=2), x_zp, output_quant::<X>(rng, 1e-3, 0.05));
    quant.rounding = rounding(rng);
    let weights = random_weights(rng, rows * dims.row_stride);
    let vectors = random_tensor::<X>(rng, vc * dims.vector_stride, x_zp);
    let mut out = vec![X::default(); vc * rows];
    if let Err(e) = quantized_matmul(&mut out, &weights, &vectors, None, &dims, &quant) {
        return Outcome::Fail(format!("matmul rejected {dims:?}: {e}"));
    }
    let want: Vec<i32> = matmul_accumulators(&weights, &vectors, None, &dims, quant.weight_zero_point, x_zp)
        .into_iter()
        .map(|acc| requantize_f64(acc, &quant.output, X::MIN, X::MAX))
        .collect();
    match first_mismatch(&out, &want, tolerance) {
        None => Outcome::Pass,
        Some(m) => Outcome::Fail(format!("matmul {dims:?}: {m}")),
    }
}

fn reduce_case<X: Activation>(rng: &mut SmallRng, tolerance: i32) -> Outcome {
    let rank = rng.gen_range(1..=4);
    let extents: Vec<usize> = (0..rank).map(|_| rng.gen_range(1..=6)).collect();
    let Ok(shape) = TensorShape::new(&extents) else { return Outcome::Skip };
    let axes: Vec<usize> = (0..rank).filter(|_| rng.gen_bool(0.5)).collect();
    let kind = if rng.gen_bool(0.5) { ReduceKind::Max } else { ReduceKind::Mean };
    let zp = rng.gen_range(X::MIN / 4..=X::MAX / 4);
    let quant = match kind {
        ReduceKind::Max => ReduceQuant::same(zp),
        ReduceKind::Mean => ReduceQuant { input_zero_point: zp, output: output_quant::<X>(rng, 0.25, 2.0), rounding: rounding(rng) },
    };
    let input = random_tensor::<X>(rng, shape.len(), zp);
    let out_extents: Vec<usize> = extents.iter().enumerate().map(|(i, &e)| if axes.contains(&i) { 1 } else { e }).collect();
    let Ok(out_shape) = TensorShape::new(&out_extents) else { return Outcome::Skip };
    let Ok(set) = AxisSet::new(&axes, rank) else { return Outcome::Skip };
    let mut scratch = vec![X::Acc::ZERO; reduce_scratch_len(&shape, &set)];
    let mut out = vec![X::default(); out_shape.len()];
    if let Err(e) = reduce(&mut out, &out_shape, &input, &shape, &axes, kind, &quant, &mut scratch) {
        return Outcome::Fail(format!("reduce rejected {extents:?} over {axes:?}: {e}"));
    }
    let want: Vec<i32> = if axes.is_empty() {
        input.iter().map(|x| x.to_i32()).collect()
    } else {
        reduce_reference(&input, &shape, &axes, kind, zp, &quant.output)
    };
    match first_mismatch(&out, &want, tolerance) {
        None => Outcome::Pass,
        Some(m) => Outcome::Fail(format!("{kind:?} {extents:?} over {axes:?}: {m}")),
    }
}

fn run_case(kernel: Kernel, seed: u64, tolerance: i32) -> Outcome {
    let mut rng = SmallRng::seed_from_u64(seed);
    let wide = rng.gen_bool(0.5);
    match (kernel, wide) {
        (Kernel::Conv, false) => conv_case::<i8>(&mut rng, tolerance),
        (Kernel::Conv, true) => conv_case::<i16>(&mut rng, tolerance),
        (Kernel::Matmul, false) => matmul_case::<i8>(&mut rng, tolerance),
        (Kernel::Matmul, true) => matmul_case::<i16>(&mut rng, tolerance),
        (Kernel::Reduce, false) => reduce_case::<i8>(&mut rng, tolerance),
        (Kernel::Reduce, true) => reduce_case::<i16>(&mut rng, tolerance),
        (Kernel::All, _) => Outcome::Skip,
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let a = Args::parse();
    if a.threads > 0 {
        rayon::ThreadPoolBuilder::new().num_threads(a.threads).build_global().context("configure rayon pool")?;
    }
    let kernels: Vec<Kernel> = match a.kernel {
        Kernel::All => vec![Kernel::Conv, Kernel::Matmul, Kernel::Reduce],
        k => vec![k],
    };
    let jobs: Vec<(Kernel, u64)> = kernels
        .iter()
        .flat_map(|&k| (0..a.cases as u64).map(move |i| (k, i)))
        .collect();

    let bar = ProgressBar::new(jobs.len() as u64);
    bar.set_style(ProgressStyle::with_template("{elapsed_precise} [{bar:40}] {pos}/{len} {msg}")?.progress_chars("=> "));
    let t0 = Instant::now();
    let outcomes: Vec<(Kernel, Outcome)> = jobs
        .par_iter()
        .map(|&(k, i)| {
            let o = run_case(k, a.seed.wrapping_mul(1_000_003).wrapping_add(i), a.tolerance);
            bar.inc(1);
            (k, o)
        })
        .collect();
    bar.finish_and_clear();

    let mut failures = 0usize;
    for k in &kernels {
        let mine = outcomes.iter().filter(|(kk, _)| kk == k);
        let (mut pass, mut skip) = (0, 0);
        for (_, o) in mine {
            match o {
                Outcome::Pass => pass += 1,
                Outcome::Skip => skip += 1,
                Outcome::Fail(msg) => {
                    failures += 1;
                    warn!("{msg}");
                    eprintln!("FAIL {msg}");
                }
            }
        }
        info!("{k:?}: {pass} passed, {skip} skipped");
        println!("{:?}: passed={} skipped={}", k, pass, skip);
    }
    println!("elapsed={:.3}s failures={}", t0.elapsed().as_secs_f64(), failures);
    if failures > 0 { bail!("{failures} configurations disagreed with the reference"); }
    Ok(())
}
