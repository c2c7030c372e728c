use criterion::{criterion_group, criterion_main, Criterion, black_box};
use qkern::kernels::conv::scratch_len;
use qkern::reference::conv2d_accumulators;
use qkern::{conv2d, ConvGeometry, ConvParams, ConvQuant, KernelShape, QuantParams, TensorShape};

fn lcg_i8(len: usize, mut seed: u64) -> Vec<i8> {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        out.push((seed >> 56) as i8);
    }
    out
}

fn bench_conv(c: &mut Criterion) {
    let input_shape = TensorShape::nhwc(1, 32, 32, 16).unwrap();
    let kernel = KernelShape::new(16, 3, 3, 16);
    let params = ConvParams { pad_top: 1, pad_left: 1, ..ConvParams::default() };
    let geom = ConvGeometry::with_symmetric_output(input_shape, kernel, params).unwrap();
    let input = lcg_i8(input_shape.len(), 7);
    let weights = lcg_i8(kernel.len(), 8);
    let q = ConvQuant::per_tensor::<i8>(0, 0, QuantParams::from_scale(0.002, 0).unwrap());
    let mut scratch = vec![0i8; scratch_len::<i8>(&geom).unwrap()];
    let mut out = vec![0i8; geom.output_image_len()];

    c.bench_function("conv2d_ring_32x32x16_k3", |b| {
        b.iter(|| {
            conv2d(&mut out, black_box(&input), &geom, &weights, None, &q, &mut scratch).unwrap();
            black_box(out[0])
        })
    });
    c.bench_function("conv2d_naive_32x32x16_k3", |b| {
        b.iter(|| black_box(conv2d_accumulators(black_box(&input), &geom, &weights, None, &q)))
    });

    let dilated = ConvParams { dilation_w: 2, dilation_h: 2, pad_top: 2, pad_left: 2, ..ConvParams::default() };
    let geom_d = ConvGeometry::with_symmetric_output(input_shape, kernel, dilated).unwrap();
    let mut scratch_d = vec![0i8; scratch_len::<i8>(&geom_d).unwrap()];
    let mut out_d = vec![0i8; geom_d.output_image_len()];
    c.bench_function("conv2d_ring_dilated_32x32x16_k3", |b| {
        b.iter(|| {
            conv2d(&mut out_d, black_box(&input), &geom_d, &weights, None, &q, &mut scratch_d).unwrap();
            black_box(out_d[0])
        })
    });
}

criterion_group!(benches, bench_conv);
criterion_main!(benches);
