use pretty_assertions::assert_eq;
use qkern::kernels::conv::scratch_len;
use qkern::quant::requant::Requantizer;
use qkern::quant::{Accumulate, Activation};
use qkern::reference::conv2d_accumulators;
use qkern::{
    conv2d, ActivationRange, ConvDriver, ConvGeometry, ConvParams, ConvQuant, DriverState, KernelError, KernelShape, PerChannelScale,
    QuantParams, RoundingMode, TensorShape,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

struct Case {
    n: usize,
    h: usize,
    w: usize,
    c: usize,
    c_out: usize,
    kh: usize,
    kw: usize,
    params: ConvParams,
}

fn run<X: Activation>(case: &Case, seed: u64, rounding: RoundingMode) {
    let input_shape = TensorShape::nhwc(case.n, case.h, case.w, case.c).unwrap();
    let kernel = KernelShape::new(case.c_out, case.kh, case.kw, case.c);
    let geom = ConvGeometry::with_symmetric_output(input_shape, kernel, case.params).unwrap();
    check::<X>(&geom, seed, rounding);
}

fn check<X: Activation>(geom: &ConvGeometry, seed: u64, rounding: RoundingMode) {
    let mut rng = SmallRng::seed_from_u64(seed);
    let kernel = geom.kernel;
    let input: Vec<X> = (0..geom.input.len()).map(|_| X::saturate(rng.gen_range(X::MIN..=X::MAX) as i64)).collect();
    let weights: Vec<i8> = (0..kernel.len()).map(|_| rng.gen()).collect();
    let bias: Vec<X::Acc> = (0..kernel.out_channels).map(|_| X::Acc::from_i32(rng.gen_range(-5000..5000))).collect();
    let mut q = ConvQuant::per_tensor::<X>(X::MIN / 3, 2, QuantParams::from_scale(0.0037, 5).unwrap());
    q.rounding = rounding;
    q.activation = ActivationRange { min: X::MIN / 2, max: X::MAX };

    let mut scratch = vec![X::default(); scratch_len::<X>(geom).unwrap()];
    let mut out = vec![X::default(); geom.input.batch() * geom.output_image_len()];
    conv2d(&mut out, &input, geom, &weights, Some(bias.as_slice()), &q, &mut scratch).unwrap();

    let rq = Requantizer::new::<X>(&q.output, rounding, q.activation).unwrap();
    let bias64: Vec<i64> = bias.iter().map(|b| b.to_i64()).collect();
    let want: Vec<X> = conv2d_accumulators(&input, geom, &weights, Some(bias64.as_slice()), &q)
        .into_iter()
        .map(|acc| rq.apply::<i64, X>(acc))
        .collect();
    assert_eq!(out, want);
}

fn cases() -> Vec<Case> {
    let d = ConvParams::default();
    vec![
        Case { n: 1, h: 5, w: 5, c: 3, c_out: 4, kh: 3, kw: 3, params: d },
        Case { n: 2, h: 6, w: 7, c: 2, c_out: 3, kh: 3, kw: 3, params: ConvParams { pad_top: 1, pad_left: 1, ..d } },
        Case { n: 1, h: 9, w: 8, c: 4, c_out: 5, kh: 3, kw: 2, params: ConvParams { stride_h: 2, stride_w: 2, pad_top: 1, ..d } },
        Case { n: 1, h: 7, w: 10, c: 1, c_out: 2, kh: 2, kw: 3, params: ConvParams { dilation_h: 2, dilation_w: 2, pad_left: 2, ..d } },
        Case { n: 1, h: 4, w: 13, c: 3, c_out: 1, kh: 1, kw: 3, params: ConvParams { stride_w: 3, dilation_w: 2, pad_left: 1, ..d } },
        Case { n: 1, h: 3, w: 12, c: 2, c_out: 3, kh: 2, kw: 2, params: ConvParams { stride_w: 4, ..d } },
        Case { n: 1, h: 1, w: 1, c: 5, c_out: 7, kh: 1, kw: 1, params: d },
        Case { n: 3, h: 2, w: 2, c: 1, c_out: 1, kh: 3, kw: 3, params: ConvParams { pad_top: 1, pad_left: 1, ..d } },
    ]
}

#[test]
fn s8_matches_reference() {
    for (i, case) in cases().iter().enumerate() {
        run::<i8>(case, i as u64, RoundingMode::Double);
        run::<i8>(case, 100 + i as u64, RoundingMode::Single);
    }
}

#[test]
fn s16_matches_reference() {
    for (i, case) in cases().iter().enumerate() {
        run::<i16>(case, 200 + i as u64, RoundingMode::Double);
        run::<i16>(case, 300 + i as u64, RoundingMode::Single);
    }
}

#[test]
fn rank3_input_is_one_image() {
    let input = TensorShape::new(&[5, 6, 3]).unwrap();
    assert_eq!(input.dims(), [1, 5, 6, 3]);
    let params = ConvParams { pad_top: 1, pad_left: 1, ..ConvParams::default() };
    let geom = ConvGeometry::with_symmetric_output(input, KernelShape::new(2, 3, 3, 3), params).unwrap();
    check::<i8>(&geom, 400, RoundingMode::Double);
    check::<i16>(&geom, 401, RoundingMode::Single);
}

#[test]
fn rank2_input_is_a_single_row() {
    let input = TensorShape::new(&[9, 4]).unwrap();
    assert_eq!(input.dims(), [1, 1, 9, 4]);
    let params = ConvParams { stride_w: 2, dilation_w: 2, pad_left: 2, ..ConvParams::default() };
    let geom = ConvGeometry::with_symmetric_output(input, KernelShape::new(3, 1, 3, 4), params).unwrap();
    check::<i8>(&geom, 402, RoundingMode::Single);
    check::<i16>(&geom, 403, RoundingMode::Double);
}

#[test]
fn windows_in_trailing_padding_match_reference() {
    let input = TensorShape::nhwc(1, 4, 4, 2).unwrap();
    let kernel = KernelShape::new(2, 2, 2, 2);
    // two extra output rows and columns beyond the valid 3x3
    let geom = ConvGeometry::new(input, kernel, ConvParams::default(), 5, 5);
    assert_eq!(geom.plan().unwrap().bottom, 2);
    assert_eq!(geom.plan().unwrap().right, 2);
    check::<i8>(&geom, 500, RoundingMode::Double);
    check::<i16>(&geom, 501, RoundingMode::Double);
}

#[test]
fn window_entirely_in_padding_yields_bias() {
    let input = TensorShape::nhwc(1, 1, 1, 1).unwrap();
    let params = ConvParams { stride_w: 2, pad_left: 1, ..ConvParams::default() };
    let geom = ConvGeometry::new(input, KernelShape::new(1, 1, 1, 1), params, 1, 2);
    let q = ConvQuant::per_tensor::<i8>(3, 0, QuantParams::identity(0));
    let mut scratch = vec![0i8; scratch_len::<i8>(&geom).unwrap()];
    let mut out = [0i8; 2];
    conv2d(&mut out, &[50], &geom, &[1], Some(&[7][..]), &q, &mut scratch).unwrap();
    assert_eq!(out, [7, 7]);
}

#[test]
fn per_channel_scales() {
    let input_shape = TensorShape::nhwc(1, 3, 3, 1).unwrap();
    let kernel = KernelShape::new(2, 1, 1, 1);
    let geom = ConvGeometry::new(input_shape, kernel, ConvParams::default(), 3, 3);
    let input: Vec<i8> = (1..=9).collect();
    let weights = [2i8, 2];
    let mults = [1 << 30, 1 << 30];
    let shifts = [1, 0]; // x1 and x0.5
    let mut q = ConvQuant::per_tensor::<i8>(0, 0, QuantParams::identity(0));
    q.per_channel = Some(PerChannelScale { multipliers: &mults, shifts: &shifts });
    let mut scratch = vec![0i8; scratch_len::<i8>(&geom).unwrap()];
    let mut out = vec![0i8; 18];
    conv2d(&mut out, &input, &geom, &weights, None, &q, &mut scratch).unwrap();
    let want: Vec<i8> = (1..=9).flat_map(|v: i8| [2 * v, v]).collect();
    assert_eq!(out, want);
}

#[test]
fn driver_sequencing() {
    let input_shape = TensorShape::nhwc(1, 2, 3, 1).unwrap();
    let geom = ConvGeometry::new(input_shape, KernelShape::new(1, 1, 2, 1), ConvParams::default(), 2, 2);
    let q = ConvQuant::per_tensor::<i8>(0, 0, QuantParams::identity(0));
    let w = [1i8, 1];
    let mut scratch = vec![0i8; scratch_len::<i8>(&geom).unwrap()];
    let mut d = ConvDriver::new(geom, &w, None, &q, &mut scratch).unwrap();
    assert_eq!(d.state(), DriverState::Uninitialized);
    let img_a = [1i8, 2, 3, 4, 5, 6];
    let img_b = [10i8, 20, 30, 40, 50, 60];
    let mut out = [0i8; 4];

    d.prime(&img_a).unwrap();
    assert_eq!(d.state(), DriverState::Primed);
    assert_eq!(d.step(&img_a, &mut out).unwrap(), DriverState::Stepping { next: 1 });
    assert_eq!(d.step(&img_a, &mut out).unwrap(), DriverState::Done);
    assert_eq!(out, [3, 5, 9, 11]);
    assert!(matches!(d.step(&img_a, &mut out), Err(KernelError::InvalidState { .. })));

    // a fresh prime restarts on the next image
    d.prime(&img_b).unwrap();
    while d.step(&img_b, &mut out).unwrap() != DriverState::Done {}
    assert_eq!(out, [30, 50, 90, 110]);
}

#[test]
fn rejection_leaves_output_untouched() {
    let input_shape = TensorShape::nhwc(1, 4, 4, 2).unwrap();
    let geom = ConvGeometry::new(input_shape, KernelShape::new(1, 2, 2, 2), ConvParams::default(), 3, 3);
    let w = vec![1i8; 8];
    let input = vec![1i8; 32];
    let mut scratch = vec![0i8; scratch_len::<i8>(&geom).unwrap()];
    let mut out = vec![9i8; 9];

    let bad_zp = ConvQuant::per_tensor::<i8>(300, 0, QuantParams::identity(0));
    let r = conv2d(&mut out, &input, &geom, &w, None, &bad_zp, &mut scratch);
    assert!(matches!(r, Err(KernelError::ZeroPointOutOfRange { value: 300, .. })));

    let bad_shift = ConvQuant::per_tensor::<i8>(0, 0, QuantParams::new(0, 1 << 30, 40));
    assert_eq!(conv2d(&mut out, &input, &geom, &w, None, &bad_shift, &mut scratch), Err(KernelError::ShiftOutOfRange(40)));

    let ok = ConvQuant::per_tensor::<i8>(0, 0, QuantParams::identity(0));
    let mut tiny = vec![0i8; 3];
    assert!(matches!(conv2d(&mut out, &input, &geom, &w, None, &ok, &mut tiny), Err(KernelError::BufferTooSmall { .. })));
    assert!(out.iter().all(|&v| v == 9));
}
