use qkern::{compare, CompareQuant, Comparison, KernelError};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

const OPS: [Comparison; 6] = [
    Comparison::Equal,
    Comparison::NotEqual,
    Comparison::Greater,
    Comparison::GreaterEqual,
    Comparison::Less,
    Comparison::LessEqual,
];

#[test]
fn shared_quantization_compares_raw_values() {
    let lhs = [-3i8, 0, 5, 127];
    let rhs = [-3i8, 1, 4, -128];
    let q = CompareQuant::shared(10);
    let mut out = [false; 4];
    compare(Comparison::Equal, &lhs, &rhs, &q, &mut out).unwrap();
    assert_eq!(out, [true, false, false, false]);
    compare(Comparison::LessEqual, &lhs, &rhs, &q, &mut out).unwrap();
    assert_eq!(out, [true, true, false, false]);
}

#[test]
fn mixed_scales_agree_with_real_values() {
    let mut rng = SmallRng::seed_from_u64(23);
    let (ls, lz, rs, rz) = (0.05, 3, 0.125, -7);
    let q = CompareQuant::from_scales(ls, lz, rs, rz).unwrap();
    let lhs: Vec<i16> = (0..500).map(|_| rng.gen_range(-2000..2000)).collect();
    let rhs: Vec<i16> = (0..500).map(|_| rng.gen_range(-800..800)).collect();
    let mut out = vec![false; 500];
    for op in OPS {
        compare(op, &lhs, &rhs, &q, &mut out).unwrap();
        for i in 0..500 {
            let a = ls * (lhs[i] as f64 - lz as f64);
            let b = rs * (rhs[i] as f64 - rz as f64);
            // only judge pairs the fixed-point rescale can separate
            if (a - b).abs() < 0.01 { continue; }
            let want = match op {
                Comparison::Equal => false,
                Comparison::NotEqual => true,
                Comparison::Greater | Comparison::GreaterEqual => a > b,
                Comparison::Less | Comparison::LessEqual => a < b,
            };
            assert_eq!(out[i], want, "{op:?} {} vs {}", lhs[i], rhs[i]);
        }
    }
}

#[test]
fn rejects_mismatched_lengths() {
    let q = CompareQuant::shared(0);
    let mut out = [false; 2];
    let r = compare(Comparison::Less, &[1i8, 2], &[1i8], &q, &mut out);
    assert!(matches!(r, Err(KernelError::LengthMismatch { what: "rhs", .. })));
}
