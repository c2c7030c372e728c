use crate::quant::requant::Requantizer;
use crate::quant::{Accumulate, Activation, PerChannelScale};

/// Accumulators for every output channel of one output position.
#[derive(Clone, Debug)]
pub struct AccumulatorRow<A> {
    pub buf: Vec<A>,
}

impl<A: Accumulate> AccumulatorRow<A> {
    pub fn new(channels: usize) -> Self { Self { buf: vec![A::ZERO; channels] } }

    pub fn clear(&mut self) { self.buf.fill(A::ZERO); }

    /// Start from the bias, or from zero without one.
    pub fn seed(&mut self, bias: Option<&[A]>) {
        match bias {
            Some(b) => {
                let n = self.buf.len();
                self.buf.copy_from_slice(&b[..n]);
            }
            None => self.clear(),
        }
    }

    /// Requantize every channel into `out`, with per-channel scales when given.
    pub fn requantize_into<X: Activation<Acc = A>>(&self, rq: &Requantizer, per_channel: Option<&PerChannelScale<'_>>, out: &mut [X]) {
        match per_channel {
            None => {
                for (o, &a) in out.iter_mut().zip(&self.buf) { *o = rq.apply::<A, X>(a); }
            }
            Some(pc) => {
                for (c, (o, &a)) in out.iter_mut().zip(&self.buf).enumerate() {
                    *o = rq.with_scale(pc.multipliers[c], pc.shifts[c]).apply::<A, X>(a);
                }
            }
        }
    }
}
