// src/lc0_linear.rs
//
// Row-wise fully-connected kernels behind one interface: y = act(x · Wᵀ + b).
// The scalar kernel is the bit-reproducible reference; the INT8 kernel
// quantizes weights per output row and caches them per source layer.
use crate::lc0_proto::Lc0Error;
use crate::lc0_weights::{layer_input_size, layer_output_size, Activation, Layer};
use ahash::AHashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

pub const KERNEL_SCALAR: i32 = 0;
pub const KERNEL_INT8: i32 = 1;

struct QuantizedRows {
    q: Vec<i8>,
    row_scales: Vec<f32>,
    in_dim: usize,
    out_dim: usize,
}

pub struct LinearBackend {
    kernel: AtomicI32,
    // Keyed by the source layer's value-buffer address; weights are immutable
    // while workers run, so the address identifies the layer.
    int8_cache: Mutex<AHashMap<usize, Arc<QuantizedRows>>>,
}

impl LinearBackend {
    pub fn new() -> Self {
        Self {
            kernel: AtomicI32::new(KERNEL_SCALAR),
            int8_cache: Mutex::new(AHashMap::new()),
        }
    }

    pub fn set_kernel(&self, kernel: i32) {
        let kernel = if kernel == KERNEL_INT8 { KERNEL_INT8 } else { KERNEL_SCALAR };
        self.kernel.store(kernel, Ordering::Relaxed);
    }

    pub fn kernel(&self) -> i32 {
        self.kernel.load(Ordering::Relaxed)
    }

    pub fn kernel_name(&self) -> &'static str {
        match self.kernel() {
            KERNEL_INT8 => "int8",
            _ => "scalar",
        }
    }

    pub fn clear_cache(&self) {
        self.int8_cache.lock().unwrap().clear();
    }

    /// `out[r][o] = act(sum_i in[r][i] * w[o][i] + b[o])`
    pub fn fc_rows(
        &self,
        input: &[f32],
        rows: usize,
        in_dim: usize,
        w: &Layer,
        b: Option<&Layer>,
        act: Activation,
        name: &str,
    ) -> Result<Vec<f32>, Lc0Error> {
        let out_dim = match b {
            Some(b) => {
                let out = layer_output_size(w, b, name)?;
                let inferred_in = layer_input_size(w, b, name)?;
                if inferred_in != in_dim {
                    return Err(Lc0Error::Forward(format!(
                        "{}: expected in_dim {}, got {}",
                        name, inferred_in, in_dim
                    )));
                }
                out
            }
            None => {
                if in_dim == 0 {
                    return Err(Lc0Error::Forward(format!("{}: in_dim must be > 0", name)));
                }
                if w.values.is_empty() {
                    return Err(Lc0Error::Forward(format!("{}: weights are empty", name)));
                }
                if w.values.len() % in_dim != 0 {
                    return Err(Lc0Error::Forward(format!(
                        "{}: weight size not divisible by in_dim",
                        name
                    )));
                }
                w.values.len() / in_dim
            }
        };

        if input.len() != rows * in_dim {
            return Err(Lc0Error::Forward(format!(
                "{}: input vector size mismatch",
                name
            )));
        }

        match self.kernel() {
            KERNEL_INT8 => self.fc_rows_int8(input, rows, in_dim, out_dim, w, b, act),
            _ => Ok(fc_rows_scalar(input, rows, in_dim, out_dim, w, b, act)),
        }
    }

    fn quantized(&self, w: &Layer, in_dim: usize, out_dim: usize) -> Arc<QuantizedRows> {
        let key = w.values.as_ptr() as usize;
        let mut cache = self.int8_cache.lock().unwrap();
        if let Some(q) = cache.get(&key) {
            if q.in_dim == in_dim && q.out_dim == out_dim {
                return q.clone();
            }
        }

        let mut q = vec![0i8; w.values.len()];
        let mut row_scales = vec![0f32; out_dim];
        for o in 0..out_dim {
            let row = &w.values[o * in_dim..(o + 1) * in_dim];
            let max_abs = row.iter().fold(0f32, |acc, v| acc.max(v.abs()));
            let scale = if max_abs > 0.0 { max_abs / 127.0 } else { 1.0 };
            row_scales[o] = scale;
            for (i, v) in row.iter().enumerate() {
                q[o * in_dim + i] = (v / scale).round().clamp(-127.0, 127.0) as i8;
            }
        }

        let entry = Arc::new(QuantizedRows {
            q,
            row_scales,
            in_dim,
            out_dim,
        });
        cache.insert(key, entry.clone());
        entry
    }

    fn fc_rows_int8(
        &self,
        input: &[f32],
        rows: usize,
        in_dim: usize,
        out_dim: usize,
        w: &Layer,
        b: Option<&Layer>,
        act: Activation,
    ) -> Result<Vec<f32>, Lc0Error> {
        let qw = self.quantized(w, in_dim, out_dim);
        let mut out = vec![0f32; rows * out_dim];
        let mut qx = vec![0i8; in_dim];

        for r in 0..rows {
            let x = &input[r * in_dim..(r + 1) * in_dim];
            let max_abs = x.iter().fold(0f32, |acc, v| acc.max(v.abs()));
            let x_scale = if max_abs > 0.0 { max_abs / 127.0 } else { 1.0 };
            for (dst, v) in qx.iter_mut().zip(x.iter()) {
                *dst = (v / x_scale).round().clamp(-127.0, 127.0) as i8;
            }

            for o in 0..out_dim {
                let wq = &qw.q[o * in_dim..(o + 1) * in_dim];
                let mut acc: i32 = 0;
                for i in 0..in_dim {
                    acc += i32::from(qx[i]) * i32::from(wq[i]);
                }
                let mut sum = acc as f32 * x_scale * qw.row_scales[o];
                if let Some(b) = b {
                    sum += b.values[o];
                }
                out[r * out_dim + o] = crate::lc0_net::activate_scalar(sum, act);
            }
        }

        Ok(out)
    }
}

impl Default for LinearBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn fc_rows_scalar(
    input: &[f32],
    rows: usize,
    in_dim: usize,
    out_dim: usize,
    w: &Layer,
    b: Option<&Layer>,
    act: Activation,
) -> Vec<f32> {
    let mut out = vec![0f32; rows * out_dim];
    for r in 0..rows {
        let x = &input[r * in_dim..(r + 1) * in_dim];
        for o in 0..out_dim {
            let ww = &w.values[o * in_dim..(o + 1) * in_dim];
            let mut sum = match b {
                Some(b) => b.values[o],
                None => 0.0,
            };
            for i in 0..in_dim {
                sum += ww[i] * x[i];
            }
            out[r * out_dim + o] = crate::lc0_net::activate_scalar(sum, act);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(values: Vec<f32>) -> Layer {
        Layer {
            values,
            ..Layer::default()
        }
    }

    #[test]
    fn test_scalar_identity() {
        let backend = LinearBackend::new();
        let w = layer(vec![1.0, 0.0, 0.0, 1.0]); // 2x2 identity
        let b = layer(vec![0.0, 0.0]);
        let out = backend
            .fc_rows(&[3.0, -2.0], 1, 2, &w, Some(&b), Activation::None, "id")
            .unwrap();
        assert_eq!(out, vec![3.0, -2.0]);
    }

    #[test]
    fn test_scalar_bias_and_activation() {
        let backend = LinearBackend::new();
        let w = layer(vec![1.0, 1.0]); // 1 output of 2 inputs
        let b = layer(vec![-5.0]);
        let out = backend
            .fc_rows(&[1.0, 2.0], 1, 2, &w, Some(&b), Activation::Relu, "relu")
            .unwrap();
        assert_eq!(out, vec![0.0]); // 3 - 5 clamped by relu
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let backend = LinearBackend::new();
        let w = layer(vec![1.0, 0.0, 0.0, 1.0]);
        let b = layer(vec![0.0, 0.0]);
        assert!(backend
            .fc_rows(&[1.0], 1, 1, &w, Some(&b), Activation::None, "bad")
            .is_err());
    }

    #[test]
    fn test_int8_close_to_scalar() {
        let backend = LinearBackend::new();
        let w = layer(vec![0.5, -0.25, 0.125, 1.0, 0.75, -0.5]);
        let b = layer(vec![0.1, -0.2]);
        let input = [0.3f32, -0.9, 0.6];

        let exact = backend
            .fc_rows(&input, 1, 3, &w, Some(&b), Activation::None, "fc")
            .unwrap();
        backend.set_kernel(KERNEL_INT8);
        let quant = backend
            .fc_rows(&input, 1, 3, &w, Some(&b), Activation::None, "fc")
            .unwrap();

        for (a, q) in exact.iter().zip(quant.iter()) {
            assert!((a - q).abs() < 0.05, "scalar {} vs int8 {}", a, q);
        }
    }

    #[test]
    fn test_int8_cache_reused() {
        let backend = LinearBackend::new();
        backend.set_kernel(KERNEL_INT8);
        let w = layer(vec![1.0, 2.0, 3.0, 4.0]);
        let b = layer(vec![0.0, 0.0]);
        let _ = backend
            .fc_rows(&[1.0, 1.0], 1, 2, &w, Some(&b), Activation::None, "fc")
            .unwrap();
        let _ = backend
            .fc_rows(&[2.0, 2.0], 1, 2, &w, Some(&b), Activation::None, "fc")
            .unwrap();
        assert_eq!(backend.int8_cache.lock().unwrap().len(), 1);
    }
}
