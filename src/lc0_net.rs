// src/lc0_net.rs
//
// Attention-body forward pass: embedding -> N encoder layers (MHA + optional
// smolgen bias + FFN, each with residual layer norm) -> WDL value head.
use crate::lc0_features::{InputPlanes, PLANES};
use crate::lc0_linear::LinearBackend;
use crate::lc0_proto::Lc0Error;
use crate::lc0_weights::{Activation, EncoderLayer, Layer, Weights};

pub const TOKEN_FEATURES: usize = 176; // 112 plane values + 64-dim positional encoding

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WdlOutput {
    pub win: f32,
    pub draw: f32,
    pub loss: f32,
}

// --- ACTIVATIONS ---
fn mish(v: f32) -> f32 {
    let e = v.exp();
    let n = e * e + 2.0 * e;
    let d = v / (n + 2.0);
    if v <= -0.125 {
        n * d
    } else {
        v - 2.0 * d
    }
}

fn selu(v: f32) -> f32 {
    const ALPHA: f32 = 1.67326324;
    const SCALE: f32 = 1.05070098;
    if v > 0.0 {
        SCALE * v
    } else {
        SCALE * ALPHA * (v.exp() - 1.0)
    }
}

pub fn activate_scalar(x: f32, a: Activation) -> f32 {
    match a {
        Activation::Relu => x.max(0.0),
        Activation::Relu2 => {
            if x > 0.0 {
                x * x
            } else {
                0.0
            }
        }
        Activation::Mish => mish(x),
        Activation::Tanh => x.tanh(),
        Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        Activation::Selu => selu(x),
        Activation::Swish => x / (1.0 + (-x).exp()),
        _ => x,
    }
}

pub fn softmax_inplace(data: &mut [f32]) {
    if data.is_empty() {
        return;
    }
    let max_v = data.iter().fold(f32::MIN, |acc, v| acc.max(*v));

    let mut sum = 0.0;
    for v in data.iter_mut() {
        *v = (*v - max_v).exp();
        sum += *v;
    }
    if sum <= f32::MIN_POSITIVE {
        let uniform = 1.0 / data.len() as f32;
        data.fill(uniform);
        return;
    }
    for v in data.iter_mut() {
        *v /= sum;
    }
}

/// Fixed per-square positional encoding appended to the 112 plane features.
/// One-hot over the square index: 64 values, exactly one of them 1.0.
#[inline(always)]
pub fn pos_encoding(sq: usize, i: usize) -> f32 {
    if sq == i {
        1.0
    } else {
        0.0
    }
}

fn default_activation(w: &Weights) -> Activation {
    if w.format.default_activation == 1 {
        Activation::Mish
    } else {
        Activation::Relu
    }
}

fn resolve_activation(w: &Weights, encoded: i32, has_specific: bool) -> Activation {
    if !has_specific || encoded == 0 {
        return default_activation(w);
    }
    Activation::from_i32(encoded)
}

fn layer_norm_skip(
    data: &mut [f32],
    skip: Option<&[f32]>,
    rows: usize,
    channels: usize,
    alpha: f32,
    gammas: &Layer,
    betas: &Layer,
    eps: f32,
    name: &str,
) -> Result<(), Lc0Error> {
    if gammas.values.len() != channels || betas.values.len() != channels {
        return Err(Lc0Error::Forward(format!(
            "{}: ln gamma/beta size mismatch",
            name
        )));
    }

    for r in 0..rows {
        let base = r * channels;

        let mut mean = 0.0;
        for c in 0..channels {
            let mut v = data[base + c] * alpha;
            if let Some(skip) = skip {
                v += skip[base + c];
            }
            data[base + c] = v;
            mean += v;
        }
        mean /= channels as f32;

        let mut var = 0.0;
        for c in 0..channels {
            let d = data[base + c] - mean;
            var += d * d;
        }
        var /= channels as f32;

        let inv = 1.0 / (var + eps).sqrt();
        for c in 0..channels {
            data[base + c] = betas.values[c] + gammas.values[c] * (data[base + c] - mean) * inv;
        }
    }
    Ok(())
}

fn add_smolgen_bias(
    w: &Weights,
    layer: &EncoderLayer,
    x: &[f32],
    embedding: usize,
    heads: usize,
    backend: &LinearBackend,
    scores: &mut [f32],
) -> Result<(), Lc0Error> {
    if !layer.mha.smolgen.present {
        return Ok(());
    }

    let sg = &layer.mha.smolgen;
    let smolgen_act = resolve_activation(
        w,
        w.format.smolgen_activation,
        w.format.has_smolgen_activation,
    );

    let compressed = backend.fc_rows(
        x,
        64,
        embedding,
        &sg.compress,
        None,
        Activation::None,
        "smolgen.compress",
    )?;
    let hidden = compressed.len() / 64;

    let mut dense1 = backend.fc_rows(
        &compressed,
        1,
        64 * hidden,
        &sg.dense1_w,
        Some(&sg.dense1_b),
        smolgen_act,
        "smolgen.dense1",
    )?;
    let d1 = dense1.len();
    layer_norm_skip(&mut dense1, None, 1, d1, 1.0, &sg.ln1_g, &sg.ln1_b, 1e-3, "smolgen.ln1")?;

    let mut dense2 = backend.fc_rows(
        &dense1,
        1,
        d1,
        &sg.dense2_w,
        Some(&sg.dense2_b),
        smolgen_act,
        "smolgen.dense2",
    )?;
    let d2 = dense2.len();
    layer_norm_skip(&mut dense2, None, 1, d2, 1.0, &sg.ln2_g, &sg.ln2_b, 1e-3, "smolgen.ln2")?;

    if w.smolgen_w.is_empty() {
        return Err(Lc0Error::Forward(
            "global smolgen_w is empty while encoder smolgen is present".into(),
        ));
    }

    if d2 % heads != 0 {
        return Err(Lc0Error::Forward(
            "smolgen dense2 size is not divisible by headcount".into(),
        ));
    }
    let per_head = d2 / heads;

    if w.smolgen_w.values.len() % per_head != 0
        || w.smolgen_w.values.len() / per_head != 64 * 64
    {
        return Err(Lc0Error::Forward(
            "global smolgen_w output must be 4096".into(),
        ));
    }

    for h in 0..heads {
        let in_head = &dense2[h * per_head..(h + 1) * per_head];
        let out_head = backend.fc_rows(
            in_head,
            1,
            per_head,
            &w.smolgen_w,
            None,
            Activation::None,
            "global smolgen apply",
        )?;

        let base = h * 64 * 64;
        for (i, v) in out_head.iter().enumerate() {
            scores[base + i] += v;
        }
    }

    Ok(())
}

pub fn forward_attention_value(
    w: &Weights,
    input: &InputPlanes,
    backend: &LinearBackend,
) -> Result<WdlOutput, Lc0Error> {
    crate::lc0_weights::validate_attention_value_shapes(w, false)?;

    let embedding = w.ip_emb_b.values.len();
    let heads = w.headcount as usize;
    let depth = embedding / heads;

    // Token input: per square, the 112 plane values plus the positional code
    let mut token_in = vec![0f32; 64 * TOKEN_FEATURES];
    for sq in 0..64 {
        let row = &mut token_in[sq * TOKEN_FEATURES..(sq + 1) * TOKEN_FEATURES];
        for p in 0..PLANES {
            row[p] = input[p * 64 + sq];
        }
        for pe in 0..64 {
            row[PLANES + pe] = pos_encoding(sq, pe);
        }
    }

    let mut x = backend.fc_rows(
        &token_in,
        64,
        TOKEN_FEATURES,
        &w.ip_emb_w,
        Some(&w.ip_emb_b),
        default_activation(w),
        "ip_emb",
    )?;

    if !w.ip_mult_gate.is_empty() && !w.ip_add_gate.is_empty() {
        if w.ip_mult_gate.values.len() != embedding * 64
            || w.ip_add_gate.values.len() != embedding * 64
        {
            return Err(Lc0Error::Forward(
                "input gating vectors must have embedding*64 values".into(),
            ));
        }
        for sq in 0..64 {
            for c in 0..embedding {
                let xidx = sq * embedding + c;
                let gidx = c * 64 + sq;
                x[xidx] = x[xidx] * w.ip_mult_gate.values[gidx] + w.ip_add_gate.values[gidx];
            }
        }
    }

    let alpha = (2.0 * w.encoders.len() as f32).powf(-0.25);
    let ffn_act = resolve_activation(w, w.format.ffn_activation, w.format.has_ffn_activation);

    for layer in &w.encoders {
        let q = backend.fc_rows(&x, 64, embedding, &layer.mha.q_w, Some(&layer.mha.q_b), Activation::None, "encoder.q")?;
        let k = backend.fc_rows(&x, 64, embedding, &layer.mha.k_w, Some(&layer.mha.k_b), Activation::None, "encoder.k")?;
        let v = backend.fc_rows(&x, 64, embedding, &layer.mha.v_w, Some(&layer.mha.v_b), Activation::None, "encoder.v")?;

        let mut scores = vec![0f32; heads * 64 * 64];
        add_smolgen_bias(w, layer, &x, embedding, heads, backend, &mut scores)?;

        let scale = 1.0 / (depth as f32).sqrt();

        for h in 0..heads {
            for qi in 0..64 {
                for ki in 0..64 {
                    let mut dot = 0.0;
                    for d in 0..depth {
                        let c = h * depth + d;
                        dot += q[qi * embedding + c] * k[ki * embedding + c];
                    }
                    scores[h * 64 * 64 + qi * 64 + ki] += dot * scale;
                }
                let row = &mut scores[h * 64 * 64 + qi * 64..h * 64 * 64 + qi * 64 + 64];
                softmax_inplace(row);
            }
        }

        let mut attn = vec![0f32; 64 * embedding];
        for h in 0..heads {
            for qi in 0..64 {
                for ki in 0..64 {
                    let a = scores[h * 64 * 64 + qi * 64 + ki];
                    for d in 0..depth {
                        let c = h * depth + d;
                        attn[qi * embedding + c] += a * v[ki * embedding + c];
                    }
                }
            }
        }

        let mut proj = backend.fc_rows(
            &attn,
            64,
            embedding,
            &layer.mha.dense_w,
            Some(&layer.mha.dense_b),
            Activation::None,
            "encoder.proj",
        )?;
        layer_norm_skip(&mut proj, Some(&x), 64, embedding, alpha, &layer.ln1_g, &layer.ln1_b, 1e-6, "encoder.ln1")?;
        x = proj;

        let ffn1 = backend.fc_rows(
            &x,
            64,
            embedding,
            &layer.ffn.dense1_w,
            Some(&layer.ffn.dense1_b),
            ffn_act,
            "encoder.ffn1",
        )?;
        let dff = ffn1.len() / 64;

        let mut ffn2 = backend.fc_rows(
            &ffn1,
            64,
            dff,
            &layer.ffn.dense2_w,
            Some(&layer.ffn.dense2_b),
            Activation::None,
            "encoder.ffn2",
        )?;
        layer_norm_skip(&mut ffn2, Some(&x), 64, embedding, alpha, &layer.ln2_g, &layer.ln2_b, 1e-6, "encoder.ln2")?;
        x = ffn2;
    }

    let val_tokens = backend.fc_rows(
        &x,
        64,
        embedding,
        &w.ip_val_w,
        Some(&w.ip_val_b),
        default_activation(w),
        "ip_val",
    )?;
    let val_planes = val_tokens.len() / 64;

    let val1 = backend.fc_rows(
        &val_tokens,
        1,
        64 * val_planes,
        &w.ip1_val_w,
        Some(&w.ip1_val_b),
        default_activation(w),
        "ip1_val",
    )?;

    let mut val2 = backend.fc_rows(
        &val1,
        1,
        val1.len(),
        &w.ip2_val_w,
        Some(&w.ip2_val_b),
        Activation::None,
        "ip2_val",
    )?;

    if val2.len() != 3 {
        return Err(Lc0Error::Forward("value head output must be 3 logits".into()));
    }
    softmax_inplace(&mut val2);

    Ok(WdlOutput {
        win: val2[0],
        draw: val2[1],
        loss: val2[2],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let mut data = vec![1.0f32, 2.0, 3.0];
        softmax_inplace(&mut data);
        let sum: f32 = data.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(data[2] > data[1] && data[1] > data[0]);
    }

    #[test]
    fn test_softmax_degenerate_input() {
        let mut data = vec![-1e30f32, -1e30, -1e30, -1e30];
        softmax_inplace(&mut data);
        for v in data {
            assert!((v - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn test_activations() {
        assert_eq!(activate_scalar(-2.0, Activation::Relu), 0.0);
        assert_eq!(activate_scalar(3.0, Activation::Relu), 3.0);
        assert_eq!(activate_scalar(3.0, Activation::Relu2), 9.0);
        assert_eq!(activate_scalar(-1.0, Activation::Relu2), 0.0);
        assert!((activate_scalar(0.0, Activation::Sigmoid) - 0.5).abs() < 1e-6);
        assert_eq!(activate_scalar(1.5, Activation::None), 1.5);
        // Mish: smooth, mish(0) = 0, mish(large) ~ identity
        assert!(activate_scalar(0.0, Activation::Mish).abs() < 1e-6);
        assert!((activate_scalar(10.0, Activation::Mish) - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_pos_encoding_one_hot() {
        for sq in 0..64 {
            let sum: f32 = (0..64).map(|i| pos_encoding(sq, i)).sum();
            assert_eq!(sum, 1.0);
            assert_eq!(pos_encoding(sq, sq), 1.0);
        }
    }

    #[test]
    fn test_layer_norm_normalizes() {
        let gammas = Layer {
            values: vec![1.0; 4],
            ..Layer::default()
        };
        let betas = Layer {
            values: vec![0.0; 4],
            ..Layer::default()
        };
        let mut data = vec![1.0f32, 2.0, 3.0, 4.0];
        layer_norm_skip(&mut data, None, 1, 4, 1.0, &gammas, &betas, 1e-6, "t").unwrap();
        let mean: f32 = data.iter().sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-5);
        let var: f32 = data.iter().map(|v| v * v).sum::<f32>() / 4.0;
        assert!((var - 1.0).abs() < 1e-3);
    }
}
