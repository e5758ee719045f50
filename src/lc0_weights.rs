// src/lc0_weights.rs
//
// Parser for the gzipped lc0 "v6" weights container: layer dequantization,
// network-format normalization and attention-body shape validation.
use crate::lc0_proto::{
    all_submessages, first_field, first_submessage, parse_packed_varints, read_gzip_file,
    Lc0Error, WireType,
};
use std::path::Path;

pub const WEIGHT_MAGIC: u32 = 0x1c0;

pub const INPUT_CLASSICAL_112_PLANE: i32 = 1;
pub const VALUE_WDL: i32 = 2;
pub const STRUCTURE_ATTENTION_BODY: i32 = 6;
pub const STRUCTURE_ATTENTION_BODY_T2: i32 = 7;
pub const INPUT_EMBEDDING_PE_MAP: i32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerEncoding {
    Linear16,
    Float16,
    BFloat16,
    Float32,
}

impl LayerEncoding {
    fn from_i32(v: i32) -> Option<Self> {
        match v {
            1 => Some(LayerEncoding::Linear16),
            2 => Some(LayerEncoding::Float16),
            3 => Some(LayerEncoding::BFloat16),
            4 => Some(LayerEncoding::Float32),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Default,
    Mish,
    Relu,
    None,
    Tanh,
    Sigmoid,
    Selu,
    Swish,
    Relu2,
    Softmax,
}

impl Activation {
    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => Activation::Mish,
            2 => Activation::Relu,
            3 => Activation::None,
            4 => Activation::Tanh,
            5 => Activation::Sigmoid,
            6 => Activation::Selu,
            7 => Activation::Swish,
            8 => Activation::Relu2,
            9 => Activation::Softmax,
            _ => Activation::Default,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Layer {
    pub min_val: f32,
    pub max_val: f32,
    pub dims: Vec<u32>,
    pub values: Vec<f32>,
}

impl Layer {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Smolgen {
    pub compress: Layer,
    pub dense1_w: Layer,
    pub dense1_b: Layer,
    pub ln1_g: Layer,
    pub ln1_b: Layer,
    pub dense2_w: Layer,
    pub dense2_b: Layer,
    pub ln2_g: Layer,
    pub ln2_b: Layer,
    pub present: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Mha {
    pub q_w: Layer,
    pub q_b: Layer,
    pub k_w: Layer,
    pub k_b: Layer,
    pub v_w: Layer,
    pub v_b: Layer,
    pub dense_w: Layer,
    pub dense_b: Layer,
    pub smolgen: Smolgen,
}

#[derive(Clone, Debug, Default)]
pub struct Ffn {
    pub dense1_w: Layer,
    pub dense1_b: Layer,
    pub dense2_w: Layer,
    pub dense2_b: Layer,
}

#[derive(Clone, Debug, Default)]
pub struct EncoderLayer {
    pub mha: Mha,
    pub ln1_g: Layer,
    pub ln1_b: Layer,
    pub ffn: Ffn,
    pub ln2_g: Layer,
    pub ln2_b: Layer,
}

#[derive(Clone, Debug, Default)]
pub struct NetworkFormat {
    pub input_format: i32,
    pub output_format: i32,
    pub network_structure: i32,
    pub policy_format: i32,
    pub value_format: i32,
    pub moves_left_format: i32,
    pub default_activation: i32,
    pub ffn_activation: i32,
    pub smolgen_activation: i32,
    pub input_embedding: i32,
    pub has_network_format: bool,
    pub has_ffn_activation: bool,
    pub has_smolgen_activation: bool,
    pub has_input_embedding: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Weights {
    pub magic: u32,
    pub format: NetworkFormat,

    pub ip_emb_w: Layer,
    pub ip_emb_b: Layer,
    pub ip_mult_gate: Layer,
    pub ip_add_gate: Layer,
    pub smolgen_w: Layer,

    pub encoders: Vec<EncoderLayer>,
    pub headcount: i32,

    pub ip_val_w: Layer,
    pub ip_val_b: Layer,
    pub ip1_val_w: Layer,
    pub ip1_val_b: Layer,
    pub ip2_val_w: Layer,
    pub ip2_val_b: Layer,

    pub has_smolgen_global: bool,
}

fn shape_err(msg: impl Into<String>) -> Lc0Error {
    Lc0Error::Shape(msg.into())
}

pub fn fp16_to_f32(h: u16) -> f32 {
    let sign = u32::from(h & 0x8000) << 16;
    let exp = u32::from(h >> 10) & 0x1F;
    let mant = u32::from(h & 0x03FF);

    let bits = if exp == 0 {
        if mant == 0 {
            sign
        } else {
            let mut m = mant;
            let mut e = -14i32;
            while m & 0x0400 == 0 {
                m <<= 1;
                e -= 1;
            }
            m &= 0x03FF;
            sign | (((e + 127) as u32) << 23) | (m << 13)
        }
    } else if exp == 0x1F {
        sign | 0x7F80_0000 | (mant << 13)
    } else {
        sign | ((exp + (127 - 15)) << 23) | (mant << 13)
    };
    f32::from_bits(bits)
}

pub fn bf16_to_f32(b: u16) -> f32 {
    f32::from_bits(u32::from(b) << 16)
}

fn parse_layer(msg: &[u8]) -> Result<Layer, Lc0Error> {
    let mut layer = Layer::default();
    let mut params: &[u8] = &[];
    let mut encoding = LayerEncoding::Linear16;

    let mut offset = 0;
    while let Some(f) = crate::lc0_proto::next_field(msg, &mut offset)? {
        match (f.number, f.wire_type) {
            (1, WireType::Fixed32) => layer.min_val = f32::from_bits(f.fixed32_value),
            (2, WireType::Fixed32) => layer.max_val = f32::from_bits(f.fixed32_value),
            (3, WireType::LengthDelimited) => params = f.bytes,
            (4, WireType::Varint) => {
                encoding = LayerEncoding::from_i32(f.varint_value as i32).ok_or_else(|| {
                    shape_err(format!("unsupported layer encoding {}", f.varint_value))
                })?;
            }
            (5, WireType::Varint) => layer.dims.push(f.varint_value as u32),
            (5, WireType::LengthDelimited) => {
                layer.dims.extend(parse_packed_varints(f.bytes)?);
            }
            _ => {}
        }
    }

    if params.is_empty() {
        return Ok(layer);
    }

    match encoding {
        LayerEncoding::Linear16 => {
            if params.len() % 2 != 0 {
                return Err(shape_err("LINEAR16 layer has odd byte size"));
            }
            let lo = layer.min_val;
            let hi = layer.max_val;
            layer.values = params
                .chunks_exact(2)
                .map(|c| {
                    let u = u16::from_le_bytes([c[0], c[1]]);
                    let theta = f32::from(u) / 65535.0;
                    lo * (1.0 - theta) + hi * theta
                })
                .collect();
        }
        LayerEncoding::Float16 => {
            if params.len() % 2 != 0 {
                return Err(shape_err("FLOAT16 layer has odd byte size"));
            }
            layer.values = params
                .chunks_exact(2)
                .map(|c| fp16_to_f32(u16::from_le_bytes([c[0], c[1]])))
                .collect();
        }
        LayerEncoding::BFloat16 => {
            if params.len() % 2 != 0 {
                return Err(shape_err("BFLOAT16 layer has odd byte size"));
            }
            layer.values = params
                .chunks_exact(2)
                .map(|c| bf16_to_f32(u16::from_le_bytes([c[0], c[1]])))
                .collect();
        }
        LayerEncoding::Float32 => {
            if params.len() % 4 != 0 {
                return Err(shape_err("FLOAT32 layer byte size is not multiple of 4"));
            }
            layer.values = params
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
        }
    }

    Ok(layer)
}

fn parse_layer_field(msg: &[u8], number: u32) -> Result<Layer, Lc0Error> {
    match first_submessage(msg, number)? {
        Some(sub) => parse_layer(sub),
        None => Ok(Layer::default()),
    }
}

fn parse_smolgen(msg: &[u8]) -> Result<Smolgen, Lc0Error> {
    Ok(Smolgen {
        compress: parse_layer_field(msg, 1)?,
        dense1_w: parse_layer_field(msg, 2)?,
        dense1_b: parse_layer_field(msg, 3)?,
        ln1_g: parse_layer_field(msg, 4)?,
        ln1_b: parse_layer_field(msg, 5)?,
        dense2_w: parse_layer_field(msg, 6)?,
        dense2_b: parse_layer_field(msg, 7)?,
        ln2_g: parse_layer_field(msg, 8)?,
        ln2_b: parse_layer_field(msg, 9)?,
        present: true,
    })
}

fn parse_mha(msg: &[u8]) -> Result<Mha, Lc0Error> {
    let mut mha = Mha {
        q_w: parse_layer_field(msg, 1)?,
        q_b: parse_layer_field(msg, 2)?,
        k_w: parse_layer_field(msg, 3)?,
        k_b: parse_layer_field(msg, 4)?,
        v_w: parse_layer_field(msg, 5)?,
        v_b: parse_layer_field(msg, 6)?,
        dense_w: parse_layer_field(msg, 7)?,
        dense_b: parse_layer_field(msg, 8)?,
        smolgen: Smolgen::default(),
    };
    if let Some(sub) = first_submessage(msg, 9)? {
        mha.smolgen = parse_smolgen(sub)?;
    }
    Ok(mha)
}

fn parse_ffn(msg: &[u8]) -> Result<Ffn, Lc0Error> {
    Ok(Ffn {
        dense1_w: parse_layer_field(msg, 1)?,
        dense1_b: parse_layer_field(msg, 2)?,
        dense2_w: parse_layer_field(msg, 3)?,
        dense2_b: parse_layer_field(msg, 4)?,
    })
}

fn parse_encoder(msg: &[u8]) -> Result<EncoderLayer, Lc0Error> {
    let mut enc = EncoderLayer {
        ln1_g: parse_layer_field(msg, 2)?,
        ln1_b: parse_layer_field(msg, 3)?,
        ln2_g: parse_layer_field(msg, 5)?,
        ln2_b: parse_layer_field(msg, 6)?,
        ..EncoderLayer::default()
    };
    if let Some(sub) = first_submessage(msg, 1)? {
        enc.mha = parse_mha(sub)?;
    }
    if let Some(sub) = first_submessage(msg, 4)? {
        enc.ffn = parse_ffn(sub)?;
    }
    Ok(enc)
}

/// Legacy nets omit the format message or carry pre-attention structure codes;
/// promote them so the forward pass only ever sees the attention-body layout.
fn normalize_network_format(w: &mut Weights) {
    let nf = &mut w.format;

    if !nf.has_network_format {
        nf.input_format = 1;
        nf.output_format = 1;
        nf.network_structure = 3;
        nf.value_format = 1;
        nf.policy_format = 1;
    } else if nf.network_structure == 1 {
        nf.network_structure = 3;
        nf.value_format = 1;
        nf.policy_format = 1;
    } else if nf.network_structure == 2 {
        nf.network_structure = 4;
        nf.value_format = 1;
        nf.policy_format = 1;
    } else if nf.network_structure == 4 && !w.encoders.is_empty() {
        nf.network_structure = STRUCTURE_ATTENTION_BODY;
        if w.has_smolgen_global {
            nf.ffn_activation = 8; // RELU2
            nf.smolgen_activation = 7; // SWISH
            nf.has_ffn_activation = true;
            nf.has_smolgen_activation = true;
        }
    } else if nf.network_structure == 134 {
        nf.network_structure = STRUCTURE_ATTENTION_BODY_T2;
    }

    if nf.network_structure == STRUCTURE_ATTENTION_BODY && !nf.has_input_embedding {
        nf.input_embedding = INPUT_EMBEDDING_PE_MAP;
        nf.has_input_embedding = true;
    }
}

pub fn load_from_bytes(bytes: &[u8]) -> Result<Weights, Lc0Error> {
    let net = bytes;
    let mut out = Weights::default();

    if let Some(magic) = first_field(net, 1, WireType::Fixed32)? {
        out.magic = magic.fixed32_value;
    }
    if out.magic != WEIGHT_MAGIC {
        return Err(shape_err("bad magic header"));
    }

    if let Some(fmt) = first_submessage(net, 4)? {
        if let Some(nf) = first_submessage(fmt, 2)? {
            out.format.has_network_format = true;
            let get = |n: u32| -> Result<Option<i32>, Lc0Error> {
                Ok(first_field(nf, n, WireType::Varint)?.map(|f| f.varint_value as i32))
            };
            if let Some(v) = get(1)? {
                out.format.input_format = v;
            }
            if let Some(v) = get(2)? {
                out.format.output_format = v;
            }
            if let Some(v) = get(3)? {
                out.format.network_structure = v;
            }
            if let Some(v) = get(4)? {
                out.format.policy_format = v;
            }
            if let Some(v) = get(5)? {
                out.format.value_format = v;
            }
            if let Some(v) = get(6)? {
                out.format.moves_left_format = v;
            }
            if let Some(v) = get(7)? {
                out.format.default_activation = v;
            }
            if let Some(v) = get(8)? {
                out.format.smolgen_activation = v;
                out.format.has_smolgen_activation = true;
            }
            if let Some(v) = get(9)? {
                out.format.ffn_activation = v;
                out.format.has_ffn_activation = true;
            }
            if let Some(v) = get(10)? {
                out.format.input_embedding = v;
                out.format.has_input_embedding = true;
            }
        }
    }

    let weights_msg =
        first_submessage(net, 10)?.ok_or_else(|| shape_err("missing weights message"))?;

    if let Some(f) = first_field(weights_msg, 28, WireType::Varint)? {
        out.headcount = f.varint_value as i32;
    }

    out.ip_emb_w = parse_layer_field(weights_msg, 25)?;
    out.ip_emb_b = parse_layer_field(weights_msg, 26)?;
    out.ip_mult_gate = parse_layer_field(weights_msg, 33)?;
    out.ip_add_gate = parse_layer_field(weights_msg, 34)?;
    out.smolgen_w = parse_layer_field(weights_msg, 35)?;
    out.has_smolgen_global = !out.smolgen_w.is_empty();

    for enc_msg in all_submessages(weights_msg, 27)? {
        out.encoders.push(parse_encoder(enc_msg)?);
    }

    out.ip_val_w = parse_layer_field(weights_msg, 29)?;
    out.ip_val_b = parse_layer_field(weights_msg, 30)?;
    out.ip1_val_w = parse_layer_field(weights_msg, 7)?;
    out.ip1_val_b = parse_layer_field(weights_msg, 8)?;
    out.ip2_val_w = parse_layer_field(weights_msg, 9)?;
    out.ip2_val_b = parse_layer_field(weights_msg, 10)?;

    normalize_network_format(&mut out);
    Ok(out)
}

pub fn load_from_pb_gz(path: &Path) -> Result<Weights, Lc0Error> {
    let bytes = read_gzip_file(path)?;
    load_from_bytes(&bytes)
}

pub fn layer_output_size(w: &Layer, b: &Layer, name: &str) -> Result<usize, Lc0Error> {
    let out = b.values.len();
    if out == 0 {
        return Err(shape_err(format!("{}: bias vector is empty", name)));
    }
    if w.values.is_empty() {
        return Err(shape_err(format!("{}: weight vector is empty", name)));
    }
    if w.values.len() % out != 0 {
        return Err(shape_err(format!(
            "{}: weight size {} not divisible by output size {}",
            name,
            w.values.len(),
            out
        )));
    }
    Ok(out)
}

pub fn layer_input_size(w: &Layer, b: &Layer, name: &str) -> Result<usize, Lc0Error> {
    let out = layer_output_size(w, b, name)?;
    Ok(w.values.len() / out)
}

pub fn validate_attention_value_shapes(w: &Weights, strict_t1_shape: bool) -> Result<(), Lc0Error> {
    if w.format.input_format != INPUT_CLASSICAL_112_PLANE {
        return Err(shape_err("input format must be INPUT_CLASSICAL_112_PLANE (1)"));
    }
    if w.format.value_format != VALUE_WDL {
        return Err(shape_err("value format must be VALUE_WDL (2)"));
    }
    if w.format.network_structure != STRUCTURE_ATTENTION_BODY
        && w.format.network_structure != STRUCTURE_ATTENTION_BODY_T2
    {
        return Err(shape_err(
            "network structure must be attention-body format after normalization",
        ));
    }

    let embedding = w.ip_emb_b.values.len();
    if embedding == 0 {
        return Err(shape_err("ip_emb_b is empty"));
    }
    if w.headcount <= 0 {
        return Err(shape_err("headcount must be > 0"));
    }
    if embedding % w.headcount as usize != 0 {
        return Err(shape_err(format!(
            "embedding size {} is not divisible by headcount {}",
            embedding, w.headcount
        )));
    }

    let ip_emb_in = layer_input_size(&w.ip_emb_w, &w.ip_emb_b, "ip_emb")?;
    if ip_emb_in != 176 {
        return Err(shape_err(format!(
            "ip_emb input size expected 176, got {}",
            ip_emb_in
        )));
    }

    if w.encoders.is_empty() {
        return Err(shape_err("encoder list is empty"));
    }

    if strict_t1_shape {
        if w.encoders.len() != 10 {
            return Err(shape_err(format!(
                "expected encoder_layers == 10 for t1 net, got {}",
                w.encoders.len()
            )));
        }
        if embedding != 256 {
            return Err(shape_err(format!(
                "expected embedding == 256 for t1 net, got {}",
                embedding
            )));
        }
        if w.headcount != 8 {
            return Err(shape_err(format!(
                "expected headcount == 8 for t1 net, got {}",
                w.headcount
            )));
        }
    }

    for (i, e) in w.encoders.iter().enumerate() {
        let p = format!("encoder[{}]", i);

        let q_out = layer_output_size(&e.mha.q_w, &e.mha.q_b, &format!("{}.q", p))?;
        let q_in = layer_input_size(&e.mha.q_w, &e.mha.q_b, &format!("{}.q", p))?;
        let k_out = layer_output_size(&e.mha.k_w, &e.mha.k_b, &format!("{}.k", p))?;
        let v_out = layer_output_size(&e.mha.v_w, &e.mha.v_b, &format!("{}.v", p))?;
        let d_out = layer_output_size(&e.mha.dense_w, &e.mha.dense_b, &format!("{}.dense", p))?;
        let d_in = layer_input_size(&e.mha.dense_w, &e.mha.dense_b, &format!("{}.dense", p))?;

        if q_in != embedding || q_out != embedding || k_out != embedding || v_out != embedding {
            return Err(shape_err(format!(
                "{}: MHA projection dimensions must all be embedding-sized",
                p
            )));
        }
        if d_in != embedding || d_out != embedding {
            return Err(shape_err(format!(
                "{}: MHA output projection must be embedding->embedding",
                p
            )));
        }

        let f1_out = layer_output_size(&e.ffn.dense1_w, &e.ffn.dense1_b, &format!("{}.ffn1", p))?;
        let f1_in = layer_input_size(&e.ffn.dense1_w, &e.ffn.dense1_b, &format!("{}.ffn1", p))?;
        let f2_out = layer_output_size(&e.ffn.dense2_w, &e.ffn.dense2_b, &format!("{}.ffn2", p))?;
        let f2_in = layer_input_size(&e.ffn.dense2_w, &e.ffn.dense2_b, &format!("{}.ffn2", p))?;

        if f1_in != embedding || f2_out != embedding || f2_in != f1_out {
            return Err(shape_err(format!(
                "{}: FFN dimensions must be embedding->dff->embedding",
                p
            )));
        }

        if e.mha.smolgen.present && w.smolgen_w.is_empty() {
            return Err(shape_err(format!(
                "{}: smolgen present in layer but global smolgen_w missing",
                p
            )));
        }
    }

    let val_tok_out = layer_output_size(&w.ip_val_w, &w.ip_val_b, "ip_val")?;
    let val_tok_in = layer_input_size(&w.ip_val_w, &w.ip_val_b, "ip_val")?;
    if val_tok_in != embedding {
        return Err(shape_err("ip_val input must equal embedding"));
    }

    let val1_out = layer_output_size(&w.ip1_val_w, &w.ip1_val_b, "ip1_val")?;
    let val1_in = layer_input_size(&w.ip1_val_w, &w.ip1_val_b, "ip1_val")?;
    if val1_in != val_tok_out * 64 {
        return Err(shape_err("ip1_val input must equal 64 * ip_val_out"));
    }

    let val2_out = layer_output_size(&w.ip2_val_w, &w.ip2_val_b, "ip2_val")?;
    let val2_in = layer_input_size(&w.ip2_val_w, &w.ip2_val_b, "ip2_val")?;
    if val2_in != val1_out {
        return Err(shape_err("ip2_val input must equal ip1_val output"));
    }
    if val2_out != 3 {
        return Err(shape_err("WDL head output size must be exactly 3"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fp16_conversion() {
        assert_eq!(fp16_to_f32(0x0000), 0.0);
        assert_eq!(fp16_to_f32(0x3C00), 1.0);
        assert_eq!(fp16_to_f32(0xC000), -2.0);
        assert_eq!(fp16_to_f32(0x3800), 0.5);
        // Subnormal: smallest positive half is 2^-24
        assert!((fp16_to_f32(0x0001) - 2.0f32.powi(-24)).abs() < 1e-12);
        assert!(fp16_to_f32(0x7C00).is_infinite());
    }

    #[test]
    fn test_bf16_conversion() {
        assert_eq!(bf16_to_f32(0x3F80), 1.0);
        assert_eq!(bf16_to_f32(0xBF80), -1.0);
        assert_eq!(bf16_to_f32(0x0000), 0.0);
    }

    #[test]
    fn test_linear16_dequant_endpoints() {
        // min + theta * (max - min): theta 0 -> min, theta 1 -> max
        let mut msg = Vec::new();
        // field 1 fixed32 min = -1.0
        msg.push((1 << 3) | 5);
        msg.extend((-1.0f32).to_bits().to_le_bytes());
        // field 2 fixed32 max = 3.0
        msg.push((2 << 3) | 5);
        msg.extend(3.0f32.to_bits().to_le_bytes());
        // field 3 params: 0x0000 and 0xFFFF
        msg.push((3 << 3) | 2);
        msg.push(4);
        msg.extend([0x00, 0x00, 0xFF, 0xFF]);
        // field 4 encoding LINEAR16
        msg.push(4 << 3);
        msg.push(1);

        let layer = parse_layer(&msg).unwrap();
        assert_eq!(layer.values.len(), 2);
        assert!((layer.values[0] + 1.0).abs() < 1e-6);
        assert!((layer.values[1] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_odd_byte_stream_rejected() {
        let mut msg = Vec::new();
        msg.push((3 << 3) | 2);
        msg.push(3);
        msg.extend([1u8, 2u8, 3u8]);
        msg.push(4 << 3);
        msg.push(2); // FLOAT16
        assert!(parse_layer(&msg).is_err());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut net = Vec::new();
        net.push((1 << 3) | 5);
        net.extend(0x123u32.to_le_bytes());
        match load_from_bytes(&net) {
            Err(Lc0Error::Shape(msg)) => assert!(msg.contains("magic")),
            other => panic!("expected shape error, got {:?}", other.map(|_| ())),
        }
    }
}
