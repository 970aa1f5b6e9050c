use std::error::Error;

use crate::llm::backend::{DeviceSet, Reservation};
use crate::llm::model::Transformer;
use crate::llm::params::ModelArgs;

const ROPE_THETA: f32 = 10000.0;

/// Precomputed rotary embedding angles for every position up to `max_seq_len`.
pub struct Rope {
    half: usize,
    cos: Vec<f32>,
    sin: Vec<f32>,
}

impl Rope {
    pub fn new(head_dim: usize, max_seq_len: usize) -> Self {
        let half = head_dim / 2;
        let mut cos = Vec::with_capacity(max_seq_len * half);
        let mut sin = Vec::with_capacity(max_seq_len * half);
        for pos in 0..max_seq_len {
            for i in 0..half {
                let freq = 1.0 / ROPE_THETA.powf((2 * i) as f32 / head_dim as f32);
                let angle = pos as f32 * freq;
                cos.push(angle.cos());
                sin.push(angle.sin());
            }
        }
        Self { half, cos, sin }
    }

    /// Rotates consecutive (even, odd) pairs of every head in `x` for position `pos`.
    pub fn apply(&self, x: &mut [f32], pos: usize) {
        let base = pos * self.half;
        for head in x.chunks_mut(self.half * 2) {
            for i in 0..self.half {
                let (c, s) = (self.cos[base + i], self.sin[base + i]);
                let (a, b) = (head[2 * i], head[2 * i + 1]);
                head[2 * i] = a * c - b * s;
                head[2 * i + 1] = a * s + b * c;
            }
        }
    }
}

struct LayerCache {
    keys: Vec<f32>,
    values: Vec<f32>,
    _reservation: Reservation,
}

/// Keys and values of previous positions, one cache per layer on that layer's device
pub struct KvCache {
    layers: Vec<LayerCache>,
}

impl KvCache {
    /// Reserves room for `seq_len` positions on each layer's device.
    pub fn new(model: &Transformer, devices: &DeviceSet, seq_len: usize) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let args = model.args();
        let per_layer = (2 * seq_len * args.dim * std::mem::size_of::<f32>()) as u64;
        let mut layers = Vec::with_capacity(args.n_layers);
        for l in 0..args.n_layers {
            let device = model.layer(l)?.device;
            let reservation = devices.get(device)?.reserve(per_layer)?;
            layers.push(LayerCache {
                keys: Vec::with_capacity(seq_len * args.dim),
                values: Vec::with_capacity(seq_len * args.dim),
                _reservation: reservation,
            });
        }
        Ok(Self { layers })
    }
}

/// Scratch space for one forward pass, reused across positions
pub struct Buffers {
    x: Vec<f32>,
    xb: Vec<f32>,
    xb2: Vec<f32>,
    q: Vec<f32>,
    k: Vec<f32>,
    v: Vec<f32>,
    attn: Vec<f32>,
    h1: Vec<f32>,
    h3: Vec<f32>,
    scores: Vec<f32>,
}

impl Buffers {
    pub fn new(args: &ModelArgs) -> Self {
        let dim = args.dim;
        let hidden = args.hidden_dim();
        Self {
            x: vec![0.0; dim],
            xb: vec![0.0; dim],
            xb2: vec![0.0; dim],
            q: vec![0.0; dim],
            k: vec![0.0; dim],
            v: vec![0.0; dim],
            attn: vec![0.0; dim],
            h1: vec![0.0; hidden],
            h3: vec![0.0; hidden],
            scores: Vec::with_capacity(args.max_seq_len),
        }
    }
}

/// Runs one token at position `pos` through the model and writes the next-token logits.
///
/// Positions must be fed in order starting at 0 for a given cache.
#[allow(clippy::too_many_arguments)]
pub fn forward(
    model: &Transformer,
    devices: &DeviceSet,
    rope: &Rope,
    cache: &mut KvCache,
    b: &mut Buffers,
    token: u32,
    pos: usize,
    logits: &mut [f32],
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let args = model.args();
    let dim = args.dim;
    let head_dim = args.head_dim();
    let scale = 1.0 / (head_dim as f32).sqrt();

    let embeddings = model.embeddings()?;
    devices.get(embeddings.device())?.embedding(embeddings, token as usize, &mut b.x)?;

    for (l, layer_cache) in cache.layers.iter_mut().enumerate() {
        let w = model.layer(l)?;
        let backend = devices.get(w.device)?;

        // Attention
        backend.rms_norm(&b.x, w.attention_norm, &mut b.xb, args.norm_eps)?;
        backend.matvec(w.wq, &b.xb, &mut b.q)?;
        backend.matvec(w.wk, &b.xb, &mut b.k)?;
        backend.matvec(w.wv, &b.xb, &mut b.v)?;
        rope.apply(&mut b.q, pos);
        rope.apply(&mut b.k, pos);

        layer_cache.keys.truncate(pos * dim);
        layer_cache.values.truncate(pos * dim);
        layer_cache.keys.extend_from_slice(&b.k);
        layer_cache.values.extend_from_slice(&b.v);

        for h in 0..args.n_heads {
            let q = &b.q[h * head_dim..(h + 1) * head_dim];
            b.scores.clear();
            for t in 0..=pos {
                let k = &layer_cache.keys[t * dim + h * head_dim..t * dim + (h + 1) * head_dim];
                b.scores.push(q.iter().zip(k).map(|(qi, ki)| qi * ki).sum::<f32>() * scale);
            }
            backend.softmax(&mut b.scores)?;

            let out = &mut b.attn[h * head_dim..(h + 1) * head_dim];
            out.fill(0.0);
            for (t, &weight) in b.scores.iter().enumerate() {
                let v = &layer_cache.values[t * dim + h * head_dim..t * dim + (h + 1) * head_dim];
                for (o, &vi) in out.iter_mut().zip(v) {
                    *o += weight * vi;
                }
            }
        }
        backend.matvec(w.wo, &b.attn, &mut b.xb2)?;
        for (x, d) in b.x.iter_mut().zip(&b.xb2) {
            *x += d;
        }

        // SwiGLU feed-forward
        backend.rms_norm(&b.x, w.ffn_norm, &mut b.xb, args.norm_eps)?;
        backend.matvec(w.w1, &b.xb, &mut b.h1)?;
        backend.matvec(w.w3, &b.xb, &mut b.h3)?;
        backend.silu(&mut b.h1)?;
        for (g, u) in b.h1.iter_mut().zip(&b.h3) {
            *g *= u;
        }
        backend.matvec(w.w2, &b.h1, &mut b.xb2)?;
        for (x, d) in b.x.iter_mut().zip(&b.xb2) {
            *x += d;
        }
    }

    let norm = model.final_norm()?;
    devices.get(norm.device())?.rms_norm(&b.x, norm, &mut b.xb, args.norm_eps)?;
    let output = model.output()?;
    devices.get(output.device())?.matvec(output, &b.xb, logits)?;
    Ok(())
}
