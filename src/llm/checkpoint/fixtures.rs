//! Writes `.pth` archives laid out the way `torch.save` does, for tests.
use std::io::{Cursor, Write};
use byteorder::{LittleEndian, WriteBytesExt};
use half::f16;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const MARK: u8 = b'(';
const STOP: u8 = b'.';
const BININT: u8 = b'J';
const BINUNICODE: u8 = b'X';
const TUPLE: u8 = b't';
const EMPTY_TUPLE: u8 = b')';
const REDUCE: u8 = b'R';
const SETITEMS: u8 = b'u';
const BINPERSID: u8 = b'Q';
const PROTO: u8 = 0x80;
const NEWFALSE: u8 = 0x89;

fn unicode(out: &mut Vec<u8>, s: &str) {
    out.push(BINUNICODE);
    out.write_u32::<LittleEndian>(s.len() as u32).unwrap();
    out.extend_from_slice(s.as_bytes());
}

fn int(out: &mut Vec<u8>, v: usize) {
    out.push(BININT);
    out.write_i32::<LittleEndian>(v as i32).unwrap();
}

fn int_tuple(out: &mut Vec<u8>, values: &[usize]) {
    out.push(MARK);
    for &v in values {
        int(out, v);
    }
    out.push(TUPLE);
}

fn ordered_dict(out: &mut Vec<u8>) {
    out.extend_from_slice(b"ccollections\nOrderedDict\n");
    out.push(EMPTY_TUPLE);
    out.push(REDUCE);
}

fn row_major(shape: &[usize]) -> Vec<usize> {
    let mut stride = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        stride[i] = stride[i + 1] * shape[i + 1];
    }
    stride
}

/// Pickles an OrderedDict of f16 tensors, tensor `i` backed by storage key `i`.
fn state_dict_pickle(tensors: &[(&str, Vec<usize>, Vec<usize>, Vec<f32>)]) -> Vec<u8> {
    let mut out = vec![PROTO, 2];
    ordered_dict(&mut out);
    out.push(MARK);
    for (i, (name, shape, stride, values)) in tensors.iter().enumerate() {
        unicode(&mut out, name);
        out.extend_from_slice(b"ctorch._utils\n_rebuild_tensor_v2\n");
        out.push(MARK);

        out.push(MARK);
        unicode(&mut out, "storage");
        out.extend_from_slice(b"ctorch\nHalfStorage\n");
        unicode(&mut out, &i.to_string());
        unicode(&mut out, "cpu");
        int(&mut out, values.len());
        out.push(TUPLE);
        out.push(BINPERSID);

        int(&mut out, 0);
        int_tuple(&mut out, shape);
        int_tuple(&mut out, stride);
        out.push(NEWFALSE);
        ordered_dict(&mut out);
        out.push(TUPLE);
        out.push(REDUCE);
    }
    out.push(SETITEMS);
    out.push(STOP);
    out
}

/// Archive of f16 tensors with explicit strides under the `state_dict/` prefix.
pub fn pth_bytes_with(tensors: &[(&str, Vec<usize>, Vec<usize>, Vec<f32>)]) -> Vec<u8> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let mut archive = ZipWriter::new(Cursor::new(Vec::new()));

    archive.start_file("state_dict/data.pkl", options).unwrap();
    archive.write_all(&state_dict_pickle(tensors)).unwrap();
    for (i, (_, _, _, values)) in tensors.iter().enumerate() {
        archive.start_file(format!("state_dict/data/{}", i), options).unwrap();
        for v in values {
            archive.write_u16::<LittleEndian>(f16::from_f32(*v).to_bits()).unwrap();
        }
    }
    archive.finish().unwrap().into_inner()
}

/// Archive of contiguous f16 tensors.
pub fn pth_bytes(tensors: &[(&str, Vec<usize>, Vec<f32>)]) -> Vec<u8> {
    let with_strides: Vec<(&str, Vec<usize>, Vec<usize>, Vec<f32>)> = tensors
        .iter()
        .map(|(name, shape, values)| (*name, shape.clone(), row_major(shape), values.clone()))
        .collect();
    pth_bytes_with(&with_strides)
}
