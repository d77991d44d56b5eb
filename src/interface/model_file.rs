//! Binary model persistence.
//!
//! Fixed little-endian layout:
//! `γ`, `bias` (f64); `maxdim`, `kernelType`, `sparse`, `S`, `nElem`
//! (i32); `weights[S]`, `sqnorms[S]` (f64); then `nElem` feature entries
//! of `{index: i32, value: f64}` with a `{-1, 0}` sentinel closing each
//! vector. The reader rebuilds per-vector offsets by scanning for the
//! sentinels.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::E;
use crate::dataset::Feature;
use crate::interface::InputError;
use crate::kernels::KernelKind;
use crate::model::Model;

pub fn store(model: &Model, writer: &mut impl Write) -> io::Result<()> {
    write_f64(writer, model.gamma())?;
    write_f64(writer, model.bias())?;
    write_i32(writer, model.maxdim())?;
    write_i32(writer, model.kernel().code())?;
    write_i32(writer, model.sparse() as i32)?;
    write_i32(writer, model.len() as i32)?;
    write_i32(writer, model.features().len() as i32)?;
    for &w in model.weights() {
        write_f64(writer, w)?;
    }
    for &q in model.quadratic_values() {
        write_f64(writer, q)?;
    }
    for f in model.features() {
        write_i32(writer, f.index)?;
        write_f64(writer, f.value)?;
    }
    writer.flush()
}

pub fn load(reader: &mut impl Read) -> Result<Model, InputError> {
    let gamma = read_f64(reader)?;
    let bias = read_f64(reader)?;
    let maxdim = read_i32(reader)?;
    let kernel = KernelKind::from_code(read_i32(reader)?).ok_or(InputError::BadModelFile)?;
    let sparse = read_i32(reader)? != 0;
    let n_vectors = read_i32(reader)?;
    let n_elem = read_i32(reader)?;
    if n_vectors < 0 || n_elem < n_vectors {
        return Err(InputError::BadModelFile);
    }

    let mut weights = Vec::with_capacity(n_vectors as usize);
    for _ in 0..n_vectors {
        weights.push(read_f64(reader)?);
    }
    let mut quadratic_value = Vec::with_capacity(n_vectors as usize);
    for _ in 0..n_vectors {
        quadratic_value.push(read_f64(reader)?);
    }

    let mut features = Vec::with_capacity(n_elem as usize);
    for _ in 0..n_elem {
        let index = read_i32(reader)?;
        let value = read_f64(reader)?;
        features.push(Feature { index, value });
    }
    let sentinels = features.iter().filter(|f| f.index == -1).count();
    if sentinels != n_vectors as usize {
        return Err(InputError::BadModelFile);
    }

    Ok(Model::from_parts(
        kernel,
        gamma,
        sparse,
        maxdim,
        bias,
        weights,
        quadratic_value,
        features,
    ))
}

pub fn store_to_path(model: &Model, path: impl AsRef<Path>) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    store(model, &mut writer)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Model, InputError> {
    let mut reader = BufReader::new(File::open(path)?);
    load(&mut reader)
}

/// Writes one prediction per line in test-set order.
pub fn write_predictions(predictions: &[E], writer: &mut impl Write) -> io::Result<()> {
    for p in predictions {
        writeln!(writer, "{}", p)?;
    }
    writer.flush()
}

fn write_f64(w: &mut impl Write, value: E) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

fn write_i32(w: &mut impl Write, value: i32) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

fn read_f64(r: &mut impl Read) -> io::Result<E> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(E::from_le_bytes(buf))
}

fn read_i32(r: &mut impl Read) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrainProperties;
    use crate::dataset::Dataset;

    fn model() -> Model {
        let dataset = Dataset::labeled(&[
            (1.0, vec![(1, 0.5), (3, -2.0)]),
            (-1.0, vec![(2, 1.0)]),
        ]);
        let props = TrainProperties::default().with_gamma(0.25);
        Model::from_full(&dataset, &props, &[0.75, -1.0, 0.125])
    }

    #[test]
    fn store_then_load_preserves_every_field() {
        let original = model();
        let mut bytes = Vec::new();
        store(&original, &mut bytes).unwrap();
        let reloaded = load(&mut bytes.as_slice()).unwrap();

        assert_eq!(reloaded.gamma(), original.gamma());
        assert_eq!(reloaded.bias(), original.bias());
        assert_eq!(reloaded.maxdim(), original.maxdim());
        assert_eq!(reloaded.kernel(), original.kernel());
        assert_eq!(reloaded.sparse(), original.sparse());
        assert_eq!(reloaded.weights(), original.weights());
        assert_eq!(reloaded.quadratic_values(), original.quadratic_values());
        for s in 0..original.len() {
            assert_eq!(reloaded.support_vector(s), original.support_vector(s));
        }
    }

    #[test]
    fn layout_starts_with_gamma_and_bias() {
        let original = model();
        let mut bytes = Vec::new();
        store(&original, &mut bytes).unwrap();

        assert_eq!(E::from_le_bytes(bytes[0..8].try_into().unwrap()), 0.25);
        assert_eq!(
            E::from_le_bytes(bytes[8..16].try_into().unwrap()),
            original.bias()
        );
        assert_eq!(i32::from_le_bytes(bytes[16..20].try_into().unwrap()), 3);
    }

    #[test]
    fn truncated_files_are_rejected() {
        let original = model();
        let mut bytes = Vec::new();
        store(&original, &mut bytes).unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(load(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn bad_kernel_codes_are_rejected() {
        let original = model();
        let mut bytes = Vec::new();
        store(&original, &mut bytes).unwrap();
        bytes[20..24].copy_from_slice(&7i32.to_le_bytes());
        assert!(matches!(
            load(&mut bytes.as_slice()),
            Err(InputError::BadModelFile)
        ));
    }
}
