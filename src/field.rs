//! Field input.

use anyhow::{Context, Result, bail};
use ndarray::Array2;
use rmp_serde::decode;
use std::{fs::File, io::BufReader, path::Path};

/// Load a 2D field from a file.
///
/// The file must be MessagePack-encoded and contain a serialized `Array2<f64>`.
pub fn load_field<P: AsRef<Path>>(file: P) -> Result<Array2<f64>> {
    let file = file.as_ref();
    let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
    let mut reader = BufReader::new(file);

    let field: Array2<f64> =
        decode::from_read(&mut reader).context("failed to deserialize field")?;
    if field.is_empty() {
        bail!("field must not be empty, but has shape {:?}", field.dim());
    }

    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmp_serde::encode;
    use std::{
        env, fs,
        io::{BufWriter, Write},
    };

    fn write_field(name: &str, field: &Array2<f64>) -> std::path::PathBuf {
        let path = env::temp_dir().join(format!("fieldcmp-{}-{name}", std::process::id()));
        let file = File::create(&path).expect("failed to create field file");
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, field).expect("failed to serialize field");
        writer.flush().expect("failed to flush writer stream");
        path
    }

    #[test]
    fn load_written_field() {
        let field = Array2::from_shape_fn((3, 5), |(i, j)| (i * 5 + j) as f64 - 2.0);
        let path = write_field("load.msgpack", &field);

        let loaded = load_field(&path).expect("failed to load field");
        assert_eq!(loaded, field);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn reject_empty_field() {
        let field = Array2::<f64>::zeros((0, 4));
        let path = write_field("empty.msgpack", &field);

        assert!(load_field(&path).is_err());

        fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file() {
        assert!(load_field("/nonexistent/fieldcmp/field.msgpack").is_err());
    }
}
