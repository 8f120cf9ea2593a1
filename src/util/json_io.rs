
use anyhow::Context;
use std::io::{BufWriter, Write};
use std::fs::File;
use std::path::Path;

/// True if the path should be treated as gzip-compressed
fn is_gzip(filename: &Path) -> bool {
    filename.extension().unwrap_or_default() == "gz"
}

/// Helper function that loads a JSON file (optionally gzipped) into some type
/// # Arguments
/// * `filename` - the file path to open and parse
/// # Errors
/// * if the file does not open properly
/// * if the deserialization throws errors
pub fn load_json<T: serde::de::DeserializeOwned>(filename: &Path) -> anyhow::Result<T> {
    let file = File::open(filename)
        .with_context(|| format!("Error while opening {filename:?}:"))?;
    let fp: Box<dyn std::io::Read> = if is_gzip(filename) {
        Box::new(flate2::read::MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let result: T = serde_json::from_reader(fp)
        .with_context(|| format!("Error while deserializing {filename:?}:"))?;
    Ok(result)
}

/// Saves a serializable struct to pretty JSON, gzipped if the filename ends in `.gz`.
/// Missing parent folders are created.
/// # Arguments
/// * `data` - the data in memory
/// * `out_filename` - path to write to
/// # Errors
/// * if the parent folder cannot be created
/// * if opening or writing to the file throw errors
/// * if JSON serialization throws errors
pub fn save_json<T: serde::Serialize>(data: &T, out_filename: &Path) -> anyhow::Result<()> {
    if let Some(parent) = out_filename.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Error while creating folder {parent:?}:"))?;
        }
    }
    let file = File::create(out_filename)
        .with_context(|| format!("Error while creating {out_filename:?}:"))?;
    let file: Box<dyn std::io::Write> = if is_gzip(out_filename) {
        Box::new(flate2::write::GzEncoder::new(file, flate2::Compression::best()))
    } else {
        Box::new(file)
    };
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, data)
        .with_context(|| format!("Error while serializing {out_filename:?}:"))?;
    writer.flush()
        .with_context(|| format!("Error while flushing output to {out_filename:?}:"))?;
    Ok(())
}
