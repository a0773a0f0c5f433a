//! Reader for the MNIST IDX files.
//!
//! Images are stored as `idx3-ubyte` (magic `0x803`, count, rows, cols, then
//! one byte per pixel) and labels as `idx1-ubyte` (magic `0x801`, count, then
//! one byte per label), every header field a big-endian `u32`.

use std::{
    fs::File,
    io::{self, BufReader, Read},
    num::NonZeroUsize,
    path::Path,
};

use log::info;
use ndarray::Array2;
use orchestra::{DataErr, InMemorySource};

/// The digits 0 to 9.
pub const NUM_CLASSES: usize = 10;

const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;

/// Which half of the dataset to read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    /// The `(images, labels)` file names of this split.
    pub fn files(self) -> (&'static str, &'static str) {
        match self {
            Split::Train => ("train-images-idx3-ubyte", "train-labels-idx1-ubyte"),
            Split::Test => ("t10k-images-idx3-ubyte", "t10k-labels-idx1-ubyte"),
        }
    }
}

fn corrupted(detail: impl Into<String>) -> DataErr {
    DataErr::Corrupted(detail.into())
}

/// Fills `buf`, treating a short read as corruption rather than an I/O failure.
fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<(), DataErr> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => corrupted(format!("truncated {what}")),
        _ => DataErr::Io(e),
    })
}

fn read_u32<R: Read>(reader: &mut R, what: &str) -> Result<u32, DataErr> {
    let mut buf = [0; 4];
    read_exact(reader, &mut buf, what)?;
    Ok(u32::from_be_bytes(buf))
}

fn expect_magic<R: Read>(reader: &mut R, magic: u32) -> Result<(), DataErr> {
    let got = read_u32(reader, "header")?;
    if got != magic {
        return Err(corrupted(format!(
            "bad magic number {got:#x}, expected {magic:#x}"
        )));
    }

    Ok(())
}

fn expect_end<R: Read>(reader: &mut R) -> Result<(), DataErr> {
    let mut extra = [0; 1];
    match reader.read(&mut extra)? {
        0 => Ok(()),
        _ => Err(corrupted("trailing bytes after the last record")),
    }
}

/// Reads an `idx3-ubyte` image file.
///
/// # Returns
/// One image per row, pixels scaled to `[0, 1]`.
pub fn read_images<R: Read>(mut reader: R) -> Result<Array2<f32>, DataErr> {
    expect_magic(&mut reader, IMAGES_MAGIC)?;
    let count = read_u32(&mut reader, "header")? as usize;
    let rows = read_u32(&mut reader, "header")? as usize;
    let cols = read_u32(&mut reader, "header")? as usize;

    let pixels = rows
        .checked_mul(cols)
        .filter(|&p| p > 0)
        .ok_or_else(|| corrupted(format!("invalid image size {rows}x{cols}")))?;
    let len = count
        .checked_mul(pixels)
        .ok_or_else(|| corrupted(format!("{count} images of {pixels} pixels overflow")))?;

    let mut raw = vec![0; len];
    read_exact(&mut reader, &mut raw, "image data")?;
    expect_end(&mut reader)?;

    let scaled = raw.into_iter().map(|p| p as f32 / 255.).collect();
    Array2::from_shape_vec((count, pixels), scaled).map_err(|e| corrupted(e.to_string()))
}

/// Reads an `idx1-ubyte` label file.
///
/// # Returns
/// One one-hot row of `NUM_CLASSES` columns per label.
pub fn read_labels<R: Read>(mut reader: R) -> Result<Array2<f32>, DataErr> {
    expect_magic(&mut reader, LABELS_MAGIC)?;
    let count = read_u32(&mut reader, "header")? as usize;

    let mut raw = vec![0; count];
    read_exact(&mut reader, &mut raw, "label data")?;
    expect_end(&mut reader)?;

    let mut one_hot = Array2::zeros((count, NUM_CLASSES));
    for (i, &label) in raw.iter().enumerate() {
        let class = label as usize;
        if class >= NUM_CLASSES {
            return Err(corrupted(format!("label {label} at record {i}")));
        }
        one_hot[[i, class]] = 1.;
    }

    Ok(one_hot)
}

/// Loads one split from `dir`.
///
/// # Returns
/// The `(features, labels)` matrices, or `DataErr` if a file is missing or
/// malformed or the two files disagree on the sample count.
pub fn load(dir: &Path, split: Split) -> Result<(Array2<f32>, Array2<f32>), DataErr> {
    let (images_file, labels_file) = split.files();

    let images = read_images(BufReader::new(File::open(dir.join(images_file))?))?;
    let labels = read_labels(BufReader::new(File::open(dir.join(labels_file))?))?;

    if images.nrows() != labels.nrows() {
        return Err(corrupted(format!(
            "{} images but {} labels",
            images.nrows(),
            labels.nrows()
        )));
    }

    info!(samples = images.nrows(), pixels = images.ncols(); "loaded mnist {split:?} split");
    Ok((images, labels))
}

/// Loads one split as a `DataSource`.
///
/// # Arguments
/// * `dir` - The directory holding the four IDX files.
/// * `split` - Train or test.
/// * `batch_size` - Samples per batch.
/// * `seed` - Reshuffles every epoch with this seed when given.
pub fn source(
    dir: &Path,
    split: Split,
    batch_size: NonZeroUsize,
    seed: Option<u64>,
) -> Result<InMemorySource, DataErr> {
    let (images, labels) = load(dir, split)?;
    let source = InMemorySource::new(images, labels, batch_size)?;

    Ok(match seed {
        Some(seed) => source.shuffled(seed),
        None => source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images(count: u32, rows: u32, cols: u32, pixels: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for field in [IMAGES_MAGIC, count, rows, cols] {
            bytes.extend_from_slice(&field.to_be_bytes());
        }
        bytes.extend_from_slice(pixels);
        bytes
    }

    fn labels(values: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&LABELS_MAGIC.to_be_bytes());
        bytes.extend_from_slice(&(values.len() as u32).to_be_bytes());
        bytes.extend_from_slice(values);
        bytes
    }

    #[test]
    fn images_are_scaled_per_row() {
        let bytes = images(2, 1, 2, &[0, 255, 51, 102]);
        let x = read_images(bytes.as_slice()).unwrap();

        assert_eq!(x.dim(), (2, 2));
        assert_eq!(x.row(0).to_vec(), vec![0., 1.]);
        assert!((x[[1, 0]] - 0.2).abs() < 1e-6);
        assert!((x[[1, 1]] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn labels_are_one_hot() {
        let y = read_labels(labels(&[3, 0, 9]).as_slice()).unwrap();

        assert_eq!(y.dim(), (3, NUM_CLASSES));
        assert_eq!(y.sum(), 3.);
        assert_eq!(y[[0, 3]], 1.);
        assert_eq!(y[[1, 0]], 1.);
        assert_eq!(y[[2, 9]], 1.);
    }

    #[test]
    fn wrong_magic_is_corruption() {
        let mut bytes = images(1, 1, 1, &[0]);
        bytes[3] = 0x01;

        assert!(matches!(
            read_images(bytes.as_slice()),
            Err(DataErr::Corrupted(_))
        ));
        assert!(matches!(
            read_labels(images(1, 1, 1, &[0]).as_slice()),
            Err(DataErr::Corrupted(_))
        ));
    }

    #[test]
    fn truncated_and_padded_files_are_corruption() {
        let short = images(2, 2, 2, &[1; 7]);
        let long = images(1, 2, 2, &[1; 5]);
        let no_header = &IMAGES_MAGIC.to_be_bytes()[..];

        for bytes in [short.as_slice(), long.as_slice(), no_header] {
            assert!(matches!(read_images(bytes), Err(DataErr::Corrupted(_))));
        }
    }

    #[test]
    fn out_of_range_labels_are_corruption() {
        assert!(matches!(
            read_labels(labels(&[1, 10]).as_slice()),
            Err(DataErr::Corrupted(msg)) if msg.contains("record 1")
        ));
    }

    #[test]
    fn mismatched_files_are_rejected_on_load() {
        let dir = std::env::temp_dir().join(format!("mnist-mismatch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let (images_file, labels_file) = Split::Test.files();
        std::fs::write(dir.join(images_file), images(2, 1, 1, &[0, 1])).unwrap();
        std::fs::write(dir.join(labels_file), labels(&[4])).unwrap();

        let result = load(&dir, Split::Test);
        std::fs::remove_dir_all(&dir).unwrap();

        assert!(matches!(result, Err(DataErr::Corrupted(_))));
    }

    #[test]
    fn a_missing_directory_is_an_io_error() {
        let dir = Path::new("/nonexistent/mnist");
        assert!(matches!(load(dir, Split::Train), Err(DataErr::Io(_))));
    }
}
