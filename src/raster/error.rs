//! Raster subsystem error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RasterError {
    #[error("invalid TIFF header: {0}")]
    InvalidTiffHeader(String),

    #[error("invalid IFD: {0}")]
    InvalidIfd(String),

    #[error("unsupported compression: {0}")]
    UnsupportedCompression(u16),

    #[error("unsupported sample format: bits={bits}, format={format}")]
    UnsupportedSampleFormat { bits: u16, format: u16 },

    #[error("decompression failed: {0}")]
    DecompressionError(String),

    #[error("the dataset has no usable georeference: {0}")]
    MissingGeoreference(String),

    #[error("window of {pixels} source pixels exceeds the read limit of {limit}")]
    WindowTooLarge { pixels: u64, limit: u64 },

    #[error("could not read heights from raster: {0}")]
    ReadFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
