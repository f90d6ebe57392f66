//! Streaming zstd compression of artifact files.

use crate::utils::Result;
use async_compression::tokio::bufread::{ZstdDecoder, ZstdEncoder};
use async_compression::Level;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};

/// Compress `src` into `dest`, returning the compressed size.
pub async fn compress_file(src: &Path, dest: &Path, level: i32) -> Result<u64> {
    let reader = BufReader::new(File::open(src).await?);
    let mut encoder = ZstdEncoder::with_quality(reader, Level::Precise(level));
    let mut writer = BufWriter::new(File::create(dest).await?);

    let written = tokio::io::copy(&mut encoder, &mut writer).await?;
    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    Ok(written)
}

/// Decompress `src` into `dest`, returning the decompressed size.
pub async fn decompress_file(src: &Path, dest: &Path) -> Result<u64> {
    let reader = BufReader::new(File::open(src).await?);
    let mut decoder = ZstdDecoder::new(reader);
    let mut writer = BufWriter::new(File::create(dest).await?);

    let written = tokio::io::copy(&mut decoder, &mut writer).await?;
    writer.flush().await?;
    Ok(written)
}
