//! Minimal PNG writer for RGBA buffers.
//!
//! Emits 8-bit truecolor-with-alpha images, one zlib stream, no ancillary
//! chunks. This is all the format the encoded rasters need and it avoids
//! pulling in a full image stack.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use raster_common::{RasterError, RasterResult};

const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// Build a complete PNG file from an RGBA pixel buffer.
pub fn create_png(pixels: &[u8], width: u32, height: u32) -> RasterResult<Vec<u8>> {
    let expected = width as usize * height as usize * 4;
    if pixels.len() != expected {
        return Err(RasterError::InternalError(format!(
            "RGBA buffer is {} bytes, expected {} for {}x{}",
            pixels.len(),
            expected,
            width,
            height
        )));
    }

    let mut png = Vec::new();
    png.extend_from_slice(&PNG_SIGNATURE);

    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&width.to_be_bytes());
    ihdr.extend_from_slice(&height.to_be_bytes());
    ihdr.push(8); // bit depth
    ihdr.push(6); // color type: RGBA
    ihdr.push(0); // compression
    ihdr.push(0); // filter
    ihdr.push(0); // interlace
    write_chunk(&mut png, b"IHDR", &ihdr);

    let idat = deflate_idat_rgba(pixels, width, height)?;
    write_chunk(&mut png, b"IDAT", &idat);
    write_chunk(&mut png, b"IEND", &[]);

    Ok(png)
}

fn write_chunk(png: &mut Vec<u8>, chunk_type: &[u8; 4], data: &[u8]) {
    png.extend_from_slice(&(data.len() as u32).to_be_bytes());
    png.extend_from_slice(chunk_type);
    png.extend_from_slice(data);
    let crc = crc32fast::hash(&[chunk_type.as_slice(), data].concat());
    png.extend_from_slice(&crc.to_be_bytes());
}

/// Compress scanlines with a leading filter byte of 0 (None) per row.
fn deflate_idat_rgba(pixels: &[u8], width: u32, height: u32) -> RasterResult<Vec<u8>> {
    let stride = width as usize * 4;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
    for row in 0..height as usize {
        encoder
            .write_all(&[0])
            .map_err(|e| RasterError::InternalError(format!("PNG compression failed: {e}")))?;
        encoder
            .write_all(&pixels[row * stride..(row + 1) * stride])
            .map_err(|e| RasterError::InternalError(format!("PNG compression failed: {e}")))?;
    }
    encoder
        .finish()
        .map_err(|e| RasterError::InternalError(format!("PNG compression failed: {e}")))
}
