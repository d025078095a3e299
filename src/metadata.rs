use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// The 8-byte signature every PNG stream starts with.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Meters per inch, used to convert a DPI value into the pixels-per-meter unit of `pHYs`.
const METERS_PER_INCH: f64 = 0.0254;

/// The raster formats whose print resolution can be patched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterFormat {
    Png,
    Jpeg,
}

impl RasterFormat {
    /// The MIME type used in data URLs for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            RasterFormat::Png => "image/png",
            RasterFormat::Jpeg => "image/jpeg",
        }
    }

    fn from_mime_type(mime_type: &str) -> Option<Self> {
        match mime_type {
            "image/png" => Some(RasterFormat::Png),
            "image/jpeg" | "image/jpg" => Some(RasterFormat::Jpeg),
            _ => None,
        }
    }
}

/// Standard CRC-32 (polynomial 0xEDB88320) lookup table, computed at compile time.
const CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut index = 0;
    while index < 256 {
        let mut value = index as u32;
        let mut bit = 0;
        while bit < 8 {
            value = if value & 1 == 1 {
                0xEDB8_8320 ^ (value >> 1)
            } else {
                value >> 1
            };
            bit += 1;
        }
        table[index] = value;
        index += 1;
    }
    table
}

/// Computes the CRC-32 of the given bytes, as stored at the end of every PNG chunk.
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for byte in bytes {
        crc = CRC_TABLE[((crc ^ *byte as u32) & 0xFF) as usize] ^ (crc >> 8);
    }
    crc ^ 0xFFFF_FFFF
}

/// A single PNG chunk: a four-letter type tag and its data. When written it is
/// framed as `length (4, BE) | type (4) | data | crc (4, BE)`, where the CRC covers
/// the type and the data but not the length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PngChunk {
    pub chunk_type: [u8; 4],
    pub data: Vec<u8>,
}

impl PngChunk {
    /// Builds a `pHYs` chunk declaring the same resolution on both axes, in pixels per meter.
    pub fn physical_dimensions(dpi: u32) -> Self {
        let pixels_per_meter = dpi_to_pixels_per_meter(dpi);
        let mut data = Vec::with_capacity(9);
        data.extend_from_slice(&pixels_per_meter.to_be_bytes());
        data.extend_from_slice(&pixels_per_meter.to_be_bytes());
        // Unit specifier: 1 means the values above are per meter
        data.push(1);

        PngChunk {
            chunk_type: *b"pHYs",
            data,
        }
    }

    /// The number of bytes the chunk takes once framed.
    pub fn framed_len(&self) -> usize {
        self.data.len() + 12
    }

    /// The CRC of the chunk, computed over its type and data.
    pub fn crc(&self) -> u32 {
        let mut covered = Vec::with_capacity(4 + self.data.len());
        covered.extend_from_slice(&self.chunk_type);
        covered.extend_from_slice(&self.data);
        crc32(&covered)
    }

    /// Appends the framed chunk to the given buffer.
    pub fn write_to(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        buffer.extend_from_slice(&self.chunk_type);
        buffer.extend_from_slice(&self.data);
        buffer.extend_from_slice(&self.crc().to_be_bytes());
    }
}

/// Converts dots per inch into the rounded pixels per meter stored in `pHYs`.
pub fn dpi_to_pixels_per_meter(dpi: u32) -> u32 {
    (dpi as f64 / METERS_PER_INCH).round() as u32
}

/// Sets the print resolution of an encoded raster without touching its pixel data.
///
/// For PNG a `pHYs` chunk is inserted right after `IHDR` (replacing any existing one),
/// for JPEG the density fields of an existing JFIF `APP0` segment are overwritten.
/// Whenever the bytes don't look like the declared format the input is returned
/// unchanged: a skipped patch is never an error.
pub fn set_raster_dpi(encoded_bytes: &[u8], dpi: u32, format: RasterFormat) -> Vec<u8> {
    let patched = match format {
        RasterFormat::Png => patch_png_dpi(encoded_bytes, dpi),
        RasterFormat::Jpeg => patch_jpeg_dpi(encoded_bytes, dpi),
    };

    match patched {
        Some(bytes) => bytes,
        None => {
            log::debug!(
                "Skipped the DPI patch of {} bytes declared as {:?}",
                encoded_bytes.len(),
                format
            );
            encoded_bytes.to_vec()
        }
    }
}

/// Same as `set_raster_dpi` but operating on a base64 data URL such as the ones produced
/// by a canvas export. The format is taken from the MIME type of the URL and written back
/// in its canonical form; URLs that are not base64 encoded images are returned unchanged.
pub fn set_data_url_dpi(data_url: &str, dpi: u32) -> String {
    let Some((mime_type, payload)) = split_data_url(data_url) else {
        log::debug!("Skipped the DPI patch of a value which is not a base64 data URL");
        return data_url.to_string();
    };
    let Some(format) = RasterFormat::from_mime_type(mime_type) else {
        log::debug!("Skipped the DPI patch of a data URL of type {:?}", mime_type);
        return data_url.to_string();
    };
    let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(payload) else {
        log::debug!("Skipped the DPI patch of a data URL with an invalid base64 payload");
        return data_url.to_string();
    };

    let patched = set_raster_dpi(&bytes, dpi, format);
    format!(
        "data:{};base64,{}",
        format.mime_type(),
        base64::engine::general_purpose::STANDARD.encode(patched)
    )
}

/// Splits `data:<mime>;base64,<payload>` into its MIME type and payload.
pub(crate) fn split_data_url(data_url: &str) -> Option<(&str, &str)> {
    let rest = data_url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime_type = header.strip_suffix(";base64")?;
    Some((mime_type, payload.trim()))
}

fn patch_png_dpi(bytes: &[u8], dpi: u32) -> Option<Vec<u8>> {
    if bytes.len() < PNG_SIGNATURE.len() || bytes[..8] != PNG_SIGNATURE {
        return None;
    }

    let physical_dimensions = PngChunk::physical_dimensions(dpi);
    let mut output = Vec::with_capacity(bytes.len() + physical_dimensions.framed_len());
    output.extend_from_slice(&PNG_SIGNATURE);

    // The stream must start with a well-formed IHDR, the pHYs chunk goes right after it
    let (header_type, header_end) = chunk_bounds(bytes, PNG_SIGNATURE.len())?;
    if &header_type != b"IHDR" {
        return None;
    }
    output.extend_from_slice(&bytes[PNG_SIGNATURE.len()..header_end]);
    physical_dimensions.write_to(&mut output);

    // Previous pHYs chunks are dropped while the chunks can be framed. Whatever follows
    // IEND, or can't be framed, is copied as is.
    let mut offset = header_end;
    while offset < bytes.len() {
        let Some((chunk_type, chunk_end)) = chunk_bounds(bytes, offset) else {
            break;
        };
        if &chunk_type != b"pHYs" {
            output.extend_from_slice(&bytes[offset..chunk_end]);
        }
        offset = chunk_end;
        if &chunk_type == b"IEND" {
            break;
        }
    }
    output.extend_from_slice(&bytes[offset..]);

    Some(output)
}

/// Reads the chunk header at `offset` and returns its type and the offset right past its CRC.
fn chunk_bounds(bytes: &[u8], offset: usize) -> Option<([u8; 4], usize)> {
    let header = bytes.get(offset..offset + 8)?;
    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let chunk_type = [header[4], header[5], header[6], header[7]];
    let chunk_end = offset.checked_add(length)?.checked_add(12)?;
    if chunk_end > bytes.len() {
        return None;
    }

    Some((chunk_type, chunk_end))
}

fn patch_jpeg_dpi(bytes: &[u8], dpi: u32) -> Option<Vec<u8>> {
    // SOI (FF D8) followed immediately by an APP0 segment (FF E0) carrying the JFIF identifier
    if bytes.len() < 18 || bytes[0..2] != [0xFF, 0xD8] || bytes[2..4] != [0xFF, 0xE0] {
        return None;
    }
    if &bytes[6..11] != b"JFIF\0" {
        return None;
    }
    let density = u16::try_from(dpi).ok()?.to_be_bytes();

    let mut output = bytes.to_vec();
    // Density unit: 1 means dots per inch
    output[13] = 1;
    output[14..16].copy_from_slice(&density);
    output[16..18].copy_from_slice(&density);

    Some(output)
}
