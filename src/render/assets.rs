use std::fs;
use std::io;
use std::path::Path;

use super::RenderError;

/// The fonts every PDF reader ships, so nothing has to be embedded.
pub const STANDARD_FONTS: [&str; 14] = [
    "Courier",
    "Courier-Bold",
    "Courier-Oblique",
    "Courier-BoldOblique",
    "Helvetica",
    "Helvetica-Bold",
    "Helvetica-Oblique",
    "Helvetica-BoldOblique",
    "Times-Roman",
    "Times-Bold",
    "Times-Italic",
    "Times-BoldItalic",
    "Symbol",
    "ZapfDingbats",
];

pub(crate) fn check_font(name: &str) -> Result<&str, RenderError> {
    STANDARD_FONTS
        .iter()
        .find(|font| **font == name)
        .copied()
        .ok_or_else(|| RenderError::UnknownFont(name.to_owned()))
}

/// A baseline or progressive JPEG, embedded as-is with `DCTDecode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Jpeg {
    pub width: u32,
    pub height: u32,
    pub components: u8,
    pub data: Vec<u8>,
}

impl Jpeg {
    pub fn load(path: &Path) -> Result<Jpeg, RenderError> {
        let data = fs::read(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => RenderError::MissingAsset(path.to_path_buf()),
            _ => RenderError::InvalidAsset {
                path: path.to_path_buf(),
                reason: err.to_string(),
            },
        })?;

        Jpeg::parse(data).map_err(|reason| RenderError::InvalidAsset {
            path: path.to_path_buf(),
            reason: reason.to_owned(),
        })
    }

    /// Reads the frame header to learn the image size and colour components.
    pub fn parse(data: Vec<u8>) -> Result<Jpeg, &'static str> {
        if !data.starts_with(&[0xff, 0xd8]) {
            return Err("not a JPEG file");
        }

        let mut pos = 2;
        while pos + 4 <= data.len() {
            if data[pos] != 0xff {
                return Err("corrupt JPEG marker");
            }
            let marker = data[pos + 1];
            if marker == 0xff {
                pos += 1;
                continue;
            }

            let length = usize::from(u16::from_be_bytes([data[pos + 2], data[pos + 3]]));
            let is_frame = matches!(marker, 0xc0..=0xcf) && !matches!(marker, 0xc4 | 0xc8 | 0xcc);
            if is_frame {
                let header = data.get(pos + 4..pos + 10).ok_or("truncated JPEG frame header")?;
                let height = u32::from(u16::from_be_bytes([header[1], header[2]]));
                let width = u32::from(u16::from_be_bytes([header[3], header[4]]));
                let components = header[5];
                if width == 0 || height == 0 {
                    return Err("JPEG has no dimensions");
                }
                if !matches!(components, 1 | 3 | 4) {
                    return Err("unsupported JPEG colour components");
                }

                return Ok(Jpeg {
                    width,
                    height,
                    components,
                    data,
                });
            }

            pos += 2 + length;
        }

        Err("JPEG frame header not found")
    }

    pub fn color_space(&self) -> &'static str {
        match self.components {
            1 => "DeviceGray",
            4 => "DeviceCMYK",
            _ => "DeviceRGB",
        }
    }
}

#[cfg(test)]
pub(crate) fn tiny_jpeg() -> Vec<u8> {
    vec![
        0xff, 0xd8, // SOI
        0xff, 0xe0, 0x00, 0x04, 0x4a, 0x46, // APP0, truncated payload
        0xff, 0xc0, 0x00, 0x11, 0x08, 0x00, 0x10, 0x00, 0x20, 0x03, // SOF0 16x32, 3 components
        0x01, 0x22, 0x00, 0x02, 0x11, 0x01, 0x03, 0x11, 0x01, // component specs
        0xff, 0xd9, // EOI
    ]
}
