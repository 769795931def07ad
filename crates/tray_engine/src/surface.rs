use std::rc::Rc;

/// A rendered icon.
///
/// Pixels are stored as premultiplied 32-bit ARGB words in native byte order, with no row
/// padding. This is the memory layout of cairo's `ARGB32` format, so a host can wrap
/// [`Surface::data`] without copying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface {
    width: i32,
    height: i32,
    data: Vec<u8>,
}

/// Shared handle to a cached surface. Cloning it keeps the pixels alive past eviction.
pub type SurfaceRef = Rc<Surface>;

impl Surface {
    /// Wrap pixels that are already premultiplied native-endian ARGB32.
    pub fn from_premultiplied(width: i32, height: i32, data: Vec<u8>) -> Option<Self> {
        if width <= 0 || height <= 0 || data.len() != width as usize * height as usize * 4 {
            return None;
        }
        Some(Surface { width, height, data })
    }

    /// Convert straight-alpha RGBA bytes, as produced by image decoders.
    pub fn from_rgba(width: i32, height: i32, rgba: &[u8]) -> Option<Self> {
        if width <= 0 || height <= 0 || rgba.len() < width as usize * height as usize * 4 {
            return None;
        }
        let data = rgba
            .chunks_exact(4)
            .take(width as usize * height as usize)
            .flat_map(|px| pack_argb(px[3], px[0], px[1], px[2]))
            .collect();
        Some(Surface { width, height, data })
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn stride(&self) -> i32 {
        self.width * 4
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The premultiplied ARGB word at `(x, y)`.
    pub fn pixel(&self, x: i32, y: i32) -> Option<u32> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y * self.stride() + x * 4) as usize;
        let bytes: [u8; 4] = self.data[offset..offset + 4].try_into().ok()?;
        Some(u32::from_ne_bytes(bytes))
    }
}

/// Scale a straight color channel by alpha, rounding to nearest.
pub(crate) fn premultiply(channel: u8, alpha: u8) -> u8 {
    if alpha == 255 {
        channel
    } else {
        ((channel as u32 * alpha as u32 + 127) / 255) as u8
    }
}

/// Premultiply one straight-alpha pixel and pack it the way [`Surface`] stores it.
pub(crate) fn pack_argb(a: u8, r: u8, g: u8, b: u8) -> [u8; 4] {
    let word = (a as u32) << 24
        | (premultiply(r, a) as u32) << 16
        | (premultiply(g, a) as u32) << 8
        | premultiply(b, a) as u32;
    word.to_ne_bytes()
}
