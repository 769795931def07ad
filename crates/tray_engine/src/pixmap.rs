//! Decoding of the raw pixmaps StatusNotifierItems send in their `*IconPixmap` properties.
//!
//! The [icon format] says each pixel is an ARGB32 word in network byte order, but enough items
//! send RGBA that we have to guess. The guess samples the image and checks which byte position
//! looks more like an alpha channel.
//!
//! [icon format]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/Icons/

use crate::surface::{pack_argb, Surface};

/// Upper bound on the pixels inspected when guessing the byte order.
const SAMPLE_PIXELS: usize = 1024;

/// One candidate of an `IconPixmap`-style property, as `(width, height, bytes)` on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pixmap {
    pub width: i32,
    pub height: i32,
    pub data: Vec<u8>,
}

impl From<(i32, i32, Vec<u8>)> for Pixmap {
    fn from((width, height, data): (i32, i32, Vec<u8>)) -> Self {
        Pixmap { width, height, data }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// `A R G B`, what the protocol prescribes.
    AlphaFirst,
    /// `R G B A`, sent by some toolkits regardless.
    AlphaLast,
}

impl Pixmap {
    fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Whether the dimensions are positive and the buffer covers them.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() >= self.pixel_count() * 4
    }

    pub fn guess_byte_order(&self) -> ByteOrder {
        let (mut first, mut last) = (0usize, 0usize);
        for px in self.data.chunks_exact(4).take(self.pixel_count().min(SAMPLE_PIXELS)) {
            first += (px[0] != 0) as usize;
            last += (px[3] != 0) as usize;
        }
        if first < last / 4 {
            ByteOrder::AlphaLast
        } else {
            ByteOrder::AlphaFirst
        }
    }

    /// Convert to a premultiplied [`Surface`], or `None` when the pixmap is malformed.
    pub fn to_surface(&self) -> Option<Surface> {
        if !self.is_valid() {
            return None;
        }
        let order = self.guess_byte_order();
        let data = self
            .data
            .chunks_exact(4)
            .take(self.pixel_count())
            .flat_map(|px| match order {
                ByteOrder::AlphaFirst => pack_argb(px[0], px[1], px[2], px[3]),
                ByteOrder::AlphaLast => pack_argb(px[3], px[0], px[1], px[2]),
            })
            .collect();
        Surface::from_premultiplied(self.width, self.height, data)
    }
}

/// Pick the candidate with the largest area, ignoring malformed ones.
pub fn largest(pixmaps: &[Pixmap]) -> Option<&Pixmap> {
    pixmaps
        .iter()
        .filter(|p| p.width > 0 && p.height > 0 && !p.data.is_empty())
        .max_by_key(|p| p.width as i64 * p.height as i64)
}

/// Decode the best candidate of a pixmap property.
pub fn surface_from_pixmaps(pixmaps: &[Pixmap]) -> Option<Surface> {
    largest(pixmaps)?.to_surface()
}
