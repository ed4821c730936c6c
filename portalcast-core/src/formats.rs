//! Pixel layouts and their mapping to SPA video formats
//!
//! Layout names follow memory byte order, the same convention SPA uses
//! (`Bgrx` stores blue first).

use libspa::param::video::VideoFormat;
use serde::{Deserialize, Serialize};

/// Pixel layout of a presentation texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelLayout {
    #[serde(rename = "BGRx")]
    Bgrx,
    #[serde(rename = "BGRA")]
    Bgra,
    #[serde(rename = "RGBx")]
    Rgbx,
    #[serde(rename = "RGBA")]
    Rgba,
    #[serde(rename = "xRGB")]
    Xrgb,
    #[serde(rename = "ARGB")]
    Argb,
    #[serde(rename = "xBGR")]
    Xbgr,
    #[serde(rename = "ABGR")]
    Abgr,
    #[serde(rename = "RGB")]
    Rgb,
    #[serde(rename = "BGR")]
    Bgr,
}

impl PixelLayout {
    /// Every layout, most capable first
    pub const ALL: [PixelLayout; 10] = [
        Self::Bgra,
        Self::Rgba,
        Self::Argb,
        Self::Abgr,
        Self::Bgrx,
        Self::Rgbx,
        Self::Xrgb,
        Self::Xbgr,
        Self::Rgb,
        Self::Bgr,
    ];

    /// Bytes per pixel
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            Self::Rgb | Self::Bgr => 3,
            _ => 4,
        }
    }

    /// Row stride for a given width, rounded up to 4 bytes
    pub fn stride_for(&self, width: u32) -> u32 {
        (width * self.bytes_per_pixel()).next_multiple_of(4)
    }

    /// Same channel order with the alpha byte swapped for padding (or back)
    fn alpha_sibling(&self) -> Option<Self> {
        match self {
            Self::Bgrx => Some(Self::Bgra),
            Self::Bgra => Some(Self::Bgrx),
            Self::Rgbx => Some(Self::Rgba),
            Self::Rgba => Some(Self::Rgbx),
            Self::Xrgb => Some(Self::Argb),
            Self::Argb => Some(Self::Xrgb),
            Self::Xbgr => Some(Self::Abgr),
            Self::Abgr => Some(Self::Xbgr),
            Self::Rgb | Self::Bgr => None,
        }
    }

    /// Closest layout among `supported`
    ///
    /// An exact match wins; otherwise a layout with the same channel order
    /// where alpha and padding are interchangeable.
    pub fn nearest_in(&self, supported: &[PixelLayout]) -> Option<PixelLayout> {
        if supported.contains(self) {
            return Some(*self);
        }
        self.alpha_sibling().filter(|sibling| supported.contains(sibling))
    }

    /// SPA wire format for this layout
    pub fn video_format(&self) -> VideoFormat {
        match self {
            Self::Bgrx => VideoFormat::BGRx,
            Self::Bgra => VideoFormat::BGRA,
            Self::Rgbx => VideoFormat::RGBx,
            Self::Rgba => VideoFormat::RGBA,
            Self::Xrgb => VideoFormat::xRGB,
            Self::Argb => VideoFormat::ARGB,
            Self::Xbgr => VideoFormat::xBGR,
            Self::Abgr => VideoFormat::ABGR,
            Self::Rgb => VideoFormat::RGB,
            Self::Bgr => VideoFormat::BGR,
        }
    }

    /// Layout for an SPA wire format, if it is a packed RGB format we handle
    pub fn from_video_format(format: VideoFormat) -> Option<Self> {
        Self::ALL.into_iter().find(|layout| layout.video_format() == format)
    }

    /// Display name, SPA spelling
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bgrx => "BGRx",
            Self::Bgra => "BGRA",
            Self::Rgbx => "RGBx",
            Self::Rgba => "RGBA",
            Self::Xrgb => "xRGB",
            Self::Argb => "ARGB",
            Self::Xbgr => "xBGR",
            Self::Abgr => "ABGR",
            Self::Rgb => "RGB",
            Self::Bgr => "BGR",
        }
    }
}

impl std::fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for PixelLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|layout| layout.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown pixel layout: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(PixelLayout::Bgrx.bytes_per_pixel(), 4);
        assert_eq!(PixelLayout::Rgb.bytes_per_pixel(), 3);
    }

    #[test]
    fn test_stride_alignment() {
        assert_eq!(PixelLayout::Bgrx.stride_for(1920), 7680);
        // 3 * 5 = 15 rounds up to 16
        assert_eq!(PixelLayout::Rgb.stride_for(5), 16);
    }

    #[test]
    fn test_video_format_mapping() {
        assert_eq!(
            PixelLayout::from_video_format(VideoFormat::BGRx),
            Some(PixelLayout::Bgrx)
        );
        assert_eq!(PixelLayout::from_video_format(VideoFormat::NV12), None);
        for layout in PixelLayout::ALL {
            assert_eq!(
                PixelLayout::from_video_format(layout.video_format()),
                Some(layout)
            );
        }
    }

    #[test]
    fn test_nearest_prefers_exact() {
        let supported = [PixelLayout::Bgra, PixelLayout::Bgrx];
        assert_eq!(
            PixelLayout::Bgrx.nearest_in(&supported),
            Some(PixelLayout::Bgrx)
        );
    }

    #[test]
    fn test_nearest_swaps_alpha_for_padding() {
        let supported = [PixelLayout::Bgra];
        assert_eq!(
            PixelLayout::Bgrx.nearest_in(&supported),
            Some(PixelLayout::Bgra)
        );
        assert_eq!(PixelLayout::Rgbx.nearest_in(&supported), None);
    }

    #[test]
    fn test_parse_layout() {
        assert_eq!("bgrx".parse::<PixelLayout>(), Ok(PixelLayout::Bgrx));
        assert!("nv12".parse::<PixelLayout>().is_err());
    }
}
