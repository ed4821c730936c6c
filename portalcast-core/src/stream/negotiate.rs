//! Format negotiation with the producer
//!
//! We offer every layout the surface can hold over a range of sizes. When
//! the producer settles on a format we build a matching texture and declare
//! the buffers we want for it. Renegotiation either re-offers the format at
//! a new size or re-declares the same buffers.

use libspa::param::format::{MediaSubtype, MediaType};
use libspa::param::video::VideoFormat;
use libspa::param::ParamType;
use tracing::{debug, info, trace};

use crate::config::{CaptureConfig, RenegotiationMode};
use crate::error::{CaptureError, Result};
use crate::formats::PixelLayout;
use crate::surface::PresentationSurface;
use crate::types::{BufferParams, NegotiatedFormat};

/// Largest size we accept in either dimension
pub const MAX_DIMENSION: u32 = 8192;

/// Highest framerate we offer
pub const MAX_FRAMERATE: u32 = 360;

/// Format parameters advertised to the producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOffer {
    /// Layouts, one `EnumFormat` each, most preferred first
    pub layouts: Vec<PixelLayout>,
    /// Preferred size; the producer may pick anything up to [`MAX_DIMENSION`]
    pub size: (u32, u32),
    /// Preferred framerate; anything from 0 to [`MAX_FRAMERATE`] is accepted
    pub framerate: u32,
}

/// A `Format` param as chosen by the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireFormat {
    pub media_type: MediaType,
    pub media_subtype: MediaSubtype,
    pub format: VideoFormat,
    pub width: u32,
    pub height: u32,
    pub framerate: (u32, u32),
}

impl WireFormat {
    /// Raw video format
    pub fn raw_video(format: VideoFormat, width: u32, height: u32) -> Self {
        Self {
            media_type: MediaType::Video,
            media_subtype: MediaSubtype::Raw,
            format,
            width,
            height,
            framerate: (0, 1),
        }
    }

    /// Any other media type; carries no video fields
    pub fn other(media_type: MediaType, media_subtype: MediaSubtype) -> Self {
        Self {
            media_type,
            media_subtype,
            format: VideoFormat::Unknown,
            width: 0,
            height: 0,
            framerate: (0, 1),
        }
    }

    /// Set the framerate
    pub fn with_framerate(mut self, num: u32, denom: u32) -> Self {
        self.framerate = (num, denom);
        self
    }

    fn is_raw_video(&self) -> bool {
        self.media_type == MediaType::Video && self.media_subtype == MediaSubtype::Raw
    }
}

/// What a renegotiation tick re-declares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Renegotiation {
    /// New format offer
    Format(FormatOffer),
    /// Same buffer requirements again
    Buffers(BufferParams),
}

/// Alternates between two sizes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeSchedule {
    sizes: [(u32, u32); 2],
    next: usize,
}

impl ResizeSchedule {
    /// Start with whichever size differs from `initial`
    pub fn new(sizes: [(u32, u32); 2], initial: (u32, u32)) -> Self {
        let next = if sizes[0] == initial { 1 } else { 0 };
        Self { sizes, next }
    }

    /// Size for the next tick
    pub fn advance(&mut self) -> (u32, u32) {
        let size = self.sizes[self.next];
        self.next ^= 1;
        size
    }
}

/// Negotiation state for one stream
#[derive(Debug, Clone)]
pub struct FormatNegotiator {
    layouts: Vec<PixelLayout>,
    surface_layouts: Vec<PixelLayout>,
    size: (u32, u32),
    framerate: u32,
    min_buffers: u32,
    max_buffers: u32,
    current: Option<NegotiatedFormat>,
    schedule: ResizeSchedule,
}

impl FormatNegotiator {
    /// Build the negotiator for a surface
    ///
    /// Configured layouts the surface cannot hold are dropped. If none are
    /// left, everything the surface supports is offered.
    pub fn new(config: &CaptureConfig, surface_layouts: Vec<PixelLayout>) -> Result<Self> {
        if surface_layouts.is_empty() {
            return Err(CaptureError::format("Surface supports no pixel layouts"));
        }

        let mut layouts: Vec<PixelLayout> = config
            .layouts
            .iter()
            .copied()
            .filter(|layout| surface_layouts.contains(layout))
            .collect();
        if layouts.is_empty() {
            debug!("No configured layout fits the surface, offering all it supports");
            layouts = surface_layouts.clone();
        }

        let size = config.preset.resolution();
        let presets = config.renegotiation.presets;
        Ok(Self {
            layouts,
            surface_layouts,
            size,
            framerate: config.preset.fps(),
            min_buffers: config.min_buffers,
            max_buffers: config.max_buffers,
            current: None,
            schedule: ResizeSchedule::new(
                [presets[0].resolution(), presets[1].resolution()],
                size,
            ),
        })
    }

    /// Initial offer
    pub fn offer(&self) -> FormatOffer {
        FormatOffer {
            layouts: self.layouts.clone(),
            size: self.size,
            framerate: self.framerate,
        }
    }

    /// Negotiated format, if any
    pub fn current(&self) -> Option<NegotiatedFormat> {
        self.current
    }

    /// Handle a `param_changed` notification
    ///
    /// Returns the buffers to declare when a new format was accepted.
    /// Non-format params and non-raw-video formats are ignored; an empty
    /// format param clears the current format.
    pub fn on_param_changed<S>(
        &mut self,
        id: u32,
        format: Option<&WireFormat>,
        surface: &mut S,
    ) -> Result<Option<BufferParams>>
    where
        S: PresentationSurface + ?Sized,
    {
        if id != ParamType::Format.as_raw() {
            trace!("Ignoring param {}", id);
            return Ok(None);
        }
        let Some(format) = format else {
            debug!("Format cleared");
            self.current = None;
            return Ok(None);
        };
        if !format.is_raw_video() {
            debug!(
                "Ignoring non raw-video format {:?}/{:?}",
                format.media_type, format.media_subtype
            );
            return Ok(None);
        }

        let layout = PixelLayout::from_video_format(format.format)
            .and_then(|layout| layout.nearest_in(&self.surface_layouts))
            .ok_or_else(|| {
                CaptureError::format(format!(
                    "Producer chose {:?}, which the surface cannot present",
                    format.format
                ))
            })?;
        if format.width == 0
            || format.height == 0
            || format.width > MAX_DIMENSION
            || format.height > MAX_DIMENSION
        {
            return Err(CaptureError::format(format!(
                "Producer chose an unusable size {}x{}",
                format.width, format.height
            )));
        }

        surface.create_texture(layout, format.width, format.height)?;

        let (num, denom) = format.framerate;
        let negotiated = NegotiatedFormat::new(layout, format.width, format.height)
            .with_framerate(num, denom);
        info!("Video format negotiated: {}", negotiated);
        self.current = Some(negotiated);

        Ok(Some(BufferParams::with_bounds(
            &negotiated,
            self.min_buffers,
            self.max_buffers,
        )))
    }

    /// Produce the params for one renegotiation tick
    ///
    /// Format renegotiation advances the resize schedule on every call.
    pub fn renegotiate(&mut self, mode: RenegotiationMode) -> Option<Renegotiation> {
        match mode {
            RenegotiationMode::Off => None,
            RenegotiationMode::Format => {
                let size = self.schedule.advance();
                let layouts = match self.current {
                    Some(format) => vec![format.layout],
                    None => self.layouts.clone(),
                };
                debug!("Renegotiating format at {}x{}", size.0, size.1);
                Some(Renegotiation::Format(FormatOffer {
                    layouts,
                    size,
                    framerate: self.framerate,
                }))
            }
            RenegotiationMode::Buffers => {
                let format = self.current?;
                debug!("Renegotiating buffers for {}", format);
                Some(Renegotiation::Buffers(BufferParams::with_bounds(
                    &format,
                    self.min_buffers,
                    self.max_buffers,
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Preset;
    use crate::surface::MemorySurface;

    fn format_id() -> u32 {
        ParamType::Format.as_raw()
    }

    #[test]
    fn test_offer_keeps_config_order_and_surface_support() {
        let config = CaptureConfig::default();
        let negotiator =
            FormatNegotiator::new(&config, vec![PixelLayout::Rgba, PixelLayout::Bgrx]).unwrap();
        let offer = negotiator.offer();
        assert_eq!(offer.layouts, vec![PixelLayout::Bgrx, PixelLayout::Rgba]);
        assert_eq!(offer.size, (1920, 1080));
        assert_eq!(offer.framerate, 60);
    }

    #[test]
    fn test_offer_falls_back_to_surface_layouts() {
        let config = CaptureConfig::default();
        let negotiator = FormatNegotiator::new(&config, vec![PixelLayout::Rgb]).unwrap();
        assert_eq!(negotiator.offer().layouts, vec![PixelLayout::Rgb]);
    }

    #[test]
    fn test_empty_surface_is_rejected() {
        assert!(FormatNegotiator::new(&CaptureConfig::default(), vec![]).is_err());
    }

    #[test]
    fn test_alpha_sibling_is_accepted() {
        let mut surface = MemorySurface::with_layouts(vec![PixelLayout::Bgra]);
        let mut negotiator =
            FormatNegotiator::new(&CaptureConfig::default(), surface.supported_layouts()).unwrap();

        let wire = WireFormat::raw_video(VideoFormat::BGRx, 640, 480);
        let params = negotiator
            .on_param_changed(format_id(), Some(&wire), &mut surface)
            .unwrap()
            .unwrap();
        assert_eq!(negotiator.current().unwrap().layout, PixelLayout::Bgra);
        assert_eq!(params.stride, 2560);
    }

    #[test]
    fn test_schedule_alternates() {
        let mut schedule = ResizeSchedule::new([(1920, 1080), (1280, 720)], (1920, 1080));
        assert_eq!(schedule.advance(), (1280, 720));
        assert_eq!(schedule.advance(), (1920, 1080));
        assert_eq!(schedule.advance(), (1280, 720));
    }

    #[test]
    fn test_schedule_starts_at_first_when_initial_differs() {
        let mut schedule = ResizeSchedule::new([(1920, 1080), (1280, 720)], (2560, 1440));
        assert_eq!(schedule.advance(), (1920, 1080));
    }

    #[test]
    fn test_format_renegotiation_uses_current_layout() {
        let mut surface = MemorySurface::new();
        let config = CaptureConfig::default().with_preset(Preset::P1080_60);
        let mut negotiator = FormatNegotiator::new(&config, surface.supported_layouts()).unwrap();
        let wire = WireFormat::raw_video(VideoFormat::RGBA, 1920, 1080);
        negotiator
            .on_param_changed(format_id(), Some(&wire), &mut surface)
            .unwrap();

        match negotiator.renegotiate(RenegotiationMode::Format) {
            Some(Renegotiation::Format(offer)) => {
                assert_eq!(offer.layouts, vec![PixelLayout::Rgba]);
                assert_eq!(offer.size, (1280, 720));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_buffer_renegotiation_needs_a_format() {
        let config = CaptureConfig::default();
        let mut negotiator = FormatNegotiator::new(&config, PixelLayout::ALL.to_vec()).unwrap();
        assert!(negotiator.renegotiate(RenegotiationMode::Buffers).is_none());
        assert!(negotiator.renegotiate(RenegotiationMode::Off).is_none());
    }
}
