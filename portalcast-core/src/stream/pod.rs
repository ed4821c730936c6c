//! SPA pod building and parsing for stream params

use libspa::param::format::{FormatProperties, MediaSubtype, MediaType};
use libspa::param::format_utils;
use libspa::param::video::VideoInfoRaw;
use libspa::param::ParamType;
use libspa::pod::serialize::PodSerializer;
use libspa::pod::{self, ChoiceValue, Object, Pod, Property, PropertyFlags, Value};
use libspa::utils::{Choice, ChoiceEnum, ChoiceFlags, Fraction, Rectangle, SpaTypes};

use super::negotiate::{FormatOffer, WireFormat, MAX_DIMENSION, MAX_FRAMERATE};
use crate::error::{CaptureError, Result};
use crate::formats::PixelLayout;
use crate::types::BufferParams;

/// One `EnumFormat` object per offered layout
pub fn enum_formats(offer: &FormatOffer) -> Vec<Object> {
    offer
        .layouts
        .iter()
        .map(|layout| enum_format(*layout, offer.size, offer.framerate))
        .collect()
}

fn enum_format(layout: PixelLayout, size: (u32, u32), framerate: u32) -> Object {
    let (width, height) = size;
    pod::object!(
        SpaTypes::ObjectParamFormat,
        ParamType::EnumFormat,
        pod::property!(FormatProperties::MediaType, Id, MediaType::Video),
        pod::property!(FormatProperties::MediaSubtype, Id, MediaSubtype::Raw),
        pod::property!(FormatProperties::VideoFormat, Id, layout.video_format()),
        pod::property!(
            FormatProperties::VideoSize,
            Choice,
            Range,
            Rectangle,
            Rectangle { width, height },
            Rectangle {
                width: 1,
                height: 1
            },
            Rectangle {
                width: MAX_DIMENSION,
                height: MAX_DIMENSION
            }
        ),
        pod::property!(
            FormatProperties::VideoFramerate,
            Choice,
            Range,
            Fraction,
            Fraction {
                num: framerate,
                denom: 1
            },
            Fraction { num: 0, denom: 1 },
            Fraction {
                num: MAX_FRAMERATE,
                denom: 1
            }
        ),
    )
}

/// `Buffers` param object
pub fn buffers(params: &BufferParams) -> Object {
    let count = Choice(
        ChoiceFlags::empty(),
        ChoiceEnum::Range {
            default: params.min_buffers as i32,
            min: params.min_buffers as i32,
            max: params.max_buffers as i32,
        },
    );
    let data_type = Choice(
        ChoiceFlags::empty(),
        ChoiceEnum::Flags {
            default: params.data_kinds.bits() as i32,
            flags: vec![params.data_kinds.bits() as i32],
        },
    );

    pod::object!(
        SpaTypes::ObjectParamBuffers,
        ParamType::Buffers,
        buffer_property(
            libspa::sys::SPA_PARAM_BUFFERS_buffers,
            Value::Choice(ChoiceValue::Int(count))
        ),
        buffer_property(
            libspa::sys::SPA_PARAM_BUFFERS_blocks,
            Value::Int(params.blocks as i32)
        ),
        buffer_property(
            libspa::sys::SPA_PARAM_BUFFERS_size,
            Value::Int(params.size as i32)
        ),
        buffer_property(
            libspa::sys::SPA_PARAM_BUFFERS_stride,
            Value::Int(params.stride as i32)
        ),
        buffer_property(
            libspa::sys::SPA_PARAM_BUFFERS_dataType,
            Value::Choice(ChoiceValue::Int(data_type))
        ),
    )
}

fn buffer_property(key: u32, value: Value) -> Property {
    Property {
        key,
        flags: PropertyFlags::empty(),
        value,
    }
}

/// Serialize an object into pod bytes
pub fn serialize(object: Object) -> Result<Vec<u8>> {
    let bytes = PodSerializer::serialize(std::io::Cursor::new(Vec::new()), &Value::Object(object))
        .map_err(|e| CaptureError::format(format!("Failed to serialize pod: {:?}", e)))?
        .0
        .into_inner();
    Ok(bytes)
}

/// Serialize several objects
pub fn serialize_all(objects: Vec<Object>) -> Result<Vec<Vec<u8>>> {
    objects.into_iter().map(serialize).collect()
}

/// Borrow serialized bytes as pods
pub fn as_pods(buffers: &[Vec<u8>]) -> Result<Vec<&Pod>> {
    buffers
        .iter()
        .map(|bytes| {
            Pod::from_bytes(bytes)
                .ok_or_else(|| CaptureError::format("Serialized bytes are not a valid pod"))
        })
        .collect()
}

/// Parse a `Format` param
///
/// Returns `None` if the pod is not a format object or its video fields
/// cannot be parsed.
pub fn decode_format(param: &Pod) -> Option<WireFormat> {
    let (media_type, media_subtype) = format_utils::parse_format(param).ok()?;
    if media_type != MediaType::Video || media_subtype != MediaSubtype::Raw {
        return Some(WireFormat::other(media_type, media_subtype));
    }

    let mut info = VideoInfoRaw::new();
    info.parse(param).ok()?;
    let size = info.size();
    let framerate = info.framerate();
    Some(
        WireFormat::raw_video(info.format(), size.width, size.height)
            .with_framerate(framerate.num, framerate.denom),
    )
}
