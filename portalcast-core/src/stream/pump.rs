//! Frame pump
//!
//! Each process tick drains the producer's queue, keeps only the newest
//! buffer and copies it into the surface texture. Older buffers go straight
//! back to the producer so it never runs dry.

use pipewire as pw;
use tracing::{debug, trace};

use crate::error::{CaptureError, Result};
use crate::surface::PresentationSurface;
use crate::types::NegotiatedFormat;

/// Mapped pixel data of one buffer
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    /// Bytes covered by the buffer's chunk
    pub bytes: &'a [u8],
    /// Row stride the producer wrote with, 0 if unknown
    pub stride: usize,
}

/// A dequeued buffer
pub trait FrameBuffer {
    /// First data plane, if it is mapped and holds data
    fn plane(&mut self) -> Option<Plane<'_>>;
}

/// Producer buffer queue
pub trait BufferQueue {
    type Buffer<'a>: FrameBuffer
    where
        Self: 'a;

    /// Take the next filled buffer
    fn dequeue(&self) -> Option<Self::Buffer<'_>>;

    /// Give a buffer back to the producer
    fn queue(&self, buffer: Self::Buffer<'_>);
}

/// Result of one pump tick
#[derive(Debug)]
pub enum PumpOutcome {
    /// Nothing was queued
    Idle,
    /// The newest buffer was presented
    Presented { recycled: usize, bytes: usize },
    /// The newest buffer could not be presented
    Skipped { recycled: usize, reason: CaptureError },
}

impl PumpOutcome {
    /// Stale buffers returned without presenting
    pub fn recycled(&self) -> usize {
        match self {
            Self::Idle => 0,
            Self::Presented { recycled, .. } | Self::Skipped { recycled, .. } => *recycled,
        }
    }

    /// Whether a frame reached the surface
    pub fn presented(&self) -> bool {
        matches!(self, Self::Presented { .. })
    }
}

/// Run one process tick
///
/// Every dequeued buffer is queued back exactly once, whatever happens.
pub fn pump<Q, S>(queue: &Q, surface: &mut S, format: Option<NegotiatedFormat>) -> PumpOutcome
where
    Q: BufferQueue + ?Sized,
    S: PresentationSurface + ?Sized,
{
    let mut latest = None;
    let mut recycled = 0;
    while let Some(buffer) = queue.dequeue() {
        if let Some(stale) = latest.replace(buffer) {
            queue.queue(stale);
            recycled += 1;
        }
    }

    let Some(mut buffer) = latest else {
        trace!("No buffer available");
        return PumpOutcome::Idle;
    };
    if recycled > 0 {
        trace!("Dropped {} stale buffers", recycled);
    }

    let result = present(&mut buffer, surface, format);
    queue.queue(buffer);

    match result {
        Ok(bytes) => PumpOutcome::Presented { recycled, bytes },
        Err(reason) => {
            debug!("Skipping frame: {}", reason);
            PumpOutcome::Skipped { recycled, reason }
        }
    }
}

fn present<B, S>(buffer: &mut B, surface: &mut S, format: Option<NegotiatedFormat>) -> Result<usize>
where
    B: FrameBuffer + ?Sized,
    S: PresentationSurface + ?Sized,
{
    let format = format.ok_or_else(|| CaptureError::buffer("No format negotiated yet"))?;
    let plane = buffer
        .plane()
        .ok_or_else(|| CaptureError::buffer("Buffer carries no mapped data"))?;
    let src_stride = if plane.stride > 0 {
        plane.stride
    } else {
        format.stride as usize
    };

    let copied = {
        let lock = surface.lock()?;
        let rows = lock.height.min(format.height as usize);
        copy_rows(plane.bytes, src_stride, lock.pixels, lock.stride, rows)
    };
    surface.unlock();
    surface.present();
    Ok(copied)
}

/// Copy `rows` rows between buffers of different pitch
///
/// Each row copies the narrower of the two strides; rows that would run past
/// either slice are cut short. Returns the number of bytes copied.
pub fn copy_rows(src: &[u8], src_stride: usize, dst: &mut [u8], dst_stride: usize, rows: usize) -> usize {
    if src_stride == 0 || dst_stride == 0 {
        return 0;
    }
    let width = src_stride.min(dst_stride);
    let mut copied = 0;
    for row in 0..rows {
        let src_start = row * src_stride;
        let dst_start = row * dst_stride;
        if src_start >= src.len() || dst_start >= dst.len() {
            break;
        }
        let len = width
            .min(src.len() - src_start)
            .min(dst.len() - dst_start);
        dst[dst_start..dst_start + len].copy_from_slice(&src[src_start..src_start + len]);
        copied += len;
    }
    copied
}

impl FrameBuffer for pw::buffer::Buffer<'_> {
    fn plane(&mut self) -> Option<Plane<'_>> {
        let data = self.datas_mut().first_mut()?;
        let chunk = data.chunk();
        let offset = chunk.offset() as usize;
        let size = chunk.size() as usize;
        let stride = chunk.stride().max(0) as usize;
        if size == 0 {
            return None;
        }

        let bytes: &[u8] = data.data()?;
        let start = offset.min(bytes.len());
        let end = offset.saturating_add(size).min(bytes.len());
        Some(Plane {
            bytes: &bytes[start..end],
            stride,
        })
    }
}

impl BufferQueue for pw::stream::Stream {
    type Buffer<'a> = pw::buffer::Buffer<'a>;

    fn dequeue(&self) -> Option<Self::Buffer<'_>> {
        self.dequeue_buffer()
    }

    fn queue(&self, buffer: Self::Buffer<'_>) {
        // Dropping a pipewire buffer queues it back.
        drop(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_rows_narrower_destination() {
        let src: Vec<u8> = (0..12).collect();
        let mut dst = vec![0u8; 6];
        let copied = copy_rows(&src, 6, &mut dst, 3, 2);
        assert_eq!(copied, 6);
        assert_eq!(dst, vec![0, 1, 2, 6, 7, 8]);
    }

    #[test]
    fn test_copy_rows_wider_destination() {
        let src = vec![1u8; 4];
        let mut dst = vec![0u8; 12];
        let copied = copy_rows(&src, 2, &mut dst, 6, 2);
        assert_eq!(copied, 4);
        assert_eq!(dst, vec![1, 1, 0, 0, 0, 0, 1, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_copy_rows_stops_at_short_source() {
        let src = vec![9u8; 5];
        let mut dst = vec![0u8; 12];
        let copied = copy_rows(&src, 4, &mut dst, 4, 3);
        assert_eq!(copied, 5);
        assert_eq!(&dst[..5], &[9, 9, 9, 9, 9]);
        assert_eq!(&dst[5..], &[0; 7]);
    }

    #[test]
    fn test_copy_rows_zero_stride() {
        let mut dst = vec![0u8; 4];
        assert_eq!(copy_rows(&[1, 2, 3, 4], 0, &mut dst, 4, 1), 0);
    }
}
