//! Grid layout across active video sources, letterboxed blit, and
//! `ASCII_FRAME` packet assembly (spec §4.7).

use crate::client::SharedClient;
use crate::packet_queue::{PayloadHandle, QueuedPacket};
use crate::protocol::crc::crc32;
use crate::protocol::packet::{AsciiFrameHeader, PacketType};
use crate::protocol::PacketHeader;
use crate::video::ascii::{convert, ColorMode, LuminanceWeights, Palette};
use crate::video::resize::{best_fit_rect, resize_rgb, ResizeMode};
use std::sync::atomic::Ordering;

/// Grid geometry from source count (spec §4.7 step 3). Counts above 9
/// clamp to 3x3; extra sources are skipped for that tick.
pub fn grid_for_count(n: usize) -> (u32, u32) {
    match n {
        0 => (1, 1),
        1 => (1, 1),
        2 => (2, 1),
        3 | 4 => (2, 2),
        _ => (3, 3),
    }
}

pub struct CompositorConfig {
    pub cells_w: u32,
    pub cells_h: u32,
    pub resize_mode: ResizeMode,
    pub luminance_weights: LuminanceWeights,
    pub color_mode: ColorMode,
    pub compression_ratio_threshold: f32,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            cells_w: 80,
            cells_h: 24,
            resize_mode: ResizeMode::Nearest,
            luminance_weights: LuminanceWeights::default(),
            color_mode: ColorMode::Foreground,
            compression_ratio_threshold: 0.20,
        }
    }
}

struct SourceFrame {
    width: u32,
    height: u32,
    rgb: Vec<u8>,
}

/// Compose one tick's canvas from the latest frame of each active,
/// video-sending client, then ASCII-convert it and build the wire
/// payload. Returns `None` if there were no valid sources this tick
/// (the caller still sends black cells by constructing an empty grid).
pub fn compose_tick(clients: &[SharedClient], config: &CompositorConfig, palette: &Palette) -> Vec<u8> {
    let mut sources = Vec::new();
    for client in clients {
        if !client.sending_video.load(Ordering::Relaxed) {
            continue;
        }
        let Some(entry) = client.inbound_video_consumer.lock().consume_latest() else {
            continue;
        };
        if entry.width == 0 || entry.height == 0 || entry.data.len() != (entry.width * entry.height * 3) as usize {
            continue; // validation failure: skip this source for the tick (spec §4.7 step 2)
        }
        sources.push(SourceFrame { width: entry.width, height: entry.height, rgb: entry.data });
        if sources.len() >= 9 {
            break;
        }
    }

    let (cols, rows) = grid_for_count(sources.len());
    let pixel_w = config.cells_w;
    let pixel_h = config.cells_h * 2;
    let cell_w = pixel_w / cols.max(1);
    let cell_h = pixel_h / rows.max(1);

    let mut canvas = vec![0u8; pixel_w as usize * pixel_h as usize * 3];
    for (idx, source) in sources.iter().enumerate() {
        let col = (idx as u32) % cols;
        let row = (idx as u32) / cols;
        let cell_origin_x = col * cell_w;
        let cell_origin_y = row * cell_h;

        let (bx, by, bw, bh) = best_fit_rect(source.width, source.height, cell_w, cell_h);
        if bw == 0 || bh == 0 {
            continue;
        }
        let resized = resize_rgb(&source.rgb, source.width, source.height, bw, bh, config.resize_mode);
        blit(&mut canvas, pixel_w, &resized, bw, bh, cell_origin_x + bx, cell_origin_y + by);
    }

    let text = convert(&canvas, config.cells_w, config.cells_h, palette, &config.luminance_weights, config.color_mode);
    build_ascii_frame_payload(text.as_bytes(), config.cells_w, config.cells_h, config.compression_ratio_threshold)
}

fn blit(dst: &mut [u8], dst_w: u32, src: &[u8], src_w: u32, src_h: u32, origin_x: u32, origin_y: u32) {
    for y in 0..src_h {
        for x in 0..src_w {
            let dst_idx = (((origin_y + y) * dst_w + (origin_x + x)) * 3) as usize;
            let src_idx = ((y * src_w + x) * 3) as usize;
            if dst_idx + 3 <= dst.len() {
                dst[dst_idx..dst_idx + 3].copy_from_slice(&src[src_idx..src_idx + 3]);
            }
        }
    }
}

/// Build the `ASCII_FRAME` wire payload (spec §4.7 "Output packet
/// layout"). zstd-compresses only when it shrinks the bytes by at
/// least `compression_ratio_threshold`; CRC32 always covers the
/// original, uncompressed bytes.
fn build_ascii_frame_payload(original: &[u8], cells_w: u32, cells_h: u32, compression_ratio_threshold: f32) -> Vec<u8> {
    let original_crc = crc32(original);
    let compressed = zstd::encode_all(original, 3).unwrap_or_default();
    let shrink_ratio = if original.is_empty() {
        0.0
    } else {
        1.0 - (compressed.len() as f32 / original.len() as f32)
    };

    let (compressed_size, bytes): (u32, &[u8]) = if !compressed.is_empty() && shrink_ratio >= compression_ratio_threshold {
        (compressed.len() as u32, &compressed)
    } else {
        (0, original)
    };

    let header = AsciiFrameHeader {
        cells_w,
        cells_h,
        original_size: original.len() as u32,
        compressed_size,
        crc32: original_crc,
        flags: 0,
    };
    let mut out = Vec::with_capacity(24 + bytes.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(bytes);
    out
}

/// Enqueue the composed `ASCII_FRAME` into every video-capable client's
/// outbound queue (spec §4.8: "copy-on-enqueue so queues own their bytes").
pub fn broadcast_ascii_frame(clients: &[SharedClient], payload: &[u8]) {
    for client in clients {
        if !client.has_cap(crate::client::info::CAP_VIDEO) {
            continue;
        }
        let header = PacketHeader::new(PacketType::AsciiFrame as u16, payload.len() as u32, crc32(payload), 0);
        client.outbound_video.enqueue(QueuedPacket {
            header,
            payload: PayloadHandle::Owned(payload.to_vec()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_geometry_matches_spec_table() {
        assert_eq!(grid_for_count(1), (1, 1));
        assert_eq!(grid_for_count(2), (2, 1));
        assert_eq!(grid_for_count(3), (2, 2));
        assert_eq!(grid_for_count(4), (2, 2));
        assert_eq!(grid_for_count(5), (3, 3));
        assert_eq!(grid_for_count(9), (3, 3));
        assert_eq!(grid_for_count(50), (3, 3));
    }

    #[test]
    fn empty_tick_produces_black_canvas_frame() {
        let config = CompositorConfig { cells_w: 4, cells_h: 2, ..Default::default() };
        let palette = Palette::default_ramp();
        let payload = compose_tick(&[], &config, &palette);
        assert!(payload.len() >= 24);
    }

    #[test]
    fn ascii_frame_payload_crc_covers_uncompressed_bytes() {
        let original = b"some ascii art that is reasonably compressible aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        let payload = build_ascii_frame_payload(original, 10, 1, 0.20);
        let header = AsciiFrameHeader::decode(&payload).unwrap();
        assert_eq!(header.crc32, crc32(original));
        assert_eq!(header.original_size, original.len() as u32);
    }
}
