use image::{ImageBuffer, Rgba, RgbaImage};
use imageproc::drawing::draw_filled_circle_mut;
use log::warn;
use palette::{FromColor, Hsv, Srgb};
use particle_life_common::Snapshot;

/// Color used for particles whose type has no palette entry.
pub const FALLBACK_COLOR: [u8; 4] = [255, 255, 0, 255];

// Color definitions for named colors (RGBA format)
const COLOR_MAP: &[(&str, [u8; 4])] = &[
    ("black", [0, 0, 0, 255]),
    ("white", [255, 255, 255, 255]),
    ("red", [255, 0, 0, 255]),
    ("green", [0, 255, 0, 255]),
    ("blue", [0, 0, 255, 255]),
    ("yellow", [255, 255, 0, 255]),
    ("cyan", [0, 255, 255, 255]),
    ("magenta", [255, 0, 255, 255]),
];

/// Parse a color name to RGBA values
pub fn parse_color(color_name: &str) -> [u8; 4] {
    for &(name, color) in COLOR_MAP {
        if name.eq_ignore_ascii_case(color_name) {
            return color;
        }
    }
    warn!("Color '{}' not recognized, using black.", color_name);
    [0, 0, 0, 255]
}

/// One color per particle type, evenly spaced in hue.
#[derive(Debug, Clone)]
pub struct TypePalette {
    colors: Vec<[u8; 4]>,
}

impl TypePalette {
    pub fn new(num_types: u32) -> Self {
        let count = num_types.max(1) as f32;
        let colors = (0..num_types)
            .map(|i| {
                let hsv = Hsv::new(i as f32 / count * 360.0, 0.75, 0.95);
                let rgb = Srgb::from_color(hsv);
                [
                    (rgb.red * 255.0).round() as u8,
                    (rgb.green * 255.0).round() as u8,
                    (rgb.blue * 255.0).round() as u8,
                    255,
                ]
            })
            .collect();
        Self { colors }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn color_for(&self, ptype: u32) -> [u8; 4] {
        self.colors.get(ptype as usize).copied().unwrap_or(FALLBACK_COLOR)
    }
}

/// Domain coordinates to normalized device coordinates, y pointing up.
#[inline]
pub fn to_ndc(x: f32, y: f32, domain_width: f32, domain_height: f32) -> (f32, f32) {
    (x / domain_width * 2.0 - 1.0, -(y / domain_height) * 2.0 + 1.0)
}

#[inline]
pub fn ndc_to_pixel(ndc_x: f32, ndc_y: f32, width: u32, height: u32) -> (i32, i32) {
    let px = (ndc_x + 1.0) * 0.5 * width as f32;
    let py = (1.0 - ndc_y) * 0.5 * height as f32;
    (px.floor() as i32, py.floor() as i32)
}

#[derive(Debug, Clone, Copy)]
pub struct FrameSettings {
    pub width: u32,
    pub height: u32,
    pub particle_radius_px: i32,
    pub bg_color: [u8; 4],
}

/// Draw a snapshot frame
pub fn draw_frame(snapshot: &Snapshot, settings: &FrameSettings, palette: &TypePalette) -> RgbaImage {
    let bg = settings.bg_color;
    let mut image = ImageBuffer::from_pixel(settings.width, settings.height, Rgba(bg));

    if let Some(positions) = &snapshot.positions {
        for sample in positions {
            let (nx, ny) = to_ndc(sample.x, sample.y, snapshot.domain_width, snapshot.domain_height);
            let (px, py) = ndc_to_pixel(nx, ny, settings.width, settings.height);
            if px >= 0 && px < settings.width as i32 && py >= 0 && py < settings.height as i32 {
                let color = palette.color_for(sample.ptype);
                draw_filled_circle_mut(&mut image, (px, py), settings.particle_radius_px, Rgba(color));
            }
        }
    }
    image
}

/// RGB to YUV 4:2:0 (BT.601) for the H.264 encoder. Dimensions must be even.
pub fn rgb_to_yuv420(image: &RgbaImage) -> Vec<u8> {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let y_plane_size = width * height;
    let mut yuv = vec![0u8; y_plane_size + y_plane_size / 2];

    for (x, y, pixel) in image.enumerate_pixels() {
        let (r, g, b) = (pixel[0] as f32, pixel[1] as f32, pixel[2] as f32);
        yuv[y as usize * width + x as usize] = (0.299 * r + 0.587 * g + 0.114 * b).round() as u8;
    }

    let u_plane_offset = y_plane_size;
    let v_plane_offset = y_plane_size + y_plane_size / 4;
    let uv_width = width / 2;
    for y in (0..height).step_by(2) {
        for x in (0..width).step_by(2) {
            let mut sum_u = 0f32;
            let mut sum_v = 0f32;
            let mut count = 0;
            for dy in 0..2 {
                for dx in 0..2 {
                    if y + dy < height && x + dx < width {
                        let pixel = image.get_pixel((x + dx) as u32, (y + dy) as u32);
                        let (r, g, b) = (pixel[0] as f32, pixel[1] as f32, pixel[2] as f32);
                        sum_u += -0.169 * r - 0.331 * g + 0.5 * b + 128.0;
                        sum_v += 0.5 * r - 0.419 * g - 0.081 * b + 128.0;
                        count += 1;
                    }
                }
            }
            let idx = (y / 2) * uv_width + x / 2;
            yuv[u_plane_offset + idx] = (sum_u / count as f32).round() as u8;
            yuv[v_plane_offset + idx] = (sum_v / count as f32).round() as u8;
        }
    }
    yuv
}
