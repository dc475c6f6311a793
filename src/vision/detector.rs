//! Face and eye landmark extraction.
//!
//! Both stages sit behind traits so a model-backed implementation can replace
//! the built-in ones. The built-ins are classical heuristics: a YCbCr skin
//! classifier for the face region and a dark-pupil search inside the non-skin
//! eye sockets of the upper face.

use image::{Rgb, RgbImage};

use crate::{
    models::{FaceBox, PixelPoint},
    settings::DetectorSettings,
};

/// Landmarks of one eye in source-frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeLandmarks {
    pub iris: PixelPoint,
    /// Canthus nearest the nose.
    pub inner: PixelPoint,
    pub outer: PixelPoint,
    pub upper: PixelPoint,
    pub lower: PixelPoint,
}

/// Landmarks for a single face. `left` is the eye on the image-left side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceLandmarks {
    pub left: EyeLandmarks,
    pub right: EyeLandmarks,
}

pub trait FaceDetector: Send + Sync {
    fn detect(&self, frame: &RgbImage) -> Option<FaceBox>;
}

/// Extracts eye landmarks for at most one face.
pub trait LandmarkExtractor: Send + Sync {
    fn extract(&self, frame: &RgbImage) -> Option<FaceLandmarks>;
}

fn ycbcr(pixel: &Rgb<u8>) -> (f64, f64, f64) {
    let [r, g, b] = pixel.0.map(f64::from);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    (y, cb, cr)
}

pub fn is_skin(pixel: &Rgb<u8>) -> bool {
    let (y, cb, cr) = ycbcr(pixel);
    y > 40.0 && (77.0..=127.0).contains(&cb) && (133.0..=173.0).contains(&cr)
}

fn luma(pixel: &Rgb<u8>) -> f64 {
    ycbcr(pixel).0
}

/// Inclusive pixel bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bounds {
    x_min: u32,
    x_max: u32,
    y_min: u32,
    y_max: u32,
}

impl Bounds {
    fn width(&self) -> u32 {
        self.x_max - self.x_min + 1
    }

    fn height(&self) -> u32 {
        self.y_max - self.y_min + 1
    }

    fn center_x(&self) -> f64 {
        (f64::from(self.x_min) + f64::from(self.x_max)) / 2.0
    }

    fn center_y(&self) -> f64 {
        (f64::from(self.y_min) + f64::from(self.y_max)) / 2.0
    }
}

/// Bounds of the pixels in `[x0, x1) × [y0, y1)` matching `pred`, with rows and
/// columns below `trim × peak` count dropped from the edges. Returns the bounds
/// and the number of matching pixels in the region.
fn trimmed_bounds<F>(x0: u32, x1: u32, y0: u32, y1: u32, trim: f64, pred: F) -> Option<(Bounds, u64)>
where
    F: Fn(u32, u32) -> bool,
{
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let mut cols = vec![0u32; (x1 - x0) as usize];
    let mut rows = vec![0u32; (y1 - y0) as usize];
    let mut total = 0u64;
    for y in y0..y1 {
        for x in x0..x1 {
            if pred(x, y) {
                cols[(x - x0) as usize] += 1;
                rows[(y - y0) as usize] += 1;
                total += 1;
            }
        }
    }
    if total == 0 {
        return None;
    }

    let span = |counts: &[u32]| -> Option<(u32, u32)> {
        let peak = counts.iter().copied().max().unwrap_or(0);
        let threshold = (f64::from(peak) * trim).max(1.0);
        let first = counts.iter().position(|&c| f64::from(c) >= threshold)?;
        let last = counts.iter().rposition(|&c| f64::from(c) >= threshold)?;
        Some((first as u32, last as u32))
    };

    let (cx0, cx1) = span(&cols)?;
    let (ry0, ry1) = span(&rows)?;
    Some((
        Bounds {
            x_min: x0 + cx0,
            x_max: x0 + cx1,
            y_min: y0 + ry0,
            y_max: y0 + ry1,
        },
        total,
    ))
}

#[derive(Debug, Clone)]
pub struct SkinToneDetector {
    settings: DetectorSettings,
}

impl SkinToneDetector {
    const MIN_SIDE: u32 = 8;

    pub fn new(settings: DetectorSettings) -> Self {
        Self { settings }
    }

    fn locate(&self, frame: &RgbImage) -> Option<Bounds> {
        let (width, height) = frame.dimensions();
        let (bounds, total) = trimmed_bounds(0, width, 0, height, self.settings.projection_trim, |x, y| {
            is_skin(frame.get_pixel(x, y))
        })?;

        let frame_area = f64::from(width) * f64::from(height);
        if (total as f64) < frame_area * self.settings.min_face_fraction {
            return None;
        }
        if bounds.width() < Self::MIN_SIDE || bounds.height() < Self::MIN_SIDE {
            return None;
        }

        let mut inside = 0u64;
        for y in bounds.y_min..=bounds.y_max {
            for x in bounds.x_min..=bounds.x_max {
                if is_skin(frame.get_pixel(x, y)) {
                    inside += 1;
                }
            }
        }
        let box_area = f64::from(bounds.width()) * f64::from(bounds.height());
        if (inside as f64) / box_area < self.settings.min_face_fill {
            return None;
        }

        Some(bounds)
    }
}

impl FaceDetector for SkinToneDetector {
    fn detect(&self, frame: &RgbImage) -> Option<FaceBox> {
        self.locate(frame).map(|b| FaceBox {
            x: b.x_min,
            y: b.y_min,
            width: b.width(),
            height: b.height(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EyeSide {
    ImageLeft,
    ImageRight,
}

/// Finds eye sockets as non-skin blobs in the upper face and the iris as the
/// centroid of dark pixels inside each socket.
#[derive(Debug, Clone)]
pub struct PupilLandmarker {
    face: SkinToneDetector,
    settings: DetectorSettings,
}

impl PupilLandmarker {
    /// Vertical band of the face box searched for eyes, as fractions of its height.
    const EYE_BAND: (f64, f64) = (0.15, 0.6);
    const MIN_SOCKET_PIXELS: u64 = 12;
    const MIN_IRIS_PIXELS: u32 = 2;

    pub fn new(settings: DetectorSettings) -> Self {
        Self {
            face: SkinToneDetector::new(settings.clone()),
            settings,
        }
    }

    fn eye(&self, frame: &RgbImage, x0: u32, x1: u32, y0: u32, y1: u32, side: EyeSide) -> Option<EyeLandmarks> {
        let (socket, count) = trimmed_bounds(x0, x1, y0, y1, self.settings.projection_trim, |x, y| {
            !is_skin(frame.get_pixel(x, y))
        })?;
        if count < Self::MIN_SOCKET_PIXELS || socket.width() < 3 || socket.height() < 2 {
            return None;
        }

        let dark = f64::from(self.settings.dark_luma_threshold);
        let (mut sum_x, mut sum_y, mut n) = (0.0, 0.0, 0u32);
        for y in socket.y_min..=socket.y_max {
            for x in socket.x_min..=socket.x_max {
                if luma(frame.get_pixel(x, y)) < dark {
                    sum_x += f64::from(x);
                    sum_y += f64::from(y);
                    n += 1;
                }
            }
        }
        if n < Self::MIN_IRIS_PIXELS {
            return None;
        }

        let iris = PixelPoint {
            x: sum_x / f64::from(n),
            y: sum_y / f64::from(n),
        };
        let mid_y = socket.center_y();
        let near = PixelPoint { x: f64::from(socket.x_max), y: mid_y };
        let far = PixelPoint { x: f64::from(socket.x_min), y: mid_y };
        let (inner, outer) = match side {
            EyeSide::ImageLeft => (near, far),
            EyeSide::ImageRight => (far, near),
        };

        Some(EyeLandmarks {
            iris,
            inner,
            outer,
            upper: PixelPoint { x: socket.center_x(), y: f64::from(socket.y_min) },
            lower: PixelPoint { x: socket.center_x(), y: f64::from(socket.y_max) },
        })
    }
}

impl LandmarkExtractor for PupilLandmarker {
    fn extract(&self, frame: &RgbImage) -> Option<FaceLandmarks> {
        let face = self.face.locate(frame)?;
        let height = f64::from(face.height());
        let band_top = face.y_min + (height * Self::EYE_BAND.0) as u32;
        let band_bottom = face.y_min + (height * Self::EYE_BAND.1) as u32;
        let mid_x = face.x_min + face.width() / 2;

        let left = self.eye(frame, face.x_min, mid_x, band_top, band_bottom, EyeSide::ImageLeft)?;
        let right = self.eye(frame, mid_x, face.x_max + 1, band_top, band_bottom, EyeSide::ImageRight)?;
        Some(FaceLandmarks { left, right })
    }
}
