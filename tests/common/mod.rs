#![allow(dead_code)]

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{ImageFormat, Rgb, RgbImage};
use lefocus_server::{db::Database, settings::ServerSettings, AppState};

pub const BACKGROUND: Rgb<u8> = Rgb([40, 60, 90]);
pub const SKIN: Rgb<u8> = Rgb([224, 172, 140]);

fn fill(img: &mut RgbImage, x0: u32, y0: u32, w: u32, h: u32, color: Rgb<u8>) {
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            img.put_pixel(x, y, color);
        }
    }
}

/// A frontal face with both irises centered in their sockets.
pub fn face_frame() -> RgbImage {
    let mut img = RgbImage::from_pixel(320, 240, BACKGROUND);
    fill(&mut img, 100, 50, 120, 160, SKIN);
    for x0 in [120, 170] {
        fill(&mut img, x0, 100, 30, 16, Rgb([255, 255, 255]));
        fill(&mut img, x0 + 11, 104, 8, 8, Rgb([30, 30, 30]));
    }
    img
}

pub fn data_uri(img: &RgbImage) -> String {
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

pub fn frame_message(img: &RgbImage) -> String {
    serde_json::json!({ "image": data_uri(img) }).to_string()
}

pub fn test_state(settings: ServerSettings) -> AppState {
    AppState::new(settings, Database::in_memory().unwrap())
}
