use std::sync::Arc;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};

use crate::agent_engine::prompts;
use crate::agent_engine::state::Region;
use crate::config::VisionConfig;
use crate::device::Screenshot;
use crate::errors::{QaError, QaResult};
use crate::executor::coordinator::pct_to_pixel;
use crate::gateway::ProviderGateway;
use crate::vision::types::{EncodedImage, VisualCheck, VisualEvidence};

/// Turns screenshots into model payloads and answers visual checks.
#[async_trait]
pub trait VisionEncoder: Send + Sync {
    fn encode(&self, shot: &Screenshot) -> QaResult<EncodedImage>;

    async fn verify_text(&self, shot: &Screenshot, target: &str) -> QaResult<VisualEvidence>;

    async fn verify_element(&self, shot: &Screenshot, descriptor: &str) -> QaResult<VisualEvidence>;

    async fn verify_color(&self, shot: &Screenshot, region: &Region, expected: &str) -> QaResult<VisualEvidence>;
}

/// Text and element checks go to the model; colour checks are measured locally.
pub struct ScreenVision {
    gateway: Arc<ProviderGateway>,
    config: VisionConfig,
}

impl ScreenVision {
    pub fn new(gateway: Arc<ProviderGateway>, config: VisionConfig) -> Self {
        Self { gateway, config }
    }

    async fn ask(&self, shot: &Screenshot, prompt: String) -> QaResult<VisualEvidence> {
        let image = self.encode(shot)?;
        let response = self.gateway.request::<VisualCheck>(&prompt, Some(&image)).await?;
        Ok(VisualEvidence {
            matched: response.payload.found,
            evidence: response.payload.evidence,
        })
    }
}

#[async_trait]
impl VisionEncoder for ScreenVision {
    fn encode(&self, shot: &Screenshot) -> QaResult<EncodedImage> {
        encode_image(&shot.bytes, &self.config)
    }

    async fn verify_text(&self, shot: &Screenshot, target: &str) -> QaResult<VisualEvidence> {
        self.ask(shot, prompts::text_check(target)).await
    }

    async fn verify_element(&self, shot: &Screenshot, descriptor: &str) -> QaResult<VisualEvidence> {
        self.ask(shot, prompts::element_check(descriptor)).await
    }

    async fn verify_color(&self, shot: &Screenshot, region: &Region, expected: &str) -> QaResult<VisualEvidence> {
        check_color(&shot.bytes, region, expected, self.config.color_tolerance)
    }
}

/// Flatten alpha onto white, cap the longest side at `max_dimension`, JPEG + base64.
pub fn encode_image(bytes: &[u8], config: &VisionConfig) -> QaResult<EncodedImage> {
    use base64::Engine as _;

    let img = image::load_from_memory(bytes)?;
    let mut rgb = flatten_onto_white(&img);

    let (w, h) = rgb.dimensions();
    let max = config.max_dimension.max(1);
    if w.max(h) > max {
        let (nw, nh) = if w >= h {
            (max, ((h as f64 * max as f64 / w as f64).round() as u32).max(1))
        } else {
            (((w as f64 * max as f64 / h as f64).round() as u32).max(1), max)
        };
        rgb = image::imageops::resize(&rgb, nw, nh, FilterType::Lanczos3);
    }

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, config.jpeg_quality.clamp(1, 100)).encode_image(&rgb)?;

    let (width, height) = rgb.dimensions();
    tracing::debug!(width, height, bytes = jpeg.len(), "screenshot encoded");
    Ok(EncodedImage {
        mime: "image/jpeg".into(),
        base64: base64::engine::general_purpose::STANDARD.encode(&jpeg),
        width,
        height,
    })
}

fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, p) in rgba.enumerate_pixels() {
        let a = p[3] as f32 / 255.0;
        let blend = |c: u8| (c as f32 * a + 255.0 * (1.0 - a)).round() as u8;
        out.put_pixel(x, y, Rgb([blend(p[0]), blend(p[1]), blend(p[2])]));
    }
    out
}

const PALETTE: &[(&str, [u8; 3])] = &[
    ("red", [220, 40, 40]),
    ("orange", [245, 140, 30]),
    ("yellow", [240, 220, 40]),
    ("green", [50, 170, 70]),
    ("cyan", [40, 200, 220]),
    ("blue", [40, 90, 220]),
    ("purple", [140, 60, 190]),
    ("pink", [240, 130, 180]),
    ("brown", [130, 85, 50]),
    ("white", [250, 250, 250]),
    ("gray", [128, 128, 128]),
    ("black", [15, 15, 15]),
];

enum ColorTarget {
    Hex([u8; 3]),
    Named(&'static str),
}

fn parse_color(expected: &str) -> Option<ColorTarget> {
    let s = expected.trim().to_lowercase();
    if let Some(hex) = s.strip_prefix('#') {
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        return Some(ColorTarget::Hex([channel(0)?, channel(2)?, channel(4)?]));
    }
    let name = if s == "grey" { "gray" } else { s.as_str() };
    PALETTE
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(n, _)| ColorTarget::Named(*n))
}

fn distance(a: [f64; 3], b: [u8; 3]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - *y as f64).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn nearest_named(rgb: [f64; 3]) -> &'static str {
    PALETTE
        .iter()
        .min_by(|a, b| distance(rgb, a.1).total_cmp(&distance(rgb, b.1)))
        .map(|(n, _)| *n)
        .unwrap_or("gray")
}

/// Mean RGB of a percentage region.
pub fn region_mean_rgb(bytes: &[u8], region: &Region) -> QaResult<[f64; 3]> {
    let img = image::load_from_memory(bytes)?.to_rgb8();
    let (w, h) = img.dimensions();
    let x1 = pct_to_pixel(region.x1_pct, w).min(w.saturating_sub(1));
    let y1 = pct_to_pixel(region.y1_pct, h).min(h.saturating_sub(1));
    let x2 = pct_to_pixel(region.x2_pct, w).clamp(x1 + 1, w.max(1));
    let y2 = pct_to_pixel(region.y2_pct, h).clamp(y1 + 1, h.max(1));

    let mut sum = [0f64; 3];
    let mut count = 0f64;
    for y in y1..y2 {
        for x in x1..x2 {
            let p = img.get_pixel(x, y);
            for c in 0..3 {
                sum[c] += p[c] as f64;
            }
            count += 1.0;
        }
    }
    if count == 0.0 {
        return Err(QaError::Vision("empty colour region".into()));
    }
    Ok([sum[0] / count, sum[1] / count, sum[2] / count])
}

pub fn check_color(bytes: &[u8], region: &Region, expected: &str, tolerance: f64) -> QaResult<VisualEvidence> {
    let Some(target) = parse_color(expected) else {
        return Err(QaError::Vision(format!("unrecognised colour '{expected}'")));
    };
    let mean = region_mean_rgb(bytes, region)?;
    let nearest = nearest_named(mean);
    let observed = format!(
        "mean rgb({:.0}, {:.0}, {:.0}), nearest named colour {nearest}",
        mean[0], mean[1], mean[2]
    );
    let evidence = match target {
        ColorTarget::Hex(rgb) => {
            let d = distance(mean, rgb);
            VisualEvidence {
                matched: d <= tolerance,
                evidence: format!("{observed}; distance to {expected} = {d:.1} (tolerance {tolerance:.1})"),
            }
        }
        ColorTarget::Named(name) => VisualEvidence {
            matched: nearest == name,
            evidence: format!("{observed}; expected {name}"),
        },
    };
    Ok(evidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    fn png(img: DynamicImage) -> Vec<u8> {
        let mut out = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    /// Left half red, right half gray.
    fn split_screen() -> Vec<u8> {
        let img = RgbImage::from_fn(100, 200, |x, _| {
            if x < 50 {
                Rgb([225, 35, 35])
            } else {
                Rgb([130, 130, 130])
            }
        });
        png(DynamicImage::ImageRgb8(img))
    }

    fn full() -> Region {
        Region {
            x1_pct: 0.0,
            y1_pct: 0.0,
            x2_pct: 50.0,
            y2_pct: 100.0,
        }
    }

    #[test]
    fn encode_downscales_longest_side() {
        let cfg = VisionConfig {
            max_dimension: 100,
            ..VisionConfig::default()
        };
        let encoded = encode_image(&split_screen(), &cfg).unwrap();
        assert_eq!((encoded.width, encoded.height), (50, 100));
        assert!(encoded.data_uri().starts_with("data:image/jpeg;base64,"));

        let jpeg = base64::engine::general_purpose::STANDARD
            .decode(&encoded.base64)
            .unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.width(), 50);
    }

    #[test]
    fn transparency_is_flattened_onto_white() {
        let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([0, 0, 0, 0]));
        let flat = flatten_onto_white(&DynamicImage::ImageRgba8(img));
        assert_eq!(flat.get_pixel(0, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn named_color_check() {
        let shot = split_screen();
        assert!(check_color(&shot, &full(), "red", 60.0).unwrap().matched);

        let right = Region {
            x1_pct: 50.0,
            x2_pct: 100.0,
            ..full()
        };
        let gray = check_color(&shot, &right, "Red", 60.0).unwrap();
        assert!(!gray.matched);
        assert!(gray.evidence.contains("nearest named colour gray"));
        assert!(check_color(&shot, &right, "grey", 60.0).unwrap().matched);
    }

    #[test]
    fn hex_color_check_uses_tolerance() {
        let shot = split_screen();
        assert!(check_color(&shot, &full(), "#e02020", 30.0).unwrap().matched);
        assert!(!check_color(&shot, &full(), "#0000ff", 30.0).unwrap().matched);
    }

    #[test]
    fn unknown_color_is_error() {
        assert!(check_color(&split_screen(), &full(), "chartreuse-ish", 60.0).is_err());
    }

    #[test]
    fn malformed_hex_is_error_not_panic() {
        let shot = split_screen();
        for bad in ["#1é234", "#12345g", "#ffff", "#ééé"] {
            assert!(
                matches!(check_color(&shot, &full(), bad, 60.0), Err(QaError::Vision(_))),
                "{bad}"
            );
        }
    }
}
