//! Yearly map of clear scenes per WRS path/row, rendered as an animated SVG.
use super::chart::escape;
use super::ClearScenes;
use anyhow::Result;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

pub const FIRST_YEAR: i32 = 1972;
pub const FRAMES: i32 = 52;
pub const FRAMES_PER_SECOND: f64 = 2.5;

const WIDTH: f64 = 1200.0;
const HEIGHT: f64 = 675.0;
const MAP_LEFT: f64 = 60.0;
const MAP_TOP: f64 = 70.0;
/// Pixels per degree; the map keeps an equal aspect.
const SCALE: f64 = 3.0;
const LON_RANGE: (f64, f64) = (-180.0, 180.0);
const LAT_RANGE: (f64, f64) = (-60.0, 86.0);
const MARKER_RADIUS: f64 = 2.0;
const VMIN: f64 = 1.0;
const VMAX: f64 = 50.0;
const COLORBAR_LABEL: &str = "Clear Landsat Scenes Per Year";
const MAP_CLIP_ID: &str = "map-extent";

/// Anchors of matplotlib's sequential "Reds" colormap.
const REDS: [(u8, u8, u8); 9] = [
    (0xff, 0xf5, 0xf0),
    (0xfe, 0xe0, 0xd2),
    (0xfc, 0xbb, 0xa1),
    (0xfc, 0x92, 0x72),
    (0xfb, 0x6a, 0x4a),
    (0xef, 0x3b, 0x2c),
    (0xcb, 0x18, 0x1d),
    (0xa5, 0x0f, 0x15),
    (0x67, 0x00, 0x0d),
];

/// Colour for `value` on the Reds scale, clamped to [`VMIN`, `VMAX`].
pub fn reds(value: f64) -> String {
    let t = ((value - VMIN) / (VMAX - VMIN)).clamp(0.0, 1.0);
    let position = t * (REDS.len() - 1) as f64;
    let i = (position.floor() as usize).min(REDS.len() - 2);
    let f = position - i as f64;
    let lerp = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * f).round() as u8;
    let (r0, g0, b0) = REDS[i];
    let (r1, g1, b1) = REDS[i + 1];
    format!("#{:02x}{:02x}{:02x}", lerp(r0, r1), lerp(g0, g1), lerp(b0, b1))
}

fn map_size() -> (f64, f64) {
    (
        (LON_RANGE.1 - LON_RANGE.0) * SCALE,
        (LAT_RANGE.1 - LAT_RANGE.0) * SCALE,
    )
}

fn project(lon: f64, lat: f64) -> (f64, f64) {
    (
        MAP_LEFT + (lon - LON_RANGE.0) * SCALE,
        MAP_TOP + (LAT_RANGE.1 - lat) * SCALE,
    )
}

/// Visibility animation showing frame `index` during its slot of the loop.
fn frame_visibility(index: i32) -> String {
    let duration = FRAMES as f64 / FRAMES_PER_SECOND;
    let start = index as f64 / FRAMES as f64;
    let end = (index + 1) as f64 / FRAMES as f64;
    let (values, key_times) = if index == 0 {
        ("visible;hidden".to_string(), format!("0;{end:.6}"))
    } else {
        (
            "hidden;visible;hidden".to_string(),
            format!("0;{start:.6};{end:.6}"),
        )
    };
    format!(
        r#"<animate attributeName="visibility" values="{values}" keyTimes="{key_times}" dur="{duration}s" calcMode="discrete" repeatCount="indefinite"/>"#
    )
}

fn render_colorbar(svg: &mut String) {
    let (map_w, map_h) = map_size();
    let bar_w = map_w * 0.6;
    let bar_h = bar_w / 90.0;
    let x = MAP_LEFT + (map_w - bar_w) / 2.0;
    let y = MAP_TOP + map_h + 40.0;

    let _ = writeln!(svg, r#"<defs><linearGradient id="reds">"#);
    for (i, (r, g, b)) in REDS.iter().enumerate() {
        let _ = writeln!(
            svg,
            r##"<stop offset="{:.3}" stop-color="#{r:02x}{g:02x}{b:02x}"/>"##,
            i as f64 / (REDS.len() - 1) as f64
        );
    }
    let _ = writeln!(svg, "</linearGradient></defs>");
    let _ = writeln!(
        svg,
        r#"<rect x="{x:.1}" y="{y:.1}" width="{bar_w:.1}" height="{bar_h:.1}" fill="url(#reds)"/>"#
    );
    for tick in [10.0, 20.0, 30.0, 40.0, 50.0] {
        let tx = x + (tick - VMIN) / (VMAX - VMIN) * bar_w;
        let _ = writeln!(
            svg,
            r#"<text x="{tx:.1}" y="{:.1}" text-anchor="middle" font-size="11">{tick}</text>"#,
            y + bar_h + 14.0
        );
    }
    let _ = writeln!(
        svg,
        r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-size="12">{}</text>"#,
        x + bar_w / 2.0,
        y + bar_h + 32.0,
        escape(COLORBAR_LABEL)
    );
}

/// One frame per year from [`FIRST_YEAR`], cycling at [`FRAMES_PER_SECOND`].
pub fn render(scenes: &[ClearScenes]) -> String {
    let (map_w, map_h) = map_size();
    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="DejaVu Sans, Arial, sans-serif">"#
    );
    // Points outside the lon/lat extent are hidden, not drawn over the colorbar
    let _ = writeln!(
        svg,
        r#"<defs><clipPath id="{MAP_CLIP_ID}"><rect x="{MAP_LEFT}" y="{MAP_TOP}" width="{map_w}" height="{map_h}"/></clipPath></defs>"#
    );
    let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);

    for frame in 0..FRAMES {
        let year = FIRST_YEAR + frame;
        // Ascending order keeps low counts from hiding behind high ones
        let mut year_scenes: Vec<&ClearScenes> =
            scenes.iter().filter(|s| s.year == year).collect();
        year_scenes.sort_by_key(|s| s.num_scenes);

        let _ = writeln!(svg, r#"<g visibility="hidden" data-year="{year}">"#);
        let _ = writeln!(svg, "{}", frame_visibility(frame));
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-size="14">{year}</text>"#,
            MAP_LEFT + map_w / 2.0,
            MAP_TOP - 10.0
        );
        let _ = writeln!(svg, r#"<g clip-path="url(#{MAP_CLIP_ID})">"#);
        for scene in year_scenes {
            let (cx, cy) = project(scene.geo.lon, scene.geo.lat);
            let _ = writeln!(
                svg,
                r#"<circle cx="{cx:.1}" cy="{cy:.1}" r="{MARKER_RADIUS}" fill="{}"/>"#,
                reds(scene.num_scenes as f64)
            );
        }
        let _ = writeln!(svg, "</g>\n</g>");
    }

    render_colorbar(&mut svg);
    svg.push_str("</svg>\n");
    svg
}

pub fn write<P: AsRef<Path>>(scenes: &[ClearScenes], path: P) -> Result<()> {
    fs::write(path, render(scenes))?;
    Ok(())
}
