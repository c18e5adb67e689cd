//! Stacked bar chart of cumulative scenes per spacecraft, rendered as SVG.
use super::CumulativeScenes;
use anyhow::Result;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

const WIDTH: f64 = 900.0;
const HEIGHT: f64 = 560.0;
const FONT_SIZE: f64 = 24.0;
const MARGIN_LEFT: f64 = 110.0;
const MARGIN_RIGHT: f64 = 24.0;
const MARGIN_TOP: f64 = 18.0;
const MARGIN_BOTTOM: f64 = 70.0;
const X_TICK_EVERY: i32 = 5;
const TICK_ANGLE: f64 = 25.0;

/// Plotly's qualitative "Prism" palette, reversed.
const PALETTE: [&str; 11] = [
    "#666666", "#6f4070", "#94346e", "#cc503e", "#e17c05", "#edad08", "#73af48", "#0f8554",
    "#38a6a5", "#1d6996", "#5f4690",
];

pub(crate) fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// A round tick step giving roughly five ticks up to `max`.
fn tick_step(max: f64) -> f64 {
    if max <= 0.0 {
        return 1.0;
    }
    let raw = max / 5.0;
    let magnitude = 10f64.powi(raw.log10().floor() as i32);
    let step = [1.0, 2.0, 5.0, 10.0]
        .into_iter()
        .find(|m| m * magnitude >= raw)
        .unwrap_or(10.0);
    step * magnitude
}

/// Short SI label, e.g. `500k` or `1.5M`.
fn si_label(value: f64) -> String {
    let (scaled, suffix) = if value >= 1e6 {
        (value / 1e6, "M")
    } else if value >= 1e3 {
        (value / 1e3, "k")
    } else {
        (value, "")
    };
    let text = format!("{:.1}", scaled);
    let text = text.strip_suffix(".0").unwrap_or(&text);
    format!("{}{}", text, suffix)
}

pub fn render(scenes: &CumulativeScenes) -> String {
    let plot_w = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_h = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let max_total = scenes.totals().into_iter().max().unwrap_or(0) as f64;
    let step = tick_step(max_total);
    let y_max = (max_total / step).ceil().max(1.0) * step;
    let y = |v: f64| MARGIN_TOP + plot_h - v / y_max * plot_h;

    let n = scenes.years.len().max(1) as f64;
    let slot = plot_w / n;
    let bar_w = slot * 0.8;

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="Open Sans, Arial, sans-serif" font-size="{FONT_SIZE}">"#
    );
    let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);

    // Gridlines and y ticks
    let mut tick = 0.0;
    while tick <= y_max + step / 2.0 {
        let ty = y(tick);
        let _ = writeln!(
            svg,
            r##"<line x1="{MARGIN_LEFT}" y1="{ty:.1}" x2="{:.1}" y2="{ty:.1}" stroke="#ebf0f8"/>"##,
            WIDTH - MARGIN_RIGHT
        );
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{ty:.1}" text-anchor="end" dominant-baseline="middle">{}</text>"#,
            MARGIN_LEFT - 8.0,
            si_label(tick)
        );
        tick += step;
    }
    let _ = writeln!(
        svg,
        r#"<text transform="translate({FONT_SIZE},{:.1}) rotate(-90)" text-anchor="middle">Cumulative Scenes</text>"#,
        MARGIN_TOP + plot_h / 2.0
    );

    // Bars, first series at the bottom of each stack
    for (i, year) in scenes.years.iter().enumerate() {
        let x = MARGIN_LEFT + slot * i as f64 + (slot - bar_w) / 2.0;
        let mut base = 0.0;
        for (s, (spacecraft, counts)) in scenes.series.iter().enumerate() {
            let count = counts[i] as f64;
            if count > 0.0 {
                let _ = writeln!(
                    svg,
                    r#"<rect x="{x:.1}" y="{:.1}" width="{bar_w:.1}" height="{:.1}" fill="{}"><title>{} {}: {}</title></rect>"#,
                    y(base + count),
                    count / y_max * plot_h,
                    PALETTE[s % PALETTE.len()],
                    escape(spacecraft),
                    year,
                    counts[i]
                );
            }
            base += count;
        }

        if year % X_TICK_EVERY == 0 {
            let cx = x + bar_w / 2.0;
            let axis = MARGIN_TOP + plot_h;
            let _ = writeln!(
                svg,
                r##"<line x1="{cx:.1}" y1="{axis:.1}" x2="{cx:.1}" y2="{:.1}" stroke="#444"/>"##,
                axis + 5.0
            );
            let _ = writeln!(
                svg,
                r#"<text transform="translate({cx:.1},{:.1}) rotate({TICK_ANGLE})" text-anchor="start">{year}</text>"#,
                axis + FONT_SIZE
            );
        }
    }

    // Legend in reverse stacking order, top left
    let lx = MARGIN_LEFT + plot_w * 0.02;
    let ly = MARGIN_TOP + plot_h * 0.06;
    for (row, (s, (spacecraft, _))) in scenes.series.iter().enumerate().rev().enumerate() {
        let ry = ly + row as f64 * FONT_SIZE * 1.25;
        let _ = writeln!(
            svg,
            r#"<rect x="{lx:.1}" y="{:.1}" width="{FONT_SIZE}" height="{:.1}" fill="{}"/>"#,
            ry - FONT_SIZE * 0.4,
            FONT_SIZE * 0.8,
            PALETTE[s % PALETTE.len()]
        );
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{ry:.1}" dominant-baseline="middle">{}</text>"#,
            lx + FONT_SIZE * 1.4,
            escape(spacecraft)
        );
    }

    svg.push_str("</svg>\n");
    svg
}

pub fn write<P: AsRef<Path>>(scenes: &CumulativeScenes, path: P) -> Result<()> {
    fs::write(path, render(scenes))?;
    Ok(())
}
