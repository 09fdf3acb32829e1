//! ASCII plotting of fitted levels curves for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid), optimized for:
//! - quick visual sanity checks in a terminal
//! - deterministic output (helpful for golden tests)
//!
//! Both axes span the 8-bit range `[0, 255]`, input on x and output on y.
//!
//! Plot elements:
//! - fitted curve: `*`
//! - optional sample pairs (e.g. matched quantiles): `o`

use crate::domain::LevelsAdjustment;
use crate::models::lookup_table;

const MAX_LEVEL: f64 = 255.0;

/// Render the curve of one channel.
pub fn render_curve_plot(label: &str, p: &LevelsAdjustment, width: usize, height: usize) -> String {
    render_curve_plot_with_samples(label, p, &[], width, height)
}

/// Render the curve of one channel with `(input, output)` sample pairs in
/// 8-bit units overlaid.
pub fn render_curve_plot_with_samples(
    label: &str,
    p: &LevelsAdjustment,
    samples: &[(f64, f64)],
    width: usize,
    height: usize,
) -> String {
    let width = width.max(10);
    let height = height.max(5);
    let table = lookup_table(p);

    let mut grid = vec![vec![' '; width]; height];

    // Draw curve first (so points can overlay).
    let curve = sample_curve(&table, width);
    draw_curve(&mut grid, &curve);

    for &(x, y) in samples {
        if !(x.is_finite() && y.is_finite()) {
            continue;
        }
        grid[map_y(y, height)][map_x(x, width)] = 'o';
    }

    let mut out = String::new();
    out.push_str(&format!("Curve {label}: x=[0, 255] in | y=[0, 255] out\n"));
    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }
    out
}

/// One curve point per column, read straight from the lookup table.
fn sample_curve(table: &[u8; 256], n: usize) -> Vec<(f64, f64)> {
    let n = n.max(2);
    (0..n)
        .map(|i| {
            let x = (i as f64 / (n as f64 - 1.0) * MAX_LEVEL).round();
            (x, f64::from(table[x as usize]))
        })
        .collect()
}

fn map_x(x: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = (x / MAX_LEVEL).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = (y / MAX_LEVEL).clamp(0.0, 1.0);
    // y=top is 255 -> row 0
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

fn draw_curve(grid: &mut [Vec<char>], curve: &[(f64, f64)]) {
    if curve.len() < 2 {
        return;
    }
    let height = grid.len();
    let width = grid[0].len();

    let mut prev = None;
    for &(x, y) in curve {
        let col = map_x(x, width);
        let row = map_y(y, height);
        if let Some((c0, r0)) = prev {
            draw_line(grid, c0, r0, col, row, '*');
        } else {
            grid[row][col] = '*';
        }
        prev = Some((col, row));
    }
}

/// Integer line drawing (Bresenham-ish).
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let mut x0 = x0 as isize;
    let mut y0 = y0 as isize;
    let x1 = x1 as isize;
    let y1 = y1 as isize;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0
            && (y0 as usize) < grid.len()
            && x0 >= 0
            && (x0 as usize) < grid[0].len()
            && grid[y0 as usize][x0 as usize] == ' '
        {
            grid[y0 as usize][x0 as usize] = ch;
        }

        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}
