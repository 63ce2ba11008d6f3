use std::panic;
use std::path::Path;

use anyhow::Result;
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};
use plotters_backend::{
    BackendColor, BackendCoord, BackendStyle, BackendTextStyle, DrawingBackend, DrawingErrorKind,
};
use tracing::debug;

const CHART_SIZE: (u32, u32) = (1280, 760);

#[derive(Clone, Debug)]
pub struct PlotSeries {
    pub label: String,
    pub points: Vec<(f64, f64)>,
    pub color: RGBColor,
}

impl PlotSeries {
    /// Pair sizes with values, dropping sizes without a finite value.
    pub fn new(label: impl Into<String>, xs: &[f64], ys: &[f64], color: RGBColor) -> Self {
        let points = xs
            .iter()
            .copied()
            .zip(ys.iter().copied())
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .collect();
        Self {
            label: label.into(),
            points,
            color,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum ChartKind {
    Png,
    Svg,
}

/// Blue, red, green first, then a few extras for additional variants.
pub fn palette(index: usize) -> RGBColor {
    const COLORS: [RGBColor; 6] = [
        RGBColor(31, 119, 180),
        RGBColor(214, 39, 40),
        RGBColor(44, 160, 44),
        RGBColor(148, 103, 189),
        RGBColor(255, 127, 14),
        RGBColor(90, 90, 90),
    ];
    COLORS[index % COLORS.len()]
}

/// Render without letting a backend panic (e.g. no usable system font)
/// take the whole run down.
pub fn render_chart_guard(
    series: &[PlotSeries],
    path: &Path,
    kind: ChartKind,
    markers: bool,
) -> Result<(), String> {
    let render = || render_chart(series, path, kind, markers);
    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
        .map_err(|e| format!("plotting error: {}", e))
}

fn render_chart(series: &[PlotSeries], path: &Path, kind: ChartKind, markers: bool) -> Result<()> {
    if series.iter().all(|s| s.points.is_empty()) {
        return Ok(());
    }
    match kind {
        ChartKind::Png => {
            let backend = BitMapBackend::new(path, CHART_SIZE);
            draw_chart(FontSafeBackend::new(backend).into_drawing_area(), series, markers)
        }
        ChartKind::Svg => {
            let backend = SVGBackend::new(path, CHART_SIZE);
            draw_chart(FontSafeBackend::new(backend).into_drawing_area(), series, markers)
        }
    }
}

fn draw_chart<DB>(
    root: DrawingArea<DB, plotters::coord::Shift>,
    series: &[PlotSeries],
    markers: bool,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let all = || series.iter().flat_map(|s| s.points.iter());
    let x_min = all().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let x_max = all().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let y_max = all().map(|p| p.1).fold(0.0, f64::max);
    let (x_lo, x_hi) = if x_max > x_min {
        (x_min, x_max)
    } else {
        (x_min - 1.0, x_max + 1.0)
    };
    let y_hi = if y_max > 0.0 { y_max * 1.1 } else { 1.0 };

    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(
            "Line-of-Sight",
            FontDesc::new(FontFamily::SansSerif, 26.0, FontStyle::Normal),
        )
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 50)
        .build_cartesian_2d(x_lo..x_hi, 0.0..y_hi)?;

    chart
        .configure_mesh()
        .x_desc("n - points count")
        .y_desc("time (μs)")
        .x_label_formatter(&|v| format!("{:.0}", v))
        .y_label_formatter(&|v| format!("{:.1}", v))
        .axis_desc_style(FontDesc::new(FontFamily::SansSerif, 18.0, FontStyle::Normal))
        .label_style(FontDesc::new(FontFamily::SansSerif, 16.0, FontStyle::Normal))
        .draw()?;

    for s in series {
        let color = s.color;
        let style = ShapeStyle {
            color: color.to_rgba(),
            filled: false,
            stroke_width: 2,
        };
        chart
            .draw_series(LineSeries::new(s.points.iter().copied(), style))?
            .label(s.label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], color));
        if markers {
            chart.draw_series(s.points.iter().map(|&p| Circle::new(p, 4, color.filled())))?;
        }
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK.mix(0.3))
        .label_font(FontDesc::new(FontFamily::SansSerif, 16.0, FontStyle::Normal))
        .position(SeriesLabelPosition::UpperLeft)
        .draw()?;

    root.present()?;
    Ok(())
}

/// Forwards to the wrapped backend but drops text the font stack cannot
/// render instead of panicking, so headless hosts still get the curves.
struct FontSafeBackend<DB> {
    inner: DB,
}

impl<DB> FontSafeBackend<DB> {
    fn new(inner: DB) -> Self {
        Self { inner }
    }
}

impl<DB: DrawingBackend> DrawingBackend for FontSafeBackend<DB> {
    type ErrorType = DB::ErrorType;

    fn get_size(&self) -> (u32, u32) {
        self.inner.get_size()
    }

    fn ensure_prepared(&mut self) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.ensure_prepared()
    }

    fn present(&mut self) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.present()
    }

    fn draw_pixel(
        &mut self,
        point: BackendCoord,
        color: BackendColor,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_pixel(point, color)
    }

    fn draw_line<S: BackendStyle>(
        &mut self,
        from: BackendCoord,
        to: BackendCoord,
        style: &S,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_line(from, to, style)
    }

    fn draw_rect<S: BackendStyle>(
        &mut self,
        upper_left: BackendCoord,
        bottom_right: BackendCoord,
        style: &S,
        fill: bool,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_rect(upper_left, bottom_right, style, fill)
    }

    fn draw_path<S: BackendStyle, I: IntoIterator<Item = BackendCoord>>(
        &mut self,
        path: I,
        style: &S,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_path(path, style)
    }

    fn draw_circle<S: BackendStyle>(
        &mut self,
        center: BackendCoord,
        radius: u32,
        style: &S,
        fill: bool,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_circle(center, radius, style, fill)
    }

    fn fill_polygon<S: BackendStyle, I: IntoIterator<Item = BackendCoord>>(
        &mut self,
        vert: I,
        style: &S,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.fill_polygon(vert, style)
    }

    fn blit_bitmap(
        &mut self,
        pos: BackendCoord,
        (iw, ih): (u32, u32),
        src: &[u8],
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.blit_bitmap(pos, (iw, ih), src)
    }

    fn draw_text<TStyle: BackendTextStyle>(
        &mut self,
        text: &str,
        style: &TStyle,
        pos: BackendCoord,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        match panic::catch_unwind(panic::AssertUnwindSafe(|| {
            self.inner.draw_text(text, style, pos)
        })) {
            Ok(Err(DrawingErrorKind::FontError(err))) => {
                debug!("skipping label '{}': {}", text, err);
                Ok(())
            }
            Ok(result) => result,
            Err(_) => {
                debug!("skipping label '{}': font backend panicked", text);
                Ok(())
            }
        }
    }

    fn estimate_text_size<TStyle: BackendTextStyle>(
        &self,
        text: &str,
        style: &TStyle,
    ) -> Result<(u32, u32), DrawingErrorKind<Self::ErrorType>> {
        match panic::catch_unwind(panic::AssertUnwindSafe(|| {
            self.inner.estimate_text_size(text, style)
        })) {
            Ok(Ok(size)) => Ok(size),
            _ => {
                // rough monospace estimate so layout can continue
                let height = style.size().max(1.0);
                let width = height * 0.6 * text.chars().count() as f64;
                Ok((width.ceil() as u32, height.ceil() as u32))
            }
        }
    }
}
