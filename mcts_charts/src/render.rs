//! Draw one `ChartSpec` and persist it.
//!
//! Charts are drawn with plotters onto an in-memory SVG surface, then either
//! written as-is or encoded to PDF with svg2pdf. The surface is dropped once
//! the file is written, so nothing carries over between charts.

use std::fs;
use std::panic;
use std::path::{Path, PathBuf};

use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};

use crate::aggregate::{bar_groups, line_series, Bar, Series};
use crate::plan::{ChartKind, ChartSpec};
use crate::{ChartError, Table};

type DrawResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// matplotlib's `tab10` cycle.
const TAB10: [RGBColor; 10] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
    RGBColor(188, 189, 34),
    RGBColor(23, 190, 207),
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Pdf,
    Svg,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Svg => "svg",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderOptions {
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            format: OutputFormat::Pdf,
        }
    }
}

enum ChartData {
    Lines(Vec<Series>),
    Bars(Vec<Bar>),
}

/// Where `spec` lands inside `dir` for the given format.
pub fn output_path(spec: &ChartSpec, dir: &Path, format: OutputFormat) -> PathBuf {
    dir.join(format!("{}.{}", spec.file_stem(), format.extension()))
}

/// Render `spec` from `table` into `dir`, overwriting any previous file.
pub fn render_chart(
    spec: &ChartSpec,
    table: &Table,
    dir: &Path,
    opts: &RenderOptions,
) -> Result<PathBuf, ChartError> {
    let data = resolve(spec, table)?;
    let svg = draw_svg(spec, &data, opts)?;
    let bytes = match opts.format {
        OutputFormat::Pdf => svg_to_pdf(spec, &svg)?,
        OutputFormat::Svg => svg.into_bytes(),
    };

    let path = output_path(spec, dir, opts.format);
    fs::write(&path, bytes).map_err(|source| ChartError::IoWriteError {
        chart: spec.id(),
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

fn render_error(spec: &ChartSpec, message: impl Into<String>) -> ChartError {
    ChartError::RenderError {
        chart: spec.id(),
        message: message.into(),
    }
}

fn resolve(spec: &ChartSpec, table: &Table) -> Result<ChartData, ChartError> {
    if spec.table != table.source() {
        return Err(render_error(
            spec,
            format!("expected the {}, got the {}", spec.table, table.source()),
        ));
    }

    let filtered;
    let table = match &spec.filter {
        Some(filter) => {
            filtered = table.filter(filter).ok_or_else(|| {
                render_error(
                    spec,
                    format!("{} has no column '{}'", table.source(), filter.column),
                )
            })?;
            &filtered
        }
        None => table,
    };

    let data = match spec.kind {
        ChartKind::Line => line_series(table, spec.x, spec.y, spec.hue).map(ChartData::Lines),
        ChartKind::Bar => bar_groups(table, spec.x, spec.y).map(ChartData::Bars),
    };
    data.map_err(|column| {
        render_error(
            spec,
            format!("{} has no column '{}'", table.source(), column),
        )
    })
}

fn draw_svg(spec: &ChartSpec, data: &ChartData, opts: &RenderOptions) -> Result<String, ChartError> {
    let mut svg = String::new();
    let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| -> Result<(), String> {
        let root = SVGBackend::with_string(&mut svg, (opts.width, opts.height)).into_drawing_area();
        let drawn = match data {
            ChartData::Lines(series) => draw_line_chart(root, spec, series),
            ChartData::Bars(bars) => draw_bar_chart(root, spec, bars),
        };
        drawn.map_err(|e| format!("plotting error: {}", e))
    }));

    match outcome {
        Ok(Ok(())) => Ok(svg),
        Ok(Err(message)) => Err(render_error(spec, message)),
        Err(_) => Err(render_error(spec, "plotting backend panicked")),
    }
}

fn svg_to_pdf(spec: &ChartSpec, svg: &str) -> Result<Vec<u8>, ChartError> {
    let mut options = svg2pdf::usvg::Options::default();
    options.fontdb_mut().load_system_fonts();
    let tree = svg2pdf::usvg::Tree::from_str(svg, &options)
        .map_err(|e| render_error(spec, format!("invalid chart SVG: {}", e)))?;
    svg2pdf::to_pdf(
        &tree,
        svg2pdf::ConversionOptions::default(),
        svg2pdf::PageOptions::default(),
    )
    .map_err(|e| render_error(spec, format!("PDF encoding failed: {}", e)))
}

fn tab10(idx: usize) -> RGBColor {
    TAB10[idx % TAB10.len()]
}

fn font(size: f64) -> FontDesc<'static> {
    FontDesc::new(FontFamily::SansSerif, size, FontStyle::Normal)
}

/// Data range with a 5% pad; degenerate or empty input gets a unit-sized window.
fn padded_range(values: impl Iterator<Item = f64>) -> std::ops::Range<f64> {
    let (min, max) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if !min.is_finite() {
        return 0.0..1.0;
    }
    let span = max - min;
    if span <= 0.0 {
        let pad = (min.abs() * 0.05).max(0.5);
        return (min - pad)..(max + pad);
    }
    (min - span * 0.05)..(max + span * 0.05)
}

fn draw_line_chart<DB>(
    root: DrawingArea<DB, Shift>,
    spec: &ChartSpec,
    series: &[Series],
) -> DrawResult
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;

    let x_range = padded_range(series.iter().flat_map(|s| s.points.iter().map(|p| p.x)));
    let y_range = padded_range(series.iter().flat_map(|s| s.points.iter().filter_map(|p| p.y)));

    let mut chart = ChartBuilder::on(&root)
        .caption(&spec.title, font(18.0))
        .margin(12)
        .x_label_area_size(42)
        .y_label_area_size(56)
        .build_cartesian_2d(x_range, y_range)?;

    let x_column = spec.x;
    let x_formatter = move |v: &f64| x_column.format_value(*v);

    {
        let mut mesh = chart.configure_mesh();
        mesh.x_desc(spec.x_label.as_str())
            .y_desc(spec.y_label.as_str())
            .x_label_formatter(&x_formatter)
            .label_style(font(12.0))
            .axis_desc_style(font(14.0));
        if !spec.grid {
            mesh.disable_mesh();
        }
        mesh.draw()?;
    }

    if series.is_empty() {
        root.present()?;
        return Ok(());
    }

    if let Some(title) = spec.legend_title.as_deref() {
        chart
            .draw_series(std::iter::empty::<PathElement<(f64, f64)>>())?
            .label(title)
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], TRANSPARENT));
    }

    for (idx, s) in series.iter().enumerate() {
        let color = tab10(idx);
        let label = match (spec.hue, s.level) {
            (Some(hue), Some(level)) => hue.format_value(level),
            _ => spec.y.label().to_string(),
        };

        let mut segments = s.segments();
        if segments.is_empty() {
            // All gaps: keep the legend entry.
            segments.push(Vec::new());
        }
        for (n, segment) in segments.into_iter().enumerate() {
            let drawn = chart.draw_series(
                LineSeries::new(segment, color.stroke_width(2)).point_size(4),
            )?;
            if n == 0 {
                drawn.label(label.as_str()).legend(move |(x, y)| {
                    PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2))
                });
            }
        }
    }

    if spec.hue.is_some() {
        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK.mix(0.3))
            .label_font(font(12.0))
            .position(SeriesLabelPosition::UpperRight)
            .draw()?;
    }

    root.present()?;
    Ok(())
}

fn draw_bar_chart<DB>(root: DrawingArea<DB, Shift>, spec: &ChartSpec, bars: &[Bar]) -> DrawResult
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;

    let slots = bars.len().max(1) as i32;
    let y_max = bars
        .iter()
        .filter_map(|b| b.value)
        .filter(|v| v.is_finite())
        .fold(0.0_f64, f64::max);
    let y_top = if y_max > 0.0 { y_max * 1.05 } else { 1.0 };

    let mut chart = ChartBuilder::on(&root)
        .caption(&spec.title, font(18.0))
        .margin(12)
        .x_label_area_size(42)
        .y_label_area_size(56)
        .build_cartesian_2d((0..slots).into_segmented(), 0.0..y_top)?;

    let labels: Vec<String> = bars
        .iter()
        .map(|b| spec.x.format_value(b.category))
        .collect();
    let x_formatter = |v: &SegmentValue<i32>| match v {
        SegmentValue::CenterOf(i) => labels.get(*i as usize).cloned().unwrap_or_default(),
        _ => String::new(),
    };

    {
        let mut mesh = chart.configure_mesh();
        mesh.x_desc(spec.x_label.as_str())
            .y_desc(spec.y_label.as_str())
            .x_labels(slots as usize + 1)
            .x_label_formatter(&x_formatter)
            .label_style(font(12.0))
            .axis_desc_style(font(14.0))
            .disable_x_mesh();
        if !spec.grid {
            mesh.disable_mesh();
        }
        mesh.draw()?;
    }

    chart.draw_series(bars.iter().enumerate().filter_map(|(idx, bar)| {
        let value = bar.value?;
        let mut rect = Rectangle::new(
            [
                (SegmentValue::Exact(idx as i32), 0.0),
                (SegmentValue::Exact(idx as i32 + 1), value),
            ],
            tab10(idx).filled(),
        );
        rect.set_margin(0, 0, 6, 6);
        Some(rect)
    }))?;

    root.present()?;
    Ok(())
}
