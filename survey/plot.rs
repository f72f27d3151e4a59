//! Residual box plot by group, written as a PNG.

use plotters::prelude::*;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlotError {
    #[error("Failed to create the plot directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to draw the plot: {0}")]
    Drawing(String),
    #[error("No group has any residuals to plot.")]
    NoData,
}

fn drawing_err<E: std::fmt::Display>(e: E) -> PlotError {
    PlotError::Drawing(e.to_string())
}

/// One box per non-empty group, in the given order, with a reference line
/// at zero.
pub fn residual_boxplot(
    path: &Path,
    title: &str,
    groups: &[(String, Vec<f64>)],
    size: (u32, u32),
) -> Result<(), PlotError> {
    let groups: Vec<&(String, Vec<f64>)> = groups.iter().filter(|(_, v)| !v.is_empty()).collect();
    if groups.is_empty() {
        return Err(PlotError::NoData);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    // plotters' series bounds require `'static` segment coordinates.
    let labels: &'static [String] = Vec::leak(
        groups
            .iter()
            .map(|(label, values)| format!("{label} (n={})", values.len()))
            .collect(),
    );
    let (lo, hi) = groups
        .iter()
        .flat_map(|(_, v)| v.iter())
        .fold((0.0f64, 0.0f64), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let pad = ((hi - lo) * 0.05).max(1e-3);
    let y_range = (lo - pad) as f32..(hi + pad) as f32;

    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(drawing_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 36))
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(80)
        .build_cartesian_2d(labels[..].into_segmented(), y_range)
        .map_err(drawing_err)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .y_desc("Residual")
        .label_style(("sans-serif", 20))
        .draw()
        .map_err(drawing_err)?;

    chart
        .draw_series(groups.iter().zip(labels).map(|((_, values), label)| {
            Boxplot::new_vertical(SegmentValue::CenterOf(label), &Quartiles::new(&values[..]))
                .width(40)
                .style(BLUE)
        }))
        .map_err(drawing_err)?;

    let ends = [SegmentValue::Exact(&labels[0]), SegmentValue::Last];
    chart
        .draw_series(LineSeries::new(ends.into_iter().map(|x| (x, 0.0f32)), RED.stroke_width(2)))
        .map_err(drawing_err)?;

    root.present().map_err(drawing_err)?;
    log::info!("Residual box plot written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_groups_are_rejected() {
        let dir = tempdir().unwrap();
        let groups = vec![("a".to_string(), vec![]), ("b".to_string(), vec![])];
        assert!(matches!(
            residual_boxplot(&dir.path().join("x.png"), "t", &groups, (400, 300)),
            Err(PlotError::NoData)
        ));
    }
}
