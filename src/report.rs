use crate::error::{Error, Result};
use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
};

/// One line of the per-epoch training history.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub run: usize,
    pub epoch: usize,
    pub loss: f64,
    pub rate: f64,
    pub approx_acc: Option<f64>,
}

/// Appends per-epoch rates (and losses) to `rate_<strategy>.csv`, writing the
/// header once.
#[derive(Debug)]
pub struct RateLog {
    path: PathBuf,
}

impl RateLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_strategy(artifact_dir: &Path, strategy: &str) -> Self {
        Self::new(artifact_dir.join(format!("rate_{strategy}.csv")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &EpochRecord) -> Result<()> {
        let exists = self.path.exists() && self.path.metadata()?.len() > 0;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut wtr = csv::WriterBuilder::new().has_headers(!exists).from_writer(file);
        wtr.serialize(record)?;
        wtr.flush()?;
        Ok(())
    }

    pub fn read(&self) -> Result<Vec<EpochRecord>> {
        let mut rdr = csv::Reader::from_path(&self.path)?;
        rdr.deserialize().map(|r| r.map_err(Error::from)).collect()
    }
}

/// Draws loss and augmentation-rate curves of one run side by side.
pub fn plot_history(path: &Path, records: &[EpochRecord]) -> Result<()> {
    // Pantone 18-1750 Viva Magenta: RGB(187, 38, 73)
    let viva_magenta = RGBColor(187, 38, 73);
    // Pantone 17-3938 Very Peri: RGB(102, 103, 171)
    let very_peri = RGBColor(102, 103, 171);
    // Pantone 19-4052 Classic Blue: RGB(15, 76, 129)
    let classic_blue = RGBColor(15, 76, 129);

    let plot_err = |e: &dyn std::fmt::Display| Error::Plot(e.to_string());

    let root = BitMapBackend::new(path, (1280, 480)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_err(&e))?;
    let (left, right) = root.split_horizontally(640);

    let max_epoch = records.iter().map(|r| r.epoch).max().unwrap_or(1) as f64;
    let panels = [
        (left, "Loss", viva_magenta, records.iter().map(|r| (r.epoch as f64, r.loss)).collect::<Vec<_>>()),
        (right, "Rate", classic_blue, records.iter().map(|r| (r.epoch as f64, r.rate)).collect::<Vec<_>>()),
    ];
    for (area, label, color, points) in panels {
        let lo = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
        let hi = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
        let (lo, hi) = if lo.is_finite() && hi > lo { (lo, hi) } else { (lo.min(0.0), lo.max(0.0) + 1.0) };

        let mut chart = ChartBuilder::on(&area)
            .margin(5)
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(0f64..max_epoch, lo..hi)
            .map_err(|e| plot_err(&e))?;
        chart
            .configure_mesh()
            .x_desc("Epoch")
            .y_desc(label)
            .label_style(("sans-serif", 15).into_font().color(&very_peri))
            .draw()
            .map_err(|e| plot_err(&e))?;
        chart
            .draw_series(LineSeries::new(points, &color))
            .map_err(|e| plot_err(&e))?;
    }
    root.present().map_err(|e| plot_err(&e))?;
    Ok(())
}
