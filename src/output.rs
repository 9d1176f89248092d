//! CSV emission of per-trigger statistics and coalition traces.

use std::fs::File;

use csv::{QuoteStyle, Writer, WriterBuilder};

use crate::error::Result;

fn csv_writer(path: &str) -> Result<Writer<File>> {
    Ok(WriterBuilder::new()
        .quote_style(QuoteStyle::NonNumeric)
        .from_path(path)?)
}

fn format_real(x: f64) -> String {
    // Distinguishable spellings for the sentinel values that can reach the
    // output (unsolved singletons, empty partitions).
    if x.is_nan() {
        "nan".to_string()
    } else if x == f64::INFINITY {
        "inf".to_string()
    } else if x == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        format!("{}", x)
    }
}

/// Relative increment of `x` over the baseline `y`.
fn relative_increment(x: f64, y: f64) -> f64 {
    (x - y) / y.abs()
}

/// One row per coalition formation trigger: per-provider coalition profit,
/// alone profit and their relative increment.
pub struct StatsWriter {
    writer: Writer<File>,
    num_fps: usize,
}

impl StatsWriter {
    pub fn create(path: &str, num_fps: usize) -> Result<Self> {
        let mut writer = csv_writer(path)?;
        let mut header = vec![
            "Timestamp".to_string(),
            "Coalition Formation Start Time".to_string(),
            "Coalition Formation Duration".to_string(),
        ];
        for fp in 0..num_fps {
            header.push(format!("FP {} - Coalition Profit", fp));
            header.push(format!("FP {} - Alone Profit", fp));
            header.push(format!("FP {} - Coalition Profit vs. Alone Profit", fp));
        }
        writer.write_record(&header)?;
        Ok(Self { writer, num_fps })
    }

    pub fn write_row(
        &mut self,
        timestamp: f64,
        start_time: f64,
        duration: f64,
        coalition_profits: &[f64],
        alone_profits: &[f64],
    ) -> Result<()> {
        debug_assert_eq!(coalition_profits.len(), self.num_fps);
        debug_assert_eq!(alone_profits.len(), self.num_fps);
        let mut record = vec![
            format_real(timestamp),
            format_real(start_time),
            format_real(duration),
        ];
        for fp in 0..self.num_fps {
            record.push(format_real(coalition_profits[fp]));
            record.push(format_real(alone_profits[fp]));
            record.push(format_real(relative_increment(
                coalition_profits[fp],
                alone_profits[fp],
            )));
        }
        self.writer.write_record(&record)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// One row per selected partition per trigger, carrying the coalition
/// structure in compact bracketed form.
pub struct TraceWriter {
    writer: Writer<File>,
    num_fps: usize,
}

impl TraceWriter {
    pub fn create(path: &str, num_fps: usize) -> Result<Self> {
        let mut writer = csv_writer(path)?;
        let mut header = vec![
            "Timestamp".to_string(),
            "Coalition Formation Start Time".to_string(),
            "Coalition Formation Duration".to_string(),
            "Coalition Structure".to_string(),
        ];
        for fp in 0..num_fps {
            header.push(format!("FP {} - Alone Profit", fp));
            header.push(format!("FP {} - Coalition Profit", fp));
        }
        writer.write_record(&header)?;
        Ok(Self { writer, num_fps })
    }

    pub fn write_row(
        &mut self,
        timestamp: f64,
        start_time: f64,
        duration: f64,
        structure: &str,
        alone_profits: &[f64],
        coalition_profits: &[f64],
    ) -> Result<()> {
        debug_assert_eq!(coalition_profits.len(), self.num_fps);
        debug_assert_eq!(alone_profits.len(), self.num_fps);
        let mut record = vec![
            format_real(timestamp),
            format_real(start_time),
            format_real(duration),
            structure.to_string(),
        ];
        for fp in 0..self.num_fps {
            record.push(format_real(alone_profits[fp]));
            record.push(format_real(coalition_profits[fp]));
        }
        self.writer.write_record(&record)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
