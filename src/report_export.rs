use std::path::Path;

use rust_xlsxwriter::{Workbook, Worksheet, XlsxError};

use crate::backtest::ThresholdCell;
use crate::buckets::BucketStats;
use crate::calibration::CalibrationReport;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    pub sheets: usize,
    pub rows: usize,
}

pub fn export_report_xlsx(path: &Path, report: &CalibrationReport) -> Result<ExportSummary> {
    let mut sheets: Vec<(&str, Vec<Vec<String>>)> = Vec::new();

    let s = &report.summary;
    sheets.push((
        "Summary",
        vec![
            vec!["metric".to_string(), "value".to_string()],
            vec!["completed".to_string(), s.overall.count.to_string()],
            vec!["correct".to_string(), s.overall.correct.to_string()],
            vec!["accuracy %".to_string(), opt_fmt(s.overall.accuracy_pct, 1)],
            vec!["total P/L".to_string(), format!("{:.2}", s.overall.total_profit_loss)],
            vec!["ROI %".to_string(), opt_fmt(s.overall.roi_pct, 1)],
            vec!["avg odds".to_string(), opt_fmt(s.avg_predicted_odds, 2)],
            vec!["brier".to_string(), format!("{:.4}", s.metrics.brier)],
            vec!["log loss".to_string(), format!("{:.4}", s.metrics.log_loss)],
        ],
    ));

    let mut confidence = vec![vec![
        "band".to_string(),
        "count".to_string(),
        "correct".to_string(),
        "accuracy %".to_string(),
        "expected %".to_string(),
        "gap".to_string(),
        "verdict".to_string(),
        "ROI %".to_string(),
    ]];
    for row in &report.confidence {
        confidence.push(vec![
            row.stats.label.clone(),
            row.stats.count.to_string(),
            row.stats.correct.to_string(),
            opt_fmt(row.stats.accuracy_pct, 1),
            format!("{:.1}", row.expected_pct),
            opt_fmt(row.gap, 1),
            row.verdict.label().to_string(),
            opt_fmt(row.stats.roi_pct, 1),
        ]);
    }
    sheets.push(("Confidence", confidence));

    let mut misses = vec![vec![
        "metric".to_string(),
        "correct avg".to_string(),
        "incorrect avg".to_string(),
        "delta".to_string(),
    ]];
    for row in &report.miss_patterns {
        misses.push(vec![
            row.metric.clone(),
            opt_fmt(row.correct_avg, 2),
            opt_fmt(row.incorrect_avg, 2),
            opt_fmt(row.delta, 2),
        ]);
    }
    sheets.push(("MissPatterns", misses));

    sheets.push(("Variance", bucket_rows(&report.variance)));
    sheets.push(("Consensus", bucket_rows(&report.consensus)));
    sheets.push(("ExpectedValue", bucket_rows(&report.expected_value)));
    sheets.push(("League", bucket_rows(&report.league)));
    sheets.push(("MarketType", bucket_rows(&report.market_type)));
    sheets.push(("OddsRange", bucket_rows(&report.odds_range)));
    sheets.push(("OutcomeType", bucket_rows(&report.outcome_type)));
    sheets.push(("ProbabilityGap", bucket_rows(&report.probability_gap)));
    sheets.push(("FormAlignment", bucket_rows(&report.form_alignment)));
    sheets.push(("Strategy", bucket_rows(&report.strategy)));

    let bt = &report.backtest;
    let mut grid = cell_rows(std::slice::from_ref(&bt.production), "production");
    grid.extend(cell_rows(&bt.grid, "grid").into_iter().skip(1));
    grid.extend(cell_rows(&bt.odds_sweep, "max odds").into_iter().skip(1));
    grid.extend(cell_rows(&bt.gap_sweep, "min gap").into_iter().skip(1));
    sheets.push(("Backtest", grid));

    let mut findings = vec![vec![
        "severity".to_string(),
        "topic".to_string(),
        "message".to_string(),
    ]];
    for f in &report.findings {
        findings.push(vec![format!("{:?}", f.severity), f.topic.clone(), f.message.clone()]);
    }
    sheets.push(("Findings", findings));

    let mut workbook = Workbook::new();
    let mut rows = 0usize;
    for (name, data) in &sheets {
        let sheet = workbook.add_worksheet();
        sheet.set_name(*name).map_err(|err| export_err(name, err))?;
        write_rows(sheet, data).map_err(|err| export_err(name, err))?;
        rows += data.len().saturating_sub(1);
    }
    workbook
        .save(path)
        .map_err(|err| EngineError::Export(format!("failed writing {}: {err}", path.display())))?;

    Ok(ExportSummary {
        sheets: sheets.len(),
        rows,
    })
}

fn bucket_rows(stats: &[BucketStats]) -> Vec<Vec<String>> {
    let mut rows = vec![vec![
        "bucket".to_string(),
        "count".to_string(),
        "correct".to_string(),
        "accuracy %".to_string(),
        "avg confidence %".to_string(),
        "avg EV %".to_string(),
        "total P/L".to_string(),
        "ROI %".to_string(),
    ]];
    for b in stats {
        rows.push(vec![
            b.label.clone(),
            b.count.to_string(),
            b.correct.to_string(),
            opt_fmt(b.accuracy_pct, 1),
            opt_fmt(b.avg_confidence_pct, 1),
            opt_fmt(b.avg_ev_pct, 1),
            format!("{:.2}", b.total_profit_loss),
            opt_fmt(b.roi_pct, 1),
        ]);
    }
    rows
}

fn cell_rows(cells: &[ThresholdCell], kind: &str) -> Vec<Vec<String>> {
    let mut rows = vec![vec![
        "kind".to_string(),
        "min confidence %".to_string(),
        "min EV %".to_string(),
        "max odds".to_string(),
        "min gap %".to_string(),
        "count".to_string(),
        "accuracy %".to_string(),
        "total P/L".to_string(),
        "ROI %".to_string(),
    ]];
    for c in cells {
        rows.push(vec![
            kind.to_string(),
            format!("{:.0}", c.thresholds.min_confidence_pct),
            format!("{:.0}", c.thresholds.min_ev_pct),
            opt_fmt(c.thresholds.max_odds, 2),
            format!("{:.0}", c.thresholds.min_gap_pct),
            c.count.to_string(),
            opt_fmt(c.accuracy_pct, 1),
            format!("{:.2}", c.total_profit_loss),
            opt_fmt(c.roi_pct, 1),
        ]);
    }
    rows
}

fn opt_fmt(value: Option<f64>, decimals: usize) -> String {
    value
        .map(|v| format!("{v:.decimals$}"))
        .unwrap_or_default()
}

fn export_err(sheet: &str, err: XlsxError) -> EngineError {
    EngineError::Export(format!("sheet {sheet}: {err}"))
}

fn write_rows(
    worksheet: &mut Worksheet,
    rows: &[Vec<String>],
) -> std::result::Result<(), XlsxError> {
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, value) in row.iter().enumerate() {
            worksheet.write_string(row_idx as u32, col_idx as u16, value)?;
        }
    }
    Ok(())
}
