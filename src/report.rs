// src/report.rs
//
// Results report.
//
// Output directory layout (with --out DIR):
//   DIR/
//     ├── config.json        resolved run configuration
//     ├── report.json        full BenchmarkReport
//     ├── convergence.csv    cycle,l2,max
//     └── convergence.svg    (with --plot)

use std::fmt;
use std::fs::{File, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;

use crate::driver::{BenchmarkReport, ConvergenceHistory};
use crate::error::{MgError, MgResult};
use crate::verify::Verification;
use crate::visualisation::save_convergence_plot;

/// One right-aligned `name = value` row of the results block.
fn field(f: &mut fmt::Formatter<'_>, name: &str, value: impl fmt::Display) -> fmt::Result {
    writeln!(f, " {name:<16}=             {:>12}", value.to_string())
}

/// Results block in the spirit of the NPB summary.
impl fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.config;
        let [px, py, pz] = self.process_grid;
        let b = &c.build;

        writeln!(f)?;
        writeln!(f, " MG Benchmark Completed.")?;
        field(f, "Class", c.class)?;
        field(f, "Size", format!("{}x{}x{}", c.nx, c.ny, c.nz))?;
        field(f, "Iterations", c.nit)?;
        field(f, "Levels", c.lt)?;
        field(f, "Stencil", c.coefficients.kind())?;
        field(f, "Time in seconds", format!("{:.2}", self.seconds))?;
        field(f, "Workers", c.workers)?;
        field(f, "Process grid", format!("{px}x{py}x{pz}"))?;
        field(f, "Mop/s total", format!("{:.2}", self.mops))?;
        writeln!(f, " Operation type  =   floating point")?;
        writeln!(f, " L2 norm         =    {:.13e}", self.final_norm.l2)?;
        writeln!(f, " Max norm        =    {:.13e}", self.final_norm.max)?;
        field(f, "Monotone", if self.monotone { "yes" } else { "no" })?;
        if let Some(rate) = self.mean_rate {
            field(f, "Mean rate", format!("{rate:.4}"))?;
        }
        match self.verification {
            Verification::Passed {
                reference,
                relative,
                ..
            }
            | Verification::Failed {
                reference,
                relative,
                ..
            } => {
                writeln!(f, " Reference       =    {reference:.13e}")?;
                writeln!(f, " Error           =    {relative:.13e}")?;
            }
            Verification::Unverified { .. } => {
                writeln!(f, " Reference       =    (non-standard run)")?;
            }
        }
        field(f, "Verification", self.verification.label())?;
        field(f, "Version", &b.npb_version)?;
        field(f, "Compile date", &b.compile_time)?;
        field(f, "Compiler", &b.compiler)?;
        field(f, "Build profile", &b.profile)?;
        writeln!(f, " Compile flags   =    {}", b.compile_flags)?;
        field(f, "Random", &b.rand)
    }
}

pub fn render_report(r: &BenchmarkReport) -> String {
    r.to_string()
}

pub fn write_convergence_csv(history: &ConvergenceHistory, path: &Path) -> MgResult<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    writeln!(w, "cycle,l2,max")?;
    for (cycle, n) in history.iter() {
        writeln!(w, "{},{:.16e},{:.16e}", cycle, n.l2, n.max)?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_report_json(report: &BenchmarkReport, path: &Path) -> MgResult<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)?;
    Ok(())
}

/// Write config.json, report.json, convergence.csv and optionally convergence.svg into
/// `out_dir` (created if missing).
pub fn write_outputs(report: &BenchmarkReport, out_dir: &Path, plot: bool) -> MgResult<()> {
    create_dir_all(out_dir)?;
    report.config.write_to_dir(out_dir)?;
    write_report_json(report, &out_dir.join("report.json"))?;
    write_convergence_csv(&report.history, &out_dir.join("convergence.csv"))?;
    if plot {
        let path = out_dir.join("convergence.svg");
        save_convergence_plot(&report.history, &path.to_string_lossy())
            .map_err(|e| MgError::Io(std::io::Error::other(e.to_string())))?;
    }
    info!("results written to {}", out_dir.display());
    Ok(())
}
