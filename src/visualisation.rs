// src/visualisation.rs

use crate::driver::ConvergenceHistory;
use plotters::prelude::*;

/// Save the residual history (L2 and max norm vs cycle) as an SVG line plot with a
/// logarithmic y-axis.
pub fn save_convergence_plot(
    history: &ConvergenceHistory,
    filename: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let l2: Vec<(f64, f64)> = history.iter().map(|(c, n)| (c as f64, n.l2)).collect();
    let max: Vec<(f64, f64)> = history.iter().map(|(c, n)| (c as f64, n.max)).collect();

    // Log axis: only strictly positive, finite values can be drawn.
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;
    for &(_, y) in l2.iter().chain(max.iter()) {
        if y.is_finite() && y > 0.0 {
            y_min = y_min.min(y);
            y_max = y_max.max(y);
        }
    }
    if !y_min.is_finite() || !y_max.is_finite() {
        y_min = 1e-12;
        y_max = 1.0;
    }
    let y_min = y_min / 2.0;
    let y_max = y_max * 2.0;
    let x_max = (history.cycles.len().max(1)) as f64;

    let root = SVGBackend::new(filename, (1024, 768)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .caption("Residual norm vs V-cycle", ("sans-serif", 30))
        .set_left_and_bottom_label_area_size(70)
        .build_cartesian_2d(0.0..x_max, (y_min..y_max).log_scale())?;

    chart
        .configure_mesh()
        .x_desc("cycle")
        .y_desc("residual norm")
        .y_label_formatter(&|y| format!("{y:.0e}"))
        .draw()?;

    let positive = |&(_, y): &(f64, f64)| y.is_finite() && y > 0.0;

    chart
        .draw_series(LineSeries::new(l2.iter().copied().filter(positive), &BLUE))?
        .label("L2")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

    chart
        .draw_series(LineSeries::new(max.iter().copied().filter(positive), &RED))?
        .label("max")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcycle::ResidualNorm;

    #[test]
    fn writes_an_svg_file() {
        let mut h = ConvergenceHistory::new(ResidualNorm { l2: 0.2, max: 1.0 });
        for c in 1..=4 {
            let f = 10f64.powi(-c);
            h.push(ResidualNorm {
                l2: 0.2 * f,
                max: f,
            });
        }
        let path = std::env::temp_dir().join(format!("npb-mg-plot-{}.svg", std::process::id()));
        let name = path.to_string_lossy().to_string();
        save_convergence_plot(&h, &name).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
        std::fs::remove_file(&path).ok();
    }
}
