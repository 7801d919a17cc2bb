//! Lake physics derived from the daily weather and stage files.
//!
//! Shallow-water wind waves follow the SPM forecasting curves; stresses
//! are reported in dyne/cm² (N/m² × 10).

use std::f64::consts::PI;
use std::path::{Path, PathBuf};

use super::read_column;
use crate::logging::{self, DataSource};
use crate::model::FEET_TO_METERS;
use crate::report::RunResult;
use crate::store::{self, StoreError, TimeSeries, DEFAULT_DATE_COLUMN};

pub const GRAVITY: f64 = 9.81;
/// Wind fetch across the lake, m.
pub const FETCH_LENGTH: f64 = 57_500.0;
/// Kinematic viscosity of water at 20 °C, m²/s.
pub const NU_20: f64 = 1.0034e-6;
pub const WATER_DENSITY: f64 = 1000.0;
pub const AIR_DENSITY: f64 = 1.293;
/// Lake bottom elevation above the stage datum, m.
pub const BOTTOM_ELEVATION: f64 = 0.5;
pub const MPH_TO_MPS: f64 = 0.44704;
pub const VON_KARMAN: f64 = 0.41;
/// Bed roughness height, m.
pub const ROUGHNESS_HEIGHT: f64 = 5.27e-4;
/// Depth-averaged current speed used for the log-law bottom stress, m/s.
pub const CURRENT_SPEED: f64 = 0.05;

const N_PER_M2_TO_DYNE_PER_CM2: f64 = 10.0;

pub const WIND_SPEED_FILE: &str = "LOWS.csv";
pub const STAGE_FILE: &str = "LO_Stg_Sto_SA_2008-2023.csv";
pub const WIND_SHEAR_STRESS_FILE: &str = "WindShearStress.csv";
pub const CURRENT_SHEAR_STRESS_FILE: &str = "Current_ShearStress.csv";
pub const VISCOSITY_FILE: &str = "nu_20082023.csv";

fn finite(x: f64) -> Option<f64> {
    x.is_finite().then_some(x)
}

// ---------------------------------------------------------------------------
// Wind waves
// ---------------------------------------------------------------------------

/// Significant wave height (m) for depth `d` (m) and wind speed `ws` (m/s).
pub fn wave_height(d: f64, ws: f64) -> Option<f64> {
    if d <= 0.0 || ws <= 0.0 {
        return None;
    }
    let depth = GRAVITY * d / (ws * ws);
    let fetch = GRAVITY * FETCH_LENGTH / (ws * ws);
    let h = 0.283
        * (0.53 * depth.powf(0.75)).tanh()
        * (0.00565 * fetch.sqrt() / (0.53 * depth.powf(3.0 / 8.0)).tanh()).tanh()
        * ws
        * ws
        / GRAVITY;
    finite(h)
}

/// Significant wave period (s).
pub fn wave_period(d: f64, ws: f64) -> Option<f64> {
    if d <= 0.0 || ws <= 0.0 {
        return None;
    }
    let depth = GRAVITY * d / (ws * ws);
    let fetch = GRAVITY * FETCH_LENGTH / (ws * ws);
    let shallow = (0.833 * depth.powf(3.0 / 8.0)).tanh();
    let t = 7.54 * shallow * (0.0379 * fetch.sqrt() / shallow).tanh() * ws / GRAVITY;
    finite(t)
}

/// Wave length (m) solving `L = (g·T²·π/2)·tanh(2πd/L)`.
///
/// The right-hand side falls from its scale `a` toward 0 as `L` grows, so
/// the root is unique on `(0, a]` and bisection finds it.
pub fn wave_length(d: f64, t: f64) -> Option<f64> {
    if d <= 0.0 || t <= 0.0 {
        return None;
    }
    let a = GRAVITY * t * t * PI / 2.0;
    let f = |l: f64| a * (2.0 * PI * d / l).tanh() - l;

    let (mut lo, mut hi) = (f64::MIN_POSITIVE, a);
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if f(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo <= 1e-12 * hi {
            break;
        }
    }
    finite(0.5 * (lo + hi))
}

/// Wave-induced bottom shear stress (dyne/cm²) for depth `d` (m) and wind
/// speed `ws` (m/s).
pub fn wave_shear_stress(d: f64, ws: f64) -> Option<f64> {
    let h = wave_height(d, ws)?;
    let t = wave_period(d, ws)?;
    let l = wave_length(d, t)?;
    let omega = 2.0 * PI / t;
    let tau = h * (WATER_DENSITY * (NU_20 * omega.powi(3)).sqrt()) / (2.0 * (2.0 * PI * d / l).sinh());
    finite(tau * N_PER_M2_TO_DYNE_PER_CM2)
}

// ---------------------------------------------------------------------------
// Wind and current stress
// ---------------------------------------------------------------------------

pub fn drag_coefficient(ws: f64) -> f64 {
    0.001 * (0.75 + 0.067 * ws)
}

/// Surface wind stress, N/m².
pub fn wind_stress(ws: f64) -> f64 {
    AIR_DENSITY * drag_coefficient(ws) * ws * ws
}

/// Bottom stress from the wind-driven current, N/m².
pub fn current_stress(tau_w: f64) -> f64 {
    let u_b2 = tau_w / WATER_DENSITY;
    WATER_DENSITY * VON_KARMAN * VON_KARMAN * u_b2
}

fn fixed_point(f: impl Fn(f64) -> f64, start: f64) -> Option<f64> {
    let mut x = start;
    for _ in 0..500 {
        let next = f(x);
        if !next.is_finite() {
            return None;
        }
        if (next - x).abs() <= 1e-14 * next.abs().max(1e-300) {
            return Some(next);
        }
        x = next;
    }
    None
}

/// Log-law bottom shear stress (N/m²) at depth `z` for the smooth, rough
/// and transitional regimes; 0 when no regime's friction velocity is
/// consistent with its roughness Reynolds number.
pub fn current_stress_3(u: f64, kappa: f64, nu: f64, ks: f64, z: f64) -> f64 {
    if z <= 0.0 {
        return 0.0;
    }
    let reynolds = |u_star: f64| u_star * ks / nu;

    let smooth = fixed_point(|s| u * kappa / (z / (0.11 * nu / s)).ln(), 1.0);
    let rough = finite(u * kappa / (z / (0.0333 * ks)).ln());
    let transitional = fixed_point(|s| u * kappa / (z / (0.11 * nu / s + 0.0333 * ks)).ln(), 1.0);

    let u_star = match (smooth, rough, transitional) {
        (Some(s), _, _) if reynolds(s) <= 5.0 => s,
        (_, Some(r), _) if reynolds(r) >= 70.0 => r,
        (_, _, Some(t)) if reynolds(t) > 5.0 && reynolds(t) < 70.0 => t,
        _ => 0.0,
    };
    WATER_DENSITY * u_star * u_star
}

// ---------------------------------------------------------------------------
// Viscosity
// ---------------------------------------------------------------------------

/// Kinematic viscosity of water (m²/s) at `temp` °C.
pub fn kinematic_viscosity(temp: f64) -> Option<f64> {
    let dt = 20.0 - temp;
    let exponent = (dt / (temp + 96.0)) * (1.2364 - 1.37e-3 * dt + 5.7e-6 * dt * dt);
    finite(NU_20 * 10f64.powf(exponent))
}

// ---------------------------------------------------------------------------
// Stage tables
// ---------------------------------------------------------------------------

/// Linear interpolation through `(xs, ys)`, extrapolating past either end
/// along the outermost segment.
fn interp_extrapolate(x: f64, xs: &[f64], ys: &[f64]) -> Option<f64> {
    match xs.len() {
        0 => None,
        1 => ys.first().copied(),
        n => {
            let i = xs.partition_point(|&k| k <= x).clamp(1, n - 1);
            let (x0, x1, y0, y1) = (xs[i - 1], xs[i], ys[i - 1], ys[i]);
            if x1 == x0 {
                return Some(y0);
            }
            finite(y0 + (y1 - y0) * (x - x0) / (x1 - x0))
        }
    }
}

/// A stage table relating `Stage` to `Storage` or `Surf_Area`.
#[derive(Debug, Clone)]
pub struct StageLookup {
    by_stage: Vec<(f64, f64)>,
    by_value: Vec<(f64, f64)>,
}

impl StageLookup {
    pub fn new(pairs: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let mut by_stage: Vec<(f64, f64)> = pairs.into_iter().collect();
        let mut by_value: Vec<(f64, f64)> = by_stage.iter().map(|&(s, v)| (v, s)).collect();
        by_stage.sort_by(|a, b| a.0.total_cmp(&b.0));
        by_value.sort_by(|a, b| a.0.total_cmp(&b.0));
        StageLookup { by_stage, by_value }
    }

    /// Reads the `Stage` and `column` columns of `path`, skipping rows where
    /// either is missing.
    pub fn load(path: &Path, column: &str) -> Result<Self, StoreError> {
        let stage = read_column(path, "Stage")?;
        let value = read_column(path, column)?;
        Ok(Self::new(
            stage
                .into_iter()
                .zip(value)
                .filter_map(|(s, v)| Some((s?, v?))),
        ))
    }

    pub fn value_at(&self, stage: f64) -> Option<f64> {
        let (xs, ys): (Vec<f64>, Vec<f64>) = self.by_stage.iter().copied().unzip();
        interp_extrapolate(stage, &xs, &ys)
    }

    pub fn stage_at(&self, value: f64) -> Option<f64> {
        let (xs, ys): (Vec<f64>, Vec<f64>) = self.by_value.iter().copied().unzip();
        interp_extrapolate(value, &xs, &ys)
    }
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Paths of the shear-stress inputs and outputs within a workspace.
#[derive(Debug, Clone)]
pub struct ShearStressFiles {
    pub wind_speed: PathBuf,
    pub stage: PathBuf,
    pub wind_shear_stress: PathBuf,
    pub current_shear_stress: PathBuf,
}

impl ShearStressFiles {
    pub fn in_workspace(workspace: &Path) -> Self {
        ShearStressFiles {
            wind_speed: workspace.join(WIND_SPEED_FILE),
            stage: workspace.join(STAGE_FILE),
            wind_shear_stress: workspace.join(WIND_SHEAR_STRESS_FILE),
            current_shear_stress: workspace.join(CURRENT_SHEAR_STRESS_FILE),
        }
    }
}

/// Computes wave and current shear stress for every day of the lake wind
/// record. Stage rows are matched to wind rows by position.
pub fn wind_induced_waves(files: &ShearStressFiles) -> Result<usize, StoreError> {
    let wind = store::read(&files.wind_speed, DEFAULT_DATE_COLUMN)?;
    let wind_mph = wind
        .column("LO_Avg_WS_MPH")
        .ok_or_else(|| StoreError::MissingColumn {
            path: files.wind_speed.clone(),
            column: "LO_Avg_WS_MPH".to_string(),
        })?;
    let stage_ft = read_column(&files.stage, "Stage_ft")?;
    if stage_ft.len() < wind_mph.len() {
        return Err(StoreError::Rejected(format!(
            "{} has {} rows but {} has {}",
            files.stage.display(),
            stage_ft.len(),
            files.wind_speed.display(),
            wind_mph.len()
        )));
    }

    let mut waves = TimeSeries::new(["ShearStress"]).with_layout(wind.layout);
    let mut currents = TimeSeries::new(["Current_Stress", "Wind_Stress", "Wind_Speed_m/s", "Current_Stress_3"])
        .with_layout(wind.layout);

    for ((date, mph), stage) in wind.dates().into_iter().zip(wind_mph).zip(stage_ft) {
        let ws = mph.map(|v| v * MPH_TO_MPS);
        let depth = stage.map(|ft| ft * FEET_TO_METERS - BOTTOM_ELEVATION);

        let wave = ws.zip(depth).and_then(|(ws, d)| wave_shear_stress(d, ws));
        waves.push(date, vec![wave]);

        let tau_w = ws.map(wind_stress);
        let stress_3 = depth.map(|z| {
            current_stress_3(CURRENT_SPEED, VON_KARMAN, NU_20, ROUGHNESS_HEIGHT, z) * N_PER_M2_TO_DYNE_PER_CM2
        });
        currents.push(
            date,
            vec![
                tau_w.map(|t| current_stress(t) * N_PER_M2_TO_DYNE_PER_CM2),
                tau_w.map(|t| t * N_PER_M2_TO_DYNE_PER_CM2),
                ws,
                stress_3,
            ],
        );
    }

    store::write_atomic(&files.wind_shear_stress, &waves)?;
    store::write_atomic(&files.current_shear_stress, &currents)?;
    Ok(waves.len())
}

/// Writes the daily kinematic viscosity for the `Water_T` column of
/// `input` to `output`.
pub fn viscosity_file(input: &Path, output: &Path) -> Result<usize, StoreError> {
    let temps = store::read(input, DEFAULT_DATE_COLUMN)?;
    let water_t = temps.column("Water_T").ok_or_else(|| StoreError::MissingColumn {
        path: input.to_path_buf(),
        column: "Water_T".to_string(),
    })?;

    let mut nu = TimeSeries::new(["nu"]).with_layout(temps.layout);
    for (date, t) in temps.dates().into_iter().zip(water_t) {
        nu.push(date, vec![t.and_then(kinematic_viscosity)]);
    }
    store::write_atomic(output, &nu)?;
    Ok(nu.len())
}

pub fn run_shear_stress(workspace: &Path) -> RunResult {
    let files = ShearStressFiles::in_workspace(workspace);
    match wind_induced_waves(&files) {
        Ok(rows) => {
            logging::info(
                DataSource::File,
                Some(WIND_SHEAR_STRESS_FILE),
                &format!("computed shear stress for {} days", rows),
            );
            RunResult::Success("Completed shear stress calculation.".to_string())
        }
        Err(e) => {
            logging::error(DataSource::File, Some(WIND_SHEAR_STRESS_FILE), &e.to_string());
            RunResult::Error(format!("Could not compute shear stress: {}", e))
        }
    }
}

pub fn run_viscosity(workspace: &Path, input: &str, output: Option<&str>) -> RunResult {
    let output = output.unwrap_or(VISCOSITY_FILE);
    match viscosity_file(&workspace.join(input), &workspace.join(output)) {
        Ok(rows) => {
            logging::info(DataSource::File, Some(output), &format!("computed viscosity for {} days", rows));
            RunResult::Success("Completed kinematic viscosity calculation.".to_string())
        }
        Err(e) => {
            logging::error(DataSource::File, Some(output), &e.to_string());
            RunResult::Error(format!("Could not compute kinematic viscosity: {}", e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol * b.abs().max(1.0)
    }

    #[test]
    fn test_viscosity_at_reference_temperature() {
        assert!(close(kinematic_viscosity(20.0).unwrap(), NU_20, 1e-12));
        // Colder water is more viscous.
        assert!(kinematic_viscosity(10.0).unwrap() > NU_20);
        assert!(kinematic_viscosity(30.0).unwrap() < NU_20);
    }

    #[test]
    fn test_wave_length_satisfies_dispersion_relation() {
        let (d, t) = (3.0, 2.5);
        let l = wave_length(d, t).unwrap();
        let rhs = GRAVITY * t * t * PI / 2.0 * (2.0 * PI * d / l).tanh();
        assert!(close(l, rhs, 1e-9));
        assert!(wave_length(0.0, t).is_none());
    }

    #[test]
    fn test_waves_need_wind_and_water() {
        assert!(wave_height(3.0, 0.0).is_none());
        assert!(wave_period(-0.2, 5.0).is_none());
        let h = wave_height(3.0, 8.0).unwrap();
        let t = wave_period(3.0, 8.0).unwrap();
        assert!(h > 0.0 && h < 3.0);
        assert!(t > 0.0 && t < 10.0);
        assert!(wave_shear_stress(3.0, 8.0).unwrap() > 0.0);
    }

    #[test]
    fn test_wind_and_current_stress() {
        let ws = 10.0;
        assert!(close(drag_coefficient(ws), 0.00142, 1e-12));
        let tau = wind_stress(ws);
        assert!(close(tau, 1.293 * 0.00142 * 100.0, 1e-12));
        assert!(close(current_stress(tau), VON_KARMAN * VON_KARMAN * tau, 1e-12));
    }

    #[test]
    fn test_current_stress_3_uses_smooth_regime_in_lake() {
        let tau = current_stress_3(CURRENT_SPEED, VON_KARMAN, NU_20, ROUGHNESS_HEIGHT, 3.5);
        let u_star = (tau / WATER_DENSITY).sqrt();
        // smooth-wall log law holds at the returned friction velocity
        let expected = CURRENT_SPEED * VON_KARMAN / (3.5 / (0.11 * NU_20 / u_star)).ln();
        assert!(close(u_star, expected, 1e-9));
        assert!(u_star * ROUGHNESS_HEIGHT / NU_20 <= 5.0);
        assert_eq!(current_stress_3(CURRENT_SPEED, VON_KARMAN, NU_20, ROUGHNESS_HEIGHT, 0.0), 0.0);
    }

    #[test]
    fn test_stage_lookup_interpolates_and_extrapolates_both_ways() {
        let lookup = StageLookup::new([(12.0, 200.0), (10.0, 100.0), (11.0, 150.0)]);
        assert_eq!(lookup.value_at(10.5), Some(125.0));
        assert_eq!(lookup.value_at(13.0), Some(250.0));
        assert_eq!(lookup.value_at(9.0), Some(50.0));
        assert_eq!(lookup.stage_at(175.0), Some(11.5));
        assert_eq!(lookup.stage_at(0.0), Some(8.0));
    }

    #[test]
    fn test_stage_lookup_loads_named_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("StgSto.csv");
        fs::write(&path, "Stage,Storage,Surf_Area\n10,100,5\n11,,6\n12,200,7\n").unwrap();
        let storage = StageLookup::load(&path, "Storage").unwrap();
        assert_eq!(storage.value_at(11.0), Some(150.0));
        let area = StageLookup::load(&path, "Surf_Area").unwrap();
        assert_eq!(area.value_at(11.0), Some(6.0));
    }

    #[test]
    fn test_wind_induced_waves_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(WIND_SPEED_FILE),
            "date,LO_Avg_WS_MPH\n2023-07-01,10\n2023-07-02,\n2023-07-03,0\n",
        )
        .unwrap();
        fs::write(
            dir.path().join(STAGE_FILE),
            "date,Stage_ft,Storage\n2023-07-01,14.0,1\n2023-07-02,14.1,1\n2023-07-03,14.2,1\n",
        )
        .unwrap();

        let files = ShearStressFiles::in_workspace(dir.path());
        assert_eq!(wind_induced_waves(&files).unwrap(), 3);

        let waves = store::read(&files.wind_shear_stress, "date").unwrap();
        let stress = waves.column("ShearStress").unwrap();
        assert!(stress[0].unwrap() > 0.0);
        assert_eq!(stress[1], None);
        assert_eq!(stress[2], None);

        let currents = store::read(&files.current_shear_stress, "date").unwrap();
        assert_eq!(
            currents.columns,
            vec!["Current_Stress", "Wind_Stress", "Wind_Speed_m/s", "Current_Stress_3"]
        );
        let speed = currents.column("Wind_Speed_m/s").unwrap();
        assert!(close(speed[0].unwrap(), 4.4704, 1e-12));
        assert!(currents.column("Current_Stress_3").unwrap()[1].unwrap() > 0.0);
    }

    #[test]
    fn test_short_stage_record_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(WIND_SPEED_FILE), "date,LO_Avg_WS_MPH\n2023-07-01,10\n2023-07-02,12\n").unwrap();
        fs::write(dir.path().join(STAGE_FILE), "Stage_ft\n14.0\n").unwrap();
        assert!(!run_shear_stress(dir.path()).is_success());
        assert!(!dir.path().join(WIND_SHEAR_STRESS_FILE).exists());
    }

    #[test]
    fn test_viscosity_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("LO_Temp.csv"), "date,Water_T\n2023-07-01,20\n2023-07-02,NA\n").unwrap();
        assert!(run_viscosity(dir.path(), "LO_Temp.csv", None).is_success());
        let nu = store::read(&dir.path().join(VISCOSITY_FILE), "date").unwrap();
        let values = nu.column("nu").unwrap();
        assert!(close(values[0].unwrap(), NU_20, 1e-12));
        assert_eq!(values[1], None);
    }
}
