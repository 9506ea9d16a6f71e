//! External-solver bridge.
//!
//! For networks too large for in-process propagation, the STN is rendered
//! as a constraint-programming model, handed to a MiniZinc subprocess, and
//! the solved times are lifted back into the network. The seam is the
//! [`StnSolver`] trait so an in-process solver can be substituted.

use common::{async_trait, Error, Result};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use temporal::{Consistency, Stn, MAX_ABS_BOUND};
use tracing::{debug, warn};

/// Solved integer times per time point.
#[derive(Debug, Clone, PartialEq)]
pub struct StnAssignment {
    pub times: HashMap<String, f64>,
}

/// Pure `(STN) -> assignment` seam over whatever does the solving.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StnSolver: Send + Sync {
    fn name(&self) -> &str;

    async fn solve(&self, stn: &Stn) -> Result<StnAssignment>;
}

/// Bridge to the `minizinc` binary.
#[derive(Debug, Clone)]
pub struct MiniZincSolver {
    binary: PathBuf,
    solver_id: String,
    timeout: Duration,
}

impl Default for MiniZincSolver {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("minizinc"),
            solver_id: "gecode".to_string(),
            timeout: Duration::from_millis(10_000),
        }
    }
}

impl MiniZincSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_solver_id(mut self, solver_id: impl Into<String>) -> Self {
        self.solver_id = solver_id.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout = Duration::from_millis(timeout_ms);
        self
    }
}

/// MiniZinc variable name for the i-th time point.
fn var_name(index: usize) -> String {
    format!("t_{}", index)
}

/// Render an STN as a MiniZinc model: one integer variable per time
/// point, one pair of inequalities per finite bound, `solve satisfy`.
///
/// Every bound is re-validated against the insertion cap first so a bad
/// network never reaches the subprocess. Self-constraints and bounds that
/// are infinite on both sides carry no information and are filtered out.
pub fn render_model(stn: &Stn) -> Result<String> {
    let points = stn.time_points();
    if points.is_empty() {
        return Err(Error::ModelError(
            "network has no time points to solve".to_string(),
        ));
    }

    let triples = stn.constraint_triples();
    for (a, b, bound) in &triples {
        for value in [bound.min, bound.max] {
            if value.is_finite() && value.abs() > MAX_ABS_BOUND {
                return Err(Error::OutOfBounds(format!(
                    "bound {} on ({}, {}) exceeds the {} cap",
                    value, a, b, MAX_ABS_BOUND
                )));
            }
        }
    }

    let index: HashMap<&str, usize> = points
        .iter()
        .enumerate()
        .map(|(i, name)| (*name, i))
        .collect();

    let mut model = String::from("% Simple temporal network consistency model\n");
    for (i, point) in points.iter().enumerate() {
        model.push_str(&format!(
            "var -1000000000..1000000000: {}; % {}\n",
            var_name(i),
            point
        ));
    }
    for (a, b, bound) in &triples {
        if a == b {
            continue;
        }
        let (Some(&ia), Some(&ib)) = (index.get(a.as_str()), index.get(b.as_str())) else {
            // Dummy points from constant-work mode carry no constraints
            // worth solving.
            continue;
        };
        if bound.min.is_infinite() && bound.max.is_infinite() {
            continue;
        }
        if bound.min.is_finite() {
            model.push_str(&format!(
                "constraint {} - {} >= {};\n",
                var_name(ib),
                var_name(ia),
                bound.min.floor() as i64
            ));
        }
        if bound.max.is_finite() {
            model.push_str(&format!(
                "constraint {} - {} <= {};\n",
                var_name(ib),
                var_name(ia),
                bound.max.ceil() as i64
            ));
        }
    }
    model.push_str("solve satisfy;\n");
    Ok(model)
}

/// Parse MiniZinc's `--output-mode json` stdout into per-point times.
pub fn parse_solution(stdout: &str, points: &[&str]) -> Result<StnAssignment> {
    if stdout.contains("=====UNSATISFIABLE=====") {
        return Err(Error::Unsatisfiable(
            "solver reported the network unsatisfiable".to_string(),
        ));
    }
    if stdout.contains("=====UNKNOWN=====") {
        return Err(Error::SolverTimeout(0));
    }

    let body = stdout
        .split("----------")
        .next()
        .map(str::trim)
        .unwrap_or_default();
    if body.is_empty() {
        return Err(Error::ParseError(
            "solver produced no solution block".to_string(),
        ));
    }

    let values: serde_json::Map<String, serde_json::Value> = serde_json::from_str(body)
        .map_err(|e| Error::ParseError(format!("solver output is not JSON: {}", e)))?;

    let mut times = HashMap::with_capacity(points.len());
    for (i, point) in points.iter().enumerate() {
        let value = values
            .get(&var_name(i))
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| {
                Error::ParseError(format!("solution is missing variable {}", var_name(i)))
            })?;
        times.insert(point.to_string(), value);
    }
    Ok(StnAssignment { times })
}

#[async_trait]
impl StnSolver for MiniZincSolver {
    fn name(&self) -> &str {
        "minizinc"
    }

    async fn solve(&self, stn: &Stn) -> Result<StnAssignment> {
        let model = render_model(stn)?;

        // NamedTempFile removes the model on drop, success or not.
        let mut file = tempfile::Builder::new()
            .prefix("stn_model_")
            .suffix(".mzn")
            .tempfile()?;
        file.write_all(model.as_bytes())?;
        file.flush()?;

        debug!(
            solver = %self.solver_id,
            points = stn.time_points().len(),
            model_path = %file.path().display(),
            "invoking external solver"
        );

        let timeout_ms = self.timeout.as_millis() as u64;
        let mut command = tokio::process::Command::new(&self.binary);
        command
            .arg("--solver")
            .arg(&self.solver_id)
            .arg("--output-mode")
            .arg("json")
            .arg("--time-limit")
            .arg(timeout_ms.to_string())
            .arg(file.path());

        // Grace on top of the solver's own limit so it can exit cleanly.
        let output = match tokio::time::timeout(
            self.timeout + Duration::from_millis(1_000),
            command.output(),
        )
        .await
        {
            Err(_) => return Err(Error::SolverTimeout(timeout_ms)),
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::SolverUnavailable(format!(
                    "cannot execute '{}'",
                    self.binary.display()
                )))
            }
            Ok(Err(err)) => return Err(Error::Io(err)),
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() && !stdout.contains("=====") {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(%stderr, "solver exited with failure");
            return Err(Error::ModelError(format!(
                "solver rejected the model: {}",
                stderr.trim()
            )));
        }

        match parse_solution(&stdout, &stn.time_points()) {
            Err(Error::SolverTimeout(_)) => Err(Error::SolverTimeout(timeout_ms)),
            other => other,
        }
    }
}

/// Solve and lift the result back into the network: solved times mark it
/// consistent, an unsatisfiable verdict marks it inconsistent, and a
/// timeout leaves it unknown.
pub async fn solve_and_apply(solver: &dyn StnSolver, stn: &mut Stn) -> Result<()> {
    match solver.solve(stn).await {
        Ok(assignment) => {
            stn.apply_schedule(&assignment.times);
            Ok(())
        }
        Err(err) => {
            match err {
                Error::Unsatisfiable(_) => stn.set_consistency(Consistency::Inconsistent),
                Error::SolverTimeout(_) => stn.set_consistency(Consistency::Unknown),
                _ => {}
            }
            Err(err)
        }
    }
}
