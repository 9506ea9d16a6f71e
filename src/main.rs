use anyhow::Result;
use clap::Parser;
use planner::{PlanOptions, SolutionTree};
use planner_config::PlannerConfig;
use tracing::{info, warn};

mod demo;

/// Hierarchical task network planner with temporal constraints
#[derive(Parser, Debug)]
#[command(name = "htn-planner")]
#[command(about = "An HTN planner with durative actions and STN-backed scheduling")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Demo scenario to plan (kitchen, backtrack)
    #[arg(value_name = "SCENARIO", default_value = "kitchen")]
    scenario: String,

    /// Enable verbose logging and planner tracing
    #[arg(short, long)]
    verbose: bool,

    /// Plan without executing
    #[arg(long)]
    plan_only: bool,

    /// Print solution-tree statistics
    #[arg(long)]
    stats: bool,

    /// Override the expansion-iteration bound
    #[arg(long, value_name = "N")]
    max_depth: Option<usize>,

    /// Validate the composed temporal network with the external solver
    #[arg(long)]
    solve_stn: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose { "debug" } else { "info" })
        .with_target(false);
    subscriber.init();

    info!("Starting htn-planner v{}", env!("CARGO_PKG_VERSION"));

    let config = PlannerConfig::load(cli.config.clone().map(Into::into)).await?;
    let opts = PlanOptions {
        verbose: if cli.verbose {
            2
        } else {
            config.planning.verbose
        },
        max_depth: cli.max_depth.unwrap_or(config.planning.max_depth),
        verify_goals: config.planning.verify_goals,
        solver_timeout_ms: config.solver.enabled.then_some(config.solver.timeout_ms),
    };

    let (domain, state, todos) = demo::scenario(&cli.scenario)?;
    domain.validate()?;
    info!(
        "Planning scenario '{}' with {} todos",
        cli.scenario,
        todos.len()
    );

    let outcome = planner::plan(&domain, &state, todos, opts.clone())?;
    if outcome.metadata.depth_exceeded {
        warn!(
            "max_depth of {} reached; the tree below is partial",
            opts.max_depth
        );
    }

    println!("Plan ({} primitive actions):", outcome.metadata.stats.primitive_actions);
    for (index, todo) in outcome.tree.primitive_todos().iter().enumerate() {
        println!("  {:>3}. {}", index + 1, todo.describe());
    }

    if cli.stats {
        let stats = outcome.metadata.stats;
        println!(
            "Tree: {} nodes, {} expanded, {} primitive, depth {}",
            stats.total_nodes, stats.expanded_nodes, stats.primitive_actions, stats.max_depth
        );
        println!(
            "Run: {} iterations, {} backtracks",
            outcome.metadata.iterations, outcome.metadata.backtracks
        );
    }

    if cli.solve_stn {
        validate_with_solver(&config, &domain, &outcome.tree).await?;
    }

    if !cli.plan_only {
        let executed = planner::run_lazy_tree(&domain, &state, outcome.tree, opts)?;
        println!("Final state: {}", executed.final_state.summary());
    }

    Ok(())
}

/// Hand the composed temporal network to the external solver and report
/// the schedule it finds.
async fn validate_with_solver(
    config: &PlannerConfig,
    domain: &domain::Domain,
    tree: &SolutionTree,
) -> Result<()> {
    let Some(mut stn) = planner::schedule::compose_plan_network(domain, tree)? else {
        println!("No temporal information in this plan; nothing to solve.");
        return Ok(());
    };

    let minizinc = solver::MiniZincSolver::new()
        .with_binary(config.solver.binary.clone())
        .with_solver_id(config.solver.solver_id.clone())
        .with_timeout_ms(config.solver.timeout_ms);

    match solver::solve_and_apply(&minizinc, &mut stn).await {
        Ok(()) => {
            println!("Solver schedule:");
            let mut points: Vec<&str> = stn.time_points();
            points.sort_by_key(|p| stn.scheduled_time(p).map(|t| t as i64));
            for point in points {
                if let Some(time) = stn.scheduled_time(point) {
                    println!("  {:>10.0}  {}", time, point);
                }
            }
        }
        Err(err) => warn!("external solve failed: {}", err),
    }
    Ok(())
}
