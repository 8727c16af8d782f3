//! epiloci CLI
//!
//! Runs an SIR epidemic on an Erdős–Rényi network, either once or as a
//! batch of independent replicas. Parameters come from flags, from a TOML
//! file given with `--config`, or both (flags win):
//!
//! ```toml
//! dynamics = "stochastic"
//! seed = 42
//!
//! [stop]
//! max_time = 100.0
//!
//! [network]
//! nodes = 2000
//! edge_probability = 0.004
//!
//! [sir]
//! p_infected = 0.01
//! p_infect = 0.3
//! p_remove = 0.05
//! ```

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use clap::Parser;
use epiloci::config::{Dynamics, RunConfig};
use epiloci::dsl::EngineBuilder;
use epiloci::engine::{Engine, RunSummary};
use epiloci::error::EngineResult;
use epiloci::graph::{AdjacencyGraph, Graph};
use epiloci::model::{Sir, SirParams};
use epiloci::replicas::{run_replicas, ReplicaStats};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "epiloci")]
#[command(about = "Stochastic SIR epidemics on random networks")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of nodes
    #[arg(short, long)]
    nodes: Option<usize>,

    /// Probability of each possible edge
    #[arg(long)]
    edge_probability: Option<f64>,

    /// Probability that a node starts infected
    #[arg(long)]
    p_infected: Option<f64>,

    /// Infection rate per susceptible-infected edge
    #[arg(long)]
    p_infect: Option<f64>,

    /// Removal rate per infected node
    #[arg(long)]
    p_remove: Option<f64>,

    /// Use discrete timesteps instead of continuous time
    #[arg(long)]
    synchronous: bool,

    /// Random seed (replica i uses seed + i)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Stop at this simulated time
    #[arg(long)]
    max_time: Option<f64>,

    /// Stop after this many events
    #[arg(long)]
    max_events: Option<u64>,

    /// Number of independent replicas
    #[arg(short, long, default_value = "1")]
    replicas: usize,

    /// Write the fired-event log of a single run to this file
    #[arg(long)]
    export_log: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
struct NetworkParams {
    nodes: usize,
    edge_probability: f64,
    /// Seed for the network itself; defaults to the run seed.
    seed: Option<u64>,
}

impl Default for NetworkParams {
    fn default() -> Self {
        NetworkParams {
            nodes: 1000,
            edge_probability: 0.005,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    #[serde(flatten)]
    run: RunConfig,
    network: NetworkParams,
    sir: SirParams,
}

impl FileConfig {
    fn load(cli: &Cli) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = match &cli.config {
            Some(path) => toml::from_str(&std::fs::read_to_string(path)?)?,
            None => FileConfig::default(),
        };
        config.run.stop.validate()?;

        if let Some(n) = cli.nodes {
            config.network.nodes = n;
        }
        if let Some(p) = cli.edge_probability {
            config.network.edge_probability = p;
        }
        if let Some(p) = cli.p_infected {
            config.sir.p_infected = p;
        }
        if let Some(p) = cli.p_infect {
            config.sir.p_infect = p;
        }
        if let Some(p) = cli.p_remove {
            config.sir.p_remove = p;
        }
        if cli.synchronous {
            config.run.dynamics = Dynamics::Synchronous;
        }
        if let Some(seed) = cli.seed {
            config.run.seed = seed;
        }
        if let Some(t) = cli.max_time {
            config.run.stop.max_time = Some(t);
        }
        if let Some(n) = cli.max_events {
            config.run.stop.max_events = Some(n);
        }
        if cli.export_log.is_some() && config.run.checkpoint_interval.is_none() {
            config.run.checkpoint_interval = Some(0);
        }
        Ok(config)
    }

    fn graph(&self) -> AdjacencyGraph {
        let seed = self.network.seed.unwrap_or(self.run.seed);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        AdjacencyGraph::erdos_renyi(self.network.nodes, self.network.edge_probability, &mut rng)
    }

    fn engine(&self, graph: AdjacencyGraph, seed: u64) -> EngineResult<Engine<AdjacencyGraph>> {
        EngineBuilder::from_config(graph, self.run.clone())
            .seed(seed)
            .model(Sir::new(self.sir))
            .build()
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = FileConfig::load(&cli)?;
    let graph = config.graph();
    info!(
        nodes = config.network.nodes,
        edges = graph.edge_count(),
        dynamics = %config.run.dynamics,
        seed = config.run.seed,
        "Network generated"
    );

    if cli.replicas <= 1 {
        let mut engine = config.engine(graph, config.run.seed)?;
        let summary = engine.run(&config.run.stop)?;
        report(&summary, cli.json)?;

        if let (Some(path), Some(log)) = (&cli.export_log, engine.event_log()) {
            let mut out = BufWriter::new(File::create(path)?);
            log.export(&mut out)?;
            info!(path = %path.display(), events = log.len(), "Event log written");
        }
    } else {
        let outcomes = run_replicas(cli.replicas, config.run.seed, &config.run.stop, |seed| {
            config.engine(graph.clone(), seed)
        });
        let stats = ReplicaStats::from_outcomes(&outcomes);
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        } else {
            println!("replicas: {} ({} failed)", stats.replicas, stats.failures);
            println!("mean time: {:.4}", stats.mean_time);
            println!("mean events: {:.1}", stats.mean_events);
            for (label, mean) in &stats.mean_counts {
                println!("  {}: {:.2}", label, mean);
            }
        }
    }

    Ok(())
}

fn report(summary: &RunSummary, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }
    println!("stopped: {:?} at t={:.4}", summary.stop_reason, summary.time);
    println!("events: {}", summary.events);
    if let Some(n) = summary.timesteps_with_events {
        println!("timesteps with events: {}", n);
    }
    for (label, count) in &summary.compartments {
        println!("  {}: {}", label, count);
    }
    println!("occupied edges: {}", summary.occupied_edges);
    Ok(())
}
