//! # Dentsculpt CLI
//!
//! Command-line front end for the dentsculpt editing kernel.
//!
//! ## Commands
//! - `info` - Print mesh and BVH statistics
//! - `sculpt` - Replay recorded pointer samples through an editing session
//! - `undercut` - Report undercut statistics for a viewpoint
//! - `blockout` - Classify undercuts and fill them

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dentsculpt_assets::{MeshImportSettings, load_mesh, save_mesh};
use dentsculpt_core::{BvhConfig, MeshBvh};
use dentsculpt_editor::{EditorSession, ViewportConfig};
use dentsculpt_sculpt::{BrushConfig, PointerSample};
use dentsculpt_undercut::classify::{DEFAULT_EPSILON, DEFAULT_THRESHOLD};
use dentsculpt_undercut::{
    BlockoutSettings, BlockoutStrategy, RaycastTarget, UndercutPolicy, UndercutSettings,
};
use glam::Vec3;
use serde::Deserialize;

/// Dental mesh sculpting and undercut tools
#[derive(Parser)]
#[command(name = "dentsculpt")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Weld tolerance for triangle soup imports (0 disables welding)
    #[arg(long, default_value = "0.00001", global = true)]
    pub weld: f32,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Print mesh and BVH statistics
    Info {
        /// Mesh file (.json or .dsm)
        mesh: PathBuf,
    },

    /// Replay a pointer script
    Sculpt {
        /// Mesh file (.json or .dsm)
        mesh: PathBuf,

        /// JSON pointer script
        #[arg(short, long)]
        script: PathBuf,

        /// Output mesh file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Report undercuts seen from a viewpoint
    Undercut {
        /// Mesh file (.json or .dsm)
        mesh: PathBuf,

        #[command(flatten)]
        view: ViewArgs,
    },

    /// Fill undercuts seen from a viewpoint
    Blockout {
        /// Mesh file (.json or .dsm)
        mesh: PathBuf,

        #[command(flatten)]
        view: ViewArgs,

        /// Offset distance
        #[arg(long, default_value = "0.2")]
        offset: f32,

        /// Blockout strategy
        #[arg(long, value_enum, default_value = "shell")]
        strategy: StrategyArg,

        /// Keep the prism top cap in the original winding
        #[arg(long)]
        keep_top_winding: bool,

        /// Output mesh file
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// Viewpoint and classification options
#[derive(clap::Args, Debug, Clone)]
pub struct ViewArgs {
    /// Eye position as x,y,z
    #[arg(long, value_parser = parse_vec3, allow_hyphen_values = true)]
    pub eye: Vec3,

    /// Classification policy
    #[arg(long, value_enum, default_value = "analytic")]
    pub policy: PolicyArg,

    /// Analytic threshold on normal · view
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Raycast distance tolerance
    #[arg(long)]
    pub epsilon: Option<f32>,

    /// Cast raycast rays to triangle centroids instead of vertices
    #[arg(long)]
    pub centroids: bool,
}

impl ViewArgs {
    pub fn policy(&self) -> UndercutPolicy {
        match self.policy {
            PolicyArg::Analytic => UndercutPolicy::Analytic {
                threshold: self.threshold.unwrap_or(DEFAULT_THRESHOLD),
            },
            PolicyArg::Raycast => UndercutPolicy::Raycast {
                epsilon: self.epsilon.unwrap_or(DEFAULT_EPSILON),
                target: if self.centroids {
                    RaycastTarget::Centroids
                } else {
                    RaycastTarget::Vertices
                },
            },
            PolicyArg::Staged => UndercutPolicy::staged(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    Analytic,
    Raycast,
    Staged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    Shell,
    Prism,
}

impl From<StrategyArg> for BlockoutStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Shell => BlockoutStrategy::Shell,
            StrategyArg::Prism => BlockoutStrategy::Prism,
        }
    }
}

/// Recorded pointer input for `sculpt`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SculptScript {
    pub brush: BrushConfig,
    pub samples: Vec<PointerSample>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScriptFile {
    Samples(Vec<PointerSample>),
    Script(SculptScript),
}

impl SculptScript {
    /// Parse either a bare sample list or `{ "brush": .., "samples": .. }`
    pub fn from_json(text: &str) -> Result<Self> {
        let script = match serde_json::from_str(text)? {
            ScriptFile::Samples(samples) => Self {
                samples,
                ..Default::default()
            },
            ScriptFile::Script(script) => script,
        };
        Ok(script)
    }
}

/// Parse `x,y,z`
pub fn parse_vec3(text: &str) -> Result<Vec3, String> {
    let parts: Vec<f32> = text
        .split(',')
        .map(|part| part.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid vector '{text}': {e}"))?;
    match parts.as_slice() {
        [x, y, z] => Ok(Vec3::new(*x, *y, *z)),
        _ => Err(format!("expected x,y,z, got '{text}'")),
    }
}

/// Execute the CLI command
pub fn execute(cli: Cli) -> Result<()> {
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let settings = MeshImportSettings {
        weld_tolerance: (cli.weld > 0.0).then_some(cli.weld),
        ..Default::default()
    };
    run(cli.command, &settings)
}

/// Run one command with the given import settings
pub fn run(command: Commands, settings: &MeshImportSettings) -> Result<()> {
    match command {
        Commands::Info { mesh } => info(&mesh, settings),
        Commands::Sculpt {
            mesh,
            script,
            output,
        } => sculpt(&mesh, &script, &output, settings),
        Commands::Undercut { mesh, view } => undercut(&mesh, &view, settings),
        Commands::Blockout {
            mesh,
            view,
            offset,
            strategy,
            keep_top_winding,
            output,
        } => {
            let blockout_settings = BlockoutSettings {
                strategy: strategy.into(),
                offset,
                reverse_top_winding: !keep_top_winding,
            };
            blockout(&mesh, &view, &blockout_settings, &output, settings)
        }
    }
}

fn info(path: &Path, settings: &MeshImportSettings) -> Result<()> {
    let mesh = load_mesh(path, settings).with_context(|| format!("loading {}", path.display()))?;
    let bvh = MeshBvh::build(&mesh, BvhConfig::default());
    let bounds = mesh.bounds();

    log::info!("{}", path.display());
    log::info!("  Vertices: {}", mesh.vertex_count());
    log::info!("  Triangles: {}", mesh.triangle_count());
    log::info!("  Bounds: {:?} .. {:?}", bounds.min, bounds.max);
    log::info!("  BVH: {} nodes, depth {}", bvh.node_count(), bvh.depth());
    Ok(())
}

fn open_session(path: &Path, viewport: ViewportConfig, settings: &MeshImportSettings) -> Result<EditorSession> {
    let mut session = EditorSession::new(viewport);
    session
        .open(path, settings)
        .with_context(|| format!("loading {}", path.display()))?;
    Ok(session)
}

fn sculpt(path: &Path, script: &Path, output: &Path, settings: &MeshImportSettings) -> Result<()> {
    let text = fs::read_to_string(script).with_context(|| format!("reading {}", script.display()))?;
    let script = SculptScript::from_json(&text).with_context(|| format!("parsing {}", script.display()))?;

    let mut session = open_session(path, ViewportConfig::default(), settings)?;
    session.set_brush(script.brush)?;

    let mut steps = 0;
    for sample in &script.samples {
        steps += session.pointer_frame(sample).steps;
        if !sample.pressed {
            session.end_stroke();
        }
    }
    log::info!("Replayed {} frames, {} stroke steps", script.samples.len(), steps);

    save_session(&session, output)
}

fn classify(session: &mut EditorSession, view: &ViewArgs) -> Result<()> {
    session.set_undercut_settings(UndercutSettings {
        policy: view.policy(),
    });
    let stats = session
        .classify_undercuts(Some(view.eye))
        .map(|classification| classification.stats())
        .context("no mesh loaded")?;
    log::info!("Undercut from {:?}: {}", view.eye, stats);
    Ok(())
}

fn undercut(path: &Path, view: &ViewArgs, settings: &MeshImportSettings) -> Result<()> {
    let mut session = open_session(path, viewport_at(view.eye), settings)?;
    classify(&mut session, view)
}

fn blockout(
    path: &Path,
    view: &ViewArgs,
    blockout_settings: &BlockoutSettings,
    output: &Path,
    settings: &MeshImportSettings,
) -> Result<()> {
    let mut session = open_session(path, viewport_at(view.eye), settings)?;
    session.set_blockout_settings(*blockout_settings);
    classify(&mut session, view)?;

    let report = session.blockout()?;
    log::info!(
        "Blockout: {} undercut triangles, {} moved vertices, {} added vertices, {} added triangles",
        report.undercut_triangles,
        report.moved_vertices,
        report.added_vertices,
        report.added_triangles
    );
    save_session(&session, output)
}

fn viewport_at(eye: Vec3) -> ViewportConfig {
    ViewportConfig {
        camera_position: eye,
        ..Default::default()
    }
}

fn save_session(session: &EditorSession, output: &Path) -> Result<()> {
    let mesh = session.mesh().context("no mesh loaded")?;
    save_mesh(output, mesh).with_context(|| format!("writing {}", output.display()))?;
    log::info!("Wrote {}", output.display());
    Ok(())
}
