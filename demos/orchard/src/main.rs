//! orchard — a toy plant-growth model on the formation engine.
//!
//! Two formations share the world:
//!
//! * `soil`: a flat [`Formation`] of patches that collect rain and hand
//!   water to the plant roots they serve, by mailing the plant formation.
//! * `plants`: a [`FormationTree`] of segments.  Each plant is a tree: the
//!   root sits in the soil, leaves grow new segments, water flows up to the
//!   children and surplus energy flows back down to the parent.  A segment
//!   that starves dies together with everything it carries.
//!
//! Usage: `orchard [config.json]`.  Every field of the config is optional.
//! Output lands in `output/orchard/` unless the config says otherwise.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use fm_core::{AgentIndex, FormationConfig, Substance, Timestep, WorldConfig, WorldRng};
use fm_formation::{
    Agent, CensusToken, Formation, FormationTree, Ledger, TreeAgent, WorldView, message_fn,
};
use fm_output::{CsvWriter, WorldOutputObserver};
use fm_post::{MessageKind, TransactionKind};
use fm_world::{StepSummary, WorldBuilder, WorldObserver};
use log::info;
use serde::Deserialize;

// ── Constants ─────────────────────────────────────────────────────────────────

const WATER:             Substance = Substance(0);
const ENERGY:            Substance = Substance(1);

const RAIN:              f32 = 3.0;  // per patch per step
const SOIL_CAPACITY:     f32 = 40.0;
const ROOT_DRAW:         f32 = 4.0;  // most water one root takes per step

const LIGHT:             f32 = 1.5;  // energy a leaf can fix per step
const SHADED:            f32 = 0.4;  // fraction of LIGHT for inner segments
const UPKEEP:            f32 = 0.5;
const WATER_KEEP:        f32 = 2.0;  // water a segment holds back from its children
const ENERGY_KEEP:       f32 = 3.0;  // energy a segment holds back from its parent

const GROW_COST:         f32 = 2.5;
const BRANCH_CHANCE:     f64 = 0.25;
const MAX_DEPTH:         u32 = 6;
const SEED_COST:         f32 = 8.0;
const SEED_CHANCE:       f64 = 0.2;
const SEED_AGE:          u32 = 5;    // steps before a root may seed

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(default)]
struct OrchardConfig {
    world:             WorldConfig,
    steps:             u64,
    soil_patches:      usize,
    seedlings:         usize,
    snapshot_interval: u64,
    output_dir:        PathBuf,
}

impl Default for OrchardConfig {
    fn default() -> Self {
        Self {
            world:             WorldConfig { seed: 42, ..WorldConfig::default() },
            steps:             60,
            soil_patches:      4,
            seedlings:         6,
            snapshot_interval: 10,
            output_dir:        PathBuf::from("output/orchard"),
        }
    }
}

fn load_config() -> Result<OrchardConfig> {
    let Some(path) = std::env::args().nth(1) else {
        return Ok(OrchardConfig::default());
    };
    let text = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {path}"))
}

// ── Soil ──────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
struct Patch {
    moisture: f32,
}

impl Ledger for Patch {}

impl Agent for Patch {
    fn tick(&mut self, world: &WorldView<'_>, soil: &Formation<Self>, index: AgentIndex, _t: Timestep) {
        self.moisture = (self.moisture + RAIN).min(SOIL_CAPACITY);

        let Some(plants) = world.find::<FormationTree<Segment>>() else { return };
        let Some(mailbox) = world.mailbox::<Segment>() else { return };

        // Patch i serves every root whose index is congruent to i.
        let patches = soil.len().max(1);
        let served: Vec<AgentIndex> = plants
            .roots()
            .into_iter()
            .filter(|r| r.index() % patches == index.index())
            .collect();
        if served.is_empty() {
            return;
        }

        let draw = self.moisture.min(ROOT_DRAW * served.len() as f32);
        let share = draw / served.len() as f32;
        self.moisture -= draw;
        mailbox.send_to_many(
            served,
            message_fn(MessageKind::Increase, move |seg: &mut Segment, _| seg.water += share),
        );
    }
}

// ── Plants ────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
struct Segment {
    parent: Option<AgentIndex>,
    water:  f32,
    energy: f32,
    age:    u32,
}

impl Segment {
    fn sprout(energy: f32) -> Self {
        Self { parent: None, water: 0.0, energy, age: 0 }
    }
}

impl Ledger for Segment {
    fn settle(&mut self, substance: Substance, amount: f32, kind: TransactionKind) {
        let balance = if substance == WATER { &mut self.water } else { &mut self.energy };
        match kind {
            TransactionKind::Increase => *balance += amount,
            TransactionKind::Decrease => *balance = (*balance - amount).max(0.0),
        }
    }
}

impl TreeAgent for Segment {
    fn tick(
        &mut self,
        world: &WorldView<'_>,
        plants: &FormationTree<Self>,
        index: AgentIndex,
        _t: Timestep,
    ) {
        self.age += 1;
        let children = plants.children(index);
        let leaf = children.is_empty();

        // Photosynthesis, limited by the water on hand.
        let light = if leaf { LIGHT } else { LIGHT * SHADED };
        let fixed = light.min(self.water);
        self.water -= fixed;
        self.energy += fixed - UPKEEP;

        if self.energy <= 0.0 {
            plants.death(index);
            return;
        }

        // Water climbs to the children.
        if !children.is_empty() && self.water > WATER_KEEP {
            let each = (self.water - WATER_KEEP) / children.len() as f32;
            for &child in &children {
                plants.transact(WATER, index, child, each);
            }
        }

        // Surplus energy sinks to the parent.
        if let Some(parent) = self.parent
            && self.energy > ENERGY_KEEP
        {
            plants.transact(ENERGY, index, parent, (self.energy - ENERGY_KEEP) / 2.0);
        }

        let mut rng = world.rng(index);
        let depth = plants.depth(index).unwrap_or(0);
        if leaf && depth < MAX_DEPTH && self.energy > GROW_COST {
            self.energy -= GROW_COST;
            let shoot = plants.insert(index, Segment::sprout(GROW_COST / 2.0));
            if self.energy > GROW_COST && rng.gen_bool(BRANCH_CHANCE) {
                self.energy -= GROW_COST;
                plants.insert(shoot, Segment::sprout(GROW_COST / 2.0));
            }
        }

        if self.parent.is_none()
            && self.age > SEED_AGE
            && self.energy > SEED_COST
            && rng.gen_bool(SEED_CHANCE)
        {
            self.energy -= SEED_COST;
            plants.birth(Segment::sprout(SEED_COST / 2.0));
        }
    }

    fn parent(&self) -> Option<AgentIndex> {
        self.parent
    }

    fn census_update_parent(&mut self, parent: Option<AgentIndex>, _token: CensusToken) {
        self.parent = parent;
    }
}

// ── Observer ──────────────────────────────────────────────────────────────────

/// Forwards to the CSV observer and logs a one-line progress report.
struct Progress {
    inner: WorldOutputObserver<CsvWriter>,
    every: u64,
    peak:  usize,
}

impl WorldObserver for Progress {
    fn on_step_start(&mut self, timestep: Timestep) {
        self.inner.on_step_start(timestep);
    }

    fn on_step_end(&mut self, summary: &StepSummary, formations: &[Box<dyn fm_formation::AnyFormation>]) {
        self.peak = self.peak.max(summary.agents);
        if self.every > 0 && summary.timestep.0.is_multiple_of(self.every) {
            info!(
                "{}: {} agents, {} settled, {} delivered in {} rounds",
                summary.timestep,
                summary.agents,
                summary.settled,
                summary.delivered,
                summary.delivery_rounds
            );
        }
        self.inner.on_step_end(summary, formations);
    }

    fn on_run_end(&mut self, next: Timestep) {
        self.inner.on_run_end(next);
    }
}

// ── main ──────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = load_config()?;
    println!("=== orchard — formation engine demo ===");
    println!(
        "Patches: {}  |  Seedlings: {}  |  Steps: {}  |  Seed: {}",
        config.soil_patches, config.seedlings, config.steps, config.world.seed
    );
    println!();

    // 1. Formations.
    let mut rng = WorldRng::new(config.world.seed);
    let patches = (0..config.soil_patches)
        .map(|_| Patch { moisture: rng.gen_range(0.0..SOIL_CAPACITY) })
        .collect();
    let soil = Formation::new("soil", patches);
    let plants = FormationTree::new("plants", vec![Segment::sprout(GROW_COST); config.seedlings])?
        .with_config(FormationConfig::default());

    // 2. World.
    let mut world = WorldBuilder::new()
        .config(config.world.clone())
        .formation(soil)
        .formation(plants)
        .build()?;

    // 3. Output.
    let writer = CsvWriter::new(&config.output_dir)?;
    let mut obs = Progress {
        inner: WorldOutputObserver::new(writer, config.snapshot_interval),
        every: config.snapshot_interval,
        peak:  0,
    };

    // 4. Run.
    let t0 = Instant::now();
    world.run(config.steps, &mut obs)?;
    let elapsed = t0.elapsed();

    if let Some(e) = obs.inner.take_error() {
        eprintln!("output error: {e}");
    }

    // 5. Summary.
    println!("Simulation complete in {:.3} s", elapsed.as_secs_f64());
    println!("  peak population : {}", obs.peak);
    println!("  output          : {}", config.output_dir.display());
    println!();

    println!("{:<10} {:>8}", "Formation", "Agents");
    println!("{}", "-".repeat(19));
    for f in world.formations() {
        println!("{:<10} {:>8}", f.name(), f.len());
    }

    if let Some(plants) = world.find::<FormationTree<Segment>>() {
        println!();
        println!(
            "{} plants, tallest reaches depth {}",
            plants.roots().len(),
            plants.max_depth()
        );
    }

    Ok(())
}
