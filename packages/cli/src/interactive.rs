//! Menu-driven mode used when no subcommand is given.

use built_surface_cli_utils::MultiProgress;
use built_surface_models::{BaseMetric, Compactness, MetricPath};
use dialoguer::{Confirm, Input, MultiSelect, Select};

use crate::{Overrides, Stage, execute};

/// Stages offered in the menu.
enum Action {
    RunAll,
    Footprint,
    Volume,
    Combine,
    Surface,
    Merge,
    Summarize,
}

impl Action {
    const ALL: &[Self] = &[
        Self::RunAll,
        Self::Footprint,
        Self::Volume,
        Self::Combine,
        Self::Surface,
        Self::Merge,
        Self::Summarize,
    ];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::RunAll => "Run footprint, volume and combine",
            Self::Footprint => "Zonal footprint sums",
            Self::Volume => "Zonal volume sums",
            Self::Combine => "Combine volume and footprint tables",
            Self::Surface => "Surface rasters (raster-first)",
            Self::Merge => "Merge per-year tables",
            Self::Summarize => "ISO summary of merged table",
        }
    }
}

const TABLE_SETS: &[(MetricPath, &str)] = &[
    (MetricPath::VolumeFootprint, "Volume + footprint tables"),
    (MetricPath::DirectSurface, "Direct surface tables"),
];

/// Prompts for a stage, the years and the compactness, then runs it.
///
/// # Errors
///
/// Returns an error if a prompt fails, the configuration is invalid, or
/// the selected stage fails.
pub async fn run(
    multi: &MultiProgress,
    overrides: &Overrides,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = overrides.load()?;

    println!("Built Surface Toolchain");
    println!();

    let labels: Vec<&str> = Action::ALL.iter().map(Action::label).collect();
    let idx = Select::new()
        .with_prompt("What would you like to do?")
        .items(&labels)
        .default(0)
        .interact()?;

    let stage = match Action::ALL[idx] {
        Action::RunAll => Stage::All,
        Action::Footprint => Stage::Zonal(BaseMetric::Footprint),
        Action::Volume => Stage::Zonal(BaseMetric::Volume),
        Action::Combine => Stage::Combine,
        Action::Surface => Stage::Surface,
        Action::Merge => Stage::Merge(prompt_table_set("Tables to merge")?),
        Action::Summarize => Stage::Summarize(prompt_table_set("Merged table to summarize")?),
    };

    let year_labels: Vec<String> = config.years.iter().map(ToString::to_string).collect();
    let defaults = vec![true; year_labels.len()];
    let selected = MultiSelect::new()
        .with_prompt("Years (space=toggle, a=all, enter=confirm)")
        .items(&year_labels)
        .defaults(&defaults)
        .interact()?;
    if selected.is_empty() {
        println!("No years selected.");
        return Ok(());
    }
    config.years = selected.into_iter().map(|i| config.years[i]).collect();

    let advanced = Confirm::new()
        .with_prompt("Configure advanced options?")
        .default(false)
        .interact()?;
    if advanced {
        let compactness: f64 = Input::new()
            .with_prompt("Compactness coefficient")
            .default(config.compactness.value())
            .interact_text()?;
        config.compactness = Compactness::new(compactness);

        config.pause_secs = Input::new()
            .with_prompt("Pause between years (seconds)")
            .default(config.pause_secs)
            .interact_text()?;
    }
    config.validate()?;

    execute(multi, config, stage).await
}

fn prompt_table_set(prompt: &str) -> Result<MetricPath, Box<dyn std::error::Error>> {
    let labels: Vec<&str> = TABLE_SETS.iter().map(|(_, label)| *label).collect();
    let idx = Select::new()
        .with_prompt(prompt)
        .items(&labels)
        .default(0)
        .interact()?;
    Ok(TABLE_SETS[idx].0)
}
