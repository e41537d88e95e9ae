//! Hoopcast CLI
//!
//! Walk-forward snapshots, ensemble training and game predictions.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use hoopcast::{Config, Result};

#[derive(Parser)]
#[command(name = "hoopcast")]
#[command(about = "Leakage-free game predictions from point-in-time team snapshots", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Data management commands
    Data {
        #[command(subcommand)]
        action: DataCommands,
    },
    /// Run the walk-forward pass and store every snapshot
    Compute,
    /// Train the classifier and margin regressor
    Train {
        /// First date of the held-out set (YYYY-MM-DD)
        #[arg(long)]
        cutoff: Option<NaiveDate>,
        /// Override number of epochs
        #[arg(long)]
        epochs: Option<usize>,
        /// Override the classifier learning rate
        #[arg(long)]
        lr: Option<f64>,
    },
    /// Predict contests and store the predictions
    Predict {
        /// Predict a single contest by id
        #[arg(long)]
        contest: Option<i64>,
        /// Start of a date range (inclusive)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// End of a date range (inclusive)
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Predict every contest without a final score
        #[arg(long)]
        scheduled: bool,
        /// Output format
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },
    /// Compare stored predictions against final scores
    Evaluate {
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Monte Carlo projection of a team's final win total
    Project {
        /// Team name
        team: String,
        /// Override number of simulated seasons
        #[arg(long)]
        simulations: Option<usize>,
    },
    /// Show a team's snapshot history
    Snapshots {
        /// Team name
        team: String,
    },
    /// Model management commands
    Model {
        #[command(subcommand)]
        action: ModelCommands,
    },
    /// Initialize a new project with default config
    Init,
}

#[derive(Subcommand)]
enum DataCommands {
    /// Import contests from a JSON feed file
    Import {
        /// Path to a JSON array of contests
        file: String,
    },
    /// Show database status
    Status,
    /// Correct the final score of a contest
    Correct {
        /// Contest id
        id: i64,
        home_score: u32,
        away_score: u32,
    },
}

#[derive(Subcommand)]
enum ModelCommands {
    /// Show model information
    Info,
}

#[derive(Clone, Debug)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(format!("Unknown format: {}. Use table, json, or csv.", s)),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let config = if std::path::Path::new(&cli.config).exists() {
        match Config::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    let result = match cli.command {
        Commands::Data { action } => match action {
            DataCommands::Import { file } => commands::data_import(&config, &file),
            DataCommands::Status => commands::data_status(&config),
            DataCommands::Correct {
                id,
                home_score,
                away_score,
            } => commands::data_correct(&config, id, home_score, away_score),
        },
        Commands::Compute => commands::compute(&config),
        Commands::Train { cutoff, epochs, lr } => commands::train(&config, cutoff, epochs, lr),
        Commands::Predict {
            contest,
            from,
            to,
            scheduled,
            format,
        } => commands::predict(&config, contest, from, to, scheduled, format),
        Commands::Evaluate { from, to } => commands::evaluate(&config, from, to),
        Commands::Project { team, simulations } => commands::project(&config, &team, simulations),
        Commands::Snapshots { team } => commands::snapshots(&config, &team),
        Commands::Model { action } => match action {
            ModelCommands::Info => commands::model_info(&config),
        },
        Commands::Init => commands::init(&cli.config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

mod commands {
    use super::*;
    use hoopcast::data::{Database, WalkForwardEngine};
    use hoopcast::features::FeatureLayout;
    use hoopcast::predict::{EnsemblePredictor, RemainingContest, SeasonProjector};
    use hoopcast::training::metrics::{
        CalibrationTable, ClassificationMetrics, EvaluationReport, RegressionMetrics,
    };
    use hoopcast::{Contest, ContestId, ForecastError, Outcome, PredictionRecord, TeamId};
    use serde::Deserialize;
    use std::collections::HashMap;

    /// One entry of a contest feed file
    #[derive(Debug, Deserialize)]
    struct FeedContest {
        id: Option<i64>,
        date: NaiveDate,
        home: String,
        away: String,
        home_score: Option<u32>,
        away_score: Option<u32>,
    }

    pub fn init(config_path: &str) -> Result<()> {
        let config = Config::default();
        config.save(config_path)?;
        println!("Created default config at {}", config_path);

        std::fs::create_dir_all("data")?;
        std::fs::create_dir_all("model")?;
        println!("Created data/ and model/ directories");

        println!("\nNext steps:");
        println!("  1. Edit {} to customize settings", config_path);
        println!("  2. Run 'hoopcast data import <file>' to load contests");
        println!("  3. Run 'hoopcast compute' to build snapshots");
        println!("  4. Run 'hoopcast train' to train the model");
        println!("  5. Run 'hoopcast predict --scheduled' to make predictions");

        Ok(())
    }

    pub fn data_import(config: &Config, file: &str) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;

        let content = std::fs::read_to_string(file)?;
        let feed: Vec<FeedContest> = serde_json::from_str(&content)
            .map_err(|e| ForecastError::Parse(format!("Failed to parse {}: {}", file, e)))?;
        println!("Read {} contests from {}", feed.len(), file);

        let mut completed = 0;
        for entry in &feed {
            let home = db.get_or_create_team(&entry.home)?;
            let away = db.get_or_create_team(&entry.away)?;

            let contest = match entry.id {
                Some(id) => {
                    let contest = Contest {
                        id: ContestId(id),
                        date: entry.date,
                        seq: id,
                        home: home.id,
                        away: away.id,
                        home_score: entry.home_score,
                        away_score: entry.away_score,
                    };
                    db.upsert_contest(&contest)?;
                    contest
                }
                None => db.insert_contest(
                    entry.date,
                    home.id,
                    away.id,
                    entry.home_score,
                    entry.away_score,
                )?,
            };
            if contest.is_completed() {
                completed += 1;
            }
        }

        println!(
            "Stored {} contests ({} completed, {} scheduled)",
            feed.len(),
            completed,
            feed.len() - completed
        );
        println!("Run 'hoopcast compute' to refresh snapshots");
        Ok(())
    }

    pub fn data_status(config: &Config) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;
        let stats = db.get_stats()?;

        println!("Database Status");
        println!("───────────────────────────────");
        println!("  Path:        {}", config.data.database_path);
        println!("  Teams:       {}", stats.team_count);
        println!(
            "  Contests:    {} ({} completed)",
            stats.contest_count, stats.completed_count
        );
        println!("  Snapshots:   {}", stats.snapshot_count);
        println!("  Predictions: {}", stats.prediction_count);
        if let (Some(earliest), Some(latest)) = (stats.earliest_contest, stats.latest_contest) {
            println!("  Range:       {} to {}", earliest, latest);
        }

        Ok(())
    }

    pub fn data_correct(config: &Config, id: i64, home_score: u32, away_score: u32) -> Result<()> {
        let mut db = Database::open(&config.data.database_path)?;
        db.correct_score(ContestId(id), home_score, away_score)?;
        println!(
            "Corrected contest {} to {}-{}; run 'hoopcast compute' to refresh later snapshots",
            id, home_score, away_score
        );
        Ok(())
    }

    pub fn compute(config: &Config) -> Result<()> {
        let mut db = Database::open(&config.data.database_path)?;
        let contests = db.get_all_contests()?;

        println!("Running walk-forward pass over {} contests...", contests.len());
        let engine = WalkForwardEngine::new(config.rating.clone(), config.form.windows.clone());
        let (log, summary) = engine.run_with_summary(&contests)?;

        let stored = db.replace_snapshots(&log)?;
        println!(
            "Stored {} snapshots for {} teams ({} contests processed, {} not yet played)",
            stored, summary.teams, summary.processed, summary.skipped_incomplete
        );
        Ok(())
    }

    pub fn train(
        config: &Config,
        cutoff: Option<NaiveDate>,
        epochs: Option<usize>,
        lr: Option<f64>,
    ) -> Result<()> {
        use burn::backend::{Autodiff, NdArray};
        use hoopcast::data::ContestDataset;
        use hoopcast::training::trainer::EnsembleTrainer;

        type MyBackend = NdArray<f32>;
        type MyAutodiffBackend = Autodiff<MyBackend>;

        let mut training_config = config.clone();
        if let Some(c) = cutoff {
            training_config.training.train_cutoff = c;
        }
        if let Some(e) = epochs {
            training_config.training.epochs = e;
        }
        if let Some(lr) = lr {
            training_config.training.learning_rate = lr;
        }
        training_config.validate()?;

        let db = Database::open(&config.data.database_path)?;
        let contests = db.get_all_contests()?;
        let log = db.load_snapshot_log()?;
        if log.is_empty() {
            return Err(ForecastError::InsufficientData(
                "No snapshots in database. Run 'hoopcast compute' first.".to_string(),
            ));
        }

        let layout = FeatureLayout::new(&config.form.windows);
        let dataset =
            ContestDataset::build(&contests, &log, &layout, config.rating.initial_rating)?;
        let cutoff = training_config.training.train_cutoff;
        let (train, heldout) = dataset.temporal_split(cutoff)?;

        println!("Training on {} contests before {}", train.len(), cutoff);
        println!("Holding out {} contests from {} on", heldout.len(), cutoff);
        println!("  Features: {}", layout.dim());
        println!("  Epochs:   {}", training_config.training.epochs);

        let device = Default::default();
        let trainer = EnsembleTrainer::<MyAutodiffBackend>::new(&training_config, device);
        let trained = trainer.train(&train, &heldout)?;
        trained.save(&config.data.model_path)?;

        println!("\nTraining complete");
        println!(
            "  Classifier loss: {:.4} -> {:.4}",
            trained.manifest.classifier_loss.0, trained.manifest.classifier_loss.1
        );
        println!(
            "  Regressor loss:  {:.4} -> {:.4}",
            trained.manifest.regressor_loss.0, trained.manifest.regressor_loss.1
        );
        if let Some(report) = &trained.manifest.evaluation {
            println!("\nHeld-out evaluation");
            println!("───────────────────────────────");
            println!("{}", report);
        }
        println!("Model saved to {}", config.data.model_path);

        Ok(())
    }

    pub fn predict(
        config: &Config,
        contest: Option<i64>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        scheduled: bool,
        format: OutputFormat,
    ) -> Result<()> {
        let mut db = Database::open(&config.data.database_path)?;
        let contests = select_contests(&db, contest, from, to, scheduled)?;
        let predictor = load_predictor(config)?;

        if contests.is_empty() {
            println!("No contests to predict");
            return Ok(());
        }

        let log = db.load_snapshot_log()?;
        let records = predictor.predict_many(&contests, &log)?;
        db.upsert_predictions(&records)?;
        log::info!("Stored {} predictions", records.len());

        let names = team_names(&db)?;
        print_predictions(&records, &names, &format)
    }

    pub fn evaluate(config: &Config, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;
        let stats = db.get_stats()?;

        let (Some(earliest), Some(latest)) = (stats.earliest_contest, stats.latest_contest) else {
            println!("No contests in database");
            return Ok(());
        };
        let start = from.unwrap_or(earliest);
        let end = to.unwrap_or(latest);

        let results: HashMap<ContestId, Contest> = db
            .get_contests_in_range(start, end)?
            .into_iter()
            .filter(|c| c.is_completed())
            .map(|c| (c.id, c))
            .collect();

        let mut classifier = Vec::new();
        let mut rating = Vec::new();
        let mut ensemble = Vec::new();
        let mut margins = Vec::new();
        let mut outcomes = Vec::new();
        let mut actual_margins = Vec::new();

        for record in db.get_predictions_in_range(start, end)? {
            let Some(result) = results.get(&record.contest_id).and_then(|c| c.result()) else {
                continue;
            };
            classifier.push(record.classifier_prob);
            rating.push(record.rating_prob);
            ensemble.push(record.ensemble_prob);
            margins.push(record.point_diff);
            outcomes.push(if result.home_outcome() == Outcome::Win { 1.0 } else { 0.0 });
            actual_margins.push(result.margin() as f64);
        }

        if ensemble.is_empty() {
            println!("No stored predictions for completed contests between {} and {}", start, end);
            return Ok(());
        }

        let report = EvaluationReport {
            classifier: ClassificationMetrics::compute(&classifier, &outcomes),
            rating: ClassificationMetrics::compute(&rating, &outcomes),
            ensemble: ClassificationMetrics::compute(&ensemble, &outcomes),
            regressor: RegressionMetrics::compute(&margins, &actual_margins),
            calibration: CalibrationTable::compute(
                &ensemble,
                &outcomes,
                CalibrationTable::DEFAULT_BUCKETS,
            ),
        };

        println!("Evaluation {} to {} ({} contests)", start, end, ensemble.len());
        println!("───────────────────────────────");
        println!("{}", report);
        Ok(())
    }

    pub fn project(config: &Config, team_name: &str, simulations: Option<usize>) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;
        let team = db.require_team(team_name)?;
        let predictor = load_predictor(config)?;

        let contests: Vec<Contest> = db
            .get_all_contests()?
            .into_iter()
            .filter(|c| c.involves(team.id))
            .collect();

        let (mut wins, mut losses) = (0, 0);
        for (contest, result) in contests.iter().filter_map(|c| c.result().map(|r| (c, r))) {
            let outcome = if contest.home == team.id {
                result.home_outcome()
            } else {
                result.home_outcome().reversed()
            };
            match outcome {
                Outcome::Win => wins += 1,
                Outcome::Loss => losses += 1,
                Outcome::Draw => {}
            }
        }

        let upcoming: Vec<Contest> = contests.into_iter().filter(|c| !c.is_completed()).collect();
        let log = db.load_snapshot_log()?;
        let remaining: Vec<RemainingContest> = predictor
            .predict_many(&upcoming, &log)?
            .iter()
            .map(RemainingContest::from)
            .collect();

        let mut projection = config.projection.clone();
        if let Some(n) = simulations {
            projection.simulations = n;
        }
        let n = projection.simulations;
        let result = SeasonProjector::new(projection).project(team.id, wins, losses, &remaining)?;

        println!("Season projection: {}", team.name);
        println!("───────────────────────────────");
        println!("  Current record: {}-{}", result.current_wins, result.current_losses);
        println!("  Remaining:      {}", result.remaining);
        println!("  Simulations:    {}", n);
        println!("  Mean wins:      {:.1} (± {:.1})", result.mean_wins, result.std_dev);
        println!("  Median wins:    {}", result.median_wins);
        println!(
            "  80% range:      {} to {}",
            result.percentile_10, result.percentile_90
        );
        Ok(())
    }

    pub fn snapshots(config: &Config, team_name: &str) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;
        let team = db.require_team(team_name)?;
        let names = team_names(&db)?;
        let snapshots = db.snapshots_for_team(team.id)?;

        if snapshots.is_empty() {
            println!("No snapshots for {}; run 'hoopcast compute'", team.name);
            return Ok(());
        }

        println!("Snapshots: {}", team.name);
        println!(
            "{:<10} {:>8} {:<20} {:>7} {:>7} {:>8} {:>8} {:>5}",
            "Date", "Contest", "Opponent", "Score", "Result", "Elo pre", "Elo post", "Rest"
        );
        println!("{}", "─".repeat(80));
        for s in &snapshots {
            let opponent = format!(
                "{}{}",
                if s.is_home { "vs " } else { "@ " },
                name_of(&names, s.opponent)
            );
            let rest = match s.rest_days {
                Some(days) if s.back_to_back => format!("{}*", days),
                Some(days) => days.to_string(),
                None => "-".to_string(),
            };
            println!(
                "{:<10} {:>8} {:<20} {:>7} {:>7} {:>8.1} {:>8.1} {:>5}",
                s.date,
                s.contest_id.0,
                opponent,
                format!("{}-{}", s.points_scored, s.points_allowed),
                s.outcome.code(),
                s.rating_before,
                s.rating_after,
                rest
            );
        }
        println!("\n{} contests (* = back-to-back)", snapshots.len());
        Ok(())
    }

    pub fn model_info(config: &Config) -> Result<()> {
        use hoopcast::training::trainer::ModelManifest;

        let manifest_file = format!("{}.json", config.data.model_path);
        if !std::path::Path::new(&manifest_file).exists() {
            return Err(ForecastError::NoModel);
        }
        let manifest = ModelManifest::load(&manifest_file)?;

        println!("Model Information");
        println!("───────────────────────────────");
        println!("  Path:           {}", config.data.model_path);
        println!("  Features:       {}", manifest.feature_names.len());
        println!("  Windows:        {:?}", manifest.windows);
        println!("  K-factor:       {}", manifest.k_factor);
        println!("  Initial rating: {}", manifest.initial_rating);
        println!("  Train cutoff:   {}", manifest.train_cutoff);
        println!(
            "  Samples:        {} train / {} held out",
            manifest.train_samples, manifest.heldout_samples
        );
        println!("  Epochs:         {}", manifest.epochs);
        println!(
            "  Ensemble:       {:.2} model + {:.2} rating",
            config.ensemble.model_weight, config.ensemble.rating_weight
        );
        if let Some(report) = &manifest.evaluation {
            println!("\n{}", report);
        }
        Ok(())
    }

    /// Contests picked by the `predict` selection flags
    pub(crate) fn select_contests(
        db: &Database,
        contest: Option<i64>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        scheduled: bool,
    ) -> Result<Vec<Contest>> {
        let usage = "use --contest <ID>, --from <DATE> --to <DATE>, or --scheduled";
        match (contest, from, to, scheduled) {
            (Some(id), _, _, _) => Ok(vec![db.get_contest(ContestId(id))?]),
            (None, Some(start), Some(end), _) => db.get_contests_in_range(start, end),
            (None, Some(_), None, _) => Err(ForecastError::Config(format!(
                "--from needs a matching --to; {}",
                usage
            ))),
            (None, None, Some(_), _) => Err(ForecastError::Config(format!(
                "--to needs a matching --from; {}",
                usage
            ))),
            (None, None, None, true) => db.get_scheduled_contests(),
            (None, None, None, false) => Err(ForecastError::Config(format!(
                "no contests selected; {}",
                usage
            ))),
        }
    }

    fn load_predictor(config: &Config) -> Result<EnsemblePredictor> {
        let layout = FeatureLayout::new(&config.form.windows);
        EnsemblePredictor::load(&config.data.model_path, config.ensemble.clone(), &layout)
    }

    fn team_names(db: &Database) -> Result<HashMap<TeamId, String>> {
        Ok(db
            .get_all_teams()?
            .into_iter()
            .map(|t| (t.id, t.name))
            .collect())
    }

    fn name_of(names: &HashMap<TeamId, String>, team: TeamId) -> String {
        names
            .get(&team)
            .cloned()
            .unwrap_or_else(|| team.to_string())
    }

    fn print_predictions(
        records: &[PredictionRecord],
        names: &HashMap<TeamId, String>,
        format: &OutputFormat,
    ) -> Result<()> {
        match format {
            OutputFormat::Table => {
                println!(
                    "{:<10} {:>8} {:<20} {:<20} {:>7} {:>7} {:>7} {:>7}",
                    "Date", "Contest", "Home", "Away", "P(home)", "Model", "Elo", "Margin"
                );
                println!("{}", "─".repeat(94));
                for r in records {
                    println!(
                        "{:<10} {:>8} {:<20} {:<20} {:>6.1}% {:>6.1}% {:>6.1}% {:>+7.1}",
                        r.date,
                        r.contest_id.0,
                        name_of(names, r.home),
                        name_of(names, r.away),
                        r.ensemble_prob * 100.0,
                        r.classifier_prob * 100.0,
                        r.rating_prob * 100.0,
                        r.point_diff
                    );
                }
            }
            OutputFormat::Json => {
                let rows: Vec<serde_json::Value> = records
                    .iter()
                    .map(|r| {
                        serde_json::json!({
                            "contest_id": r.contest_id.0,
                            "date": r.date.to_string(),
                            "home": name_of(names, r.home),
                            "away": name_of(names, r.away),
                            "home_win_prob": r.ensemble_prob,
                            "classifier_prob": r.classifier_prob,
                            "rating_prob": r.rating_prob,
                            "point_diff": r.point_diff,
                            "home_rating": r.home_rating,
                            "away_rating": r.away_rating,
                        })
                    })
                    .collect();
                let json = serde_json::to_string_pretty(&rows)
                    .map_err(|e| ForecastError::Parse(e.to_string()))?;
                println!("{}", json);
            }
            OutputFormat::Csv => {
                println!("contest_id,date,home,away,home_win_prob,classifier_prob,rating_prob,point_diff");
                for r in records {
                    println!(
                        "{},{},{},{},{:.4},{:.4},{:.4},{:.2}",
                        r.contest_id.0,
                        r.date,
                        name_of(names, r.home),
                        name_of(names, r.away),
                        r.ensemble_prob,
                        r.classifier_prob,
                        r.rating_prob,
                        r.point_diff
                    );
                }
            }
        }
        Ok(())
    }
}
