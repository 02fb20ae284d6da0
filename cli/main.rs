#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::process;

use modechoice::config::ChoiceConfig;
use modechoice::cross_validate::cross_validate_with_progress;
use modechoice::data::load_mode_table;
use modechoice::estimate::{EstimationOptions, estimate};
use modechoice::long_form::build_long_form;
use modechoice::model::FittedModel;
use modechoice::predict::{Prediction, PredictionMethod};
use modechoice::spec::Alternatives;
use modechoice::upsample::upsample;

#[derive(Args)]
pub struct FitArgs {
    /// Path to the training mode table (CSV, or TSV with a .tsv extension)
    pub training_data: String,

    /// Path to the model configuration (.toml)
    #[arg(long)]
    pub config: String,

    /// Where to write the fitted model
    #[arg(long, default_value = "model.toml")]
    pub output: String,

    /// Seed for the upsampling draws configured in [upsample]
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Args)]
pub struct PredictArgs {
    /// Path to the mode table to predict (the mode column is not needed)
    pub test_data: String,

    /// Path to the fitted model file (.toml)
    #[arg(long)]
    pub model: String,

    /// Path to the model configuration used for fitting (.toml)
    #[arg(long)]
    pub config: String,

    /// How probabilities are turned into a predicted alternative
    #[arg(long, value_enum, default_value_t = PredictionMethod::Max)]
    pub method: PredictionMethod,

    /// Seed for random prediction draws
    #[arg(long)]
    pub seed: Option<u64>,

    /// Where to write the predictions
    #[arg(long, default_value = "predictions.csv")]
    pub output: String,
}

#[derive(Args)]
pub struct CvArgs {
    /// Path to the mode table to cross-validate on
    pub data: String,

    /// Path to the model configuration (.toml)
    #[arg(long)]
    pub config: String,

    /// Number of folds; overrides [cv].n_folds
    #[arg(long)]
    pub folds: Option<usize>,

    /// Seed for fold assignment, upsampling and random draws; overrides [cv].seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Prediction method; overrides [cv].method
    #[arg(long, value_enum)]
    pub method: Option<PredictionMethod>,
}

pub fn fit(args: FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ChoiceConfig::load(&args.config)?;
    let spec = config.specification()?;
    println!("Model specification:\n{spec}");

    println!("Loading training data from: {}", args.training_data);
    let table = load_mode_table(&args.training_data, &config.schema(true))?;
    println!("Loaded {} cases", table.n_rows());

    let long = build_long_form(
        &table,
        &config.alternative_attributes,
        &config.generic_attributes,
        spec.alternatives(),
        true,
    )?;

    let rules = config.upsample_rules()?;
    let long = if rules.is_empty() {
        long
    } else {
        let (upsampled, summary) = upsample(&long, &rules, args.seed)?;
        println!("Upsampled cases per alternative. {summary}");
        upsampled
    };

    // The summary goes to stdout below, so the estimator's own log copy is off.
    let options = EstimationOptions {
        display: false,
        ..config.estimation.clone()
    };
    let model = estimate(&spec, &long, &options)?;
    println!("{model}");

    model.save(&args.output)?;
    println!("Model saved to: {}", args.output);
    Ok(())
}

pub fn predict(args: PredictArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading model from: {}", args.model);
    let model = FittedModel::load(&args.model)?;
    let config = ChoiceConfig::load(&args.config)?;

    println!("Loading prediction data from: {}", args.test_data);
    let table = load_mode_table(&args.test_data, &config.schema(false))?;
    let long = build_long_form(
        &table,
        &config.alternative_attributes,
        &config.generic_attributes,
        &model.alternatives,
        false,
    )?;
    println!("Loaded {} cases for prediction", long.n_cases());

    let prediction = model.predict(&long, args.method, args.seed)?;
    save_predictions(&prediction, &model.alternatives, &args.output)?;
    println!("Predictions saved to: {}", args.output);
    Ok(())
}

pub fn run_cv(args: CvArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ChoiceConfig::load(&args.config)?;
    let mut cv = config.cross_validation()?;
    if let Some(folds) = args.folds {
        cv.n_folds = folds;
    }
    if args.seed.is_some() {
        cv.seed = args.seed;
    }
    if let Some(method) = args.method {
        cv.method = method;
    }

    println!("Loading data from: {}", args.data);
    let table = load_mode_table(&args.data, &config.schema(true))?;
    let long = build_long_form(
        &table,
        &config.alternative_attributes,
        &config.generic_attributes,
        &config.alternatives,
        true,
    )?;
    println!(
        "Running {}-fold cross-validation on {} cases",
        cv.n_folds,
        long.n_cases()
    );

    let pb = create_progress_bar(cv.n_folds as u64, "folds");
    let report = cross_validate_with_progress(
        &long,
        &config.alternatives,
        &config.alt_attr_vars(),
        &config.generic_attributes,
        &cv,
        |_| pb.inc(1),
    );
    pb.finish_and_clear();

    print!("{}", report?);
    Ok(())
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) =
        ProgressStyle::with_template("> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());
    pb
}

/// Writes one row per case: id, predicted alternative, then one probability per alternative.
fn save_predictions(
    prediction: &Prediction,
    alternatives: &Alternatives,
    output_path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = csv::Writer::from_path(output_path)?;
    let mut header = vec!["case_id".to_string(), "prediction".to_string()];
    header.extend(alternatives.names().iter().map(|name| format!("p_{name}")));
    writer.write_record(&header)?;

    for (case_idx, case_id) in prediction.case_ids.iter().enumerate() {
        let predicted = prediction
            .choices
            .as_ref()
            .and_then(|choices| alternatives.name(choices[case_idx]))
            .unwrap_or_default();
        let mut record = vec![case_id.to_string(), predicted.to_string()];
        record.extend(
            prediction
                .probabilities
                .row(case_idx)
                .iter()
                .map(|p| format!("{p:.6}")),
        );
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "modechoice",
    about = "Multinomial logit models of travel mode choice",
    long_about = "Fit multinomial logit mode-choice models from survey tables, \
                 predict choices for new cases and cross-validate specifications."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a model to training data
    #[command(about = "Fit an MNL model (outputs: model.toml)")]
    Fit(FitArgs),

    /// Apply a fitted model to new data
    #[command(about = "Predict mode choices (outputs: predictions.csv)")]
    Predict(PredictArgs),

    /// Cross-validate a model specification
    #[command(about = "K-fold cross-validation with accuracy and macro-F1")]
    Cv(CvArgs),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();
    let result = match command {
        Some(Commands::Fit(args)) => fit(args),
        Some(Commands::Predict(args)) => predict(args),
        Some(Commands::Cv(args)) => run_cv(args),
        None => Cli::command().print_help().map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
