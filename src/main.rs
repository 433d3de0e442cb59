use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use log::error;

use wsi_data::{ManifestSource, SampleValue, TilesDataset};

/// Print row counts, slide-level label distribution and class weights for a
/// tiles manifest
#[derive(Debug, Clone, Parser)]
struct Args {
    /// Root directory of the dataset; relative image paths resolve against it
    root: PathBuf,
    /// Manifest CSV (defaults to <root>/dataset.csv)
    #[clap(short, long)]
    dataset_csv: Option<PathBuf>,
    /// Only keep the training split
    #[clap(long, conflicts_with = "test")]
    train: bool,
    /// Only keep the test split
    #[clap(long)]
    test: bool,
}

fn main() {
    pretty_env_logger::init();
    let args = Args::parse();

    let split = match (args.train, args.test) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    };
    let source = match args.dataset_csv {
        Some(path) => ManifestSource::Path(path),
        None => ManifestSource::Default,
    };

    let dataset = match TilesDataset::new(args.root, source, split) {
        Ok(dataset) => dataset,
        Err(err) => {
            error!("Couldn't load dataset : {}", err);
            exit(1);
        }
    };

    println!("tiles: {}", dataset.len());

    let slide_labels = match dataset.slide_labels() {
        Ok(labels) => labels,
        Err(err) => {
            error!("Couldn't aggregate slide labels : {}", err);
            exit(1);
        }
    };
    println!("slides: {}", slide_labels.len());

    let mut counts = std::collections::BTreeMap::<SampleValue, usize>::new();
    for label in slide_labels.values() {
        *counts.entry(label.clone()).or_default() += 1;
    }
    for (label, count) in &counts {
        println!("label {} : {} slides", label, count);
    }

    match dataset.class_weights() {
        Ok(weights) => println!("class weights: {:?}", Vec::<f64>::from(&weights)),
        Err(err) => {
            error!("Couldn't compute class weights : {}", err);
            exit(1);
        }
    }
}
