//! Semiparametric IRWLS training executable.
//!
//! Usage: `psirwls-train [options] training_set_file model_file`

use std::process::exit;
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;

use pirwls::interface::{self, FileFormat, model_file};
use pirwls::kernels::KernelKind;
use pirwls::model::Model;
use pirwls::semiparametric::{self, CentroidSelection};
use pirwls::{TrainError, TrainHooks, TrainProperties};

fn print_instructions() {
    eprintln!("psirwls-train: trains a sparse (semiparametric) SVM on the");
    eprintln!("given training set and generates a model for future predictions.\n");
    eprintln!("Usage: psirwls-train [options] training_set_file model_file\n");
    eprintln!("Options:");
    eprintln!("  -k kernel type: (default 1)");
    eprintln!("       0 -- linear kernel u'*v");
    eprintln!("       1 -- radial basis function: exp(-gamma*|u-v|^2)");
    eprintln!("  -g gamma: parameter of the radial basis kernel (default 1)");
    eprintln!("  -c cost: SVM cost parameter C (default 1)");
    eprintln!("  -t threads: number of threads (default 1)");
    eprintln!("  -s size: number of centroids of the classifier (default 10)");
    eprintln!("  -a algorithm: centroid selection (default 1)");
    eprintln!("       0 -- random selection");
    eprintln!("       1 -- SGMA (sparse greedy matrix approximation)");
    eprintln!("  -f file format: 0 -- csv, 1 -- libsvm (default 1)");
    eprintln!("  -p separator: csv field separator (default ',')");
    eprintln!("  -v verbosity: 0 -- silent, 1 -- per-iteration output (default 0)");
}

struct Args {
    props: TrainProperties,
    format: FileFormat,
    separator: u8,
    verbose: bool,
    dataset_path: String,
    model_path: String,
}

fn parse_args() -> Result<Args, String> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let mut props = TrainProperties::default();
    let mut format = FileFormat::Libsvm;
    let mut separator = b',';
    let mut verbose = false;

    let mut i = 0;
    while i < argv.len() && argv[i].starts_with('-') {
        let flag = argv[i].clone();
        i += 1;
        let value = argv
            .get(i)
            .ok_or_else(|| format!("missing value for {flag}"))?;
        match flag.as_str() {
            "-g" => props.gamma = value.parse().map_err(|_| format!("bad gamma `{value}`"))?,
            "-c" => props.c = value.parse().map_err(|_| format!("bad cost `{value}`"))?,
            "-t" => {
                props.threads = value.parse().map_err(|_| format!("bad threads `{value}`"))?;
                props.threads = props.threads.max(1);
            }
            "-s" => {
                props.model_size = value
                    .parse()
                    .map_err(|_| format!("bad classifier size `{value}`"))?;
            }
            "-a" => {
                props.selection = match value.as_str() {
                    "0" => CentroidSelection::Random,
                    "1" => CentroidSelection::Sgma,
                    _ => return Err(format!("unknown algorithm `{value}`")),
                };
            }
            "-k" => {
                props.kernel = match value.as_str() {
                    "0" => KernelKind::Linear,
                    "1" => KernelKind::Rbf,
                    _ => return Err(format!("unknown kernel `{value}`")),
                };
            }
            "-f" => {
                format = match value.as_str() {
                    "0" => FileFormat::Csv,
                    "1" => FileFormat::Libsvm,
                    _ => return Err(format!("unknown file format `{value}`")),
                };
            }
            "-p" => {
                separator = *value
                    .as_bytes()
                    .first()
                    .ok_or_else(|| "empty separator".to_string())?;
            }
            "-v" => verbose = value != "0",
            _ => return Err(format!("unknown parameter {flag}")),
        }
        i += 1;
    }

    let positional = &argv[i..];
    if positional.len() != 2 {
        return Err("expected a training set file and a model file".to_string());
    }

    Ok(Args {
        props,
        format,
        separator,
        verbose,
        dataset_path: positional[0].clone(),
        model_path: positional[1].clone(),
    })
}

fn main() {
    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}\n");
            print_instructions();
            exit(4);
        }
    };

    let dataset = match interface::load_labeled(&args.dataset_path, args.format, args.separator) {
        Ok(dataset) => dataset,
        Err(error) => {
            eprintln!("{}: {error}", args.dataset_path);
            exit(2);
        }
    };
    println!(
        "Dataset loaded from file: {}\n\nTraining samples: {}\nNumber of features: {}\n",
        args.dataset_path,
        dataset.len(),
        dataset.maxdim()
    );

    let mut hooks = if args.verbose {
        TrainHooks::verbose()
    } else {
        TrainHooks::silent()
    };
    let mut rng = StdRng::seed_from_u64(0);

    println!("Running semiparametric IRWLS");
    let start = Instant::now();
    let (outcome, centroids) =
        match semiparametric::train_semiparametric(&dataset, &args.props, &mut hooks, &mut rng) {
            Ok(result) => result,
            Err(TrainError::Programming(error)) => {
                eprintln!("{error}");
                exit(4);
            }
            Err(error) => {
                eprintln!("{error}");
                exit(1);
            }
        };
    println!(
        "\nWeights calculated in {} ms ({:?}, {} iterations)\n",
        start.elapsed().as_millis(),
        outcome.status,
        outcome.iterations
    );

    let model = Model::from_semiparametric(&dataset, &args.props, &outcome.beta, &centroids);
    println!("Saving model in file: {}\n", args.model_path);
    if let Err(error) = model_file::store_to_path(&model, &args.model_path) {
        eprintln!("{}: {error}", args.model_path);
        exit(2);
    }
}
