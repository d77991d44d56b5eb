//! Prediction executable for trained models.
//!
//! Usage: `pirwls-predict [options] dataset_file model_file output_file`

use std::fs::File;
use std::io::BufWriter;
use std::process::exit;

use pirwls::interface::{self, FileFormat, model_file};
use pirwls::model::Model;

fn print_instructions() {
    eprintln!("pirwls-predict: classifies a dataset with a trained model.\n");
    eprintln!("Usage: pirwls-predict [options] dataset_file model_file output_file\n");
    eprintln!("Options:");
    eprintln!("  -t threads: number of threads (default 1)");
    eprintln!("  -l labeled: 0 -- unlabeled dataset, 1 -- labeled dataset (default 0)");
    eprintln!("  -s soft: 0 -- class output, 1 -- soft output (default 0)");
    eprintln!("  -f file format: 0 -- csv, 1 -- libsvm (default 1)");
    eprintln!("  -p separator: csv field separator (default ',')");
}

struct Args {
    threads: usize,
    labeled: bool,
    soft: bool,
    format: FileFormat,
    separator: u8,
    dataset_path: String,
    model_path: String,
    output_path: String,
}

fn parse_args() -> Result<Args, String> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let mut threads = 1;
    let mut labeled = false;
    let mut soft = false;
    let mut format = FileFormat::Libsvm;
    let mut separator = b',';

    let mut i = 0;
    while i < argv.len() && argv[i].starts_with('-') {
        let flag = argv[i].clone();
        i += 1;
        let value = argv
            .get(i)
            .ok_or_else(|| format!("missing value for {flag}"))?;
        match flag.as_str() {
            "-t" => {
                threads = value
                    .parse::<usize>()
                    .map_err(|_| format!("bad threads `{value}`"))?
                    .max(1);
            }
            "-l" => labeled = value != "0",
            "-s" => soft = value != "0",
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
            _ => return Err(format!("unknown parameter {flag}")),
        }
        i += 1;
    }

    let positional = &argv[i..];
    if positional.len() != 3 {
        return Err("expected a dataset file, a model file and an output file".to_string());
    }

    Ok(Args {
        threads,
        labeled,
        soft,
        format,
        separator,
        dataset_path: positional[0].clone(),
        model_path: positional[1].clone(),
        output_path: positional[2].clone(),
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

    let model = match model_file::load_from_path(&args.model_path) {
        Ok(model) => model,
        Err(error) => {
            eprintln!("{}: {error}", args.model_path);
            exit(2);
        }
    };

    let dataset = match interface::load_for_prediction(
        &args.dataset_path,
        args.format,
        args.separator,
        args.labeled,
    ) {
        Ok(dataset) => dataset,
        Err(error) => {
            eprintln!("{}: {error}", args.dataset_path);
            exit(2);
        }
    };

    let raw = model.predict(&dataset, args.threads);
    let predictions: Vec<f64> = if args.soft {
        raw.clone()
    } else {
        raw.iter().map(|&p| if p > 0.0 { 1.0 } else { -1.0 }).collect()
    };

    let output = match File::create(&args.output_path) {
        Ok(file) => file,
        Err(error) => {
            eprintln!("{}: {error}", args.output_path);
            exit(2);
        }
    };
    if let Err(error) = model_file::write_predictions(&predictions, &mut BufWriter::new(output)) {
        eprintln!("{}: {error}", args.output_path);
        exit(2);
    }

    if args.labeled {
        let accuracy = Model::accuracy(&raw, &dataset.labels()[..dataset.len()]);
        println!("Accuracy: {:.4}", accuracy);
    }
}
