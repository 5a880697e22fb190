//! Training and prediction front-end for the perime decoder.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::process;

use clap::{Parser, Subcommand};
use tracing::info;

use peri_core::decoder::{explain::explain_paths, Decoder, DEFAULT_BEAM_SIZE};
use peri_core::dict::Dictionary;
use peri_core::model::{Model, DEFAULT_LEARNING_RATE};

#[derive(Parser)]
#[command(name = "peritool", about = "Perime decoder training and prediction tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a model, evaluating after each epoch
    Train {
        #[command(flatten)]
        dict: DictOpts,
        /// Training samples (code<TAB>text per line)
        train_file: String,
        /// Held-out samples for per-epoch evaluation
        eval_file: String,
        /// Where to save the trained model
        model_file: String,
        /// Number of passes over the training file
        #[arg(long, default_value_t = 2)]
        epochs: usize,
        /// Samples per batched model update
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
        /// Beam width for search
        #[arg(long, default_value_t = DEFAULT_BEAM_SIZE)]
        beam_size: usize,
        /// SGD learning rate
        #[arg(long, default_value_t = DEFAULT_LEARNING_RATE)]
        learning_rate: f64,
        /// Worker threads per batch (default: min(batch size, 10))
        #[arg(long)]
        threads: Option<usize>,
        /// Print per-epoch reports as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Evaluate a trained model on a labeled stream
    Eval {
        #[command(flatten)]
        dict: DictOpts,
        /// Trained model file
        model_file: String,
        /// Labeled samples (code<TAB>text per line)
        eval_file: String,
        /// Beam width for search
        #[arg(long, default_value_t = DEFAULT_BEAM_SIZE)]
        beam_size: usize,
        /// Samples per parallel batch
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
        /// Worker threads per batch (default: min(batch size, 10))
        #[arg(long)]
        threads: Option<usize>,
        /// Print the report as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Rank candidates for codes read from stdin
    Test {
        #[command(flatten)]
        dict: DictOpts,
        /// Trained model file
        model_file: String,
        /// Beam width for search
        #[arg(long, default_value_t = DEFAULT_BEAM_SIZE)]
        beam_size: usize,
        /// Number of candidates to print per code
        #[arg(short, long, default_value_t = 10)]
        num: usize,
    },

    /// Show ranked paths and score breakdowns for one code
    Explain {
        #[command(flatten)]
        dict: DictOpts,
        /// Trained model file
        model_file: String,
        /// Code to decode
        code: String,
        /// Beam width for search
        #[arg(long, default_value_t = DEFAULT_BEAM_SIZE)]
        beam_size: usize,
        /// Number of paths to show
        #[arg(short, long, default_value_t = 10)]
        num: usize,
    },
}

/// Dictionary location and load-time entry limits.
#[derive(clap::Args)]
struct DictOpts {
    /// Dictionary file (code<TAB>text per line)
    dict_file: String,
    /// Drop entries whose code exceeds this many bytes
    #[arg(long)]
    code_len_limit: Option<usize>,
    /// Drop entries whose text exceeds this many bytes
    #[arg(long)]
    text_len_limit: Option<usize>,
}

fn open_dict(opts: &DictOpts) -> Dictionary {
    Dictionary::open_with_limits(
        Path::new(&opts.dict_file),
        opts.code_len_limit.unwrap_or(usize::MAX),
        opts.text_len_limit.unwrap_or(usize::MAX),
    )
    .unwrap_or_else(|e| {
        eprintln!("Failed to load dictionary {}: {e}", opts.dict_file);
        process::exit(1);
    })
}

fn open_model(path: &str) -> Model {
    Model::open(Path::new(path)).unwrap_or_else(|e| {
        eprintln!("Failed to load model {path}: {e}");
        process::exit(1);
    })
}

fn open_reader(path: &str) -> BufReader<File> {
    BufReader::new(File::open(path).unwrap_or_else(|e| {
        eprintln!("Failed to open {path}: {e}");
        process::exit(1);
    }))
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Train {
            dict,
            train_file,
            eval_file,
            model_file,
            epochs,
            batch_size,
            beam_size,
            learning_rate,
            threads,
            json,
        } => {
            let dict = open_dict(&dict);
            let mut decoder =
                Decoder::with_model(&dict, beam_size, Model::new(learning_rate));
            let threads = threads.unwrap_or_else(|| batch_size.min(10)).max(1);

            for epoch in 1..=epochs {
                let trained = decoder
                    .train(open_reader(&train_file), batch_size, threads)
                    .unwrap_or_else(|e| {
                        eprintln!("Failed to read {train_file}: {e}");
                        process::exit(1);
                    });
                info!(epoch, %trained, "train");

                let evaluated = decoder
                    .evaluate(open_reader(&eval_file), batch_size, threads)
                    .unwrap_or_else(|e| {
                        eprintln!("Failed to read {eval_file}: {e}");
                        process::exit(1);
                    });
                info!(epoch, %evaluated, "evaluate");

                if json {
                    let line = serde_json::json!({
                        "epoch": epoch,
                        "train": trained,
                        "eval": evaluated,
                    });
                    println!("{line}");
                }
            }

            if let Err(e) = decoder.model().save_to(Path::new(&model_file)) {
                eprintln!("Failed to save model {model_file}: {e}");
                process::exit(1);
            }
        }

        Command::Eval {
            dict,
            model_file,
            eval_file,
            beam_size,
            batch_size,
            threads,
            json,
        } => {
            let dict = open_dict(&dict);
            let decoder = Decoder::with_model(&dict, beam_size, open_model(&model_file));
            let threads = threads.unwrap_or_else(|| batch_size.min(10)).max(1);

            let report = decoder
                .evaluate(open_reader(&eval_file), batch_size, threads)
                .unwrap_or_else(|e| {
                    eprintln!("Failed to read {eval_file}: {e}");
                    process::exit(1);
                });
            if json {
                println!("{}", serde_json::json!(report));
            } else {
                println!("{report}");
            }
        }

        Command::Test {
            dict,
            model_file,
            beam_size,
            num,
        } => {
            let dict = open_dict(&dict);
            let decoder = Decoder::with_model(&dict, beam_size, open_model(&model_file));

            let stdin = io::stdin().lock();
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for line in stdin.lines() {
                let line = line.unwrap_or_else(|e| {
                    eprintln!("Failed to read stdin: {e}");
                    process::exit(1);
                });
                let code = line.trim();
                if code.is_empty() {
                    continue;
                }
                match decoder.predict(code, num) {
                    Some(predictions) => {
                        for (rank, (text, prob)) in predictions.iter().enumerate() {
                            let _ = writeln!(out, "{rank}: {text} {prob}");
                        }
                    }
                    None => {
                        let _ = writeln!(out, "cannot decode {code}");
                    }
                }
            }
        }

        Command::Explain {
            dict,
            model_file,
            code,
            beam_size,
            num,
        } => {
            let dict = open_dict(&dict);
            let decoder = Decoder::with_model(&dict, beam_size, open_model(&model_file));
            match explain_paths(&decoder, &code, num) {
                Some(out) => print!("{out}"),
                None => {
                    eprintln!("cannot decode {code}");
                    process::exit(1);
                }
            }
        }
    }
}
