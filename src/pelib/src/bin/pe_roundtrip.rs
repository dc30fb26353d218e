//! Loads a PE image and writes it back out unchanged, as a round-trip
//! smoke test for the parse/write pipeline.

use clap::Parser;
use pelib::PeFile;

#[derive(Parser)]
#[command(about = "Round-trip a PE/COFF image through pelib")]
struct Args {
    /// Path to the PE image to load.
    input: std::path::PathBuf,
    /// Path to write the re-serialized image to.
    output: std::path::PathBuf,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut pe = match PeFile::open(&args.input) {
        Ok(pe) => pe,
        Err(e) => {
            eprintln!("failed to load {}: {e}", args.input.display());
            std::process::exit(2);
        }
    };

    if let Err(e) = pe.recalculate() {
        eprintln!("failed to recalculate layout: {e}");
        std::process::exit(1);
    }

    match pe.write_to_file(&args.output) {
        Ok(bytes) => {
            println!("wrote {bytes} bytes to {}", args.output.display());
        }
        Err(e) => {
            eprintln!("failed to write {}: {e}", args.output.display());
            std::process::exit(1);
        }
    }
}
