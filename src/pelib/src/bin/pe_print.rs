//! Loads a PE image and prints a summary of its headers, sections, and
//! resources.

use clap::Parser;
use pelib::PeFile;

#[derive(Parser)]
#[command(about = "Print a summary of a PE/COFF image")]
struct Args {
    /// Path to the PE image to load.
    path: std::path::PathBuf,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let pe = match PeFile::open(&args.path) {
        Ok(pe) => pe,
        Err(e) => {
            eprintln!("failed to load {}: {e}", args.path.display());
            std::process::exit(2);
        }
    };

    println!("machine: {:#06x}", pe.coff_header.machine);
    println!("magic: {:#06x}", pe.optional_header.magic());
    println!("sections: {}", pe.sections.len());
    for section in &pe.sections.sections {
        println!(
            "  {:<8} va={:#010x} size={:#x}",
            section.name_str(),
            section.virtual_address,
            section.contents_size()
        );
    }
    println!("resources: {}", pe.resource_table.resources.len());
    println!("version infos: {}", pe.version_infos.len());
    for info in &pe.version_infos {
        println!("{info:#?}");
    }
    println!("icon groups: {}", pe.icon_groups.len());
    println!("overlay bytes: {}", pe.overlay.len());
}
