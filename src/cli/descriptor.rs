use clap::Parser;
use sampledb_consts::consts;
use sampledb_provision::DescriptorFormat;

/// Prints the descriptor used while no working copy is provisioned.
///
/// It addresses the read-only database inside the bundled archive.
#[derive(Debug, Parser)]
pub struct Args {
    /// Also print the schema the sample tables live in
    #[clap(long)]
    pub schema: bool,
}

pub fn execute(args: Args) -> miette::Result<()> {
    let descriptor = DescriptorFormat::default().resolve(None);
    println!("{}", consts::DESCRIPTOR_STYLE.apply_to(descriptor));
    if args.schema {
        println!("{}", consts::SAMPLE_DB_SCHEMA);
    }
    Ok(())
}
