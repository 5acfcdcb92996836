pub fn main() -> miette::Result<()> {
    sampledb::cli::execute()
}
