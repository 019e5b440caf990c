use anyhow::Result;

fn main() -> Result<()> {
    let code = memuse::cli::run()?;
    std::process::exit(code)
}
