use clap::Parser;

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let cli = remessactl::Cli::parse();
    if let Err(err) = remessactl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
