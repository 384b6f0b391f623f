use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = wavetapctl::Cli::parse();
    wavetapctl::init_tracing();
    if let Err(err) = wavetapctl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
