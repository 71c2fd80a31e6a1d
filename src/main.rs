#[tokio::main]
async fn main() {
    rtu_client::init_common();
    let matches = rtu_client::cli::parse_args();

    if let Err(err) = rtu_client::cli::actions::run(&matches).await {
        log::error!("{err:#}");
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
