use log::error;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    taxgate::main_module::init_logging();

    if let Err(e) = taxgate::main_module::run().await {
        error!("{e:#}");
        std::process::exit(1);
    }
}
